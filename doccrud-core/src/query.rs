//! Backing-store predicates and compiled query descriptors.
//!
//! [`Expr`] is the store-neutral predicate tree every backend understands. Backends translate
//! or evaluate it through the [`QueryVisitor`] trait, so the engine never builds store-native
//! query documents itself.
//!
//! [`QueryDescriptor`] bundles a predicate with pagination, sort order and projection. It is
//! only produced by the [`QueryPlanner`](crate::planner::QueryPlanner).
//!
//! # Example
//!
//! ```ignore
//! use doccrud::query::Predicate;
//!
//! let expr = Predicate::eq("creatorId", creator_id)
//!     .and(Predicate::gte("location.lat", 45.0));
//! ```

use std::collections::BTreeSet;

use bson::{Bson, oid::ObjectId};

use crate::{error::CrudError, page::Pagination};

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

impl SortDirection {
    /// The numeric form used by document stores (`1` or `-1`).
    pub fn as_i32(self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    /// The storage field name to sort by.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Self { field: field.into(), direction: SortDirection::Asc }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self { field: field.into(), direction: SortDirection::Desc }
    }

    /// Parses a caller sort key, where a leading `-` means descending.
    pub fn parse(key: &str) -> Self {
        match key.strip_prefix('-') {
            Some(field) => Self::desc(field),
            None => Self::asc(key),
        }
    }
}

/// Field comparison operators for predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    /// Equal to. On array fields, matches when any element is equal.
    Eq,
    /// Not equal to.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal to.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal to.
    Lte,
    /// Value is one of the array operand's elements.
    In,
    /// Value is none of the array operand's elements.
    Nin,
    /// String value matches the regular expression operand.
    Regex,
}

/// A predicate over stored documents.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Logical AND of multiple expressions (all must match).
    And(Vec<Expr>),
    /// Logical OR of multiple expressions (any must match).
    Or(Vec<Expr>),
    /// Checks if a field exists or doesn't exist.
    Exists(String, bool),
    /// Field comparison expression.
    Field {
        /// The storage field path (dotted for nested fields).
        field: String,
        /// The comparison operator.
        op: FieldOp,
        /// The value to compare against.
        value: Bson,
    },
    /// Full-text search. `field` names the searchable field the caller filtered on; stores with
    /// a collection-level text index may ignore it.
    Text {
        field: String,
        search: String,
    },
}

impl Expr {
    /// Creates a field comparison expression.
    pub fn field(field: impl Into<String>, op: FieldOp, value: impl Into<Bson>) -> Self {
        Expr::Field { field: field.into(), op, value: value.into() }
    }

    /// Combines this expression with another using logical AND.
    ///
    /// If this expression is already an AND, the other expression is appended
    /// to the list. Otherwise, a new AND expression is created.
    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut list) => {
                list.push(other);
                Expr::And(list)
            }
            _ => Expr::And(vec![self, other]),
        }
    }

    /// Combines this expression with another using logical OR.
    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut list) => {
                list.push(other);
                Expr::Or(list)
            }
            _ => Expr::Or(vec![self, other]),
        }
    }
}

/// Shorthand constructors for [`Expr`].
pub struct Predicate;

impl Predicate {
    /// Matches the document whose native key is `id`.
    pub fn id(id: ObjectId) -> Expr {
        Expr::field("_id", FieldOp::Eq, id)
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field, FieldOp::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field, FieldOp::Ne, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field, FieldOp::Gt, value)
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field, FieldOp::Gte, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field, FieldOp::Lt, value)
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field, FieldOp::Lte, value)
    }

    pub fn any_of(field: impl Into<String>, values: impl IntoIterator<Item = impl Into<Bson>>) -> Expr {
        Expr::field(field, FieldOp::In, Bson::Array(values.into_iter().map(Into::into).collect()))
    }

    pub fn exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), true)
    }

    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::And(exprs.into_iter().collect())
    }

    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Or(exprs.into_iter().collect())
    }
}

/// Which fields a fetch returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// Every field except the listed ones.
    Exclude(BTreeSet<String>),
    /// Only the listed fields. `_id` is returned only when listed.
    Include(BTreeSet<String>),
}

impl Projection {
    /// Whether a projection keeps `field` (a top-level or dotted storage path).
    pub fn keeps(&self, field: &str) -> bool {
        let covers = |listed: &String| {
            field == listed
                || field.starts_with(&format!("{listed}."))
                || listed.starts_with(&format!("{field}."))
        };

        match self {
            Projection::Exclude(fields) => !fields.iter().any(|listed| {
                field == listed || field.starts_with(&format!("{listed}."))
            }),
            Projection::Include(fields) => fields.iter().any(covers),
        }
    }
}

impl Default for Projection {
    fn default() -> Self {
        Projection::Exclude(BTreeSet::new())
    }
}

/// A fully planned single-collection query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescriptor {
    pub(crate) pagination: Pagination,
    pub(crate) sort: Vec<Sort>,
    pub(crate) projection: Projection,
    pub(crate) predicate: Option<Expr>,
}

impl QueryDescriptor {
    pub fn pagination(&self) -> Pagination {
        self.pagination
    }

    /// Number of matching documents to skip.
    pub fn skip(&self) -> u64 {
        self.pagination.skip()
    }

    /// Maximum number of documents to return.
    pub fn limit(&self) -> u64 {
        self.pagination.size()
    }

    pub fn sort(&self) -> &[Sort] {
        &self.sort
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn predicate(&self) -> Option<&Expr> {
        self.predicate.as_ref()
    }
}

/// Walks a predicate tree, producing a backend-specific result.
///
/// Backends implement this to translate predicates into their native query language, or to
/// evaluate predicates directly against stored documents.
pub trait QueryVisitor {
    type Output;
    type Error: Into<CrudError>;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error>;
    fn visit_field(&mut self, field: &str, op: FieldOp, value: &Bson) -> Result<Self::Output, Self::Error>;
    fn visit_text(&mut self, field: &str, search: &str) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Exists(field, should_exist) => self.visit_exists(field, *should_exist),
            Expr::Field { field, op, value } => self.visit_field(field, *op, value),
            Expr::Text { field, search } => self.visit_text(field, search),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_parse_reads_leading_dash() {
        assert_eq!(Sort::parse("-createdAt"), Sort::desc("createdAt"));
        assert_eq!(Sort::parse("title"), Sort::asc("title"));
    }

    #[test]
    fn and_flattens_into_existing_list() {
        let expr = Predicate::eq("a", 1).and(Predicate::eq("b", 2)).and(Predicate::eq("c", 3));

        match expr {
            Expr::And(list) => assert_eq!(list.len(), 3),
            other => panic!("unexpected expression {other:?}"),
        }
    }

    #[test]
    fn projection_keeps_nested_paths() {
        let include = Projection::Include(["location".to_string()].into());
        assert!(include.keeps("location.lat"));
        assert!(!include.keeps("title"));

        let include_leaf = Projection::Include(["location.lat".to_string()].into());
        assert!(include_leaf.keeps("location"));

        let exclude = Projection::Exclude(["embedding".to_string()].into());
        assert!(!exclude.keeps("embedding"));
        assert!(exclude.keeps("title"));
    }
}
