//! Query expression evaluation for in-memory document filtering.
//!
//! This module provides the evaluation engine for [`Expr`] predicates against raw documents,
//! plus the value ordering the store sorts by.

use std::{cmp::Ordering, collections::HashMap};

use bson::{Bson, DateTime, Document, oid::ObjectId};
use regex::Regex;

use doccrud_core::{
    error::CrudError,
    query::{Expr, FieldOp, QueryVisitor},
};

/// Type-erased, comparable representation of BSON values.
///
/// Numeric types are normalized to `f64` so integers and floats compare with each other.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    DateTime(DateTime),
    ObjectId(ObjectId),
    String(&'a str),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(f64::from(*value)),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::Array(arr) => Comparable::Array(arr.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter().map(|(k, v)| (k.as_str(), Comparable::from(v))).collect(),
            ),
            _ => Comparable::Null,
        }
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl Comparable<'_> {
    /// Position of the value's type in the cross-type sort order.
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 0,
            Comparable::Number(_) => 1,
            Comparable::String(_) => 2,
            Comparable::Map(_) => 3,
            Comparable::Array(_) => 4,
            Comparable::ObjectId(_) => 5,
            Comparable::Bool(_) => 6,
            Comparable::DateTime(_) => 7,
        }
    }
}

/// Resolves a dotted path inside `document`.
pub(crate) fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = current.as_document()?.get(segment)?;
    }

    Some(current)
}

/// Total order used for sorting. Missing values sort first, strings compare without regard to
/// case, and values of different types order by type.
pub(crate) fn sort_cmp(left: Option<&Bson>, right: Option<&Bson>) -> Ordering {
    let left = left.map_or(Comparable::Null, Comparable::from);
    let right = right.map_or(Comparable::Null, Comparable::from);

    match (&left, &right) {
        (Comparable::String(a), Comparable::String(b)) => a
            .to_lowercase()
            .cmp(&b.to_lowercase())
            .then_with(|| a.cmp(b)),
        _ => match left.partial_cmp(&right) {
            Some(ordering) => ordering,
            None => left.rank().cmp(&right.rank()),
        },
    }
}

/// Evaluates predicates against one document.
pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
    text_fields: &'a [String],
}

impl<'a> DocumentEvaluator<'a> {
    /// Creates an evaluator. `text_fields` are the collection's text-indexed fields; when empty,
    /// text search looks at the field named in the predicate.
    pub fn new(document: &'a Document, text_fields: &'a [String]) -> Self {
        Self { document, text_fields }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> Result<bool, CrudError> {
        self.visit_expr(expr)
    }

    /// Whether `document` matches `filter`; `None` matches everything.
    pub fn matches(document: &Document, filter: Option<&Expr>, text_fields: &[String]) -> Result<bool, CrudError> {
        match filter {
            Some(expr) => DocumentEvaluator::new(document, text_fields).evaluate(expr),
            None => Ok(true),
        }
    }

    fn equals(field_value: &Bson, value: &Bson) -> bool {
        let left = Comparable::from(field_value);
        let right = Comparable::from(value);

        if left == right {
            return true;
        }

        match left {
            Comparable::Array(items) => items.iter().any(|item| item == &right),
            _ => false,
        }
    }

    fn one_of(field_value: &Bson, values: &Bson) -> bool {
        match values {
            Bson::Array(candidates) => candidates.iter().any(|candidate| Self::equals(field_value, candidate)),
            single => Self::equals(field_value, single),
        }
    }

    fn compare(field_value: &Bson, op: FieldOp, value: &Bson) -> bool {
        let right = Comparable::from(value);
        let test = |left: &Comparable<'_>| match left.partial_cmp(&right) {
            Some(ordering) => match op {
                FieldOp::Gt => ordering == Ordering::Greater,
                FieldOp::Gte => ordering != Ordering::Less,
                FieldOp::Lt => ordering == Ordering::Less,
                FieldOp::Lte => ordering != Ordering::Greater,
                _ => false,
            },
            None => false,
        };

        match Comparable::from(field_value) {
            Comparable::Array(items) => items.iter().any(test),
            single => test(&single),
        }
    }

    fn regex(field_value: &Bson, pattern: &Bson) -> Result<bool, CrudError> {
        let pattern = match pattern {
            Bson::String(pattern) => pattern.as_str(),
            other => return Err(CrudError::Backend(format!("{other} is not a regular expression"))),
        };
        let regex = Regex::new(pattern).map_err(|e| CrudError::Backend(e.to_string()))?;

        Ok(match field_value {
            Bson::String(value) => regex.is_match(value),
            Bson::Array(items) => items.iter().any(|item| item.as_str().is_some_and(|s| regex.is_match(s))),
            _ => false,
        })
    }
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
}

impl QueryVisitor for DocumentEvaluator<'_> {
    type Output = bool;
    type Error = CrudError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if !self.visit_expr(expr)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if self.visit_expr(expr)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(lookup(self.document, field).is_some() == should_exist)
    }

    fn visit_field(&mut self, field: &str, op: FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let Some(field_value) = lookup(self.document, field) else {
            return Ok(matches!(op, FieldOp::Ne | FieldOp::Nin) || (op == FieldOp::Eq && value == &Bson::Null));
        };

        match op {
            FieldOp::Eq => Ok(Self::equals(field_value, value)),
            FieldOp::Ne => Ok(!Self::equals(field_value, value)),
            FieldOp::Gt | FieldOp::Gte | FieldOp::Lt | FieldOp::Lte => Ok(Self::compare(field_value, op, value)),
            FieldOp::In => Ok(Self::one_of(field_value, value)),
            FieldOp::Nin => Ok(!Self::one_of(field_value, value)),
            FieldOp::Regex => Self::regex(field_value, value),
        }
    }

    fn visit_text(&mut self, field: &str, search: &str) -> Result<Self::Output, Self::Error> {
        let terms: Vec<String> = words(search).collect();
        let fallback = [field.to_string()];
        let fields = if self.text_fields.is_empty() { &fallback[..] } else { self.text_fields };

        Ok(fields.iter().any(|field| match lookup(self.document, field) {
            Some(Bson::String(text)) => words(text).any(|word| terms.contains(&word)),
            _ => false,
        }))
    }
}
