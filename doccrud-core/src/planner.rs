//! Compiles [`FindQuery`] values into [`QueryDescriptor`]s.
//!
//! The planner knows nothing about a specific entity; everything entity-specific comes from a
//! [`FetchPolicy`]: the default sort, the logical → storage field remap table, the secret
//! fields and the fields holding identifiers.

use std::collections::BTreeSet;

use bson::{Bson, oid::ObjectId};
use tracing::debug;

use crate::{
    error::{CrudResult, FieldErrors},
    filter::{Filter, FilterOp},
    find::FindQuery,
    page::Pagination,
    query::{Expr, FieldOp, Projection, QueryDescriptor, Sort},
};

/// The store's native key name.
pub const ID_FIELD: &str = "_id";
/// The logical name callers use for the native key.
pub const LOGICAL_ID_FIELD: &str = "id";

/// Entity policy consumed by the planner.
pub trait FetchPolicy {
    /// Sort used when the caller supplies none, in storage field names.
    fn default_sort(&self) -> Sort;

    /// Logical → storage field names, for fields whose storage path differs.
    fn field_mapping(&self) -> &'static [(&'static str, &'static str)] {
        &[]
    }

    /// Storage fields never returned to callers.
    fn secret_fields(&self) -> &'static [&'static str] {
        &[]
    }

    /// Logical fields, besides `id`, whose values are native identifiers.
    fn id_fields(&self) -> &'static [&'static str] {
        &[]
    }
}

/// Translates a logical field name into its storage path.
pub fn storage_field(policy: &impl FetchPolicy, logical: &str) -> String {
    if logical == LOGICAL_ID_FIELD {
        return ID_FIELD.to_string();
    }

    policy
        .field_mapping()
        .iter()
        .find(|(from, _)| *from == logical)
        .map_or_else(|| logical.to_string(), |(_, to)| to.to_string())
}

/// Builds query descriptors for one engine configuration.
#[derive(Debug, Clone, Copy)]
pub struct QueryPlanner {
    max_page_size: u64,
}

impl QueryPlanner {
    pub fn new(max_page_size: u64) -> Self {
        Self { max_page_size }
    }

    pub fn max_page_size(&self) -> u64 {
        self.max_page_size
    }

    /// Plans `query` under `policy`.
    ///
    /// # Errors
    ///
    /// Returns a [`Validation`](crate::error::CrudError::Validation) error when a filter on an
    /// identifier field holds a value that is not a valid native identifier. Every such value
    /// is reported.
    pub fn plan(&self, query: &FindQuery, policy: &impl FetchPolicy) -> CrudResult<QueryDescriptor> {
        let descriptor = QueryDescriptor {
            pagination: Pagination::new(query.page, query.size, self.max_page_size),
            sort: self.sort(&query.sort, policy),
            projection: self.projection(&query.fields, policy),
            predicate: self.predicate(query, policy)?,
        };

        debug!(
            skip = descriptor.skip(),
            limit = descriptor.limit(),
            sort = ?descriptor.sort,
            projection = ?descriptor.projection,
            predicate = ?descriptor.predicate,
            "planned find query",
        );

        Ok(descriptor)
    }

    /// Sort keys in storage names, falling back to the policy default. The native key is
    /// appended as a final tie-breaker so pages never overlap.
    pub fn sort(&self, keys: &[String], policy: &impl FetchPolicy) -> Vec<Sort> {
        let mut sort = if keys.is_empty() {
            vec![policy.default_sort()]
        } else {
            keys.iter()
                .map(|key| {
                    let parsed = Sort::parse(key);
                    Sort { field: storage_field(policy, &parsed.field), direction: parsed.direction }
                })
                .collect()
        };

        if !sort.iter().any(|key| key.field == ID_FIELD) {
            sort.push(Sort::asc(ID_FIELD));
        }

        sort
    }

    /// Projection for the requested logical fields with every secret field removed.
    ///
    /// An explicit request for a secret field is dropped silently. When nothing is requested,
    /// or every requested field was secret, the projection excludes the secret fields.
    pub fn projection(&self, fields: &[String], policy: &impl FetchPolicy) -> Projection {
        let secret = policy.secret_fields();

        let included = fields
            .iter()
            .map(|field| storage_field(policy, field))
            .filter(|field| {
                !secret.iter().any(|s| field == s || field.starts_with(&format!("{s}.")))
            })
            .collect::<BTreeSet<_>>();

        // A path under an included ancestor collides with it on MongoDB.
        let included = included
            .iter()
            .filter(|field| !included.iter().any(|other| field.starts_with(&format!("{other}."))))
            .cloned()
            .collect::<BTreeSet<_>>();

        if included.is_empty() {
            Projection::Exclude(secret.iter().map(|s| s.to_string()).collect())
        } else {
            Projection::Include(included)
        }
    }

    /// Combines every filter of `query` into one predicate, `None` when there are none.
    pub fn predicate(&self, query: &FindQuery, policy: &impl FetchPolicy) -> CrudResult<Option<Expr>> {
        let mut errors = FieldErrors::new();
        let mut exprs = Vec::new();

        for (logical, filters) in &query.filters {
            let field = storage_field(policy, logical);
            let is_id = logical == LOGICAL_ID_FIELD || policy.id_fields().contains(&logical.as_str());

            for filter in filters {
                let value = if is_id {
                    match to_identifiers(filter) {
                        Ok(value) => value,
                        Err(messages) => {
                            errors.extend(logical.clone(), messages);
                            continue;
                        }
                    }
                } else {
                    filter.value.clone()
                };

                exprs.push(to_expr(&field, filter.op, value));
            }
        }

        errors.into_result()?;

        Ok(match exprs.len() {
            0 => None,
            1 => exprs.pop(),
            _ => Some(Expr::And(exprs)),
        })
    }
}

fn to_expr(field: &str, op: FilterOp, value: Bson) -> Expr {
    let field_op = match op {
        FilterOp::Eq => FieldOp::Eq,
        FilterOp::Ne => FieldOp::Ne,
        FilterOp::Gt => FieldOp::Gt,
        FilterOp::Gte => FieldOp::Gte,
        FilterOp::Lt => FieldOp::Lt,
        FilterOp::Lte => FieldOp::Lte,
        FilterOp::In => FieldOp::In,
        FilterOp::Nin => FieldOp::Nin,
        FilterOp::Regex => FieldOp::Regex,
        FilterOp::Exists => {
            return Expr::Exists(field.to_string(), matches!(value, Bson::Boolean(true)));
        }
        FilterOp::Text => {
            let search = match value {
                Bson::String(search) => search,
                other => other.to_string(),
            };
            return Expr::Text { field: field.to_string(), search };
        }
    };

    Expr::Field { field: field.to_string(), op: field_op, value }
}

/// Converts the operand of a filter on an identifier field into native identifiers.
/// Operands that are not identifier values (`exists` flags, patterns) are kept.
fn to_identifiers(filter: &Filter) -> Result<Bson, Vec<String>> {
    if matches!(filter.op, FilterOp::Exists | FilterOp::Regex | FilterOp::Text) {
        return Ok(filter.value.clone());
    }

    match &filter.value {
        Bson::Array(items) => {
            let mut errors = Vec::new();
            let mut ids = Vec::with_capacity(items.len());

            for item in items {
                match to_identifier(item) {
                    Ok(id) => ids.push(id),
                    Err(message) => errors.push(message),
                }
            }

            if errors.is_empty() { Ok(Bson::Array(ids)) } else { Err(errors) }
        }
        value => to_identifier(value).map_err(|message| vec![message]),
    }
}

fn to_identifier(value: &Bson) -> Result<Bson, String> {
    match value {
        Bson::ObjectId(_) => Ok(value.clone()),
        Bson::String(hex) => ObjectId::parse_str(hex)
            .map(Bson::ObjectId)
            .map_err(|_| format!("{hex} is not a valid object id")),
        other => Err(format!("{other} is not a valid object id")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::CrudError, query::SortDirection};

    struct PlacePolicy;

    impl FetchPolicy for PlacePolicy {
        fn default_sort(&self) -> Sort {
            Sort::desc("createdAt")
        }

        fn field_mapping(&self) -> &'static [(&'static str, &'static str)] {
            &[("locationLat", "location.lat"), ("locationLng", "location.lng")]
        }

        fn secret_fields(&self) -> &'static [&'static str] {
            &["embedding"]
        }

        fn id_fields(&self) -> &'static [&'static str] {
            &["creatorId"]
        }
    }

    fn planner() -> QueryPlanner {
        QueryPlanner::new(100)
    }

    #[test]
    fn pagination_is_clamped_and_skip_derived() -> anyhow::Result<()> {
        let descriptor = planner().plan(&FindQuery::new().page(0).size(0), &PlacePolicy)?;
        assert_eq!((descriptor.skip(), descriptor.limit()), (0, 100));

        let descriptor = planner().plan(&FindQuery::new().page(4).size(7), &PlacePolicy)?;
        assert_eq!((descriptor.skip(), descriptor.limit()), (21, 7));

        let descriptor = planner().plan(&FindQuery::new().page(2).size(1_000), &PlacePolicy)?;
        assert_eq!((descriptor.skip(), descriptor.limit()), (100, 100));
        Ok(())
    }

    #[test]
    fn default_sort_applies_without_keys() {
        let sort = planner().sort(&[], &PlacePolicy);

        assert_eq!(sort, vec![Sort::desc("createdAt"), Sort::asc("_id")]);
    }

    #[test]
    fn sort_keys_are_remapped() {
        let sort = planner().sort(&["-locationLat".to_string(), "id".to_string()], &PlacePolicy);

        assert_eq!(sort, vec![Sort::desc("location.lat"), Sort::asc("_id")]);
        assert_eq!(sort[0].direction, SortDirection::Desc);
    }

    #[test]
    fn secret_fields_never_projected() {
        let requested = vec!["title".to_string(), "embedding".to_string(), "id".to_string()];

        let projection = planner().projection(&requested, &PlacePolicy);

        assert_eq!(projection, Projection::Include(["_id".to_string(), "title".to_string()].into()));
        assert!(!projection.keeps("embedding"));
    }

    #[test]
    fn nested_paths_collapse_into_their_parent() {
        let requested = vec!["locationLat".to_string(), "location".to_string(), "locationLng".to_string()];

        let projection = planner().projection(&requested, &PlacePolicy);

        assert_eq!(projection, Projection::Include(["location".to_string()].into()));
        assert!(projection.keeps("location.lat"));
    }

    #[test]
    fn default_projection_excludes_secrets() {
        assert_eq!(
            planner().projection(&[], &PlacePolicy),
            Projection::Exclude(["embedding".to_string()].into()),
        );
        assert_eq!(
            planner().projection(&["embedding".to_string()], &PlacePolicy),
            Projection::Exclude(["embedding".to_string()].into()),
        );
    }

    #[test]
    fn filters_are_remapped_and_identifiers_converted() -> anyhow::Result<()> {
        let creator = ObjectId::new();
        let query = FindQuery::new()
            .filter("creatorId", Filter::eq(creator.to_hex()))
            .filter("locationLat", Filter::new(FilterOp::Gte, 1.5));

        let predicate = planner().predicate(&query, &PlacePolicy)?;

        assert_eq!(
            predicate,
            Some(Expr::And(vec![
                Expr::field("creatorId", FieldOp::Eq, creator),
                Expr::field("location.lat", FieldOp::Gte, 1.5),
            ])),
        );
        Ok(())
    }

    #[test]
    fn id_maps_to_native_key() -> anyhow::Result<()> {
        let id = ObjectId::new();
        let query = FindQuery::new().filter("id", Filter::new(FilterOp::In, Bson::Array(vec![id.to_hex().into()])));

        let predicate = planner().predicate(&query, &PlacePolicy)?;

        assert_eq!(predicate, Some(Expr::field("_id", FieldOp::In, Bson::Array(vec![Bson::ObjectId(id)]))));
        Ok(())
    }

    #[test]
    fn invalid_identifier_rejects_query() {
        let query = FindQuery::new()
            .filter("creatorId", Filter::eq("not-an-id"))
            .filter("title", Filter::eq("A perfectly fine title"));

        let Err(CrudError::Validation(errors)) = planner().plan(&query, &PlacePolicy) else {
            panic!("expected validation error");
        };

        assert_eq!(errors.get("creatorId"), Some(&["not-an-id is not a valid object id".to_string()][..]));
    }

    #[test]
    fn exists_and_text_become_dedicated_predicates() -> anyhow::Result<()> {
        let query = FindQuery::new()
            .filter("imageUrl", Filter::new(FilterOp::Exists, false))
            .filter("title", Filter::new(FilterOp::Text, "tower"));

        let predicate = planner().predicate(&query, &PlacePolicy)?;

        assert_eq!(
            predicate,
            Some(Expr::And(vec![
                Expr::Exists("imageUrl".to_string(), false),
                Expr::Text { field: "title".to_string(), search: "tower".to_string() },
            ])),
        );
        Ok(())
    }
}
