//! Transport-agnostic find queries.
//!
//! A [`FindQuery`] is built once per request, either programmatically or from raw query
//! parameters through [`FindQuery::parse`], and handed to the planner. Parsing validates the
//! whole request against an entity's [`QuerySchema`] and reports every problem at once.

use std::collections::BTreeMap;

use crate::{
    error::{CrudResult, FieldErrors},
    filter::{FieldSpec, Filter, FilterCompiler},
};

/// Parameters that are not filters.
const PAGE: &str = "page";
const SIZE: &str = "size";
const SORT: &str = "sort";
const FIELDS: &str = "fields";

/// What an entity allows callers to filter, sort and select on. Names are logical field names.
#[derive(Debug, Clone, Default)]
pub struct QuerySchema {
    filters: Vec<FieldSpec>,
    sortable: Vec<String>,
    selectable: Vec<String>,
}

impl QuerySchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, spec: FieldSpec) -> Self {
        self.filters.push(spec);
        self
    }

    pub fn sortable<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.sortable.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn selectable<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.selectable.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.filters.iter().find(|spec| spec.name == name)
    }

    pub fn is_sortable(&self, name: &str) -> bool {
        self.sortable.iter().any(|field| field == name)
    }

    pub fn is_selectable(&self, name: &str) -> bool {
        self.selectable.iter().any(|field| field == name)
    }
}

/// A request to list records of one collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindQuery {
    /// Requested page; `0` means the first page.
    pub page: u64,
    /// Requested page size; `0` or an out-of-range value means the configured maximum.
    pub size: u64,
    /// Logical sort fields, a leading `-` meaning descending.
    pub sort: Vec<String>,
    /// Logical fields to project. Empty means every non-secret field.
    pub fields: Vec<String>,
    /// Compiled filters per logical field name.
    pub filters: BTreeMap<String, Vec<Filter>>,
}

impl FindQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, page: u64) -> Self {
        self.page = page;
        self
    }

    pub fn size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn sort_by(mut self, key: impl Into<String>) -> Self {
        self.sort.push(key.into());
        self
    }

    pub fn select(mut self, field: impl Into<String>) -> Self {
        self.fields.push(field.into());
        self
    }

    pub fn filter(mut self, field: impl Into<String>, filter: Filter) -> Self {
        self.add_filter(field, filter);
        self
    }

    /// Appends a filter for `field` after any the caller supplied.
    pub fn add_filter(&mut self, field: impl Into<String>, filter: Filter) {
        self.filters.entry(field.into()).or_default().push(filter);
    }

    /// Builds a query from raw key/value parameters.
    ///
    /// `page` and `size` must be non-negative integers. `sort` and `fields` are comma-separated
    /// and may repeat. Every other key names a filterable field; repeated keys supply several
    /// filter strings for the same field.
    ///
    /// # Errors
    ///
    /// Returns a [`Validation`](crate::error::CrudError::Validation) error holding every
    /// problem found, keyed by parameter name.
    pub fn parse<I, K, V>(params: I, schema: &QuerySchema) -> CrudResult<FindQuery>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut errors = FieldErrors::new();
        let mut query = FindQuery::new();
        let mut raw_filters: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for (key, value) in params {
            let (key, value) = (key.as_ref(), value.as_ref());

            match key {
                PAGE => match value.trim().parse::<u64>() {
                    Ok(page) => query.page = page,
                    Err(_) => errors.push(PAGE, "Page value must be a positive integer"),
                },
                SIZE => match value.trim().parse::<u64>() {
                    Ok(size) => query.size = size,
                    Err(_) => errors.push(SIZE, "Size value must be a positive integer"),
                },
                SORT => {
                    for field in split_list(value) {
                        if schema.is_sortable(field.trim_start_matches('-')) {
                            query.sort.push(field.to_string());
                        } else {
                            errors.push(SORT, format!("{field} is not a sortable field"));
                        }
                    }
                }
                FIELDS => {
                    for field in split_list(value) {
                        if schema.is_selectable(field) {
                            query.fields.push(field.to_string());
                        } else {
                            errors.push(FIELDS, format!("{field} is not a selectable field"));
                        }
                    }
                }
                field if schema.field(field).is_some() => {
                    raw_filters.entry(field.to_string()).or_default().push(value.to_string());
                }
                field => errors.push(field, format!("{field} is not a filterable field")),
            }
        }

        for (field, raw) in raw_filters {
            let Some(spec) = schema.field(&field) else { continue };

            match FilterCompiler::compile(spec, &raw) {
                Ok(filters) => {
                    query.filters.insert(field, filters);
                }
                Err(messages) => errors.extend(field, messages),
            }
        }

        errors.into_result()?;

        Ok(query)
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|item| !item.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::CrudError,
        filter::{FieldType, FilterOp, Rule},
    };

    fn schema() -> QuerySchema {
        QuerySchema::new()
            .filter(FieldSpec::new("title", FieldType::String).indexed().rule(Rule::MinLen(10)))
            .filter(FieldSpec::new("locationLat", FieldType::Float))
            .sortable(["createdAt", "title"])
            .selectable(["id", "title", "imageUrl"])
    }

    #[test]
    fn parses_full_request() -> anyhow::Result<()> {
        let params = [
            ("page", "2"),
            ("size", "25"),
            ("sort", "-createdAt,title"),
            ("fields", "id,title"),
            ("locationLat", "gte:10"),
            ("locationLat", "lt:20"),
            ("title", "text:eiffel"),
        ];

        let query = FindQuery::parse(params, &schema())?;

        assert_eq!(query.page, 2);
        assert_eq!(query.size, 25);
        assert_eq!(query.sort, vec!["-createdAt", "title"]);
        assert_eq!(query.fields, vec!["id", "title"]);
        assert_eq!(
            query.filters["locationLat"],
            vec![Filter::new(FilterOp::Gte, 10.0), Filter::new(FilterOp::Lt, 20.0)],
        );
        assert_eq!(query.filters["title"], vec![Filter::new(FilterOp::Text, "eiffel")]);
        Ok(())
    }

    #[test]
    fn collects_every_problem() {
        let params = [
            ("page", "-1"),
            ("size", "ten"),
            ("sort", "password"),
            ("fields", "embedding"),
            ("title", "short"),
            ("owner", "me"),
        ];

        let Err(CrudError::Validation(errors)) = FindQuery::parse(params, &schema()) else {
            panic!("expected validation error");
        };

        assert_eq!(
            errors.fields().collect::<Vec<_>>(),
            vec!["fields", "owner", "page", "size", "sort", "title"],
        );
        assert_eq!(errors.get("page"), Some(&["Page value must be a positive integer".to_string()][..]));
    }

    #[test]
    fn empty_parameters_give_default_query() -> anyhow::Result<()> {
        let query = FindQuery::parse(Vec::<(String, String)>::new(), &schema())?;

        assert_eq!(query, FindQuery::new());
        Ok(())
    }
}
