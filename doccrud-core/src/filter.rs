//! Typed filter compilation.
//!
//! Callers express filters as strings of the form `"<op>:<value>"`, or a bare `"<value>"`
//! meaning `eq`. The [`FilterCompiler`] turns every string supplied for one field into a typed
//! [`Filter`], checking the operator against the field's declared [`FieldType`], parsing the
//! operand, and running the field's secondary [`Rule`]s. All problems for a field are reported
//! together.
//!
//! ```ignore
//! use doccrud::filter::{FieldSpec, FieldType, FilterCompiler, Rule};
//!
//! let spec = FieldSpec::new("title", FieldType::String).indexed().rule(Rule::MinLen(10));
//! let filters = FilterCompiler::compile(&spec, &["ne:A long enough title", "text:paris"])?;
//! ```

use std::{fmt, str::FromStr, sync::LazyLock};

use bson::Bson;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use regex::Regex;

/// Filter operators accepted on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    Regex,
    Text,
    Exists,
}

impl FilterOp {
    pub const ALL: [FilterOp; 11] = [
        FilterOp::Eq,
        FilterOp::Ne,
        FilterOp::Gt,
        FilterOp::Gte,
        FilterOp::Lt,
        FilterOp::Lte,
        FilterOp::In,
        FilterOp::Nin,
        FilterOp::Regex,
        FilterOp::Text,
        FilterOp::Exists,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Ne => "ne",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::In => "in",
            FilterOp::Nin => "nin",
            FilterOp::Regex => "regex",
            FilterOp::Text => "text",
            FilterOp::Exists => "exists",
        }
    }

    /// Whether the operand is a comma-separated list.
    pub fn is_list(self) -> bool {
        matches!(self, FilterOp::In | FilterOp::Nin)
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FilterOp::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| format!("{s} is not a filter operation"))
    }
}

/// A single compiled filter on one field.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub op: FilterOp,
    /// Typed operand. `in`/`nin` hold an array, `exists` a boolean.
    pub value: Bson,
}

impl Filter {
    pub fn new(op: FilterOp, value: impl Into<Bson>) -> Self {
        Self { op, value: value.into() }
    }

    pub fn eq(value: impl Into<Bson>) -> Self {
        Self::new(FilterOp::Eq, value)
    }
}

/// Renders the filter back into its wire form.
impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.op, render_operand(&self.value))
    }
}

fn render_operand(value: &Bson) -> String {
    match value {
        Bson::String(s) => s.clone(),
        Bson::Array(items) => items.iter().map(render_operand).collect::<Vec<_>>().join(","),
        Bson::DateTime(dt) => dt.to_chrono().to_rfc3339_opts(SecondsFormat::AutoSi, true),
        Bson::ObjectId(id) => id.to_hex(),
        other => other.to_string(),
    }
}

/// Declared type of a filterable field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    Timestamp,
}

impl FieldType {
    /// Operators legal on this type.
    pub fn operators(self) -> &'static [FilterOp] {
        use FilterOp::*;

        match self {
            FieldType::String => &[Eq, Ne, Regex, Text, In, Nin, Exists],
            FieldType::Integer | FieldType::Float | FieldType::Timestamp => {
                &[Eq, Ne, Gt, Gte, Lt, Lte, In, Nin, Exists]
            }
            FieldType::Boolean => &[Eq, Ne, Exists],
        }
    }
}

static EMAIL: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$"));

/// Secondary validation applied to every parsed operand of a field.
#[derive(Debug, Clone)]
pub enum Rule {
    /// Minimum string length, in characters.
    MinLen(usize),
    /// Maximum string length, in characters.
    MaxLen(usize),
    /// Exact string length, in characters.
    Len(usize),
    /// String made of hexadecimal digits only.
    Hexadecimal,
    /// Loosely shaped e-mail address.
    Email,
    /// String equal to one of the listed values.
    OneOf(Vec<String>),
    /// Numeric lower bound, inclusive.
    Min(f64),
    /// Numeric upper bound, inclusive.
    Max(f64),
    /// String matching a regular expression.
    Pattern(Regex),
}

impl Rule {
    /// Checks one operand, returning a message when it violates the rule. Operands of a type the
    /// rule does not apply to pass.
    pub fn check(&self, field: &str, value: &Bson) -> Option<String> {
        match (self, value) {
            (Rule::MinLen(min), Bson::String(s)) if s.chars().count() < *min => {
                Some(format!("{field} must be at least {min} characters long"))
            }
            (Rule::MaxLen(max), Bson::String(s)) if s.chars().count() > *max => {
                Some(format!("{field} must be at most {max} characters long"))
            }
            (Rule::Len(len), Bson::String(s)) if s.chars().count() != *len => {
                Some(format!("{field} must be exactly {len} characters long"))
            }
            (Rule::Hexadecimal, Bson::String(s))
                if s.is_empty() || !s.chars().all(|c| c.is_ascii_hexdigit()) =>
            {
                Some(format!("{field} must be a hexadecimal string"))
            }
            (Rule::Email, Bson::String(s)) => match EMAIL.as_ref() {
                Ok(email) if email.is_match(s) => None,
                _ => Some(format!("{s} is not a valid email address")),
            },
            (Rule::OneOf(allowed), Bson::String(s)) if !allowed.contains(s) => {
                Some(format!("{field} must be one of {}", allowed.join(", ")))
            }
            (Rule::Min(min), value) => match as_f64(value) {
                Some(n) if n < *min => Some(format!("{field} must be at least {min}")),
                _ => None,
            },
            (Rule::Max(max), value) => match as_f64(value) {
                Some(n) if n > *max => Some(format!("{field} must be at most {max}")),
                _ => None,
            },
            (Rule::Pattern(pattern), Bson::String(s)) if !pattern.is_match(s) => {
                Some(format!("{field} must match {}", pattern.as_str()))
            }
            _ => None,
        }
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

/// Declaration of one filterable field.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    /// Whether `text` search is allowed on the field.
    pub indexed: bool,
    pub rules: Vec<Rule>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self { name: name.into(), field_type, indexed: false, rules: Vec::new() }
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }
}

/// Compiles filter strings into typed [`Filter`]s.
pub struct FilterCompiler;

impl FilterCompiler {
    /// Compiles every filter string supplied for one field.
    ///
    /// Operator combination rules apply across the whole list: `eq` may not be combined with
    /// any other operator, and each operator may appear at most once.
    ///
    /// # Errors
    ///
    /// Returns every message collected for the field when any string fails to compile, an
    /// operand violates a rule, or the operator combination is illegal.
    pub fn compile<S: AsRef<str>>(spec: &FieldSpec, raw: &[S]) -> Result<Vec<Filter>, Vec<String>> {
        let mut errors = Vec::new();
        let mut filters = Vec::with_capacity(raw.len());
        let mut used: Vec<FilterOp> = Vec::with_capacity(raw.len());

        for expression in raw {
            match Self::compile_one(spec, expression.as_ref()) {
                Ok(filter) => {
                    if used.contains(&filter.op) {
                        errors.push(format!(
                            "cannot use an operator twice for the same field. {} used multiple times",
                            filter.op,
                        ));
                    } else {
                        used.push(filter.op);
                    }
                    filters.push(filter);
                }
                Err(messages) => errors.extend(messages),
            }
        }

        if used.contains(&FilterOp::Eq) && used.len() > 1 {
            let others = used
                .iter()
                .filter(|op| **op != FilterOp::Eq)
                .map(|op| op.as_str())
                .collect::<Vec<_>>();

            errors.push(format!(
                "eq can only be used exclusively. {} used at the same time",
                others.join(", "),
            ));
        }

        if errors.is_empty() { Ok(filters) } else { Err(errors) }
    }

    /// Compiles a single filter string.
    ///
    /// The text before the first `:` is read as the operator only when it names one; any other
    /// string, including ones containing `:`, is an `eq` operand.
    pub fn compile_one(spec: &FieldSpec, expression: &str) -> Result<Filter, Vec<String>> {
        let (op, operand) = match expression.split_once(':') {
            Some((op, operand)) => match op.parse::<FilterOp>() {
                Ok(op) => (op, operand),
                Err(_) => (FilterOp::Eq, expression),
            },
            None => (FilterOp::Eq, expression),
        };

        let legal = spec.field_type.operators();
        if !legal.contains(&op) {
            let names = legal.iter().map(|op| op.as_str()).collect::<Vec<_>>();

            return Err(vec![format!(
                "wrong filter operation for {} param. {op} is not among {}",
                spec.name,
                names.join(", "),
            )]);
        }

        let value = match op {
            FilterOp::Exists => Bson::Boolean(parse_bool(operand)),
            FilterOp::Text if !spec.indexed => {
                return Err(vec![format!("you cannot use text filter for field {}", spec.name)]);
            }
            FilterOp::Text => Bson::String(operand.to_string()),
            FilterOp::Regex => match Regex::new(operand) {
                Ok(_) => Bson::String(operand.to_string()),
                Err(_) => return Err(vec![format!("{operand} is not a valid regular expression")]),
            },
            FilterOp::In | FilterOp::Nin => {
                let mut errors = Vec::new();
                let mut items = Vec::new();

                for element in operand.split(',') {
                    match parse_scalar(spec.field_type, element) {
                        Ok(item) => items.push(item),
                        Err(message) => errors.push(message),
                    }
                }

                if !errors.is_empty() {
                    return Err(errors);
                }
                Bson::Array(items)
            }
            _ => parse_scalar(spec.field_type, operand).map_err(|message| vec![message])?,
        };

        let filter = Filter { op, value };
        let violations = Self::check_rules(spec, &filter);

        if violations.is_empty() { Ok(filter) } else { Err(violations) }
    }

    /// Runs the field's rules against every comparison operand of `filter`. Pattern operands
    /// (`regex`, `text`) and `exists` flags are not field values and skip the rules.
    fn check_rules(spec: &FieldSpec, filter: &Filter) -> Vec<String> {
        if matches!(filter.op, FilterOp::Exists | FilterOp::Regex | FilterOp::Text) {
            return Vec::new();
        }

        let operands = match &filter.value {
            Bson::Array(items) => items.iter().collect::<Vec<_>>(),
            value => vec![value],
        };

        operands
            .into_iter()
            .flat_map(|operand| spec.rules.iter().filter_map(|rule| rule.check(&spec.name, operand)))
            .collect()
    }
}

fn parse_scalar(field_type: FieldType, raw: &str) -> Result<Bson, String> {
    match field_type {
        FieldType::String => Ok(Bson::String(raw.to_string())),
        FieldType::Integer => raw
            .trim()
            .parse::<i64>()
            .map(Bson::Int64)
            .map_err(|_| format!("{raw} is not a valid integer")),
        FieldType::Float => raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(Bson::Double)
            .ok_or_else(|| format!("{raw} is not a valid float")),
        FieldType::Boolean => Ok(Bson::Boolean(parse_bool(raw))),
        FieldType::Timestamp => parse_timestamp(raw)
            .map(|dt| Bson::DateTime(bson::DateTime::from_chrono(dt)))
            .ok_or_else(|| format!("{raw} is not a valid datetime")),
    }
}

/// Permissive boolean parsing: `true`, `1`, `t`, `y` and `yes` (any case) are true, everything
/// else is false.
pub fn parse_bool(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "true" | "1" | "t" | "y" | "yes")
}

/// Parses a timestamp in RFC 3339 or one of the short `YYYY-MM-DD[ HH:MM[:SS]][±HH:MM]`
/// layouts. Values without an offset are read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%:z") {
        return Some(dt.with_timezone(&Utc));
    }
    if let Some(naive) = raw.strip_suffix('Z').and_then(|s| {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok()
    }) {
        return Some(naive.and_utc());
    }

    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|layout| NaiveDateTime::parse_from_str(raw, layout).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn title() -> FieldSpec {
        FieldSpec::new("title", FieldType::String).indexed().rule(Rule::MinLen(10))
    }

    #[test]
    fn bare_value_means_eq() {
        let spec = FieldSpec::new("name", FieldType::String);

        let compiled = FilterCompiler::compile(&spec, &["x"]).unwrap();

        assert_eq!(compiled, vec![Filter::eq("x")]);
        assert_eq!(compiled[0], Filter { op: FilterOp::Eq, value: Bson::String("x".into()) });
        assert_eq!(compiled[0].to_string(), "eq:x");
    }

    #[test]
    fn eq_combined_with_other_operator_fails_in_any_order() {
        let spec = FieldSpec::new("count", FieldType::Integer);

        for raw in [vec!["eq:3", "gt:1"], vec!["gt:1", "eq:3"], vec!["lt:9", "3"]] {
            let errors = FilterCompiler::compile(&spec, &raw).unwrap_err();
            assert!(
                errors.iter().any(|e| e.contains("used exclusively")),
                "{raw:?} produced {errors:?}",
            );
        }
    }

    #[test]
    fn repeated_operator_fails() {
        let spec = FieldSpec::new("count", FieldType::Integer);

        let errors = FilterCompiler::compile(&spec, &["gt:1", "gt:4"]).unwrap_err();

        assert_eq!(
            errors,
            vec!["cannot use an operator twice for the same field. gt used multiple times".to_string()],
        );
    }

    #[test]
    fn range_operators_combine() {
        let spec = FieldSpec::new("locationLat", FieldType::Float);

        let compiled = FilterCompiler::compile(&spec, &["gte:10.5", "lt:20"]).unwrap();

        assert_eq!(compiled, vec![Filter::new(FilterOp::Gte, 10.5), Filter::new(FilterOp::Lt, 20.0)]);
    }

    #[test]
    fn in_list_reports_every_bad_element() {
        let spec = FieldSpec::new("count", FieldType::Integer);

        let errors = FilterCompiler::compile(&spec, &["in:1,x,3,y"]).unwrap_err();

        assert_eq!(errors, vec!["x is not a valid integer".to_string(), "y is not a valid integer".to_string()]);
    }

    #[test]
    fn in_list_parses_typed_elements() {
        let spec = FieldSpec::new("count", FieldType::Integer);

        let compiled = FilterCompiler::compile_one(&spec, "nin:1,2").unwrap();

        assert_eq!(compiled.value, Bson::Array(vec![Bson::Int64(1), Bson::Int64(2)]));
    }

    #[test]
    fn text_requires_indexed_field() {
        let spec = FieldSpec::new("address", FieldType::String);

        let errors = FilterCompiler::compile(&spec, &["text:paris"]).unwrap_err();

        assert_eq!(errors, vec!["you cannot use text filter for field address".to_string()]);
        assert!(FilterCompiler::compile(&title(), &["text:paris"]).is_ok());
    }

    #[test]
    fn operator_must_be_legal_for_type() {
        let spec = FieldSpec::new("isAdmin", FieldType::Boolean);

        let errors = FilterCompiler::compile(&spec, &["gt:true"]).unwrap_err();

        assert_eq!(
            errors,
            vec!["wrong filter operation for isAdmin param. gt is not among eq, ne, exists".to_string()],
        );
    }

    #[test]
    fn exists_uses_permissive_boolean() {
        let spec = FieldSpec::new("imageUrl", FieldType::String);

        for (raw, expected) in [("exists:yes", true), ("exists:T", true), ("exists:1", true), ("exists:nope", false)] {
            let filter = FilterCompiler::compile_one(&spec, raw).unwrap();
            assert_eq!(filter.value, Bson::Boolean(expected), "{raw}");
        }
    }

    #[test]
    fn rules_run_on_every_operand_and_aggregate() {
        let errors = FilterCompiler::compile(&title(), &["in:short,tiny,long enough title"]).unwrap_err();

        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e == "title must be at least 10 characters long"));
    }

    #[test]
    fn all_errors_for_a_field_are_reported() {
        let errors = FilterCompiler::compile(&title(), &["short", "ne:tiny", "gt:x"]).unwrap_err();

        assert_eq!(errors.len(), 3, "{errors:?}");
    }

    #[test]
    fn colon_inside_bare_value_stays_eq() {
        let spec = FieldSpec::new("createdAt", FieldType::Timestamp);

        let filter = FilterCompiler::compile_one(&spec, "2024-05-01 10:30").unwrap();

        assert_eq!(filter.op, FilterOp::Eq);
        assert!(matches!(filter.value, Bson::DateTime(_)));
    }

    #[test]
    fn timestamp_layouts() {
        for raw in [
            "2024-05-01T10:30:00Z",
            "2024-05-01 10:30:00+02:00",
            "2024-05-01 10:30:00Z",
            "2024-05-01 10:30:00",
            "2024-05-01 10:30",
            "2024-05-01",
        ] {
            assert!(parse_timestamp(raw).is_some(), "{raw}");
        }

        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn invalid_regex_is_rejected() {
        let spec = FieldSpec::new("name", FieldType::String);

        assert!(FilterCompiler::compile_one(&spec, "regex:^(ab").is_err());
        assert!(FilterCompiler::compile_one(&spec, "regex:^ab").is_ok());
    }
}
