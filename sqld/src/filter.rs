//! Filter parsing: query-string input to typed conditions.
//!
//! Keys select the field and operator, values are coerced by operator:
//!
//! | Key            | Field   | Operator          |
//! |----------------|---------|-------------------|
//! | `age[gte]`     | `age`   | `gte`             |
//! | `age_gte`      | `age`   | `gte`             |
//! | `user_name`    | `user_name` | default (`eq`) |
//! | `age[bogus]`   | `age`   | `eq`              |
//!
//! The underscore form only applies when the suffix is a known operator
//! token, so snake_case columns are never split by accident.
//!
//! ```
//! use sqld::{Config, Postgres, build_where_from_query};
//!
//! let config = Config::new().allow_fields(["name", "age"]);
//! let result = build_where_from_query("name[contains]=jo&age_gte=18&secret=x", Postgres, &config)
//!     .unwrap()
//!     .build();
//!
//! assert_eq!(result.sql, "age >= $1 AND name ILIKE $2");
//! ```

use crate::builder::{SearchMode, WhereBuilder, search_pattern};
use crate::config::Config;
use crate::dialect::Dialect;
use crate::error::{Error, FilterError};
use crate::order::{OrderByBuilder, is_sort_param, parse_sort_params};
use crate::value::Value;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Query-string shaped input: each key maps to all of its values.
///
/// Ordered, so filters are produced in key order and the `max_filters`
/// boundary is deterministic.
pub type QueryParams = BTreeMap<String, Vec<String>>;

/// Parse an `application/x-www-form-urlencoded` query string.
///
/// A leading `?` is ignored. Repeated keys keep every value.
pub fn parse_query_string(query: &str) -> QueryParams {
    let query = query.strip_prefix('?').unwrap_or(query);
    let mut params = QueryParams::new();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        params
            .entry(key.into_owned())
            .or_default()
            .push(value.into_owned());
    }
    params
}

/// Last non-empty value for `key`.
pub(crate) fn last_value<'a>(params: &'a QueryParams, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(|values| values.last())
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

// ═══════════════════════════════════════════════════════════════════════════
// OPERATORS
// ═══════════════════════════════════════════════════════════════════════════

/// Filter operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(try_from = "String")]
#[non_exhaustive]
pub enum Operator {
    /// `field = ?`
    #[default]
    Eq,
    /// `field != ?`
    Ne,
    /// `field > ?`
    Gt,
    /// `field >= ?`
    Gte,
    /// `field < ?`
    Lt,
    /// `field <= ?`
    Lte,
    /// `field LIKE ?`, pattern taken verbatim
    Like,
    /// Case-insensitive LIKE, pattern taken verbatim
    ILike,
    /// Case-insensitive `%value%`
    Contains,
    /// Negated [`Operator::Contains`]
    DoesNotContain,
    /// Case-insensitive `value%`
    StartsWith,
    /// Case-insensitive `%value`
    EndsWith,
    /// Negated [`Operator::StartsWith`]
    DoesNotStartWith,
    /// Negated [`Operator::EndsWith`]
    DoesNotEndWith,
    /// `field BETWEEN ? AND ?`
    Between,
    /// `field < ?` on a date
    Before,
    /// `field > ?` on a date
    After,
    /// `field IN (...)`
    In,
    /// `NOT field IN (...)`
    NotIn,
    /// `field IS NULL`
    IsNull,
    /// `field IS NOT NULL`
    IsNotNull,
}

impl Operator {
    /// Map a key token (case-insensitive) to an operator.
    pub fn from_token(token: &str) -> Option<Self> {
        let op = match token.to_ascii_lowercase().as_str() {
            "eq" => Self::Eq,
            "ne" | "neq" => Self::Ne,
            "gt" => Self::Gt,
            "gte" => Self::Gte,
            "lt" => Self::Lt,
            "lte" => Self::Lte,
            "like" => Self::Like,
            "ilike" => Self::ILike,
            "contains" | "includes" => Self::Contains,
            "notcontains" | "doesnotcontain" => Self::DoesNotContain,
            "sw" | "startswith" => Self::StartsWith,
            "ew" | "endswith" => Self::EndsWith,
            "notstartswith" | "doesnotstartswith" => Self::DoesNotStartWith,
            "notendswith" | "doesnotendwith" => Self::DoesNotEndWith,
            "between" => Self::Between,
            "before" => Self::Before,
            "after" => Self::After,
            "in" => Self::In,
            "notin" => Self::NotIn,
            "isnull" | "null" => Self::IsNull,
            "isnotnull" | "notnull" => Self::IsNotNull,
            _ => return None,
        };
        Some(op)
    }

    /// Canonical token.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Like => "like",
            Self::ILike => "ilike",
            Self::Contains => "contains",
            Self::DoesNotContain => "notcontains",
            Self::StartsWith => "startswith",
            Self::EndsWith => "endswith",
            Self::DoesNotStartWith => "notstartswith",
            Self::DoesNotEndWith => "notendswith",
            Self::Between => "between",
            Self::Before => "before",
            Self::After => "after",
            Self::In => "in",
            Self::NotIn => "notin",
            Self::IsNull => "isnull",
            Self::IsNotNull => "isnotnull",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Operator {
    type Error = String;

    fn try_from(token: String) -> Result<Self, Self::Error> {
        Self::from_token(&token).ok_or_else(|| format!("unknown filter operator '{token}'"))
    }
}

impl Serialize for Operator {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Filter condition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Filter {
    /// Column name, after field mapping.
    pub field: String,
    /// Comparison operator.
    pub op: Operator,
    /// Operand; arrays for `in`, `notin` and `between`.
    pub value: Value,
}

impl Filter {
    /// Create a filter.
    pub fn new(field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// PARSING
// ═══════════════════════════════════════════════════════════════════════════

/// Parse every key of `params` into filters.
///
/// Keys are processed in order. Disallowed fields (after mapping) are
/// dropped silently. Exceeding `max_filters` fails the whole parse.
pub fn parse_filters(params: &QueryParams, config: &Config) -> Result<Vec<Filter>, FilterError> {
    parse_filters_where(params, config, |_| true)
}

fn parse_filters_where(
    params: &QueryParams,
    config: &Config,
    include: impl Fn(&str) -> bool,
) -> Result<Vec<Filter>, FilterError> {
    let mut filters = Vec::new();

    for key in params.keys().filter(|k| include(k.as_str())) {
        let Some(raw) = last_value(params, key) else {
            continue;
        };

        let (field, op) = split_key(key, config.default_operator);
        let field = config.map_field(field);
        if !config.is_field_allowed(field) {
            debug!(field, "dropping filter on disallowed field");
            continue;
        }

        if filters.len() >= config.max_filters {
            return Err(FilterError::TooManyFilters {
                max: config.max_filters,
            });
        }

        let value = coerce_value(field, op, raw, &config.date_layout)?;
        filters.push(Filter::new(field, op, value));
    }

    Ok(filters)
}

/// Parse a raw query string into filters.
pub fn parse_filter_query(query: &str, config: &Config) -> Result<Vec<Filter>, FilterError> {
    parse_filters(&parse_query_string(query), config)
}

/// Split a key into field and operator.
fn split_key(key: &str, default: Operator) -> (&str, Operator) {
    if let Some((field, token)) = key.strip_suffix(']').and_then(|k| k.split_once('['))
        && !field.is_empty()
    {
        return (field, Operator::from_token(token).unwrap_or(Operator::Eq));
    }

    if let Some((field, token)) = key.rsplit_once('_')
        && !field.is_empty()
        && let Some(op) = Operator::from_token(token)
    {
        return (field, op);
    }

    (key, default)
}

fn coerce_value(field: &str, op: Operator, raw: &str, date_layout: &str) -> Result<Value, FilterError> {
    let value = match op {
        Operator::Between => {
            let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
            if parts.len() != 2 {
                return Err(FilterError::BetweenArity {
                    field: field.to_string(),
                    count: parts.len(),
                });
            }
            Value::Array(parts.into_iter().map(coerce_number).collect())
        },
        Operator::In | Operator::NotIn => Value::Array(
            raw.split(',')
                .map(|s| Value::String(s.trim().to_string()))
                .collect(),
        ),
        Operator::Before | Operator::After => {
            parse_date(raw, date_layout).map_or_else(|| Value::String(raw.to_string()), Value::Timestamp)
        },
        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => coerce_number(raw),
        Operator::IsNull | Operator::IsNotNull => Value::Null,
        _ => Value::String(raw.to_string()),
    };
    Ok(value)
}

/// Integer, then float, then the raw string.
fn coerce_number(raw: &str) -> Value {
    if let Ok(n) = raw.parse::<i64>() {
        return Value::Int(n);
    }
    if let Ok(f) = raw.parse::<f64>()
        && f.is_finite()
    {
        return Value::Float(f);
    }
    Value::String(raw.to_string())
}

/// Parse with a chrono format: zoned datetime, naive datetime (UTC), then a
/// bare date at midnight UTC.
fn parse_date(raw: &str, layout: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_str(raw, layout) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, layout) {
        return Some(dt.and_utc());
    }
    NaiveDate::parse_from_str(raw, layout)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

// ═══════════════════════════════════════════════════════════════════════════
// APPLICATION
// ═══════════════════════════════════════════════════════════════════════════

fn mismatch(filter: &Filter, expected: &'static str) -> FilterError {
    FilterError::TypeMismatch {
        field: filter.field.clone(),
        operator: filter.op.as_str(),
        expected,
        actual: filter.value.kind(),
    }
}

fn expect_string(filter: &Filter) -> Result<&str, FilterError> {
    filter.value.as_str().ok_or_else(|| mismatch(filter, "string"))
}

fn expect_scalar(filter: &Filter) -> Result<Value, FilterError> {
    match &filter.value {
        Value::Array(_) => Err(mismatch(filter, "scalar")),
        v => Ok(v.clone()),
    }
}

fn expect_list(filter: &Filter) -> Result<&[Value], FilterError> {
    match &filter.value {
        Value::Array(values) => Ok(values),
        _ => Err(mismatch(filter, "list")),
    }
}

/// Apply filters to a builder, one condition per filter.
pub fn apply_filters<D: Dialect>(
    filters: &[Filter],
    builder: WhereBuilder<D>,
) -> Result<WhereBuilder<D>, FilterError> {
    filters.iter().try_fold(builder, apply_filter)
}

fn apply_filter<D: Dialect>(b: WhereBuilder<D>, filter: &Filter) -> Result<WhereBuilder<D>, FilterError> {
    let field = filter.field.as_str();
    let b = match filter.op {
        Operator::Eq => b.equal(field, expect_scalar(filter)?),
        Operator::Ne => b.not_equal(field, expect_scalar(filter)?),
        Operator::Gt | Operator::After => b.greater_than(field, expect_scalar(filter)?),
        Operator::Gte => b.greater_or_equal(field, expect_scalar(filter)?),
        Operator::Lt | Operator::Before => b.less_than(field, expect_scalar(filter)?),
        Operator::Lte => b.less_or_equal(field, expect_scalar(filter)?),
        Operator::Like => b.like(field, expect_string(filter)?),
        Operator::ILike => b.ilike(field, expect_string(filter)?),
        Operator::Contains => b.ilike(field, search_pattern(expect_string(filter)?, SearchMode::Contains)),
        Operator::StartsWith => b.ilike(field, search_pattern(expect_string(filter)?, SearchMode::Prefix)),
        Operator::EndsWith => b.ilike(field, search_pattern(expect_string(filter)?, SearchMode::Suffix)),
        Operator::DoesNotContain => {
            b.not_ilike(field, search_pattern(expect_string(filter)?, SearchMode::Contains))
        },
        Operator::DoesNotStartWith => {
            b.not_ilike(field, search_pattern(expect_string(filter)?, SearchMode::Prefix))
        },
        Operator::DoesNotEndWith => {
            b.not_ilike(field, search_pattern(expect_string(filter)?, SearchMode::Suffix))
        },
        Operator::Between => match expect_list(filter)? {
            [lo, hi] => b.between(field, lo.clone(), hi.clone()),
            _ => return Err(mismatch(filter, "list of 2 values")),
        },
        Operator::In => b.in_list(field, expect_list(filter)?.iter().cloned()),
        Operator::NotIn => {
            let values = expect_list(filter)?;
            if values.is_empty() {
                b
            } else {
                let marks = vec!["?"; values.len()].join(", ");
                b.raw(&format!("NOT {field} IN ({marks})"), values.iter().cloned())
            }
        },
        Operator::IsNull => b.is_null(field),
        Operator::IsNotNull => b.is_not_null(field),
    };
    Ok(b)
}

// ═══════════════════════════════════════════════════════════════════════════
// CONVENIENCE
// ═══════════════════════════════════════════════════════════════════════════

/// Parse `params` and apply the filters to a fresh builder.
pub fn build_where<D: Dialect>(
    params: &QueryParams,
    dialect: D,
    config: &Config,
) -> Result<WhereBuilder<D>, FilterError> {
    let filters = parse_filters(params, config)?;
    apply_filters(&filters, WhereBuilder::new(dialect))
}

/// [`build_where`] over a raw query string.
pub fn build_where_from_query<D: Dialect>(
    query: &str,
    dialect: D,
    config: &Config,
) -> Result<WhereBuilder<D>, FilterError> {
    build_where(&parse_query_string(query), dialect, config)
}

/// Build both WHERE and ORDER BY from one parameter set.
///
/// Sort parameters (`sort`, `order_by`, `sort_<field>`, ...) are excluded
/// from filter parsing.
pub fn from_params_with_sort<D: Dialect>(
    params: &QueryParams,
    dialect: D,
    config: &Config,
) -> Result<(WhereBuilder<D>, OrderByBuilder), Error> {
    let filters = parse_filters_where(params, config, |key| !is_sort_param(key))?;
    let conditions = apply_filters(&filters, WhereBuilder::new(dialect))?;
    let order_by = config.validate_and_build(&parse_sort_params(params))?;
    Ok((conditions, order_by))
}

/// Debug dump of parsed filters as JSON.
pub fn filters_to_json(filters: &[Filter]) -> serde_json::Result<String> {
    serde_json::to_string(filters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{Postgres, Sqlite};

    fn params(pairs: &[(&str, &str)]) -> QueryParams {
        let mut p = QueryParams::new();
        for (k, v) in pairs {
            p.entry((*k).to_string()).or_default().push((*v).to_string());
        }
        p
    }

    #[test]
    fn test_operator_tokens() {
        assert_eq!(Operator::from_token("GTE"), Some(Operator::Gte));
        assert_eq!(Operator::from_token("neq"), Some(Operator::Ne));
        assert_eq!(Operator::from_token("includes"), Some(Operator::Contains));
        assert_eq!(Operator::from_token("doesnotendwith"), Some(Operator::DoesNotEndWith));
        assert_eq!(Operator::from_token("null"), Some(Operator::IsNull));
        assert_eq!(Operator::from_token("name"), None);
        for op in [Operator::Eq, Operator::DoesNotContain, Operator::IsNotNull] {
            assert_eq!(Operator::from_token(op.as_str()), Some(op));
        }
    }

    #[test]
    fn test_split_key() {
        assert_eq!(split_key("age[gte]", Operator::Eq), ("age", Operator::Gte));
        assert_eq!(split_key("age[GT]", Operator::Eq), ("age", Operator::Gt));
        assert_eq!(split_key("age[bogus]", Operator::Like), ("age", Operator::Eq));
        assert_eq!(split_key("created_at_gte", Operator::Eq), ("created_at", Operator::Gte));
        assert_eq!(split_key("user_name", Operator::Eq), ("user_name", Operator::Eq));
        assert_eq!(split_key("name", Operator::ILike), ("name", Operator::ILike));
        assert_eq!(split_key("_gt", Operator::Eq), ("_gt", Operator::Eq));
    }

    #[test]
    fn test_parse_query_string() {
        let p = parse_query_string("?a=1&b=x%20y&a=2&c=");
        assert_eq!(p["a"], vec!["1", "2"]);
        assert_eq!(p["b"], vec!["x y"]);
        assert_eq!(last_value(&p, "a"), Some("2"));
        assert_eq!(last_value(&p, "c"), None);
    }

    #[test]
    fn test_value_coercion() {
        let config = Config::new();
        let filters = parse_filters(
            &params(&[
                ("age_gt", "18"),
                ("score_lte", "4.5"),
                ("code_lt", "abc"),
                ("role[in]", "admin, user"),
                ("deleted_at[isnull]", "1"),
                ("name", "bob"),
            ]),
            &config,
        )
        .unwrap();

        let by_field: BTreeMap<_, _> = filters.iter().map(|f| (f.field.as_str(), f)).collect();
        assert_eq!(by_field["age"].value, Value::Int(18));
        assert_eq!(by_field["score"].value, Value::Float(4.5));
        assert_eq!(by_field["code"].value, Value::from("abc"));
        assert_eq!(by_field["role"].value, Value::from(vec!["admin", "user"]));
        assert_eq!(by_field["deleted_at"].value, Value::Null);
        assert_eq!(by_field["name"].op, Operator::Eq);
        assert_eq!(by_field["name"].value, Value::from("bob"));
    }

    #[test]
    fn test_date_coercion() {
        let config = Config::new();
        let filters = parse_filters(&params(&[("created_at[after]", "2024-01-15")]), &config).unwrap();
        let Value::Timestamp(ts) = &filters[0].value else {
            panic!("expected timestamp, got {:?}", filters[0].value);
        };
        assert_eq!(ts.to_rfc3339(), "2024-01-15T00:00:00+00:00");

        let filters = parse_filters(&params(&[("created_at[before]", "yesterday")]), &config).unwrap();
        assert_eq!(filters[0].value, Value::from("yesterday"));

        let config = Config::new().date_layout("%Y-%m-%dT%H:%M:%S");
        let filters = parse_filters(&params(&[("t[after]", "2024-01-15T10:30:00")]), &config).unwrap();
        assert!(matches!(filters[0].value, Value::Timestamp(_)));
    }

    #[test]
    fn test_between_arity() {
        let config = Config::new();
        let filters = parse_filters(&params(&[("age[between]", "10,20")]), &config).unwrap();
        assert_eq!(filters[0].value, Value::from(vec![10i64, 20]));

        for bad in ["10", "10,20,30"] {
            let err = parse_filters(&params(&[("age[between]", bad)]), &config).unwrap_err();
            assert!(matches!(err, FilterError::BetweenArity { ref field, .. } if field == "age"));
        }
    }

    #[test]
    fn test_mapping_and_allow_list() {
        let config = Config::new()
            .allow_fields(["full_name"])
            .field_mapping("name", "full_name");
        let filters = parse_filters(&params(&[("name", "x"), ("secret", "y")]), &config).unwrap();
        assert_eq!(filters, vec![Filter::new("full_name", Operator::Eq, "x")]);
    }

    #[test]
    fn test_empty_values_skipped() {
        let filters = parse_filters(&params(&[("name", ""), ("age", "3")]), &Config::new()).unwrap();
        assert_eq!(filters.len(), 1);
    }

    #[test]
    fn test_default_operator() {
        let config = Config::new().default_operator(Operator::Contains);
        let filters = parse_filters(&params(&[("name", "jo")]), &config).unwrap();
        assert_eq!(filters[0].op, Operator::Contains);
    }

    #[test]
    fn test_max_filters_boundary() {
        let config = Config::new().max_filters(2);
        assert_eq!(
            parse_filters(&params(&[("a", "1"), ("b", "2")]), &config).unwrap().len(),
            2
        );
        let err = parse_filters(&params(&[("a", "1"), ("b", "2"), ("c", "3")]), &config).unwrap_err();
        assert_eq!(err, FilterError::TooManyFilters { max: 2 });
    }

    #[test]
    fn test_apply_all_operators() {
        let filters = vec![
            Filter::new("a", Operator::Contains, "jo"),
            Filter::new("b", Operator::StartsWith, "jo"),
            Filter::new("c", Operator::EndsWith, "jo"),
            Filter::new("d", Operator::DoesNotContain, "jo"),
            Filter::new("e", Operator::NotIn, vec!["x", "y"]),
            Filter::new("f", Operator::Between, vec![1i64, 5]),
            Filter::new("g", Operator::IsNotNull, Value::Null),
            Filter::new("h", Operator::After, 3),
        ];
        let result = apply_filters(&filters, WhereBuilder::new(Postgres)).unwrap().build();
        assert_eq!(
            result.sql,
            "a ILIKE $1 AND b ILIKE $2 AND c ILIKE $3 AND NOT d ILIKE $4 \
             AND NOT e IN ($5, $6) AND f BETWEEN $7 AND $8 AND g IS NOT NULL AND h > $9"
        );
        assert_eq!(result.params[0], Value::from("%jo%"));
        assert_eq!(result.params[1], Value::from("jo%"));
        assert_eq!(result.params[2], Value::from("%jo"));
        assert_eq!(result.params.len(), 9);
    }

    #[test]
    fn test_apply_on_sqlite_uses_lower() {
        let filters = vec![Filter::new("name", Operator::DoesNotStartWith, "a")];
        let result = apply_filters(&filters, WhereBuilder::new(Sqlite)).unwrap().build();
        assert_eq!(result.sql, "NOT LOWER(name) LIKE LOWER(?)");
        assert_eq!(result.params, vec![Value::from("a%")]);
    }

    #[test]
    fn test_type_mismatch() {
        let err = apply_filters(
            &[Filter::new("name", Operator::Like, 5)],
            WhereBuilder::new(Postgres),
        )
        .unwrap_err();
        assert_eq!(
            err,
            FilterError::TypeMismatch {
                field: "name".into(),
                operator: "like",
                expected: "string",
                actual: "integer",
            }
        );

        let err = apply_filters(
            &[Filter::new("id", Operator::In, "1,2")],
            WhereBuilder::new(Postgres),
        )
        .unwrap_err();
        assert!(matches!(err, FilterError::TypeMismatch { expected: "list", .. }));
    }

    #[test]
    fn test_with_sort_excludes_sort_keys() {
        let config = Config::new();
        let p = parse_query_string("name=bob&sort=-created_at&sort_id=asc");
        let (conditions, order_by) = from_params_with_sort(&p, Postgres, &config).unwrap();
        assert_eq!(conditions.build().sql, "name = $1");
        assert_eq!(order_by.build(), "created_at DESC, id ASC");
    }

    #[test]
    fn test_filters_to_json() {
        let json = filters_to_json(&[Filter::new("age", Operator::Gte, 18)]).unwrap();
        assert_eq!(json, r#"[{"field":"age","op":"gte","value":18}]"#);
    }
}
