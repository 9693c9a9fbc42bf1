//! ORDER BY rendering and sort specification parsing.
//!
//! Three textual syntaxes are accepted and are interchangeable:
//!
//! ```
//! use sqld::{SortField, parse_sort_fields, parse_sort_list};
//!
//! let colon = parse_sort_fields("name:desc,email:asc");
//! let prefix = parse_sort_fields("-name,+email");
//! let list = parse_sort_list(["name:desc", "email:asc"]);
//!
//! assert_eq!(colon, vec![SortField::desc("name"), SortField::asc("email")]);
//! assert_eq!(colon, prefix);
//! assert_eq!(colon, list);
//! ```

use crate::config::Config;
use crate::error::SortError;
use crate::filter::{QueryParams, last_value};
use crate::validate::{ValidationError, validate_order_by};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Query parameter names that carry a sort specification, by precedence.
pub const SORT_PARAM_ALIASES: [&str; 5] = ["sort", "sort_by", "order_by", "orderby", "order"];

/// Prefix of the per-field form `sort_<field>=<dir>`.
const SORT_FIELD_PREFIX: &str = "sort_";

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Deserialize)]
#[serde(from = "String")]
pub enum SortDir {
    /// Ascending (default).
    #[default]
    Asc,
    /// Descending.
    Desc,
}

impl SortDir {
    /// Parse a direction token, case-insensitively.
    ///
    /// `desc`, `descending`, `-` and `d` mean descending. Anything else,
    /// including unknown tokens, is ascending.
    pub fn parse(token: &str) -> Self {
        match token.trim().to_ascii_lowercase().as_str() {
            "desc" | "descending" | "-" | "d" => Self::Desc,
            _ => Self::Asc,
        }
    }

    /// SQL keyword.
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl fmt::Display for SortDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl From<String> for SortDir {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl Serialize for SortDir {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_sql())
    }
}

/// Sort field with direction.
///
/// Deserializes from either a token (`"-created_at"`, `"name:asc"`) or a
/// table (`{ field = "name", dir = "desc" }`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "SortFieldRepr")]
pub struct SortField {
    /// Column or external field name.
    pub field: String,
    /// Direction.
    pub dir: SortDir,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SortFieldRepr {
    Token(String),
    Table {
        field: String,
        #[serde(default)]
        dir: SortDir,
    },
}

impl TryFrom<SortFieldRepr> for SortField {
    type Error = String;

    fn try_from(repr: SortFieldRepr) -> Result<Self, Self::Error> {
        match repr {
            SortFieldRepr::Token(token) => {
                Self::parse(&token).ok_or_else(|| format!("empty sort field '{token}'"))
            },
            SortFieldRepr::Table { field, dir } => Ok(Self::new(field, dir)),
        }
    }
}

impl SortField {
    /// Create a new sort field.
    pub fn new(field: impl Into<String>, dir: SortDir) -> Self {
        Self {
            field: field.into(),
            dir,
        }
    }

    /// Ascending sort on `field`.
    pub fn asc(field: impl Into<String>) -> Self {
        Self::new(field, SortDir::Asc)
    }

    /// Descending sort on `field`.
    pub fn desc(field: impl Into<String>) -> Self {
        Self::new(field, SortDir::Desc)
    }

    /// Parse one token: `-field`, `+field`, `field:dir` or `field`.
    ///
    /// Returns `None` when no field name remains.
    pub fn parse(token: &str) -> Option<Self> {
        let token = token.trim();
        let (field, dir) = if let Some(rest) = token.strip_prefix('-') {
            (rest, SortDir::Desc)
        } else if let Some(rest) = token.strip_prefix('+') {
            (rest, SortDir::Asc)
        } else if let Some((field, dir)) = token.split_once(':') {
            (field, SortDir::parse(dir))
        } else {
            (token, SortDir::Asc)
        };

        let field = field.trim();
        if field.is_empty() {
            return None;
        }
        Some(Self::new(field, dir))
    }
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field, self.dir)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// PARSING
// ═══════════════════════════════════════════════════════════════════════════

/// Parse a comma-joined sort specification. Empty tokens are skipped.
pub fn parse_sort_fields(spec: &str) -> Vec<SortField> {
    spec.split(',').filter_map(SortField::parse).collect()
}

/// Parse a pre-split list of sort tokens.
pub fn parse_sort_list<I>(tokens: I) -> Vec<SortField>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    tokens
        .into_iter()
        .flat_map(|t| parse_sort_fields(t.as_ref()))
        .collect()
}

/// Whether `key` is consumed by sort parsing rather than filter parsing.
pub fn is_sort_param(key: &str) -> bool {
    SORT_PARAM_ALIASES.contains(&key)
        || key
            .strip_prefix(SORT_FIELD_PREFIX)
            .is_some_and(|field| !field.is_empty())
}

/// Extract sort fields from request parameters.
///
/// The first alias in [`SORT_PARAM_ALIASES`] with a non-empty value wins.
/// Then `sort_<field>=<dir>` parameters are appended in key order.
pub fn parse_sort_params(params: &QueryParams) -> Vec<SortField> {
    let mut fields = SORT_PARAM_ALIASES
        .iter()
        .find_map(|alias| last_value(params, alias))
        .map(parse_sort_fields)
        .unwrap_or_default();

    for (key, values) in params {
        if SORT_PARAM_ALIASES.contains(&key.as_str()) {
            continue;
        }
        let Some(field) = key.strip_prefix(SORT_FIELD_PREFIX) else {
            continue;
        };
        if field.is_empty() {
            continue;
        }
        if let Some(dir) = values.last().filter(|v| !v.is_empty()) {
            fields.push(SortField::new(field, SortDir::parse(dir)));
        }
    }

    fields
}

/// Parse and validate the sort for a request.
pub fn parse_sort(params: &QueryParams, config: &Config) -> Result<OrderByBuilder, SortError> {
    config.validate_and_build(&parse_sort_params(params))
}

// ═══════════════════════════════════════════════════════════════════════════
// BUILDER
// ═══════════════════════════════════════════════════════════════════════════

/// Accumulates sort fields in append order.
///
/// Pure rendering: no validation and no deduplication. Field names are
/// inserted verbatim, so they must come from an allow-list
/// ([`Config::validate_and_build`]) or from code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderByBuilder {
    fields: Vec<SortField>,
}

impl OrderByBuilder {
    /// Create an empty builder.
    pub const fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Append a field.
    pub fn add(mut self, field: impl Into<String>, dir: SortDir) -> Self {
        self.fields.push(SortField::new(field, dir));
        self
    }

    /// Append an ascending field.
    pub fn asc(self, field: impl Into<String>) -> Self {
        self.add(field, SortDir::Asc)
    }

    /// Append a descending field.
    pub fn desc(self, field: impl Into<String>) -> Self {
        self.add(field, SortDir::Desc)
    }

    /// Remove all fields.
    pub fn clear(mut self) -> Self {
        self.fields.clear();
        self
    }

    /// `true` once any field was added.
    pub fn has_fields(&self) -> bool {
        !self.fields.is_empty()
    }

    /// Copy of the fields in render order.
    pub fn fields(&self) -> Vec<SortField> {
        self.fields.clone()
    }

    /// `f1 DIR1, f2 DIR2`, or an empty string.
    pub fn build(&self) -> String {
        self.fields
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `ORDER BY f1 DIR1, ...`, or an empty string.
    pub fn build_with_prefix(&self) -> String {
        if self.fields.is_empty() {
            return String::new();
        }
        format!("ORDER BY {}", self.build())
    }

    /// Run the ORDER BY heuristic over the rendered clause.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.fields.is_empty() {
            return Ok(());
        }
        validate_order_by(&self.build())
    }
}

impl FromIterator<SortField> for OrderByBuilder {
    fn from_iter<I: IntoIterator<Item = SortField>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}
