//! Filter and sort policy for one endpoint.
//!
//! Built once at startup, then shared read-only across requests. Can be
//! assembled in code or loaded from TOML:
//!
//! ```toml
//! allowed_fields = ["name", "email", "created_at"]
//! default_operator = "eq"
//! date_layout = "%Y-%m-%d"
//! max_filters = 20
//! max_sort_fields = 3
//! default_sort = ["-created_at", "id"]
//!
//! [field_mappings]
//! name = "full_name"
//! ```

use crate::error::{ConfigError, SortError};
use crate::filter::Operator;
use crate::order::{OrderByBuilder, SortField};
use crate::validate::validate_column_name;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Default maximum number of filters per request.
pub const DEFAULT_MAX_FILTERS: usize = 50;

/// Default maximum number of sort fields per request.
pub const DEFAULT_MAX_SORT_FIELDS: usize = 5;

/// Default chrono layout for `before` / `after` values.
pub const DEFAULT_DATE_LAYOUT: &str = "%Y-%m-%d";

/// Policy applied by filter and sort parsing.
///
/// # Security Note
///
/// An empty allow-list allows **every** field. For user input, always
/// provide an explicit allow-list so callers cannot filter or sort by
/// sensitive columns.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub(crate) allowed_fields: BTreeSet<String>,
    pub(crate) field_mappings: BTreeMap<String, String>,
    pub(crate) default_operator: Operator,
    pub(crate) date_layout: String,
    pub(crate) max_filters: usize,
    pub(crate) max_sort_fields: usize,
    pub(crate) default_sort: Vec<SortField>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            allowed_fields: BTreeSet::new(),
            field_mappings: BTreeMap::new(),
            default_operator: Operator::Eq,
            date_layout: DEFAULT_DATE_LAYOUT.to_string(),
            max_filters: DEFAULT_MAX_FILTERS,
            max_sort_fields: DEFAULT_MAX_SORT_FIELDS,
            default_sort: Vec::new(),
        }
    }
}

impl Config {
    /// Permissive defaults: every field allowed, no mappings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add fields to the allow-list.
    pub fn allow_fields<I>(mut self, fields: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.allowed_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Map an external name to a column.
    pub fn field_mapping(mut self, external: impl Into<String>, column: impl Into<String>) -> Self {
        self.field_mappings.insert(external.into(), column.into());
        self
    }

    /// Add several external-name to column mappings.
    pub fn field_mappings<I, K, V>(mut self, mappings: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.field_mappings
            .extend(mappings.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Operator for keys without an operator suffix.
    pub const fn default_operator(mut self, op: Operator) -> Self {
        self.default_operator = op;
        self
    }

    /// chrono format used for `before` / `after` values.
    pub fn date_layout(mut self, layout: impl Into<String>) -> Self {
        self.date_layout = layout.into();
        self
    }

    /// Maximum number of filters per request.
    pub const fn max_filters(mut self, max: usize) -> Self {
        self.max_filters = max;
        self
    }

    /// Maximum number of sort fields per request.
    pub const fn max_sort_fields(mut self, max: usize) -> Self {
        self.max_sort_fields = max;
        self
    }

    /// Sort used when a request does not specify one.
    pub fn default_sort(mut self, fields: impl IntoIterator<Item = SortField>) -> Self {
        self.default_sort = fields.into_iter().collect();
        self
    }

    /// `true` if the allow-list is empty or contains `field`.
    pub fn is_field_allowed(&self, field: &str) -> bool {
        self.allowed_fields.is_empty() || self.allowed_fields.contains(field)
    }

    /// Column for an external name. Unmapped names pass through.
    pub fn map_field<'a>(&'a self, field: &'a str) -> &'a str {
        self.field_mappings.get(field).map_or(field, String::as_str)
    }

    /// Validate requested sort fields and build the ORDER BY.
    ///
    /// - more than `max_sort_fields` fields fails
    /// - an empty request falls back to the default sort, silently skipping
    ///   defaults that are not allowed
    /// - otherwise the first disallowed field fails the call
    ///
    /// Surviving fields are mapped and kept in input order.
    pub fn validate_and_build(&self, fields: &[SortField]) -> Result<OrderByBuilder, SortError> {
        if fields.len() > self.max_sort_fields {
            return Err(SortError::TooManyFields {
                count: fields.len(),
                max: self.max_sort_fields,
            });
        }

        if fields.is_empty() {
            return Ok(self
                .default_sort
                .iter()
                .filter(|f| self.is_field_allowed(&f.field))
                .map(|f| SortField::new(self.map_field(&f.field), f.dir))
                .collect());
        }

        fields
            .iter()
            .map(|f| {
                if self.is_field_allowed(&f.field) {
                    Ok(SortField::new(self.map_field(&f.field), f.dir))
                } else {
                    Err(SortError::FieldNotAllowed {
                        field: f.field.clone(),
                    })
                }
            })
            .collect()
    }

    /// Parse a TOML document. Unknown keys are rejected.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.check()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Reject values that would make every request fail or leak raw text
    /// into SQL.
    fn check(&self) -> Result<(), ConfigError> {
        if self.date_layout.trim().is_empty() {
            return Err(ConfigError::Invalid("date_layout cannot be empty".into()));
        }
        if self.max_sort_fields == 0 {
            return Err(ConfigError::Invalid(
                "max_sort_fields must be at least 1".into(),
            ));
        }
        for column in self.field_mappings.values() {
            validate_column_name(column)
                .map_err(|e| ConfigError::Invalid(format!("field mapping '{column}': {}", e.message)))?;
        }
        Ok(())
    }
}
