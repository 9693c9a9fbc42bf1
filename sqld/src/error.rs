//! Error types for parsing, composition and configuration.
//!
//! Each stage has its own error enum; [`Error`] wraps them so callers can use
//! a single `?` chain across filter parsing, sort validation, cursor decoding
//! and template processing.

use crate::pagination::CursorError;
use crate::validate::ValidationError;
use thiserror::Error;

/// Failure while parsing or applying filters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum FilterError {
    /// More filters were supplied than the configured maximum.
    #[error("too many filters (max {max})")]
    TooManyFilters {
        /// Configured maximum.
        max: usize,
    },
    /// A BETWEEN filter did not carry exactly two values.
    #[error("filter '{field}': BETWEEN requires exactly 2 values, got {count}")]
    BetweenArity {
        /// Filtered column.
        field: String,
        /// Values actually supplied.
        count: usize,
    },
    /// The value shape does not fit the operator.
    #[error("filter '{field}': operator '{operator}' expects {expected}, got {actual}")]
    TypeMismatch {
        /// Filtered column.
        field: String,
        /// Operator token, as in `age[gte]`.
        operator: &'static str,
        /// Value kind the operator needs.
        expected: &'static str,
        /// Value kind that was supplied.
        actual: &'static str,
    },
}

/// Failure while validating sort fields.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum SortError {
    /// More sort fields than the configured maximum.
    #[error("too many sort fields: {count} (max {max})")]
    TooManyFields {
        /// Fields requested.
        count: usize,
        /// Configured maximum.
        max: usize,
    },
    /// The field is not in the allow-list.
    #[error("sort field '{field}' is not allowed")]
    FieldNotAllowed {
        /// Requested sort field, before mapping.
        field: String,
    },
}

/// The template cannot carry the generated SQL.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum TemplateError {
    /// Conditions were produced but the template has nowhere to put them.
    #[error("template has no {marker} marker for the generated conditions")]
    MissingMarker {
        /// The marker that was looked for.
        marker: &'static str,
    },
}

/// Failure while loading a [`Config`](crate::Config).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    /// The TOML document is malformed or has unknown keys.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// The document parsed but a value is unusable.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level error for the crate.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bad filter input.
    #[error(transparent)]
    Filter(#[from] FilterError),
    /// Bad sort input.
    #[error(transparent)]
    Sort(#[from] SortError),
    /// Bad cursor token.
    #[error(transparent)]
    Cursor(#[from] CursorError),
    /// Rejected by a validation check.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The template cannot take the composed SQL.
    #[error(transparent)]
    Template(#[from] TemplateError),
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    /// The offending field, when the failure concerns one.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Filter(
                FilterError::BetweenArity { field, .. } | FilterError::TypeMismatch { field, .. },
            )
            | Self::Sort(SortError::FieldNotAllowed { field }) => Some(field),
            Self::Validation(err) => Some(&err.field),
            _ => None,
        }
    }

    /// Whether the failure was caused by request input rather than by the
    /// template or configuration. An HTTP layer maps these to 4xx.
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Filter(_) | Self::Sort(_) | Self::Cursor(_) | Self::Validation(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_extraction() {
        let err = Error::from(FilterError::BetweenArity {
            field: "age".into(),
            count: 1,
        });
        assert_eq!(err.field(), Some("age"));
        assert!(err.is_client_error());

        let err = Error::from(SortError::FieldNotAllowed {
            field: "password".into(),
        });
        assert_eq!(err.field(), Some("password"));
        assert_eq!(err.to_string(), "sort field 'password' is not allowed");
    }

    #[test]
    fn test_template_error_is_server_side() {
        let err = Error::from(TemplateError::MissingMarker {
            marker: "/* sqld:where */",
        });
        assert!(!err.is_client_error());
        assert_eq!(err.field(), None);
        assert_eq!(
            err.to_string(),
            "template has no /* sqld:where */ marker for the generated conditions"
        );
    }

    #[test]
    fn test_too_many_filters_message() {
        let err = FilterError::TooManyFilters { max: 50 };
        assert_eq!(err.to_string(), "too many filters (max 50)");
    }
}
