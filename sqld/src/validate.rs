//! Security validation layer for identifiers and rendered SQL.
//!
//! Parameterization is the primary defense: values never reach the SQL text.
//! The checks here are a best-effort second line for the places where text
//! *does* reach SQL (column names, ORDER BY clauses, raw fragments):
//!
//! - [`is_valid_sql_identifier`]: strict identifier grammar
//! - [`validate_column_name`], [`validate_table_name`], [`validate_order_by`]:
//!   injection-pattern heuristics
//! - [`validate_query`]: rejects stacked statements
//! - [`QueryValidator`]: the swappable pass run by the annotation processor
//!
//! Passing a check is not proof of safety, and failing one is not proof of
//! malice.
//!
//! # Example
//!
//! ```
//! use sqld::{Postgres, sanitize_identifier, validate_column_name};
//!
//! assert!(validate_column_name("users.email").is_ok());
//! assert!(validate_column_name("name; DROP TABLE users").is_err());
//! assert_eq!(sanitize_identifier("user-name", Postgres), "\"username\"");
//! ```

use crate::dialect::Dialect;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════
// PATTERNS
// ═══════════════════════════════════════════════════════════════════════════

/// Maximum length for SQL identifiers (`PostgreSQL` limit is 63).
const MAX_IDENTIFIER_LENGTH: usize = 63;

/// `name` or `schema.name`.
#[allow(clippy::expect_used)]
static QUALIFIED_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*(\.[a-zA-Z_][a-zA-Z0-9_]*)?$")
        .expect("qualified name pattern is valid")
});

/// Characters stripped by [`sanitize_identifier`].
#[allow(clippy::expect_used)]
static UNSAFE_IDENT_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^a-zA-Z0-9_.]").expect("identifier charset pattern is valid")
});

/// Injection-shaped fragments.
#[allow(clippy::expect_used)]
static INJECTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // comment sequences
        r"(?i)(--|#|/\*|\*/)",
        // UNION-based
        r"(?i)\bUNION\b.*\bSELECT\b",
        // stacked statements
        r";\s*(SELECT|INSERT|UPDATE|DELETE|DROP|CREATE|ALTER)",
        // time-based
        r"(?i)(SLEEP|WAITFOR|BENCHMARK|pg_sleep)",
        // boolean tautologies
        r#"(?i)(\bOR\b|\bAND\b)\s+(['"]?)[\w\s]+['"]?\s*=\s*['"]?[\w\s]+['"]?"#,
        // string functions
        r"(?i)(CONCAT|CHAR|ASCII|SUBSTRING|LENGTH|HEX|UNHEX)",
        // system functions
        r"(?i)(VERSION|DATABASE|USER|CURRENT_USER|SESSION_USER|@@version)",
        // file operations
        r"(?i)(LOAD_FILE|INTO\s+OUTFILE|INTO\s+DUMPFILE)",
        // extended procedures
        r"(?i)(xp_cmdshell|sp_configure|sp_addextendedproc)",
    ]
    .into_iter()
    .map(|p| Regex::new(p).expect("injection pattern is valid"))
    .collect()
});

// ═══════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════

/// What kind of check rejected the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationKind {
    /// Required input was empty.
    Empty,
    /// The input matched a known injection pattern.
    Injection,
    /// The input does not follow the expected grammar.
    Format,
    /// More than one statement was found.
    MultipleStatements,
}

/// A rejected identifier, clause or query.
///
/// Carries enough context (field, offending value, message) for an HTTP layer
/// to build a precise client error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// What was being validated (`column`, `table`, `orderBy`, `query`, ...).
    pub field: String,
    /// The offending input, when it is safe to echo back.
    pub value: Option<String>,
    /// Human-readable reason.
    pub message: String,
    /// Which check failed.
    pub kind: ValidationKind,
}

impl ValidationError {
    /// Create a validation error without an offending value.
    pub fn new(field: impl Into<String>, kind: ValidationKind, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: None,
            message: message.into(),
            kind,
        }
    }

    /// Attach the offending value.
    #[must_use]
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SQL IDENTIFIER VALIDATION
// ═══════════════════════════════════════════════════════════════════════════

/// Validate that a string is a safe, unqualified SQL identifier.
///
/// A valid SQL identifier:
/// - Starts with a letter (a-z, A-Z) or underscore
/// - Contains only letters, digits (0-9), and underscores
/// - Is not empty and not longer than 63 characters
///
/// # Examples
///
/// ```
/// use sqld::is_valid_sql_identifier;
///
/// assert!(is_valid_sql_identifier("users"));
/// assert!(is_valid_sql_identifier("_private"));
///
/// assert!(!is_valid_sql_identifier(""));           // empty
/// assert!(!is_valid_sql_identifier("123abc"));     // starts with digit
/// assert!(!is_valid_sql_identifier("user.id"));    // contains dot
/// assert!(!is_valid_sql_identifier("user; DROP")); // contains special chars
/// ```
#[inline]
#[must_use]
pub fn is_valid_sql_identifier(s: &str) -> bool {
    if s.is_empty() || s.len() > MAX_IDENTIFIER_LENGTH {
        return false;
    }

    let mut chars = s.chars();

    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {},
        _ => return false,
    }

    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Check a column name or column expression.
///
/// Plain and `table.column` names (optionally double-quoted) pass directly.
/// Anything else is treated as an expression: it is rejected if it matches an
/// injection pattern or contains `;`, `-`, `/` or `*`, and allowed otherwise.
pub fn validate_column_name(column: &str) -> Result<(), ValidationError> {
    if column.is_empty() {
        return Err(ValidationError::new(
            "column",
            ValidationKind::Empty,
            "column name cannot be empty",
        ));
    }

    if QUALIFIED_NAME.is_match(column.trim_matches('"')) {
        return Ok(());
    }

    if INJECTION_PATTERNS.iter().any(|p| p.is_match(column)) {
        return Err(ValidationError::new(
            "column",
            ValidationKind::Injection,
            "potential SQL injection detected in column name",
        )
        .with_value(column));
    }

    if column.contains([';', '-', '/', '*']) {
        return Err(ValidationError::new(
            "column",
            ValidationKind::Injection,
            "unsafe characters in column name",
        )
        .with_value(column));
    }

    Ok(())
}

/// Check a `table` or `schema.table` name (optionally double-quoted).
pub fn validate_table_name(table: &str) -> Result<(), ValidationError> {
    if table.is_empty() {
        return Err(ValidationError::new(
            "table",
            ValidationKind::Empty,
            "table name cannot be empty",
        ));
    }

    if !QUALIFIED_NAME.is_match(table.trim_matches('"')) {
        return Err(ValidationError::new(
            "table",
            ValidationKind::Format,
            "invalid table name format",
        )
        .with_value(table));
    }

    Ok(())
}

/// Check an ORDER BY field list of the form `col [ASC|DESC], ...`.
///
/// The `ORDER BY` keyword itself must not be included.
pub fn validate_order_by(clause: &str) -> Result<(), ValidationError> {
    if clause.is_empty() {
        return Err(ValidationError::new(
            "orderBy",
            ValidationKind::Empty,
            "order by clause cannot be empty",
        ));
    }

    for part in clause.split(',') {
        let part = part.trim();
        let tokens: Vec<&str> = part.split_whitespace().collect();

        let Some((column, rest)) = tokens.split_first() else {
            return Err(ValidationError::new(
                "orderBy",
                ValidationKind::Format,
                "empty order by clause part",
            )
            .with_value(part));
        };

        if let Err(err) = validate_column_name(column) {
            return Err(ValidationError::new(
                "orderBy",
                err.kind,
                format!("invalid column in ORDER BY: {}", err.message),
            )
            .with_value(*column));
        }

        if let Some(direction) = rest.first() {
            let direction = direction.to_ascii_uppercase();
            if direction != "ASC" && direction != "DESC" {
                return Err(ValidationError::new(
                    "orderBy",
                    ValidationKind::Format,
                    "invalid sort direction, must be ASC or DESC",
                )
                .with_value(direction));
            }
        }

        if rest.len() > 1 {
            return Err(ValidationError::new(
                "orderBy",
                ValidationKind::Format,
                "invalid ORDER BY clause format",
            )
            .with_value(part));
        }
    }

    Ok(())
}

/// Reject empty queries and stacked statements.
///
/// Semicolons inside string literals, comments and parentheses are ignored.
pub fn validate_query(sql: &str) -> Result<(), ValidationError> {
    if sql.trim().is_empty() {
        return Err(ValidationError::new(
            "query",
            ValidationKind::Empty,
            "query cannot be empty",
        ));
    }

    if count_statements(sql) > 1 {
        return Err(ValidationError::new(
            "query",
            ValidationKind::MultipleStatements,
            "multiple statements detected",
        ));
    }

    Ok(())
}

/// Strip everything outside `[A-Za-z0-9_.]` and quote for the dialect.
///
/// Intended for the raw-SQL fallback where an identifier must be spliced
/// into text.
pub fn sanitize_identifier<D: Dialect>(identifier: &str, dialect: D) -> String {
    let cleaned = UNSAFE_IDENT_CHARS.replace_all(identifier, "");
    dialect.quote_ident(&cleaned)
}

/// Count top-level statements. A trailing `;` still counts as a separator.
fn count_statements(sql: &str) -> usize {
    let cleaned = strip_literals_and_comments(sql);
    let mut count = 1;
    let mut depth = 0i32;

    for c in cleaned.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ';' if depth == 0 => count += 1,
            _ => {},
        }
    }

    count
}

/// Remove string literals, quoted identifiers and comments.
fn strip_literals_and_comments(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
            },
            '-' if chars.peek() == Some(&'-') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            },
            '\'' | '"' => {
                let delim = c;
                while let Some(c) = chars.next() {
                    if c == delim {
                        // doubled delimiter is an escaped quote
                        if chars.peek() == Some(&delim) {
                            chars.next();
                            continue;
                        }
                        break;
                    }
                }
            },
            c => out.push(c),
        }
    }

    out
}

// ═══════════════════════════════════════════════════════════════════════════
// SWAPPABLE VALIDATION PASS
// ═══════════════════════════════════════════════════════════════════════════

/// A check run over fully composed SQL before it is handed to the driver.
///
/// Implemented for closures, so a custom policy can be plugged in without a
/// new type:
///
/// ```
/// use sqld::{AnnotationProcessor, Postgres, ValidationError, ValidationKind};
///
/// let processor = AnnotationProcessor::new(Postgres).validator(|sql: &str| {
///     if sql.contains("pg_catalog") {
///         return Err(ValidationError::new("query", ValidationKind::Injection, "catalog access"));
///     }
///     Ok(())
/// });
/// # let _ = processor;
/// ```
pub trait QueryValidator: Send + Sync {
    /// Accept or reject the composed SQL.
    fn validate(&self, sql: &str) -> Result<(), ValidationError>;
}

impl<F> QueryValidator for F
where
    F: Fn(&str) -> Result<(), ValidationError> + Send + Sync,
{
    fn validate(&self, sql: &str) -> Result<(), ValidationError> {
        self(sql)
    }
}

/// Default pass: the query must be non-empty and a single statement.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatementValidator;

impl QueryValidator for StatementValidator {
    fn validate(&self, sql: &str) -> Result<(), ValidationError> {
        validate_query(sql)
    }
}
