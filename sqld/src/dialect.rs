//! SQL dialect implementations for Postgres, `MySQL` and `SQLite`.
//!
//! Each dialect handles the specific syntax differences between databases:
//! placeholder tokens, case-insensitive matching and identifier quoting.

use regex::{Captures, Regex};
use std::borrow::Cow;
use std::fmt;
use std::sync::LazyLock;

/// Ordinal placeholder (`$1`, `$2`, ...).
#[allow(clippy::expect_used)]
static ORDINAL_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$(\d+)").expect("placeholder pattern is valid"));

/// SQL dialect trait for database-specific syntax.
pub trait Dialect: Clone + Copy + fmt::Debug + Send + Sync + 'static {
    /// Short lowercase name used in logs (`postgres`, `mysql`, `sqlite`).
    fn name(&self) -> &'static str;

    /// Format the placeholder for the 1-based parameter `idx`
    /// (e.g., `$3` for Postgres, `?` for `MySQL` and `SQLite`).
    fn param(&self, idx: usize) -> String;

    /// Whether placeholders carry their position (`$N`).
    ///
    /// Only ordinal placeholders need renumbering when fragments are combined.
    fn is_ordinal(&self) -> bool;

    /// Whether ILIKE is supported natively.
    fn supports_ilike(&self) -> bool;

    /// Character used to quote identifiers.
    fn quote_char(&self) -> char;

    /// Render a case-insensitive match of `field` against `placeholder`.
    ///
    /// Dialects without ILIKE get `LOWER(field) LIKE LOWER(placeholder)`.
    fn ilike(&self, field: &str, placeholder: &str) -> String {
        if self.supports_ilike() {
            format!("{field} ILIKE {placeholder}")
        } else {
            format!("LOWER({field}) LIKE LOWER({placeholder})")
        }
    }

    /// Quote an identifier with the dialect's quote character.
    fn quote_ident(&self, ident: &str) -> String {
        let q = self.quote_char();
        format!("{q}{ident}{q}")
    }

    /// Shift every `$N` placeholder in `sql` by `offset`.
    ///
    /// Runs as a single pass, so `$1 -> $2` never cascades into `$2 -> $3`.
    /// Non-ordinal dialects and a zero offset return the input unchanged.
    fn renumber<'a>(&self, sql: &'a str, offset: usize) -> Cow<'a, str> {
        if !self.is_ordinal() || offset == 0 {
            return Cow::Borrowed(sql);
        }
        ORDINAL_PLACEHOLDER.replace_all(sql, |caps: &Captures<'_>| {
            match caps[1].parse::<usize>() {
                Ok(n) => format!("${}", n + offset),
                Err(_) => caps[0].to_string(),
            }
        })
    }
}

/// Postgres dialect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Postgres;

impl Dialect for Postgres {
    #[inline]
    fn name(&self) -> &'static str {
        "postgres"
    }

    #[inline]
    fn param(&self, idx: usize) -> String {
        format!("${idx}")
    }

    #[inline]
    fn is_ordinal(&self) -> bool {
        true
    }

    #[inline]
    fn supports_ilike(&self) -> bool {
        true
    }

    #[inline]
    fn quote_char(&self) -> char {
        '"'
    }
}

/// `MySQL` dialect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MySql;

impl Dialect for MySql {
    #[inline]
    fn name(&self) -> &'static str {
        "mysql"
    }

    #[inline]
    fn param(&self, _idx: usize) -> String {
        "?".to_string()
    }

    #[inline]
    fn is_ordinal(&self) -> bool {
        false
    }

    #[inline]
    fn supports_ilike(&self) -> bool {
        false
    }

    #[inline]
    fn quote_char(&self) -> char {
        '`'
    }
}

/// `SQLite` dialect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sqlite;

impl Dialect for Sqlite {
    #[inline]
    fn name(&self) -> &'static str {
        "sqlite"
    }

    #[inline]
    fn param(&self, _idx: usize) -> String {
        "?".to_string()
    }

    #[inline]
    fn is_ordinal(&self) -> bool {
        false
    }

    #[inline]
    fn supports_ilike(&self) -> bool {
        false
    }

    #[inline]
    fn quote_char(&self) -> char {
        '"'
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_params() {
        let pg = Postgres;
        assert_eq!(pg.param(1), "$1");
        assert_eq!(pg.param(10), "$10");
    }

    #[test]
    fn test_positional_params() {
        assert_eq!(MySql.param(1), "?");
        assert_eq!(MySql.param(7), "?");
        assert_eq!(Sqlite.param(3), "?");
    }

    #[test]
    fn test_ilike_rendering() {
        assert_eq!(Postgres.ilike("name", "$1"), "name ILIKE $1");
        assert_eq!(MySql.ilike("name", "?"), "LOWER(name) LIKE LOWER(?)");
        assert_eq!(Sqlite.ilike("name", "?"), "LOWER(name) LIKE LOWER(?)");
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(Postgres.quote_ident("users"), "\"users\"");
        assert_eq!(MySql.quote_ident("users"), "`users`");
        assert_eq!(Sqlite.quote_ident("users"), "\"users\"");
    }

    #[test]
    fn test_renumber_single_pass() {
        let sql = "a = $1 AND b = $2 AND c IN ($3, $4)";
        assert_eq!(
            Postgres.renumber(sql, 1),
            "a = $2 AND b = $3 AND c IN ($4, $5)"
        );
        assert_eq!(Postgres.renumber("x = $9", 1), "x = $10");
    }

    #[test]
    fn test_renumber_noop() {
        assert!(matches!(Postgres.renumber("a = $1", 0), Cow::Borrowed(_)));
        assert!(matches!(Sqlite.renumber("a = ?", 4), Cow::Borrowed(_)));
        assert_eq!(MySql.renumber("a = ? AND b = ?", 2), "a = ? AND b = ?");
    }
}
