//! WHERE clause builder with dialect-correct placeholder numbering.
//!
//! Every method takes and returns the builder so optional filters can be
//! chained without branching: a `Null` value, an empty pattern, an empty list
//! or a half-open range simply leaves the builder untouched.
//!
//! ```
//! use sqld::{Postgres, Value, WhereBuilder};
//!
//! let name: Option<&str> = None;
//! let result = WhereBuilder::new(Postgres)
//!     .equal("status", "active")
//!     .equal("name", name) // skipped
//!     .or(|g| g.greater_than("age", 18).is_null("age"))
//!     .build();
//!
//! assert_eq!(result.sql, "status = $1 AND (age > $2 OR age IS NULL)");
//! assert_eq!(result.params, vec![Value::from("active"), Value::Int(18)]);
//! ```

use crate::dialect::Dialect;
use crate::validate::{ValidationError, validate_column_name};
use crate::value::Value;
use serde::Serialize;

/// Query result with SQL string and parameters.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[must_use = "QueryResult must be used to execute the query"]
pub struct QueryResult {
    /// Rendered SQL with placeholders.
    pub sql: String,
    /// Values for the placeholders, in order.
    pub params: Vec<Value>,
}

impl QueryResult {
    /// `true` when nothing was rendered.
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }
}

/// One rendered WHERE predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    sql: String,
    param_count: usize,
    fields: Vec<String>,
}

impl Condition {
    /// Rendered SQL with placeholders already in place.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Number of parameters this condition binds.
    pub const fn param_count(&self) -> usize {
        self.param_count
    }

    /// Columns referenced by the condition. Raw fragments report none.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

/// Wildcard placement for [`search_pattern`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// `text%`
    Prefix,
    /// `%text`
    Suffix,
    /// `%text%`
    Contains,
    /// `text`
    Exact,
}

/// Wrap `text` in `%` wildcards for LIKE / ILIKE.
pub fn search_pattern(text: &str, mode: SearchMode) -> String {
    match mode {
        SearchMode::Prefix => format!("{text}%"),
        SearchMode::Suffix => format!("%{text}"),
        SearchMode::Contains => format!("%{text}%"),
        SearchMode::Exact => text.to_string(),
    }
}

/// Accumulates WHERE conditions joined with `AND`.
///
/// The builder owns a running parameter counter. Each emitted placeholder
/// takes the next index, including placeholders inside [`or`](Self::or)
/// groups and [`raw`](Self::raw) fragments, so the rendered SQL always uses
/// `$1..$n` without gaps on Postgres.
#[derive(Debug, Clone)]
pub struct WhereBuilder<D: Dialect> {
    dialect: D,
    conditions: Vec<Condition>,
    params: Vec<Value>,
    param_index: usize,
}

impl<D: Dialect> WhereBuilder<D> {
    /// Create an empty builder.
    pub const fn new(dialect: D) -> Self {
        Self {
            dialect,
            conditions: Vec::new(),
            params: Vec::new(),
            param_index: 0,
        }
    }

    /// Empty builder whose first placeholder will be `start + 1`.
    const fn starting_at(dialect: D, start: usize) -> Self {
        Self {
            dialect,
            conditions: Vec::new(),
            params: Vec::new(),
            param_index: start,
        }
    }

    /// The dialect this builder renders for.
    pub const fn dialect(&self) -> D {
        self.dialect
    }

    fn next_placeholder(&mut self) -> String {
        self.param_index += 1;
        self.dialect.param(self.param_index)
    }

    fn push(&mut self, field: Option<String>, sql: String, params: Vec<Value>) {
        self.conditions.push(Condition {
            sql,
            param_count: params.len(),
            fields: field.into_iter().collect(),
        });
        self.params.extend(params);
    }

    fn compare(mut self, field: impl Into<String>, op: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        if value.is_null() {
            return self;
        }
        let field = field.into();
        let p = self.next_placeholder();
        let sql = format!("{field} {op} {p}");
        self.push(Some(field), sql, vec![value]);
        self
    }

    // ═══════════════════════════════════════════════════════════════════════
    // COMPARISONS
    // ═══════════════════════════════════════════════════════════════════════

    /// `field = ?`
    pub fn equal(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.compare(field, "=", value)
    }

    /// `field != ?`
    pub fn not_equal(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.compare(field, "!=", value)
    }

    /// `field > ?`
    pub fn greater_than(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.compare(field, ">", value)
    }

    /// `field >= ?`
    pub fn greater_or_equal(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.compare(field, ">=", value)
    }

    /// `field < ?`
    pub fn less_than(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.compare(field, "<", value)
    }

    /// `field <= ?`
    pub fn less_or_equal(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.compare(field, "<=", value)
    }

    /// Like [`equal`](Self::equal), but also skips empty strings and zero
    /// integers. Useful for form inputs where the zero value means "unset".
    pub fn conditional(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        let value = value.into();
        let unset = match &value {
            Value::String(s) => s.is_empty(),
            Value::Int(n) => *n == 0,
            _ => false,
        };
        if unset { self } else { self.equal(field, value) }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PATTERN MATCHING
    // ═══════════════════════════════════════════════════════════════════════

    /// `field LIKE ?` (case-sensitive).
    pub fn like(mut self, field: impl Into<String>, pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        if pattern.is_empty() {
            return self;
        }
        let field = field.into();
        let p = self.next_placeholder();
        let sql = format!("{field} LIKE {p}");
        self.push(Some(field), sql, vec![Value::String(pattern)]);
        self
    }

    /// Case-insensitive match: `field ILIKE ?` on Postgres,
    /// `LOWER(field) LIKE LOWER(?)` elsewhere.
    pub fn ilike(mut self, field: impl Into<String>, pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        if pattern.is_empty() {
            return self;
        }
        let field = field.into();
        let p = self.next_placeholder();
        let sql = self.dialect.ilike(&field, &p);
        self.push(Some(field), sql, vec![Value::String(pattern)]);
        self
    }

    /// Negated [`ilike`](Self::ilike).
    pub fn not_ilike(mut self, field: impl Into<String>, pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        if pattern.is_empty() {
            return self;
        }
        let field = field.into();
        let p = self.next_placeholder();
        let sql = format!("NOT {}", self.dialect.ilike(&field, &p));
        self.push(Some(field), sql, vec![Value::String(pattern)]);
        self
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SETS, RANGES, NULLS
    // ═══════════════════════════════════════════════════════════════════════

    /// `field IN (?, ?, ...)`, one placeholder per element.
    pub fn in_list<I>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            return self;
        }
        let field = field.into();
        let placeholders: Vec<String> = values.iter().map(|_| self.next_placeholder()).collect();
        let sql = format!("{field} IN ({})", placeholders.join(", "));
        self.push(Some(field), sql, values);
        self
    }

    /// `field BETWEEN ? AND ?`. Skipped if either bound is `Null`.
    pub fn between(
        mut self,
        field: impl Into<String>,
        start: impl Into<Value>,
        end: impl Into<Value>,
    ) -> Self {
        let (start, end) = (start.into(), end.into());
        if start.is_null() || end.is_null() {
            return self;
        }
        let field = field.into();
        let lo = self.next_placeholder();
        let hi = self.next_placeholder();
        let sql = format!("{field} BETWEEN {lo} AND {hi}");
        self.push(Some(field), sql, vec![start, end]);
        self
    }

    /// `field IS NULL`
    pub fn is_null(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        let sql = format!("{field} IS NULL");
        self.push(Some(field), sql, Vec::new());
        self
    }

    /// `field IS NOT NULL`
    pub fn is_not_null(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        let sql = format!("{field} IS NOT NULL");
        self.push(Some(field), sql, Vec::new());
        self
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ESCAPE HATCHES
    // ═══════════════════════════════════════════════════════════════════════

    /// Append a caller-written fragment.
    ///
    /// Use `?` for every parameter regardless of dialect. On Postgres the
    /// first `params.len()` markers become `$N` continuing the running
    /// counter. The fragment is not validated: never build it from user input.
    pub fn raw<I>(mut self, fragment: &str, params: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        if fragment.trim().is_empty() {
            return self;
        }
        let params: Vec<Value> = params.into_iter().map(Into::into).collect();
        let mut sql = fragment.to_string();
        for _ in 0..params.len() {
            let p = self.next_placeholder();
            if self.dialect.is_ordinal() {
                sql = sql.replacen('?', &p, 1);
            }
        }
        self.push(None, sql, params);
        self
    }

    /// Add a parenthesized OR group.
    ///
    /// The closure gets an empty builder that continues this builder's
    /// numbering. An empty group adds nothing.
    ///
    /// ```
    /// use sqld::{Postgres, WhereBuilder};
    ///
    /// let result = WhereBuilder::new(Postgres)
    ///     .equal("a", 1)
    ///     .or(|g| g.equal("b", 2).equal("c", 3))
    ///     .equal("d", 4)
    ///     .build();
    /// assert_eq!(result.sql, "a = $1 AND (b = $2 OR c = $3) AND d = $4");
    /// ```
    pub fn or(mut self, f: impl FnOnce(Self) -> Self) -> Self {
        let group = f(Self::starting_at(self.dialect, self.param_index));
        if group.conditions.is_empty() {
            return self;
        }
        let parts: Vec<&str> = group.conditions.iter().map(Condition::sql).collect();
        let condition = Condition {
            sql: format!("({})", parts.join(" OR ")),
            param_count: group.params.len(),
            fields: group
                .conditions
                .iter()
                .flat_map(|c| c.fields.iter().cloned())
                .collect(),
        };
        self.param_index = group.param_index;
        self.conditions.push(condition);
        self.params.extend(group.params);
        self
    }

    // ═══════════════════════════════════════════════════════════════════════
    // OUTPUT
    // ═══════════════════════════════════════════════════════════════════════

    /// Render `c1 AND c2 AND ...` with parameters in emission order.
    ///
    /// Returns an empty result when no condition was added. Can be called
    /// any number of times.
    pub fn build(&self) -> QueryResult {
        let parts: Vec<&str> = self.conditions.iter().map(Condition::sql).collect();
        QueryResult {
            sql: parts.join(" AND "),
            params: self.params.clone(),
        }
    }

    /// `true` once any condition was appended.
    pub fn has_conditions(&self) -> bool {
        !self.conditions.is_empty()
    }

    /// Conditions in AND-join order.
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Parameters bound so far.
    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Number of parameters bound so far.
    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    /// Run the column-name heuristic over every referenced column.
    pub fn validate_columns(&self) -> Result<(), ValidationError> {
        self.conditions
            .iter()
            .flat_map(|c| c.fields.iter())
            .try_for_each(|field| validate_column_name(field))
    }
}

/// AND-join independently built builders into one builder.
///
/// Each builder numbers its own placeholders from 1, so on Postgres every
/// builder after the first is shifted by the parameter count before it. The
/// result continues numbering after the last parameter, so more conditions
/// can be chained and it can be handed to the annotation processor as is.
///
/// ```
/// use sqld::{Postgres, WhereBuilder, combine_conditions};
///
/// let tenant = WhereBuilder::new(Postgres).equal("tenant_id", 4);
/// let search = WhereBuilder::new(Postgres).equal("status", "open");
/// let result = combine_conditions(Postgres, &[&tenant, &search])
///     .is_null("deleted_at")
///     .build();
/// assert_eq!(result.sql, "tenant_id = $1 AND status = $2 AND deleted_at IS NULL");
/// ```
pub fn combine_conditions<D: Dialect>(dialect: D, builders: &[&WhereBuilder<D>]) -> WhereBuilder<D> {
    let mut combined = WhereBuilder::new(dialect);

    for builder in builders.iter().filter(|b| b.has_conditions()) {
        let offset = combined.params.len();
        combined.conditions.extend(builder.conditions.iter().map(|c| Condition {
            sql: dialect.renumber(&c.sql, offset).into_owned(),
            param_count: c.param_count,
            fields: c.fields.clone(),
        }));
        combined.params.extend(builder.params.iter().cloned());
    }

    combined.param_index = combined.params.len();
    combined
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{MySql, Postgres, Sqlite};

    #[test]
    fn test_empty_builder() {
        let b = WhereBuilder::new(Postgres);
        assert!(!b.has_conditions());
        let result = b.build();
        assert_eq!(result.sql, "");
        assert!(result.params.is_empty());
        assert!(result.is_empty());
    }

    #[test]
    fn test_comparisons() {
        let result = WhereBuilder::new(Postgres)
            .equal("a", 1)
            .not_equal("b", "x")
            .greater_than("c", 2)
            .greater_or_equal("d", 3)
            .less_than("e", 4)
            .less_or_equal("f", 5.5)
            .build();
        assert_eq!(
            result.sql,
            "a = $1 AND b != $2 AND c > $3 AND d >= $4 AND e < $5 AND f <= $6"
        );
        assert_eq!(result.params.len(), 6);
    }

    #[test]
    fn test_absent_values_are_noops() {
        let b = WhereBuilder::new(Postgres)
            .equal("a", Value::Null)
            .equal("b", None::<i64>)
            .like("c", "")
            .ilike("c", "")
            .not_ilike("c", "")
            .in_list("d", Vec::<i64>::new())
            .between("e", Value::Null, 10)
            .between("e", 1, None::<i64>)
            .raw("   ", Vec::<Value>::new())
            .or(|g| g);
        assert!(!b.has_conditions());
        assert_eq!(b.param_count(), 0);
        assert_eq!(b.build().sql, "");
    }

    #[test]
    fn test_conditional_skips_zero_values() {
        let result = WhereBuilder::new(Sqlite)
            .conditional("name", "")
            .conditional("age", 0)
            .conditional("role", "admin")
            .build();
        assert_eq!(result.sql, "role = ?");
        assert_eq!(result.params, vec![Value::from("admin")]);
    }

    #[test]
    fn test_ilike_per_dialect() {
        let pg = WhereBuilder::new(Postgres).ilike("name", "%jo%").build();
        assert_eq!(pg.sql, "name ILIKE $1");

        let my = WhereBuilder::new(MySql).ilike("name", "%jo%").build();
        assert_eq!(my.sql, "LOWER(name) LIKE LOWER(?)");

        let neg = WhereBuilder::new(Sqlite).not_ilike("name", "%jo%").build();
        assert_eq!(neg.sql, "NOT LOWER(name) LIKE LOWER(?)");
    }

    #[test]
    fn test_in_and_between() {
        let result = WhereBuilder::new(Postgres)
            .in_list("status", ["a", "b", "c"])
            .between("age", 18, 65)
            .build();
        assert_eq!(
            result.sql,
            "status IN ($1, $2, $3) AND age BETWEEN $4 AND $5"
        );
        assert_eq!(result.params.len(), 5);

        let result = WhereBuilder::new(MySql).in_list("id", [1, 2]).build();
        assert_eq!(result.sql, "id IN (?, ?)");
    }

    #[test]
    fn test_null_checks_take_no_params() {
        let result = WhereBuilder::new(Postgres)
            .is_null("deleted_at")
            .is_not_null("email")
            .equal("a", 1)
            .build();
        assert_eq!(result.sql, "deleted_at IS NULL AND email IS NOT NULL AND a = $1");
        assert_eq!(result.params, vec![Value::Int(1)]);
    }

    #[test]
    fn test_raw_translation() {
        let result = WhereBuilder::new(Postgres)
            .equal("a", 1)
            .raw("(b = ? OR c = ?)", [2, 3])
            .equal("d", 4)
            .build();
        assert_eq!(result.sql, "a = $1 AND (b = $2 OR c = $3) AND d = $4");

        let result = WhereBuilder::new(Sqlite)
            .raw("b = ? OR c = ?", [2, 3])
            .equal("d", 4)
            .build();
        assert_eq!(result.sql, "b = ? OR c = ? AND d = ?");
        assert_eq!(result.params.len(), 3);
    }

    #[test]
    fn test_or_group_numbering() {
        let b = WhereBuilder::new(Postgres)
            .equal("a", 1)
            .or(|g| g.equal("b", 2).equal("c", 3))
            .equal("d", 4);
        let result = b.build();
        assert_eq!(result.sql, "a = $1 AND (b = $2 OR c = $3) AND d = $4");
        assert_eq!(
            result.params,
            vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4)]
        );
        assert_eq!(b.conditions().len(), 3);
        assert_eq!(b.conditions()[1].param_count(), 2);
        assert_eq!(b.conditions()[1].fields(), ["b", "c"]);
    }

    #[test]
    fn test_single_condition_or_still_parenthesized() {
        let result = WhereBuilder::new(Postgres)
            .or(|g| g.equal("a", 1))
            .build();
        assert_eq!(result.sql, "(a = $1)");
    }

    #[test]
    fn test_nested_or() {
        let result = WhereBuilder::new(Postgres)
            .or(|g| g.equal("a", 1).or(|h| h.equal("b", 2).equal("c", 3)))
            .equal("d", 4)
            .build();
        assert_eq!(result.sql, "(a = $1 OR (b = $2 OR c = $3)) AND d = $4");
    }

    #[test]
    fn test_build_is_repeatable() {
        let b = WhereBuilder::new(Postgres).equal("a", 1);
        assert_eq!(b.build(), b.build());
    }

    #[test]
    fn test_validate_columns() {
        let ok = WhereBuilder::new(Postgres).equal("users.name", "x");
        assert!(ok.validate_columns().is_ok());

        let bad = WhereBuilder::new(Postgres).equal("name; DROP TABLE users", "x");
        assert!(bad.validate_columns().is_err());

        let raw_only = WhereBuilder::new(Postgres).raw("anything -- goes", Vec::<Value>::new());
        assert!(raw_only.validate_columns().is_ok());
    }

    #[test]
    fn test_combine_conditions() {
        let a = WhereBuilder::new(Postgres).equal("a", 1).equal("b", 2);
        let empty = WhereBuilder::new(Postgres);
        let c = WhereBuilder::new(Postgres).or(|g| g.equal("c", 3).is_null("c"));
        let combined = combine_conditions(Postgres, &[&a, &empty, &c]);
        assert_eq!(combined.conditions().len(), 3);
        assert_eq!(combined.conditions()[2].fields(), ["c", "c"]);

        let result = combined.build();
        assert_eq!(result.sql, "a = $1 AND b = $2 AND (c = $3 OR c IS NULL)");
        assert_eq!(result.params, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);

        let a = WhereBuilder::new(MySql).equal("a", 1);
        let c = WhereBuilder::new(MySql).equal("c", 3);
        let result = combine_conditions(MySql, &[&a, &c]).build();
        assert_eq!(result.sql, "a = ? AND c = ?");
    }

    #[test]
    fn test_combined_builder_keeps_chaining() {
        let a = WhereBuilder::new(Postgres).in_list("id", [1, 2]);
        let b = WhereBuilder::new(Postgres).raw("score > ?", [5]);
        let result = combine_conditions(Postgres, &[&a, &b])
            .equal("owner", "me")
            .or(|g| g.less_than("age", 3).greater_than("age", 60))
            .build();
        assert_eq!(
            result.sql,
            "id IN ($1, $2) AND score > $3 AND owner = $4 AND (age < $5 OR age > $6)"
        );
        assert_eq!(result.params.len(), 6);

        let none = combine_conditions(Postgres, &[]);
        assert!(!none.has_conditions());
        assert_eq!(none.equal("x", 1).build().sql, "x = $1");
    }

    #[test]
    fn test_search_pattern() {
        assert_eq!(search_pattern("jo", SearchMode::Prefix), "jo%");
        assert_eq!(search_pattern("jo", SearchMode::Suffix), "%jo");
        assert_eq!(search_pattern("jo", SearchMode::Contains), "%jo%");
        assert_eq!(search_pattern("jo", SearchMode::Exact), "jo");
    }
}
