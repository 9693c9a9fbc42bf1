//! Annotation-driven composition of static SQL templates.
//!
//! A template is ordinary, executable SQL carrying comment markers where the
//! dynamic parts go:
//!
//! | Marker               | Replaced with                         |
//! |----------------------|---------------------------------------|
//! | `/* sqld:where */`   | `AND <conditions>` (cursor included)  |
//! | `/* sqld:cursor */`  | removed; enables the keyset condition |
//! | `/* sqld:orderby */` | `ORDER BY <fields>`, replacing the static ORDER BY |
//! | `/* sqld:limit */`   | `LIMIT <placeholder>`                 |
//!
//! Markers are SQL comments, so an unprocessed template still runs and a
//! marker with nothing to insert is simply dropped. The WHERE marker must sit
//! after an existing condition (`WHERE deleted_at IS NULL /* sqld:where */`,
//! or `WHERE 1=1 /* sqld:where */`): the processor only appends with `AND`.
//!
//! Templates are trusted input from code generation. Substitution is plain
//! text replacement of the first occurrence of each marker, not SQL parsing.
//!
//! ```
//! use sqld::{AnnotationProcessor, OrderByBuilder, Postgres, Value, WhereBuilder};
//!
//! let template = "SELECT * FROM users WHERE active=true /* sqld:where */ \
//!                 ORDER BY created_at DESC /* sqld:orderby */ /* sqld:limit */";
//! let conditions = WhereBuilder::new(Postgres).greater_than("age", 18);
//! let order_by = OrderByBuilder::new().asc("name");
//!
//! let result = AnnotationProcessor::new(Postgres)
//!     .process_query(template, Some(&conditions), None, Some(&order_by), 10, &[])
//!     .unwrap();
//!
//! assert_eq!(
//!     result.sql,
//!     "SELECT * FROM users WHERE active=true AND age > $1 ORDER BY name ASC LIMIT $2"
//! );
//! assert_eq!(result.params, vec![Value::Int(18), Value::Int(10)]);
//! ```

use crate::builder::{QueryResult, WhereBuilder};
use crate::dialect::Dialect;
use crate::error::{Error, TemplateError};
use crate::order::{OrderByBuilder, SortDir};
use crate::pagination::Cursor;
use crate::validate::QueryValidator;
use crate::value::Value;
use regex::Regex;
use serde::Deserialize;
use std::fmt;
use std::ops::Range;
use std::sync::{Arc, LazyLock};
use tracing::{debug, trace, warn};

/// Injection point for dynamic conditions.
pub const WHERE_MARKER: &str = "/* sqld:where */";
/// Enables the keyset-pagination condition.
pub const CURSOR_MARKER: &str = "/* sqld:cursor */";
/// Injection point for a dynamic ORDER BY.
pub const ORDER_BY_MARKER: &str = "/* sqld:orderby */";
/// Injection point for LIMIT.
pub const LIMIT_MARKER: &str = "/* sqld:limit */";

#[allow(clippy::expect_used)]
static ORDER_BY_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bORDER\s+BY\b").expect("ORDER BY pattern is valid"));

#[allow(clippy::expect_used)]
static WHERE_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bWHERE\b").expect("WHERE pattern is valid"));

// ═══════════════════════════════════════════════════════════════════════════
// KEYSET
// ═══════════════════════════════════════════════════════════════════════════

/// Columns compared against a [`Cursor`].
///
/// Must match the ORDER BY actually used: `order_column` first, `id_column`
/// as the tie-break, both in `dir`. A mismatch silently yields wrong pages.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Keyset {
    /// Primary ordering column.
    pub order_column: String,
    /// Unique tie-break column.
    pub id_column: String,
    /// Scan direction of both columns.
    pub dir: SortDir,
}

impl Default for Keyset {
    fn default() -> Self {
        Self {
            order_column: "created_at".to_string(),
            id_column: "id".to_string(),
            dir: SortDir::Desc,
        }
    }
}

impl Keyset {
    /// Descending keyset over the given columns.
    pub fn new(order_column: impl Into<String>, id_column: impl Into<String>) -> Self {
        Self {
            order_column: order_column.into(),
            id_column: id_column.into(),
            dir: SortDir::Desc,
        }
    }

    /// Set the scan direction.
    #[must_use]
    pub const fn dir(mut self, dir: SortDir) -> Self {
        self.dir = dir;
        self
    }

    /// Render `(col < v OR (col = v AND id < i))` with placeholders after `start`.
    ///
    /// Postgres binds the ordering value once and references it twice.
    /// Positional dialects need one parameter per `?`, so the value is bound
    /// twice there.
    pub fn condition<D: Dialect>(&self, dialect: D, cursor: &Cursor, start: usize) -> (String, Vec<Value>) {
        let op = match self.dir {
            SortDir::Desc => "<",
            SortDir::Asc => ">",
        };

        let mut params = vec![cursor.value.clone()];
        let first = dialect.param(start + 1);
        let second = if dialect.is_ordinal() {
            first.clone()
        } else {
            params.push(cursor.value.clone());
            dialect.param(start + params.len())
        };
        params.push(Value::from(cursor.id));
        let id = dialect.param(start + params.len());

        let (col, id_col) = (&self.order_column, &self.id_column);
        let sql = format!("({col} {op} {first} OR ({col} = {second} AND {id_col} {op} {id}))");
        (sql, params)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// INPUTS
// ═══════════════════════════════════════════════════════════════════════════

/// Dynamic inputs for one template.
#[derive(Debug, Clone, Copy)]
pub struct Search<'a, D: Dialect> {
    /// Dynamic WHERE conditions.
    pub conditions: Option<&'a WhereBuilder<D>>,
    /// Keyset position of the previous page.
    pub cursor: Option<&'a Cursor>,
    /// Dynamic sort, replacing the template's static one.
    pub order_by: Option<&'a OrderByBuilder>,
    /// `0` means no limit.
    pub limit: u32,
    /// Parameters already referenced by the template (`$1..$n`).
    pub params: &'a [Value],
}

impl<D: Dialect> Default for Search<'_, D> {
    fn default() -> Self {
        Self {
            conditions: None,
            cursor: None,
            order_by: None,
            limit: 0,
            params: &[],
        }
    }
}

impl<'a, D: Dialect> Search<'a, D> {
    /// No dynamic parts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the dynamic WHERE conditions.
    pub const fn conditions(mut self, conditions: &'a WhereBuilder<D>) -> Self {
        self.conditions = Some(conditions);
        self
    }

    /// Set the keyset cursor; `None` fetches the first page.
    pub const fn cursor(mut self, cursor: Option<&'a Cursor>) -> Self {
        self.cursor = cursor;
        self
    }

    /// Set the dynamic sort.
    pub const fn order_by(mut self, order_by: &'a OrderByBuilder) -> Self {
        self.order_by = Some(order_by);
        self
    }

    /// Set the page size.
    pub const fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Set the parameters the template already references.
    pub const fn params(mut self, params: &'a [Value]) -> Self {
        self.params = params;
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// PROCESSOR
// ═══════════════════════════════════════════════════════════════════════════

/// Splices dynamic SQL into annotated templates.
///
/// Stateless apart from its settings: one processor can serve every request.
#[derive(Clone)]
pub struct AnnotationProcessor<D: Dialect> {
    dialect: D,
    keyset: Keyset,
    validator: Option<Arc<dyn QueryValidator>>,
}

impl<D: Dialect> fmt::Debug for AnnotationProcessor<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnnotationProcessor")
            .field("dialect", &self.dialect)
            .field("keyset", &self.keyset)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

impl<D: Dialect> AnnotationProcessor<D> {
    /// Processor with the default keyset (`created_at`, `id`, descending)
    /// and no validation pass.
    pub fn new(dialect: D) -> Self {
        Self {
            dialect,
            keyset: Keyset::default(),
            validator: None,
        }
    }

    /// Use different keyset columns for cursor conditions.
    #[must_use]
    pub fn keyset(mut self, keyset: Keyset) -> Self {
        self.keyset = keyset;
        self
    }

    /// Run `validator` over every composed query.
    #[must_use]
    pub fn validator(mut self, validator: impl QueryValidator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// The dialect this processor renders for.
    pub const fn dialect(&self) -> D {
        self.dialect
    }

    /// [`process_query`](Self::process_query) with bundled inputs.
    pub fn process(&self, template: &str, search: &Search<'_, D>) -> Result<QueryResult, Error> {
        self.process_query(
            template,
            search.conditions,
            search.cursor,
            search.order_by,
            search.limit,
            search.params,
        )
    }

    /// Compose `template` with the dynamic parts.
    ///
    /// New placeholders continue after `params`, in this order: cursor
    /// condition, WHERE conditions, LIMIT. The returned parameters are
    /// `params` followed by the new values, matching placeholder order.
    ///
    /// Fails when conditions exist but the template has no WHERE marker, or
    /// when the configured validator rejects the result. A cursor, sort or
    /// limit whose marker is missing is ignored.
    pub fn process_query(
        &self,
        template: &str,
        conditions: Option<&WhereBuilder<D>>,
        cursor: Option<&Cursor>,
        order_by: Option<&OrderByBuilder>,
        limit: u32,
        params: &[Value],
    ) -> Result<QueryResult, Error> {
        let mut params = params.to_vec();
        let mut clauses = Vec::new();

        if let Some(cursor) = cursor {
            if template.contains(CURSOR_MARKER) {
                let (sql, values) = self.keyset.condition(self.dialect, cursor, params.len());
                clauses.push(sql);
                params.extend(values);
            } else {
                debug!("cursor supplied but template has no cursor marker, ignoring");
            }
        }

        if let Some(conditions) = conditions.filter(|c| c.has_conditions()) {
            let built = conditions.build();
            clauses.push(self.dialect.renumber(&built.sql, params.len()).into_owned());
            params.extend(built.params);
        }

        let mut sql = if clauses.is_empty() {
            replace_marker(template, WHERE_MARKER, "")
        } else {
            if !template.contains(WHERE_MARKER) {
                return Err(TemplateError::MissingMarker {
                    marker: WHERE_MARKER,
                }
                .into());
            }
            replace_marker(template, WHERE_MARKER, &format!("AND {}", clauses.join(" AND ")))
        };

        sql = replace_marker(&sql, CURSOR_MARKER, "");
        sql = apply_order_by(&sql, order_by);

        if limit > 0 && sql.contains(LIMIT_MARKER) {
            params.push(Value::from(limit));
            let p = self.dialect.param(params.len());
            sql = replace_marker(&sql, LIMIT_MARKER, &format!("LIMIT {p}"));
        } else {
            if limit > 0 {
                debug!(limit, "limit supplied but template has no limit marker, ignoring");
            }
            sql = replace_marker(&sql, LIMIT_MARKER, "");
        }

        if let Some(validator) = &self.validator {
            validator.validate(&sql).inspect_err(|err| {
                warn!(error = %err, "composed query rejected by validator");
            })?;
        }

        debug!(
            dialect = self.dialect.name(),
            params = params.len(),
            "composed query"
        );
        trace!(%sql, "composed query text");

        Ok(QueryResult { sql, params })
    }
}

/// One-shot composition with a default processor.
pub fn search_query<D: Dialect>(
    template: &str,
    dialect: D,
    conditions: Option<&WhereBuilder<D>>,
    cursor: Option<&Cursor>,
    order_by: Option<&OrderByBuilder>,
    limit: u32,
    params: &[Value],
) -> Result<QueryResult, Error> {
    AnnotationProcessor::new(dialect).process_query(template, conditions, cursor, order_by, limit, params)
}

/// Append conditions to a query without markers.
///
/// Adds `WHERE ...` when `base` has no WHERE keyword and `AND ...` otherwise.
pub fn compose_where<D: Dialect>(base: &str, conditions: &WhereBuilder<D>) -> QueryResult {
    let built = conditions.build();
    if built.is_empty() {
        return QueryResult {
            sql: base.to_string(),
            params: Vec::new(),
        };
    }
    let keyword = if WHERE_KEYWORD.is_match(base) { "AND" } else { "WHERE" };
    QueryResult {
        sql: format!("{} {keyword} {}", base.trim_end(), built.sql),
        params: built.params,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TEXT SPLICING
// ═══════════════════════════════════════════════════════════════════════════

/// Replace the ORDER BY marker.
///
/// With a dynamic sort, the static `ORDER BY ... <marker>` span is replaced
/// as a whole. Without one, only the marker goes.
fn apply_order_by(sql: &str, order_by: Option<&OrderByBuilder>) -> String {
    let Some(order_by) = order_by.filter(|o| o.has_fields()) else {
        return replace_marker(sql, ORDER_BY_MARKER, "");
    };
    let Some(at) = sql.find(ORDER_BY_MARKER) else {
        debug!("sort supplied but template has no orderby marker, ignoring");
        return sql.to_string();
    };

    let end = at + ORDER_BY_MARKER.len();
    let start = static_order_by_start(sql.get(..at).unwrap_or_default()).unwrap_or(at);
    splice(sql, start..end, &order_by.build_with_prefix())
}

/// Start of the static ORDER BY that the marker belongs to.
///
/// The keyword must be the last one before the marker and at the same
/// parenthesis depth, so an ORDER BY inside a subquery is never taken.
fn static_order_by_start(head: &str) -> Option<usize> {
    let keyword = ORDER_BY_KEYWORD.find_iter(head).last()?;
    let tail = head.get(keyword.end()..)?;
    let mut depth = 0i32;
    for c in tail.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            _ => {},
        }
        if depth < 0 {
            return None;
        }
    }
    (depth == 0).then_some(keyword.start())
}

fn replace_marker(sql: &str, marker: &str, fragment: &str) -> String {
    match sql.find(marker) {
        Some(at) => splice(sql, at..at + marker.len(), fragment),
        None => sql.to_string(),
    }
}

/// Replace `range` with `fragment`.
///
/// A non-empty fragment gets a separating space on each side whose
/// neighbour is not already whitespace. An empty fragment removes exactly
/// the range.
fn splice(sql: &str, range: Range<usize>, fragment: &str) -> String {
    let before = sql.get(..range.start).unwrap_or_default();
    let after = sql.get(range.end..).unwrap_or_default();

    let mut out = String::with_capacity(sql.len() + fragment.len() + 2);
    out.push_str(before);
    if !fragment.is_empty() {
        if before.chars().next_back().is_some_and(|c| !c.is_whitespace()) {
            out.push(' ');
        }
        out.push_str(fragment);
        if after.chars().next().is_some_and(|c| !c.is_whitespace()) {
            out.push(' ');
        }
    }
    out.push_str(after);
    out
}
