//! # sqld
//!
//! Runtime filtering, sorting and keyset pagination for static SQL.
//!
//! Queries stay hand-written (or generated) SQL. Dynamic parts are inserted at
//! comment markers, and every user-supplied value is bound as a parameter:
//!
//! ```
//! use sqld::{AnnotationProcessor, Config, Postgres, build_where_from_query, parse_query_string, parse_sort};
//!
//! const LIST_USERS: &str = "SELECT id, name FROM users WHERE deleted_at IS NULL /* sqld:where */ \
//!                           ORDER BY id /* sqld:orderby */ /* sqld:limit */";
//!
//! let config = Config::new().allow_fields(["name", "age"]);
//!
//! let query = "age[gte]=21&name[contains]=ann&sort=-age";
//! let conditions = build_where_from_query(query, Postgres, &config).unwrap();
//! let order_by = parse_sort(&parse_query_string(query), &config).unwrap();
//!
//! let result = AnnotationProcessor::new(Postgres)
//!     .process_query(LIST_USERS, Some(&conditions), None, Some(&order_by), 20, &[])
//!     .unwrap();
//!
//! assert_eq!(
//!     result.sql,
//!     "SELECT id, name FROM users WHERE deleted_at IS NULL \
//!      AND age >= $1 AND name ILIKE $2 ORDER BY age DESC LIMIT $3"
//! );
//! assert_eq!(result.params.len(), 3);
//! ```
//!
//! ## Modules
//!
//! - [`dialect`]: placeholder syntax and quoting per database
//! - [`builder`]: the WHERE condition builder
//! - [`order`]: sort parsing and the ORDER BY builder
//! - [`filter`]: query-string filters
//! - [`pagination`]: cursors and pages
//! - [`annotation`]: marker substitution in templates
//! - [`validate`]: identifier and statement checks
//! - [`exec`]: the driver seam
//!
//! ## Supported Dialects
//!
//! | Dialect    | Placeholders | Case-insensitive match |
//! |------------|--------------|------------------------|
//! | [`Postgres`] | `$1, $2, ...` | `ILIKE`               |
//! | [`MySql`]    | `?`           | `LOWER(f) LIKE LOWER(?)` |
//! | [`Sqlite`]   | `?`           | `LOWER(f) LIKE LOWER(?)` |

pub mod annotation;
pub mod builder;
pub mod config;
pub mod dialect;
pub mod error;
pub mod exec;
pub mod filter;
pub mod order;
pub mod pagination;
pub mod validate;
pub mod value;

pub use annotation::{
    AnnotationProcessor, CURSOR_MARKER, Keyset, LIMIT_MARKER, ORDER_BY_MARKER, Search, WHERE_MARKER,
    compose_where, search_query,
};
pub use builder::{Condition, QueryResult, SearchMode, WhereBuilder, combine_conditions, search_pattern};
pub use config::{Config, DEFAULT_DATE_LAYOUT, DEFAULT_MAX_FILTERS, DEFAULT_MAX_SORT_FIELDS};
pub use dialect::{Dialect, MySql, Postgres, Sqlite};
pub use error::{ConfigError, Error, FilterError, SortError, TemplateError};
pub use exec::{ExecError, Execute, Queries};
pub use filter::{
    Filter, Operator, QueryParams, apply_filters, build_where, build_where_from_query, filters_to_json,
    from_params_with_sort, parse_filter_query, parse_filters, parse_query_string,
};
pub use order::{
    OrderByBuilder, SORT_PARAM_ALIASES, SortDir, SortField, is_sort_param, parse_sort, parse_sort_fields,
    parse_sort_list, parse_sort_params,
};
pub use pagination::{Cursor, CursorError, MAX_CURSOR_SIZE, Page, decode_cursor, encode_cursor};
pub use validate::{
    QueryValidator, StatementValidator, ValidationError, ValidationKind, is_valid_sql_identifier,
    sanitize_identifier, validate_column_name, validate_order_by, validate_query, validate_table_name,
};
pub use value::Value;

/// Empty Postgres condition builder.
pub const fn postgres() -> WhereBuilder<Postgres> {
    WhereBuilder::new(Postgres)
}

/// Empty `MySQL` condition builder.
pub const fn mysql() -> WhereBuilder<MySql> {
    WhereBuilder::new(MySql)
}

/// Empty `SQLite` condition builder.
pub const fn sqlite() -> WhereBuilder<Sqlite> {
    WhereBuilder::new(Sqlite)
}
