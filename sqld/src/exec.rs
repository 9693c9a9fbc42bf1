//! The seam toward a database driver.
//!
//! sqld never talks to a database itself. A driver adapter implements
//! [`Execute`] and [`Queries`] layers template composition and paging on top:
//!
//! ```
//! use sqld::{Execute, Postgres, Queries, Search, Value};
//! use std::convert::Infallible;
//!
//! struct Echo;
//!
//! impl Execute for Echo {
//!     type Row = String;
//!     type Error = Infallible;
//!
//!     fn query(&self, sql: &str, _params: &[Value]) -> Result<Vec<String>, Infallible> {
//!         Ok(vec![sql.to_string()])
//!     }
//! }
//!
//! let rows = Queries::new(&Echo, Postgres)
//!     .query_all("SELECT 1 /* sqld:limit */", &Search::new().limit(5))
//!     .unwrap();
//! assert_eq!(rows, vec!["SELECT 1 LIMIT $1".to_string()]);
//! ```

use crate::annotation::{AnnotationProcessor, Search};
use crate::builder::QueryResult;
use crate::dialect::Dialect;
use crate::error::Error;
use crate::pagination::{Cursor, Page};
use crate::value::Value;
use thiserror::Error;
use tracing::debug;

/// Runs a composed query and returns its rows.
pub trait Execute {
    /// Driver row type.
    type Row;
    /// Driver error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Execute `sql` with `params` bound in order.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Self::Row>, Self::Error>;
}

impl<X: Execute + ?Sized> Execute for &X {
    type Row = X::Row;
    type Error = X::Error;

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Self::Row>, Self::Error> {
        (**self).query(sql, params)
    }
}

/// Failure of a composed query.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecError<E: std::error::Error + 'static> {
    /// The query could not be composed.
    #[error(transparent)]
    Compose(#[from] Error),
    /// The driver rejected the query.
    #[error("query failed: {source}")]
    Query {
        /// The SQL that was sent.
        sql: String,
        /// The parameters bound to it.
        params: Vec<Value>,
        /// The driver error.
        #[source]
        source: E,
    },
    /// [`Queries::query_one`] got an empty result.
    #[error("query returned no rows")]
    NoRows,
}

/// Template execution over an [`Execute`] implementation.
pub struct Queries<'a, X: Execute, D: Dialect> {
    executor: &'a X,
    processor: AnnotationProcessor<D>,
}

impl<'a, X: Execute, D: Dialect> Queries<'a, X, D> {
    /// Use a default processor for `dialect`.
    pub fn new(executor: &'a X, dialect: D) -> Self {
        Self::with_processor(executor, AnnotationProcessor::new(dialect))
    }

    /// Use a configured processor (custom keyset, validator).
    pub const fn with_processor(executor: &'a X, processor: AnnotationProcessor<D>) -> Self {
        Self {
            executor,
            processor,
        }
    }

    /// Compose `template` and return every row.
    pub fn query_all(
        &self,
        template: &str,
        search: &Search<'_, D>,
    ) -> Result<Vec<X::Row>, ExecError<X::Error>> {
        let composed = self.processor.process(template, search)?;
        self.run(composed)
    }

    /// Compose `template` and return the first row.
    pub fn query_one(&self, template: &str, search: &Search<'_, D>) -> Result<X::Row, ExecError<X::Error>> {
        self.query_all(template, search)?
            .into_iter()
            .next()
            .ok_or(ExecError::NoRows)
    }

    /// Fetch one page.
    ///
    /// Asks for `search.limit + 1` rows so the page knows whether more
    /// follow; `cursor_of` extracts the keyset position of a row and must
    /// agree with the processor's keyset columns.
    pub fn query_paginated(
        &self,
        template: &str,
        search: &Search<'_, D>,
        cursor_of: impl Fn(&X::Row) -> Cursor,
    ) -> Result<Page<X::Row>, ExecError<X::Error>> {
        let fetch = if search.limit == 0 {
            0
        } else {
            search.limit.saturating_add(1)
        };
        let overfetch = Search {
            limit: fetch,
            ..*search
        };

        let rows = self.query_all(template, &overfetch)?;
        debug!(rows = rows.len(), limit = search.limit, "fetched page");
        Page::from_overfetch(rows, search.limit, cursor_of).map_err(|e| ExecError::Compose(e.into()))
    }

    fn run(&self, composed: QueryResult) -> Result<Vec<X::Row>, ExecError<X::Error>> {
        self.executor
            .query(&composed.sql, &composed.params)
            .map_err(|source| ExecError::Query {
                sql: composed.sql,
                params: composed.params,
                source,
            })
    }
}
