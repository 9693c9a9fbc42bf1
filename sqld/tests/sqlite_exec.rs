//! Runs composed SQL against a real SQLite database.
//!
//! Snapshot tests pin the text; these check that the text and the parameter
//! order are actually accepted by a database and select the right rows.

use rusqlite::Connection;
use rusqlite::types::Value as SqlValue;
use sqld::{
    Config, Cursor, ExecError, Execute, Queries, Search, Sqlite, Value, decode_cursor, from_params_with_sort,
    parse_query_string,
};

const LIST_POSTS: &str = "SELECT id, title, created_at FROM posts \
                          WHERE published = 1 /* sqld:where */ /* sqld:cursor */ \
                          ORDER BY created_at DESC, id DESC /* sqld:orderby */ /* sqld:limit */";

#[derive(Debug, Clone, PartialEq)]
struct Post {
    id: i64,
    title: String,
    created_at: String,
}

struct Db(Connection);

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(n) => SqlValue::Integer(*n),
        Value::Float(f) => SqlValue::Real(*f),
        Value::Timestamp(ts) => SqlValue::Text(ts.format("%Y-%m-%d %H:%M:%S").to_string()),
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) => panic!("arrays are expanded into one placeholder per element"),
    }
}

impl Execute for Db {
    type Row = Post;
    type Error = rusqlite::Error;

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Post>, rusqlite::Error> {
        let mut stmt = self.0.prepare(sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params.iter().map(to_sql)), |row| {
            Ok(Post {
                id: row.get(0)?,
                title: row.get(1)?,
                created_at: row.get(2)?,
            })
        })?;
        rows.collect()
    }
}

fn setup() -> Db {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE posts (
            id INTEGER PRIMARY KEY,
            title TEXT NOT NULL,
            published INTEGER NOT NULL,
            created_at TEXT NOT NULL
        );
        INSERT INTO posts VALUES (1, 'Intro to Rust', 1, '2024-01-01');
        INSERT INTO posts VALUES (2, 'Rust Traits', 1, '2024-01-02');
        INSERT INTO posts VALUES (3, 'Draft: async', 0, '2024-01-03');
        INSERT INTO posts VALUES (4, 'SQL tricks', 1, '2024-01-04');
        INSERT INTO posts VALUES (5, 'More RUST', 1, '2024-01-04');
        INSERT INTO posts VALUES (6, 'Cooking', 1, '2024-01-06');",
    )
    .unwrap();
    Db(conn)
}

fn ids(posts: &[Post]) -> Vec<i64> {
    posts.iter().map(|p| p.id).collect()
}

fn cursor_of(post: &Post) -> Cursor {
    Cursor::new(post.created_at.as_str(), i32::try_from(post.id).unwrap())
}

#[test]
fn paginates_through_all_rows() {
    let db = setup();
    let queries = Queries::new(&db, Sqlite);

    let mut seen = Vec::new();
    let mut token: Option<String> = None;
    let mut pages = 0;
    loop {
        let cursor = decode_cursor(token.as_deref().unwrap_or_default()).unwrap();
        let search = Search::new().cursor(cursor.as_ref()).limit(2);
        let page = queries.query_paginated(LIST_POSTS, &search, cursor_of).unwrap();
        pages += 1;
        seen.extend(ids(&page.items));
        if !page.has_more {
            break;
        }
        token = page.next_cursor;
    }

    // ties on created_at are broken by id
    assert_eq!(seen, vec![6, 5, 4, 2, 1]);
    assert_eq!(pages, 3);
}

#[test]
fn filters_and_sort_from_query_string() {
    let db = setup();
    let config = Config::new().allow_fields(["title", "id", "created_at"]);
    let params = parse_query_string("title[contains]=RUST&title[notin]=Rust+Traits&sort=id");
    let (conditions, order_by) = from_params_with_sort(&params, Sqlite, &config).unwrap();

    let search = Search::new().conditions(&conditions).order_by(&order_by).limit(10);
    let rows = Queries::new(&db, Sqlite).query_all(LIST_POSTS, &search).unwrap();

    assert_eq!(ids(&rows), vec![1, 5]);
}

#[test]
fn between_and_null_checks_run() {
    let db = setup();
    let params = parse_query_string("id[between]=2,5&title[isnotnull]=1&created_at[gte]=2024-01-02");
    let (conditions, _) = from_params_with_sort(&params, Sqlite, &Config::new()).unwrap();

    let search = Search::new().conditions(&conditions);
    let rows = Queries::new(&db, Sqlite).query_all(LIST_POSTS, &search).unwrap();

    assert_eq!(ids(&rows), vec![5, 4, 2]);
}

#[test]
fn query_one_and_no_rows() {
    let db = setup();
    let queries = Queries::new(&db, Sqlite);
    let first = queries.query_one(LIST_POSTS, &Search::new().limit(1)).unwrap();
    assert_eq!(first.title, "Cooking");

    let params = parse_query_string("title=Nope");
    let (conditions, _) = from_params_with_sort(&params, Sqlite, &Config::new()).unwrap();
    let err = queries
        .query_one(LIST_POSTS, &Search::new().conditions(&conditions))
        .unwrap_err();
    assert!(matches!(err, ExecError::NoRows));
}

#[test]
fn driver_errors_carry_the_query() {
    let db = setup();
    let err = Queries::new(&db, Sqlite)
        .query_all(
            "SELECT id, title, created_at FROM missing WHERE true /* sqld:where */",
            &Search::new().conditions(&sqld::WhereBuilder::new(Sqlite).equal("id", 3)),
        )
        .unwrap_err();
    let ExecError::Query { sql, params, source } = err else {
        panic!("expected a driver error");
    };
    assert_eq!(sql, "SELECT id, title, created_at FROM missing WHERE true AND id = ?");
    assert_eq!(params, vec![Value::Int(3)]);
    assert!(source.to_string().contains("missing"));
}
