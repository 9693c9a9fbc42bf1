//! # sqld
//!
//! Compose annotated SQL templates from the command line.
//!
//! ```bash
//! # Filters and sort from a query string, printed as {"sql": ..., "params": [...]}
//! sqld compose --dialect postgres --query 'age[gte]=18&sort=-name' --limit 20 @queries/list_users.sql
//!
//! # Restrict fields with a TOML policy file
//! sqld compose --config users.toml --query 'email[contains]=acme' 'SELECT * FROM users WHERE true /* sqld:where */'
//!
//! # Inspect or forge cursors
//! sqld cursor encode '"2024-01-15T10:30:00Z"' 42
//! sqld cursor decode eyJ0aW1lc3RhbXAiOiIyMDI0LTAxLTE1IiwiaWQiOjQyfQ==
//! ```

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use sqld::{
    AnnotationProcessor, Config, Dialect, MySql, Postgres, QueryResult, Sqlite, StatementValidator, Value,
    decode_cursor, encode_cursor, from_params_with_sort, parse_query_string, validate_query,
};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sqld")]
#[command(about = "Compose annotated SQL templates with filters, sorting and cursors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compose a template and print the SQL and parameters as JSON
    Compose(ComposeArgs),

    /// Check a template for stacked statements
    Check {
        /// Template text, or @path to read it from a file
        template: String,
    },

    /// Encode or decode pagination cursors
    #[command(subcommand)]
    Cursor(CursorCommand),
}

#[derive(clap::Args)]
struct ComposeArgs {
    /// Target database
    #[arg(short, long, value_enum, default_value_t = DialectArg::Postgres)]
    dialect: DialectArg,

    /// TOML filter/sort policy (allow-list, mappings, limits)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Request query string (`age[gte]=18&sort=-name`)
    #[arg(short, long, default_value = "")]
    query: String,

    /// Page size; 0 leaves the limit marker empty
    #[arg(short, long, default_value_t = 0)]
    limit: u32,

    /// Cursor token from a previous page
    #[arg(long)]
    cursor: Option<String>,

    /// Parameter already referenced by the template, as JSON (repeatable)
    #[arg(short, long = "param")]
    params: Vec<String>,

    /// Reject the result if it contains more than one statement
    #[arg(long)]
    strict: bool,

    /// Template text, or @path to read it from a file
    template: String,
}

#[derive(Subcommand)]
enum CursorCommand {
    /// Encode an ordering value (JSON) and id into a token
    Encode {
        /// Ordering value as JSON (`"2024-01-15"`, `1700000000`)
        value: String,
        /// Tie-break id
        id: i32,
    },
    /// Decode a token
    Decode {
        /// Cursor token
        token: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DialectArg {
    Postgres,
    Mysql,
    Sqlite,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Compose(args) => {
            let result = match args.dialect {
                DialectArg::Postgres => compose(Postgres, &args)?,
                DialectArg::Mysql => compose(MySql, &args)?,
                DialectArg::Sqlite => compose(Sqlite, &args)?,
            };
            println!("{}", serde_json::to_string_pretty(&result)?);
        },
        Commands::Check { template } => {
            let sql = read_template(&template)?;
            validate_query(&sql).context("template failed validation")?;
            info!("template ok");
            println!("ok");
        },
        Commands::Cursor(CursorCommand::Encode { value, id }) => {
            let value = parse_param(&value);
            if value.is_null() {
                bail!("cursor ordering value must not be null");
            }
            println!("{}", encode_cursor(value, id)?);
        },
        Commands::Cursor(CursorCommand::Decode { token }) => match decode_cursor(&token)? {
            Some(cursor) => {
                let out = serde_json::json!({ "value": cursor.value, "id": cursor.id });
                println!("{}", serde_json::to_string_pretty(&out)?);
            },
            None => bail!("empty cursor token"),
        },
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise `-v` raises the level from `warn`.
fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn compose<D: Dialect>(dialect: D, args: &ComposeArgs) -> Result<QueryResult> {
    let template = read_template(&args.template)?;

    let config = match &args.config {
        Some(path) => Config::from_toml_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::new(),
    };
    debug!(?config, "loaded policy");

    let params = parse_query_string(&args.query);
    let (conditions, order_by) = from_params_with_sort(&params, dialect, &config)?;

    let cursor = match &args.cursor {
        Some(token) => decode_cursor(token)?,
        None => None,
    };

    let pre: Vec<Value> = args.params.iter().map(|p| parse_param(p)).collect();

    let mut processor = AnnotationProcessor::new(dialect);
    if args.strict {
        processor = processor.validator(StatementValidator);
    }

    let result = processor.process_query(
        &template,
        Some(&conditions),
        cursor.as_ref(),
        Some(&order_by),
        args.limit,
        &pre,
    )?;
    Ok(result)
}

/// `@path` reads a file; anything else is the template itself.
fn read_template(arg: &str) -> Result<String> {
    match arg.strip_prefix('@') {
        Some(path) => {
            std::fs::read_to_string(path).with_context(|| format!("failed to read template {path}"))
        },
        None if arg.trim().is_empty() => bail!("template is empty"),
        None => Ok(arg.to_string()),
    }
}

/// JSON when it parses, otherwise the raw text as a string.
fn parse_param(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::from(raw))
}
