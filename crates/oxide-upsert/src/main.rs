//! oxide-upsert CLI
//!
//! Upserts a JSON array of records into a database table.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use futures::StreamExt;
use serde_json::{Map, Value as JsonValue};
use sqlx::any::AnyPoolOptions;
use tracing::{info, Level};

use oxide_upsert::logging;
use oxide_upsert::prelude::*;

/// Upsert JSON records into a SQL table.
#[derive(Parser)]
#[command(name = "oxide-upsert")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL.
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite:db.sqlite3")]
    database: String,

    /// Target table.
    #[arg(short, long)]
    table: String,

    /// Record field used as primary key. Repeat for a composite key.
    #[arg(short, long = "index", required = true)]
    index: Vec<String>,

    /// What to do with rows whose key already exists (update or ignore).
    #[arg(long, default_value = "update")]
    if_row_exists: IfRowExists,

    /// Target schema (PostgreSQL).
    #[arg(short, long)]
    schema: Option<String>,

    /// Create the schema if it does not exist.
    #[arg(long)]
    create_schema: bool,

    /// Fail instead of creating a missing table.
    #[arg(long)]
    no_create_table: bool,

    /// Add record fields missing from the table as new columns.
    #[arg(long)]
    add_new_columns: bool,

    /// Change the type of table columns that hold no values yet.
    #[arg(long)]
    adapt_column_types: bool,

    /// Rows per statement.
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Force the SQL type of a column, as `column=TYPE`. Repeatable.
    #[arg(long = "dtype", value_parser = parse_dtype)]
    dtypes: Vec<(String, SqlType)>,

    /// Print the CREATE TABLE statement and exit.
    #[arg(long)]
    print_ddl: bool,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,

    /// JSON file holding an array of objects (stdin if omitted or `-`).
    input: Option<PathBuf>,
}

impl Cli {
    fn options(&self) -> UpsertOptions {
        let mut options = UpsertOptions::new()
            .create_schema(self.create_schema)
            .create_table(!self.no_create_table)
            .add_new_columns(self.add_new_columns)
            .adapt_empty_column_types(self.adapt_column_types);
        if let Some(schema) = &self.schema {
            options = options.schema(schema.clone());
        }
        if let Some(batch_size) = self.batch_size {
            options = options.batch_size(batch_size);
        }
        for (column, sql_type) in &self.dtypes {
            options = options.type_override(column.clone(), sql_type.clone());
        }
        options
    }
}

fn parse_dtype(value: &str) -> std::result::Result<(String, SqlType), String> {
    let (column, sql_type) = value
        .split_once('=')
        .ok_or_else(|| format!("expected column=TYPE, got {value:?}"))?;
    let sql_type = sql_type.parse::<SqlType>().map_err(|e| e.to_string())?;
    Ok((column.to_string(), sql_type))
}

fn read_records(input: Option<&PathBuf>) -> anyhow::Result<Vec<Map<String, JsonValue>>> {
    let reader: Box<dyn Read> = match input {
        Some(path) if path.as_os_str() != "-" => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("cannot open {}", path.display()))?,
        )),
        _ => Box::new(io::stdin().lock()),
    };
    serde_json::from_reader(reader).context("input must be a JSON array of objects")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    if cli.verbose {
        logging::init_with_level(Level::DEBUG)?;
    } else {
        logging::init()?;
    }

    let records = read_records(cli.input.as_ref())?;
    let index: Vec<&str> = cli.index.iter().map(String::as_str).collect();
    let frame = Frame::from_records(&records, &index)?;
    let options = cli.options();

    if cli.print_ddl {
        let scheme = cli.database.split(':').next().unwrap_or_default();
        let db_type = DbType::from_description(scheme);
        let table = UpsertExecutor::new(&frame, &cli.table, cli.if_row_exists, &options)
            .table_model(db_type)?;
        println!("{};", table.create_table_sql(db_type));
        return Ok(());
    }

    // Connect to database
    oxide_upsert::install_drivers();
    let pool = AnyPoolOptions::new()
        .max_connections(5)
        .connect(&cli.database)
        .await
        .with_context(|| format!("cannot connect to {}", cli.database))?;

    let mut stream = upsert_stream(&pool, &frame, &cli.table, cli.if_row_exists, &options).await?;
    let mut total = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        total += chunk.rows_affected;
        println!(
            "chunk {}: {} rows sent, {} rows affected",
            chunk.index + 1,
            chunk.rows,
            chunk.rows_affected
        );
    }

    info!(table = %cli.table, rows = frame.len(), rows_affected = total, "Done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dtype() {
        let (column, sql_type) = parse_dtype("payload=JSONB").unwrap();
        assert_eq!(column, "payload");
        assert_eq!(sql_type, SqlType::Json);

        assert!(parse_dtype("payload").unwrap_err().contains("column=TYPE"));
        assert!(parse_dtype("payload=").is_err());
    }

    #[test]
    fn test_cli_options() {
        let cli = Cli::try_parse_from([
            "oxide-upsert",
            "--table",
            "people",
            "--index",
            "id",
            "--no-create-table",
            "--dtype",
            "name=VARCHAR(10)",
            "--batch-size",
            "50",
        ])
        .unwrap();
        assert_eq!(cli.if_row_exists, IfRowExists::Update);

        let options = cli.options();
        assert!(!options.create_table);
        assert_eq!(options.batch_size, Some(50));
        assert_eq!(
            options.type_overrides.get("name"),
            Some(&SqlType::Varchar(Some(10)))
        );
    }
}
