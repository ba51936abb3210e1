#![allow(dead_code)]

use std::io::Write;
use std::sync::{Arc, Mutex};

use oxide_upsert::{Column, Frame, Value};
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use tempfile::TempDir;

/// Single connection pool on a private in-memory database.
pub async fn memory_pool() -> AnyPool {
    oxide_upsert::install_drivers();
    AnyPoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap_or_else(|e| panic!("Failed to open in-memory database: {e}"))
}

/// Pool on a database file, for tests that need several connections.
///
/// The directory must outlive the pool.
pub async fn file_pool(max_connections: u32) -> (TempDir, AnyPool) {
    oxide_upsert::install_drivers();
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
    let pool = AnyPoolOptions::new()
        .max_connections(max_connections)
        .connect(&url)
        .await
        .unwrap_or_else(|e| panic!("Failed to open {url}: {e}"));
    (dir, pool)
}

/// Frame keyed by `profileid` with one `name` column.
pub fn people(ids: &[i64], names: &[&str]) -> Frame {
    Frame::new(
        vec![Column::new("profileid", ids.iter().copied())],
        vec![Column::new("name", names.iter().copied())],
    )
    .unwrap()
}

/// Frame of `n` rows keyed by `id`, with five data columns.
pub fn wide(n: i64) -> Frame {
    let ids: Vec<i64> = (0..n).collect();
    Frame::new(
        vec![Column::new("id", ids.clone())],
        (0..5)
            .map(|c| Column::new(format!("c{c}"), ids.iter().map(|i| Value::Int(i * c))))
            .collect(),
    )
    .unwrap()
}

/// `(profileid, name)` rows of a table, ordered by key.
pub async fn read_people(pool: &AnyPool, table: &str) -> Vec<(i64, String)> {
    sqlx::query_as(&format!(
        "SELECT profileid, name FROM \"{table}\" ORDER BY profileid"
    ))
    .fetch_all(pool)
    .await
    .unwrap_or_else(|e| panic!("Failed to read {table}: {e}"))
}

pub async fn count(pool: &AnyPool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM \"{table}\""))
        .fetch_one(pool)
        .await
        .unwrap_or_else(|e| panic!("Failed to count {table}: {e}"))
}

pub async fn table_exists(pool: &AnyPool, table: &str) -> bool {
    let n: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
    )
    .bind(table)
    .fetch_one(pool)
    .await
    .unwrap();
    n > 0
}

/// Declared type of a column, as SQLite reports it.
pub async fn column_type(pool: &AnyPool, table: &str, column: &str) -> Option<String> {
    sqlx::query_scalar("SELECT type FROM pragma_table_info(?) WHERE name = ?")
        .bind(table)
        .bind(column)
        .fetch_optional(pool)
        .await
        .unwrap()
}

/// In-memory sink for formatted log output.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }

    /// A subscriber writing into this buffer at INFO and above.
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync {
        let writer = self.clone();
        tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .finish()
    }
}

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
