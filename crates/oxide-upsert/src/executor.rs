//! Upsert executor.
//!
//! Drives one upsert call: validates the frame, opens (or borrows) the
//! connection, reconciles the live schema, then compiles and runs one
//! statement per chunk, either all at once or lazily as a stream.

use futures::stream::{self, BoxStream, StreamExt};
use sqlx::AnyConnection;
use tracing::{debug, info};

use crate::chunk::{adjust_batch_size, create_chunks, validate_batch_size};
use crate::dialect::DbType;
use crate::error::Result;
use crate::frame::Frame;
use crate::introspect;
use crate::query::{IfRowExists, UpsertQuery};
use crate::reconcile::SchemaReconciler;
use crate::schema::TableSchema;
use crate::transaction::{Connectable, TransactionHandler};
use crate::upsert::UpsertOptions;
use crate::value::{normalize_rows, SqlValue};

/// Outcome of one executed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkResult {
    /// Position of the chunk, starting at 0.
    pub index: usize,
    /// Number of rows sent in the chunk.
    pub rows: usize,
    /// Number of rows the database reports as affected.
    pub rows_affected: u64,
}

/// Lazy sequence of chunk results.
///
/// Owns the connection (and, for a pool, the transaction) until it is
/// exhausted or dropped. Exhausting it commits; an error or an early drop
/// rolls back.
pub type UpsertStream<'c> = BoxStream<'c, Result<ChunkResult>>;

type Rows = Vec<Vec<SqlValue>>;

struct PreparedUpsert {
    query: UpsertQuery,
    chunks: Vec<Rows>,
}

struct StreamState<'c> {
    handler: TransactionHandler<'c>,
    query: UpsertQuery,
    chunks: std::vec::IntoIter<Rows>,
    next_index: usize,
    if_row_exists: IfRowExists,
}

/// Executes an upsert of one frame into one table.
pub struct UpsertExecutor<'a> {
    frame: &'a Frame,
    table_name: &'a str,
    if_row_exists: IfRowExists,
    options: &'a UpsertOptions,
}

impl<'a> UpsertExecutor<'a> {
    /// Creates a new upsert executor.
    #[must_use]
    pub fn new(
        frame: &'a Frame,
        table_name: &'a str,
        if_row_exists: IfRowExists,
        options: &'a UpsertOptions,
    ) -> Self {
        Self {
            frame,
            table_name,
            if_row_exists,
            options,
        }
    }

    /// Validates the arguments and builds the table model for `db_type`.
    ///
    /// Touches no database.
    pub fn table_model(&self, db_type: DbType) -> Result<TableSchema> {
        if let Some(batch_size) = self.options.batch_size {
            validate_batch_size(batch_size)?;
        }
        TableSchema::from_frame(
            self.frame,
            self.table_name,
            self.options.schema.as_deref(),
            db_type,
            &self.options.type_overrides,
        )
    }

    /// Runs every chunk, committing at the end if the transaction is owned.
    pub async fn execute(&self, connectable: Connectable<'_>) -> Result<()> {
        let db_type = connectable.db_type();
        let table = self.table_model(db_type)?;

        let mut handler = TransactionHandler::begin(connectable).await?;
        let outcome = self.run(handler.connection(), db_type, table).await;
        handler.finish(outcome).await
    }

    /// Prepares the upsert and returns a stream executing one chunk per item.
    ///
    /// Validation and schema changes happen before this returns.
    pub async fn execute_stream<'c>(&self, connectable: Connectable<'c>) -> Result<UpsertStream<'c>> {
        let db_type = connectable.db_type();
        let table = self.table_model(db_type)?;

        let mut handler = TransactionHandler::begin(connectable).await?;
        let prepared = match self.prepare(handler.connection(), db_type, table).await {
            Ok(prepared) => prepared,
            Err(err) => return Err(handler.abort(err).await),
        };

        let state = StreamState {
            handler,
            query: prepared.query,
            chunks: prepared.chunks.into_iter(),
            next_index: 0,
            if_row_exists: self.if_row_exists,
        };
        Ok(stream::try_unfold(state, next_chunk).boxed())
    }

    async fn run(&self, conn: &mut AnyConnection, db_type: DbType, table: TableSchema) -> Result<()> {
        let prepared = self.prepare(conn, db_type, table).await?;
        let total = prepared.chunks.len();
        let mut rows_affected = 0;
        for (index, rows) in prepared.chunks.into_iter().enumerate() {
            debug!(chunk = index + 1, total, "Upserting chunk");
            rows_affected += prepared
                .query
                .execute(conn, rows, self.if_row_exists)
                .await?;
        }
        info!(
            table = %self.table_name,
            rows = self.frame.len(),
            chunks = total,
            rows_affected,
            "Upsert complete"
        );
        Ok(())
    }

    /// Sizes the batches, reconciles the schema and chunks the rows.
    async fn prepare(
        &self,
        conn: &mut AnyConnection,
        db_type: DbType,
        table: TableSchema,
    ) -> Result<PreparedUpsert> {
        // Sized first so a table too wide for the dialect fails before any DDL.
        let batch_size = if self.frame.is_empty() {
            None
        } else {
            let sqlite_version = if db_type == DbType::Sqlite {
                introspect::sqlite_version(conn).await?
            } else {
                None
            };
            let requested = self.options.batch_size.unwrap_or(self.frame.len());
            Some(adjust_batch_size(
                db_type,
                sqlite_version,
                table.columns.len(),
                requested,
            )?)
        };

        let reconciler = SchemaReconciler::new(db_type, &table, self.frame)
            .handle_concurrent_creation(self.options.handle_concurrent_creation);
        self.setup_objects(conn, &reconciler).await?;

        let Some(batch_size) = batch_size else {
            return Ok(PreparedUpsert {
                query: UpsertQuery::new(db_type, table),
                chunks: Vec::new(),
            });
        };

        // Postgres placeholders are cast, and must be cast to what the table declares.
        let live = if db_type == DbType::Postgres {
            introspect::get_columns(conn, db_type, table.schema.as_deref(), &table.name).await?
        } else {
            Vec::new()
        };
        Ok(PreparedUpsert {
            query: UpsertQuery::new(db_type, table).with_live_columns(&live),
            chunks: create_chunks(normalize_rows(self.frame, db_type), batch_size)?,
        })
    }

    /// Schema creation, table creation, type adaptation, column addition: in that order.
    async fn setup_objects(
        &self,
        conn: &mut AnyConnection,
        reconciler: &SchemaReconciler<'_>,
    ) -> Result<()> {
        if self.options.create_schema && reconciler.table().schema.is_some() {
            reconciler.create_schema_if_not_exists(conn).await?;
        }
        if self.options.create_table {
            reconciler.create_table_if_not_exists(conn).await?;
        }
        if self.options.adapt_empty_column_types && reconciler.table_exists(conn).await? {
            reconciler.adapt_dtype_of_empty_db_columns(conn).await?;
        }
        if self.options.add_new_columns && reconciler.table_exists(conn).await? {
            reconciler.add_new_columns(conn).await?;
        }
        Ok(())
    }
}

async fn next_chunk(mut state: StreamState<'_>) -> Result<Option<(ChunkResult, StreamState<'_>)>> {
    let Some(rows) = state.chunks.next() else {
        state.handler.commit().await?;
        return Ok(None);
    };

    let row_count = rows.len();
    let outcome = state
        .query
        .execute(state.handler.connection(), rows, state.if_row_exists)
        .await;
    match outcome {
        Ok(rows_affected) => {
            let result = ChunkResult {
                index: state.next_index,
                rows: row_count,
                rows_affected,
            };
            state.next_index += 1;
            Ok(Some((result, state)))
        }
        Err(err) => Err(state.handler.abort(err).await),
    }
}
