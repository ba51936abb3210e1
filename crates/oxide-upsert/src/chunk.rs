//! Batch sizing and chunking.

use tracing::info;

use crate::dialect::DbType;
use crate::error::{Result, UpsertError};

/// Fails unless `batch_size` is positive.
pub fn validate_batch_size(batch_size: usize) -> Result<()> {
    if batch_size == 0 {
        return Err(UpsertError::InvalidArgument(
            "batch_size must be a positive integer".to_string(),
        ));
    }
    Ok(())
}

/// Returns the batch size to use so that a statement stays under the
/// dialect's parameter ceiling.
///
/// Each row binds `values_per_row` parameters (key levels plus columns). When
/// the requested size would exceed the ceiling it is reduced to
/// `floor(max_parameters / values_per_row)` and the reduction is logged. A
/// table too wide for even one row fails with
/// [`UpsertError::TooManyColumnsForUpsert`].
pub fn adjust_batch_size(
    db_type: DbType,
    sqlite_version: Option<(u32, u32, u32)>,
    values_per_row: usize,
    batch_size: usize,
) -> Result<usize> {
    validate_batch_size(batch_size)?;
    let Some(maximum) = db_type.max_parameters(sqlite_version) else {
        return Ok(batch_size);
    };
    if values_per_row == 0 {
        return Ok(batch_size);
    }

    let max_rows = maximum / values_per_row;
    if max_rows == 0 {
        return Err(UpsertError::TooManyColumnsForUpsert {
            dialect: db_type.name(),
            maximum,
            values_per_row,
        });
    }
    if batch_size > max_rows {
        info!(
            dialect = db_type.name(),
            requested = batch_size,
            adjusted = max_rows,
            maximum,
            values_per_row,
            "Reduced batch size due to max parameter restriction"
        );
        return Ok(max_rows);
    }
    Ok(batch_size)
}

/// Splits `rows` into consecutive chunks of `batch_size` (the last may be shorter).
pub fn create_chunks<T>(rows: Vec<T>, batch_size: usize) -> Result<Vec<Vec<T>>> {
    validate_batch_size(batch_size)?;
    let mut chunks = Vec::with_capacity(rows.len().div_ceil(batch_size));
    let mut rows = rows.into_iter().peekable();
    while rows.peek().is_some() {
        chunks.push(rows.by_ref().take(batch_size).collect());
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{SQLITE_LEGACY_MAX_PARAMETERS, SQLITE_MAX_PARAMETERS};

    #[test]
    fn test_chunk_count() {
        let rows: Vec<u32> = (0..10).collect();
        let chunks = create_chunks(rows, 3).unwrap();
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 3, 1]);
        assert_eq!(chunks[3], vec![9]);

        let chunks = create_chunks((0..9).collect::<Vec<u32>>(), 3).unwrap();
        assert_eq!(chunks.len(), 3);
        assert!(create_chunks(Vec::<u32>::new(), 3).unwrap().is_empty());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        assert!(matches!(
            create_chunks(vec![1], 0),
            Err(UpsertError::InvalidArgument(_))
        ));
        assert!(matches!(
            adjust_batch_size(DbType::Other, None, 3, 0),
            Err(UpsertError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_sqlite_reduction() {
        // 5 columns + 1 key level
        assert_eq!(
            adjust_batch_size(DbType::Sqlite, Some((3, 45, 0)), 6, 100_000).unwrap(),
            SQLITE_MAX_PARAMETERS / 6
        );
        assert_eq!(SQLITE_MAX_PARAMETERS / 6, 5461);
    }

    #[test]
    fn test_legacy_sqlite_ceiling() {
        assert_eq!(
            adjust_batch_size(DbType::Sqlite, Some((3, 31, 0)), 10, 1000).unwrap(),
            SQLITE_LEGACY_MAX_PARAMETERS / 10
        );
    }

    #[test]
    fn test_small_batches_are_kept() {
        assert_eq!(adjust_batch_size(DbType::Postgres, None, 6, 100).unwrap(), 100);
        assert_eq!(adjust_batch_size(DbType::Other, None, 6, 100_000).unwrap(), 100_000);
    }

    #[test]
    fn test_too_many_columns() {
        let err = adjust_batch_size(DbType::Sqlite, Some((3, 20, 0)), 1000, 1).unwrap_err();
        assert!(matches!(
            err,
            UpsertError::TooManyColumnsForUpsert {
                maximum: 999,
                values_per_row: 1000,
                ..
            }
        ));
    }
}
