//! Helpers for staying under SQLite's bound-parameter limit.

/// Items per `IN (...)` list or multi-row insert.
///
/// SQLite rejects statements with more than `SQLITE_MAX_VARIABLE_NUMBER`
/// (999 on older builds) parameters.
pub const SQLITE_MAX_PARAMS_CHUNK: usize = 500;

/// Split `items` into slices of at most [`SQLITE_MAX_PARAMS_CHUNK`].
pub fn chunk_for_sqlite<T>(items: &[T]) -> impl Iterator<Item = &[T]> {
    items.chunks(SQLITE_MAX_PARAMS_CHUNK)
}
