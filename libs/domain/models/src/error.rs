use thiserror::Error;

/// Errors a persistence-trait implementation can surface. These only
/// ever escape from synchronous operator-facing call sites; background
/// components treat them as logged, best-effort failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
}
