use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("token encoding: {0}")]
    Codec(#[from] tg_core::CodecError),
    #[error("edge index {index} follows {previous} in session {session_id}")]
    OutOfOrder {
        session_id: uuid::Uuid,
        previous: u64,
        index: u64,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A push that stopped partway. Batches before the failing one stay
/// committed; the failing batch was rolled back.
#[derive(Debug, Error)]
#[error("push failed after {committed} committed edges: {source}")]
pub struct PushError {
    pub committed: usize,
    #[source]
    pub source: StoreError,
}
