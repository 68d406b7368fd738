use thiserror::Error;

/// Error type for outbox store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Commit requested for a sequence that was never appended.
    #[error("envelope {0} not found")]
    NotFound(u64),

    /// The caller's cancel token fired before the transaction committed.
    /// Nothing was persisted.
    #[error("store operation cancelled")]
    Cancelled,

    /// Storage engine failure (I/O, corruption detected by the engine, ...).
    #[error("storage engine error: {0}")]
    Engine(#[from] redb::Error),

    /// A stored record could not be encoded or decoded.
    #[error("envelope codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Stored bytes violate the persisted layout.
    #[error("corrupt store: {0}")]
    Corrupt(String),

    #[error("store lock poisoned during {0}")]
    LockPoisoned(&'static str),
}

macro_rules! engine_error_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for StoreError {
                fn from(err: $ty) -> Self {
                    StoreError::Engine(err.into())
                }
            }
        )*
    };
}

engine_error_from!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

/// Result type alias using StoreError.
pub type StoreResult<T> = Result<T, StoreError>;
