#[derive(Debug)]
pub enum KvStoreError {
    /// A watched key changed between read and commit; the caller may retry.
    TxConflict,
    NotFound,
    Transport(String),
}

impl std::fmt::Display for KvStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KvStoreError::TxConflict => write!(f, "watched key modified concurrently"),
            KvStoreError::NotFound => write!(f, "key not found"),
            KvStoreError::Transport(msg) => write!(f, "state store transport error: {}", msg),
        }
    }
}

impl std::error::Error for KvStoreError {}

impl From<redis::RedisError> for KvStoreError {
    fn from(err: redis::RedisError) -> Self {
        KvStoreError::Transport(err.to_string())
    }
}
