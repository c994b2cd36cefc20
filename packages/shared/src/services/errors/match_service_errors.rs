use crate::repositories::errors::kv_store_errors::KvStoreError;
use crate::services::errors::chess_service_errors::ChessServiceError;

#[derive(Debug)]
pub enum MatchServiceError {
    InvalidArgs,
    /// No addressable game: expired, finished, or never existed.
    NotFound,
    /// A concurrent command won the race on the same game.
    Conflict,
    Serialization(String),
    Render(String),
    Store(KvStoreError),
    Rules(ChessServiceError),
}

impl std::fmt::Display for MatchServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchServiceError::InvalidArgs => write!(f, "invalid arguments"),
            MatchServiceError::NotFound => write!(f, "game not found"),
            MatchServiceError::Conflict => write!(f, "concurrent command detected"),
            MatchServiceError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            MatchServiceError::Render(msg) => write!(f, "Render error: {}", msg),
            MatchServiceError::Store(err) => write!(f, "State store error: {}", err),
            MatchServiceError::Rules(err) => write!(f, "Rules error: {}", err),
        }
    }
}

impl std::error::Error for MatchServiceError {}

impl From<KvStoreError> for MatchServiceError {
    fn from(err: KvStoreError) -> Self {
        match err {
            KvStoreError::TxConflict => MatchServiceError::Conflict,
            other => MatchServiceError::Store(other),
        }
    }
}

impl From<ChessServiceError> for MatchServiceError {
    fn from(err: ChessServiceError) -> Self {
        MatchServiceError::Rules(err)
    }
}
