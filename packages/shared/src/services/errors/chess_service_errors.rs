#[derive(Debug, PartialEq, Eq)]
pub enum ChessServiceError {
    /// Input parsed as neither a legal UCI move nor a legal SAN move.
    IllegalMove,
    BadInput,
    /// The stored UCI history no longer replays from the initial position.
    CorruptHistory(String),
}

impl std::fmt::Display for ChessServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChessServiceError::IllegalMove => write!(f, "illegal move"),
            ChessServiceError::BadInput => write!(f, "invalid move input"),
            ChessServiceError::CorruptHistory(msg) => {
                write!(f, "stored move history failed to replay: {}", msg)
            }
        }
    }
}

impl std::error::Error for ChessServiceError {}
