#[derive(Debug)]
pub enum ResultRepositoryError {
    Serialization(String),
    Database(String),
}

impl std::fmt::Display for ResultRepositoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultRepositoryError::Serialization(msg) => {
                write!(f, "Serialization error: {}", msg)
            }
            ResultRepositoryError::Database(msg) => write!(f, "Database error: {}", msg),
        }
    }
}

impl std::error::Error for ResultRepositoryError {}

impl From<sqlx::Error> for ResultRepositoryError {
    fn from(err: sqlx::Error) -> Self {
        ResultRepositoryError::Database(err.to_string())
    }
}
