use crate::repositories::errors::kv_store_errors::KvStoreError;
use crate::services::errors::match_service_errors::MatchServiceError;

#[derive(Debug)]
pub enum LobbyServiceError {
    InvalidArgs,
    /// Channel expired or never existed.
    ChannelGone,
    /// Channel already bound to a running game.
    ChannelActive,
    /// Participants set already holds two players.
    Full,
    /// The user already has an ACTIVE game in the addressed room.
    PlayerBusyInRoom,
    /// The user already created a LOBBY-state channel.
    CreatorHasLobby,
    /// Could not allocate a unique channel code.
    CodeExhausted,
    /// A concurrent join won the race on the participants set.
    Conflict,
    Serialization(String),
    Store(KvStoreError),
    Match(MatchServiceError),
}

impl std::fmt::Display for LobbyServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LobbyServiceError::InvalidArgs => write!(f, "invalid arguments"),
            LobbyServiceError::ChannelGone => write!(f, "channel not found or expired"),
            LobbyServiceError::ChannelActive => write!(f, "channel already active"),
            LobbyServiceError::Full => write!(f, "channel already has two participants"),
            LobbyServiceError::PlayerBusyInRoom => {
                write!(f, "player has active game in this room")
            }
            LobbyServiceError::CreatorHasLobby => write!(f, "user already has a lobby"),
            LobbyServiceError::CodeExhausted => write!(f, "failed to allocate channel code"),
            LobbyServiceError::Conflict => write!(f, "concurrent join detected"),
            LobbyServiceError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            LobbyServiceError::Store(err) => write!(f, "State store error: {}", err),
            LobbyServiceError::Match(err) => write!(f, "Match error: {}", err),
        }
    }
}

impl std::error::Error for LobbyServiceError {}

impl From<KvStoreError> for LobbyServiceError {
    fn from(err: KvStoreError) -> Self {
        match err {
            KvStoreError::TxConflict => LobbyServiceError::Conflict,
            other => LobbyServiceError::Store(other),
        }
    }
}

impl From<MatchServiceError> for LobbyServiceError {
    fn from(err: MatchServiceError) -> Self {
        LobbyServiceError::Match(err)
    }
}
