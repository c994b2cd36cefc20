use async_trait::async_trait;

/// Identity of a single-player session: one session per (room, user).
#[derive(Debug, Clone)]
pub struct SessionMeta {
    pub session_id: String,
    pub room: String,
    pub sender: String,
}

impl SessionMeta {
    pub fn new(room: &str, user_id: &str, sender: &str) -> Self {
        SessionMeta {
            session_id: format!("{}:{}", room.trim(), user_id.trim()),
            room: room.trim().to_string(),
            sender: sender.trim().to_string(),
        }
    }
}

/// Engine-backed commands the router forwards to the collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SoloCommand {
    Start { preset: Option<String> },
    Status,
    Undo,
    Resign,
    Move { input: String },
    History { limit: usize },
    GameRecord { id: i64 },
    Profile,
    SetPreferred { preset: String },
    Assist,
}

/// Reply from the collaborator; text always, board image when relevant.
#[derive(Debug, Clone)]
pub struct SoloReply {
    pub text: String,
    pub image: Option<Vec<u8>>,
}

#[derive(Debug)]
pub enum SoloError {
    NoSession,
    Engine(String),
}

impl std::fmt::Display for SoloError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SoloError::NoSession => write!(f, "no active session"),
            SoloError::Engine(msg) => write!(f, "engine error: {}", msg),
        }
    }
}

impl std::error::Error for SoloError {}

/// Contract of the single-player engine subsystem. The engine itself (UCI
/// pool, opening book, presets) lives outside this crate; the router only
/// needs session presence for session-first dispatch plus a command sink.
#[async_trait]
pub trait SoloService: Send + Sync {
    async fn has_session(&self, meta: &SessionMeta) -> bool;
    async fn handle(&self, meta: &SessionMeta, command: SoloCommand)
        -> Result<SoloReply, SoloError>;
}
