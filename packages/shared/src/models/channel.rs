use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a lobby channel, serialized with the stored uppercase tokens.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChannelState {
    #[serde(rename = "LOBBY")]
    Lobby,
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "FINISHED")]
    Finished,
    #[serde(rename = "ABORTED")]
    Aborted,
}

/// Channel metadata, stored as JSON under `ch:<code>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMeta {
    pub id: String,
    pub state: ChannelState,
    pub created_at: DateTime<Utc>,

    pub creator_id: String,
    pub creator_name: String,
    pub creator_room: String,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub white_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub white_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub black_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub black_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub game_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MakeResult {
    pub code: String,
    pub meta: ChannelMeta,
}

#[derive(Debug, Clone)]
pub struct JoinResult {
    pub started: bool,
    pub game_id: Option<String>,
    pub meta: ChannelMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_serializes_as_uppercase_tokens() {
        let meta = ChannelMeta {
            id: "CH-A1B2C3".to_string(),
            state: ChannelState::Lobby,
            created_at: Utc::now(),
            creator_id: "u1".to_string(),
            creator_name: "Alice".to_string(),
            creator_room: "100".to_string(),
            white_id: None,
            white_name: None,
            black_id: None,
            black_name: None,
            game_id: None,
        };
        let raw = serde_json::to_string(&meta).unwrap();
        assert!(raw.contains("\"LOBBY\""));
        assert!(!raw.contains("game_id"));
        let back: ChannelMeta = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.state, ChannelState::Lobby);
    }
}
