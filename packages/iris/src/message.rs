use serde::Deserialize;

/// One frame from the gateway. Some messages arrive twice: a minimal frame
/// carrying only the sender display name, then a structured frame whose
/// `json` payload has the user and room ids. The router merges the two.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Frame {
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub json: Option<FramePayload>,
}

/// Structured payload of a gateway frame.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FramePayload {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub room_id: Option<String>,
    /// Legacy schema used `chat_id` for the room.
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

impl Frame {
    /// Canonical text content: prefer the top-level field, fall back to the
    /// structured payload.
    pub fn text(&self) -> &str {
        if let Some(msg) = self.msg.as_deref() {
            let trimmed = msg.trim();
            if !trimmed.is_empty() {
                return trimmed;
            }
        }
        self.json
            .as_ref()
            .and_then(|p| p.message.as_deref())
            .map(str::trim)
            .unwrap_or("")
    }

    /// True for the sender-name-only variant: no structured payload at all.
    /// Frames with a legacy `chat_id` payload are structured, not minimal.
    pub fn is_minimal(&self) -> bool {
        self.json.is_none()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.json
            .as_ref()
            .and_then(|p| p.user_id.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}
