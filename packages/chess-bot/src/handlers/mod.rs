pub mod lobby;
pub mod pvp;

use tracing::error;

use crate::state::AppState;

/// Render a catalog key and send it to the room. Every key is preflighted at
/// startup, so a render failure here is a bug worth a structured log, not a
/// user-visible crash.
pub async fn reply(state: &AppState, room_id: &str, key: &str, params: &[(&str, &str)]) {
    match state.catalog.render(key, params) {
        Ok(text) => state.broadcaster.send_text(room_id, &text).await,
        Err(err) => error!("catalog render failed: key={}: {}", key, err),
    }
}
