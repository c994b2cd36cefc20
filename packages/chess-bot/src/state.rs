use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use iris::IrisClient;
use shared::repositories::kv_store::KvStore;
use shared::services::lobby_service::LobbyService;
use shared::services::match_service::MatchService;

use crate::broadcast::Broadcaster;
use crate::catalog::Catalog;
use crate::config::Config;
use crate::solo::SoloService;

/// TTL for the sender-name merge cache and the in-process dedup window.
pub const CACHE_TTL: Duration = Duration::from_secs(2);

/// Everything a command handler needs, shared across frame tasks.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn KvStore>,
    pub matches: Arc<MatchService>,
    pub lobby: Arc<LobbyService>,
    pub client: IrisClient,
    pub catalog: Arc<Catalog>,
    pub broadcaster: Broadcaster,
    pub solo: Option<Arc<dyn SoloService>>,

    /// `(room|text)` → sender display name, merged into the structured frame
    /// that follows a minimal one.
    pub sender_names: Mutex<HashMap<String, (String, Instant)>>,
    /// `(room|text)` → last handled instant, for in-process dedup.
    pub processed: Mutex<HashMap<String, Instant>>,
}

impl AppState {
    /// Remember a display name seen on a minimal frame.
    pub fn cache_sender_name(&self, room_id: &str, text: &str, name: &str) {
        let name = name.trim();
        if room_id.is_empty() || text.is_empty() || name.is_empty() {
            return;
        }
        let now = Instant::now();
        let mut cache = self.sender_names.lock().unwrap();
        cache.retain(|_, (_, ts)| now.duration_since(*ts) <= CACHE_TTL * 2);
        cache.insert(
            format!("{}|{}", room_id, text),
            (name.to_string(), now),
        );
    }

    pub fn cached_sender_name(&self, room_id: &str, text: &str) -> Option<String> {
        let cache = self.sender_names.lock().unwrap();
        cache
            .get(&format!("{}|{}", room_id, text))
            .filter(|(_, ts)| ts.elapsed() <= CACHE_TTL)
            .map(|(name, _)| name.clone())
    }

    /// True when this exact (room, text) pair was already handled within the
    /// dedup window; records the pair otherwise.
    pub fn already_processed(&self, room_id: &str, text: &str) -> bool {
        let key = format!("{}|{}", room_id, text);
        let now = Instant::now();
        let mut processed = self.processed.lock().unwrap();
        if let Some(ts) = processed.get(&key) {
            if now.duration_since(*ts) <= CACHE_TTL {
                return true;
            }
        }
        processed.insert(key, now);
        processed.retain(|_, ts| now.duration_since(*ts) <= CACHE_TTL * 2);
        false
    }
}
