use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{info, warn};

use crate::models::channel::{ChannelMeta, ChannelState, JoinResult, MakeResult};
use crate::models::game::{ColorChoice, Game};
use crate::repositories::kv_store::KvStore;
use crate::services::errors::lobby_service_errors::LobbyServiceError;
use crate::services::match_service::MatchService;

const CHANNEL_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const CODE_ATTEMPTS: usize = 5;
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Channel lobby: pre-game coordination objects with a code, a creator and a
/// participants set bounded at two. The second join atomically binds the
/// channel to a freshly created game.
pub struct LobbyService {
    store: Arc<dyn KvStore>,
    matches: Arc<MatchService>,
}

impl LobbyService {
    pub fn new(store: Arc<dyn KvStore>, matches: Arc<MatchService>) -> Self {
        LobbyService { store, matches }
    }

    /// Create a lobby channel for the user in the given room.
    pub async fn make(
        &self,
        room: &str,
        user_id: &str,
        user_name: &str,
    ) -> Result<MakeResult, LobbyServiceError> {
        let room = room.trim();
        let user_id = user_id.trim();
        if room.is_empty() || user_id.is_empty() {
            return Err(LobbyServiceError::InvalidArgs);
        }

        if self
            .matches
            .get_active_game_by_user_in_room(user_id, room)
            .await?
            .is_some()
        {
            return Err(LobbyServiceError::PlayerBusyInRoom);
        }
        // One LOBBY-state channel per creator.
        for code in self.store.set_members(&user_index_key(user_id)).await? {
            if let Some(meta) = self.load_meta(&code).await? {
                if meta.state == ChannelState::Lobby && meta.creator_id.trim() == user_id {
                    return Err(LobbyServiceError::CreatorHasLobby);
                }
            }
        }

        for _ in 0..CODE_ATTEMPTS {
            let code = generate_code();
            let claimed = self
                .store
                .set_if_absent(&meta_key(&code), "{}", CHANNEL_TTL)
                .await?;
            if !claimed {
                continue;
            }
            let meta = ChannelMeta {
                id: code.clone(),
                state: ChannelState::Lobby,
                created_at: Utc::now(),
                creator_id: user_id.to_string(),
                creator_name: user_name.trim().to_string(),
                creator_room: room.to_string(),
                white_id: None,
                white_name: None,
                black_id: None,
                black_name: None,
                game_id: None,
            };
            self.save_meta(&code, &meta).await?;
            self.store
                .set_add(&rooms_key(&code), room, CHANNEL_TTL)
                .await?;
            self.add_participant(&code, user_id).await?;
            self.store
                .set_add(LOBBY_INDEX_KEY, &code, CHANNEL_TTL)
                .await?;
            info!("lobby created: code={} room={} creator={}", code, room, user_id);
            return Ok(MakeResult { code, meta });
        }
        Err(LobbyServiceError::CodeExhausted)
    }

    /// Join a lobby by code. The participants set is guarded by a watch
    /// transaction; the second successful join creates the game and flips
    /// the channel to ACTIVE. Color preference is intentionally ignored:
    /// assignment is always random.
    pub async fn join(
        &self,
        room: &str,
        code: &str,
        user_id: &str,
        user_name: &str,
    ) -> Result<JoinResult, LobbyServiceError> {
        let room = room.trim();
        let code = code.trim();
        let user_id = user_id.trim();
        if room.is_empty() || code.is_empty() || user_id.is_empty() {
            return Err(LobbyServiceError::InvalidArgs);
        }

        let meta = self
            .load_meta(code)
            .await?
            .ok_or(LobbyServiceError::ChannelGone)?;
        if meta.state != ChannelState::Lobby {
            return Err(LobbyServiceError::ChannelActive);
        }

        let participants = participants_key(code);
        let mut tx = self
            .store
            .watch(std::slice::from_ref(&participants))
            .await?;
        if tx.set_card(&participants).await? >= 2 {
            return Err(LobbyServiceError::Full);
        }
        tx.queue_set_add(&participants, user_id, CHANNEL_TTL);
        tx.queue_set_add(&rooms_key(code), room, CHANNEL_TTL);
        tx.queue_set_add(&user_index_key(user_id), code, CHANNEL_TTL);
        if let Err(err) = tx.exec().await {
            warn!("lobby join race lost: code={} user={}", code, user_id);
            return Err(err.into());
        }

        let meta = self
            .load_meta(code)
            .await?
            .ok_or(LobbyServiceError::ChannelGone)?;
        let count = self.store.set_card(&participants).await?;
        if count < 2 || meta.game_id.is_some() {
            info!("lobby join queued: code={} room={} user={}", code, room, user_id);
            return Ok(JoinResult {
                started: false,
                game_id: meta.game_id.clone(),
                meta,
            });
        }

        // Quorum reached: creator challenges the joiner. Re-check both
        // players against their own rooms before binding the game.
        if self
            .matches
            .get_active_game_by_user_in_room(user_id, room)
            .await?
            .is_some()
        {
            return Err(LobbyServiceError::PlayerBusyInRoom);
        }
        if self
            .matches
            .get_active_game_by_user_in_room(&meta.creator_id, &meta.creator_room)
            .await?
            .is_some()
        {
            return Err(LobbyServiceError::PlayerBusyInRoom);
        }

        let game = self
            .matches
            .create_game(
                &meta.creator_room,
                room,
                &meta.creator_id,
                &meta.creator_name,
                user_id,
                user_name,
                ColorChoice::Random,
            )
            .await?;

        let mut meta = meta;
        meta.white_id = Some(game.white_id.clone());
        meta.white_name = Some(game.white_name.clone());
        meta.black_id = Some(game.black_id.clone());
        meta.black_name = Some(game.black_name.clone());
        meta.state = ChannelState::Active;
        meta.game_id = Some(game.id.clone());
        self.save_meta(code, &meta).await?;
        self.store.set_remove(LOBBY_INDEX_KEY, code).await?;
        info!(
            "lobby started game: code={} game_id={} white={} black={}",
            code, game.id, game.white_id, game.black_id
        );
        Ok(JoinResult {
            started: true,
            game_id: Some(game.id),
            meta,
        })
    }

    /// Channels currently waiting for an opponent.
    pub async fn list_lobby(&self) -> Result<Vec<ChannelMeta>, LobbyServiceError> {
        let codes = self.store.set_members(LOBBY_INDEX_KEY).await?;
        let mut out = Vec::new();
        for code in codes {
            if let Some(meta) = self.load_meta(&code).await? {
                if meta.state == ChannelState::Lobby {
                    out.push(meta);
                }
            }
        }
        Ok(out)
    }

    pub async fn rooms(&self, code: &str) -> Result<Vec<String>, LobbyServiceError> {
        Ok(self.store.set_members(&rooms_key(code)).await?)
    }

    pub async fn codes_by_user(&self, user_id: &str) -> Result<Vec<String>, LobbyServiceError> {
        Ok(self.store.set_members(&user_index_key(user_id)).await?)
    }

    /// Rooms of the channel that binds the given game for the given user.
    pub async fn rooms_by_user_and_game(
        &self,
        user_id: &str,
        game_id: &str,
    ) -> Result<Vec<String>, LobbyServiceError> {
        for code in self.codes_by_user(user_id).await? {
            if let Some(meta) = self.load_meta(&code).await? {
                if meta.game_id.as_deref() == Some(game_id.trim()) {
                    return self.rooms(&code).await;
                }
            }
        }
        Ok(Vec::new())
    }

    /// Channel metadata for a game, scanned through both participants'
    /// channel indices.
    pub async fn meta_by_game(
        &self,
        game: &Game,
    ) -> Result<Option<(ChannelMeta, String)>, LobbyServiceError> {
        for user in [game.white_id.trim(), game.black_id.trim()] {
            if user.is_empty() {
                continue;
            }
            for code in self.codes_by_user(user).await? {
                if let Some(meta) = self.load_meta(&code).await? {
                    if meta.game_id.as_deref() == Some(game.id.as_str()) {
                        return Ok(Some((meta, code)));
                    }
                }
            }
        }
        Ok(None)
    }

    async fn load_meta(&self, code: &str) -> Result<Option<ChannelMeta>, LobbyServiceError> {
        let raw = match self.store.get(&meta_key(code)).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        // The code reservation writes a `{}` placeholder before the real
        // meta lands; treat it as not-yet-visible.
        match serde_json::from_str::<ChannelMeta>(&raw) {
            Ok(meta) => Ok(Some(meta)),
            Err(_) if raw.trim() == "{}" => Ok(None),
            Err(err) => Err(LobbyServiceError::Serialization(err.to_string())),
        }
    }

    async fn save_meta(&self, code: &str, meta: &ChannelMeta) -> Result<(), LobbyServiceError> {
        let raw = serde_json::to_string(meta)
            .map_err(|e| LobbyServiceError::Serialization(e.to_string()))?;
        self.store.set(&meta_key(code), &raw, CHANNEL_TTL).await?;
        self.store.expire(&rooms_key(code), CHANNEL_TTL).await?;
        self.store
            .expire(&participants_key(code), CHANNEL_TTL)
            .await?;
        Ok(())
    }

    async fn add_participant(&self, code: &str, user_id: &str) -> Result<(), LobbyServiceError> {
        self.store
            .set_add(&participants_key(code), user_id, CHANNEL_TTL)
            .await?;
        self.store
            .set_add(&user_index_key(user_id), code, CHANNEL_TTL)
            .await?;
        Ok(())
    }
}

const LOBBY_INDEX_KEY: &str = "ch:lobby";

fn meta_key(code: &str) -> String {
    format!("ch:{}", code.trim())
}

fn rooms_key(code: &str) -> String {
    format!("{}:rooms", meta_key(code))
}

fn participants_key(code: &str) -> String {
    format!("{}:participants", meta_key(code))
}

fn user_index_key(user_id: &str) -> String {
    format!("ch:index:user:{}", user_id.trim())
}

/// `CH-` plus six uppercase alphanumerics from a cryptographic source.
fn generate_code() -> String {
    let mut bytes = [0u8; 6];
    OsRng.fill_bytes(&mut bytes);
    let suffix: String = bytes
        .iter()
        .map(|b| CODE_ALPHABET[*b as usize % CODE_ALPHABET.len()] as char)
        .collect();
    format!("CH-{}", suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::game::GameStatus;
    use crate::repositories::kv_store::memory::MemoryKvStore;
    use crate::services::render_service::SvgBoardRenderer;

    fn services(store: MemoryKvStore) -> (Arc<MatchService>, LobbyService) {
        let store: Arc<dyn KvStore> = Arc::new(store);
        let matches = Arc::new(MatchService::new(
            store.clone(),
            Arc::new(SvgBoardRenderer::new()),
            None,
        ));
        let lobby = LobbyService::new(store, matches.clone());
        (matches, lobby)
    }

    #[test]
    fn generated_codes_match_the_advertised_shape() {
        for _ in 0..32 {
            let code = generate_code();
            assert_eq!(code.len(), 9);
            assert!(code.starts_with("CH-"));
            assert!(code[3..]
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        }
    }

    #[tokio::test]
    async fn make_seeds_channel_state_and_lobby_index() {
        let store = MemoryKvStore::new();
        let (_, lobby) = services(store.clone());

        let made = lobby.make("100", "u1", "Alice").await.unwrap();
        assert_eq!(made.meta.state, ChannelState::Lobby);
        assert_eq!(made.meta.creator_room, "100");

        let codes = store.set_members(LOBBY_INDEX_KEY).await.unwrap();
        assert_eq!(codes, vec![made.code.clone()]);
        assert_eq!(
            store
                .set_members(&participants_key(&made.code))
                .await
                .unwrap(),
            vec!["u1"]
        );
        assert_eq!(
            store.set_members(&rooms_key(&made.code)).await.unwrap(),
            vec!["100"]
        );
        assert!(store.ttl_of(&meta_key(&made.code)).unwrap() > 0);
    }

    #[tokio::test]
    async fn creator_cannot_open_a_second_lobby() {
        let store = MemoryKvStore::new();
        let (_, lobby) = services(store);

        lobby.make("100", "u1", "Alice").await.unwrap();
        match lobby.make("300", "u1", "Alice").await {
            Err(LobbyServiceError::CreatorHasLobby) => {}
            other => panic!("expected CreatorHasLobby, got {:?}", other.map(|m| m.code)),
        }
    }

    #[tokio::test]
    async fn second_join_binds_a_game_and_activates_the_channel() {
        let store = MemoryKvStore::new();
        let (matches, lobby) = services(store.clone());

        let made = lobby.make("100", "u1", "Alice").await.unwrap();
        let joined = lobby.join("200", &made.code, "u2", "Bob").await.unwrap();

        assert!(joined.started);
        assert_eq!(joined.meta.state, ChannelState::Active);
        let game_id = joined.game_id.expect("game bound");
        let game = matches.load_game(&game_id).await.unwrap().unwrap();
        assert_eq!(game.status, GameStatus::Active);
        assert_eq!(game.origin_room, "100");
        assert_eq!(game.resolve_room, "200");
        let mut players = vec![game.white_id.clone(), game.black_id.clone()];
        players.sort();
        assert_eq!(players, vec!["u1", "u2"]);

        let rooms = lobby.rooms(&made.code).await.unwrap();
        assert_eq!(rooms, vec!["100", "200"]);
        assert!(store
            .set_members(LOBBY_INDEX_KEY)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(lobby.list_lobby().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn joining_an_active_channel_is_rejected() {
        let store = MemoryKvStore::new();
        let (_, lobby) = services(store);

        let made = lobby.make("100", "u1", "Alice").await.unwrap();
        lobby.join("200", &made.code, "u2", "Bob").await.unwrap();

        match lobby.join("300", &made.code, "u3", "Cara").await {
            Err(LobbyServiceError::ChannelActive) => {}
            other => panic!("expected ChannelActive, got {:?}", other.map(|j| j.started)),
        }
    }

    #[tokio::test]
    async fn joining_an_unknown_code_reports_channel_gone() {
        let store = MemoryKvStore::new();
        let (_, lobby) = services(store);
        match lobby.join("200", "CH-ZZZZZZ", "u2", "Bob").await {
            Err(LobbyServiceError::ChannelGone) => {}
            other => panic!("expected ChannelGone, got {:?}", other.map(|j| j.started)),
        }
    }

    #[tokio::test]
    async fn busy_player_cannot_make_a_lobby_in_the_same_room() {
        let store = MemoryKvStore::new();
        let (matches, lobby) = services(store);

        matches
            .create_game("100", "200", "u1", "Alice", "u2", "Bob", ColorChoice::Random)
            .await
            .unwrap();
        match lobby.make("100", "u1", "Alice").await {
            Err(LobbyServiceError::PlayerBusyInRoom) => {}
            other => panic!("expected PlayerBusyInRoom, got {:?}", other.map(|m| m.code)),
        }
        // A different room is fine.
        lobby.make("900", "u1", "Alice").await.unwrap();
    }

    #[tokio::test]
    async fn rooms_by_user_and_game_resolves_the_bound_channel() {
        let store = MemoryKvStore::new();
        let (matches, lobby) = services(store);

        let made = lobby.make("100", "u1", "Alice").await.unwrap();
        let joined = lobby.join("200", &made.code, "u2", "Bob").await.unwrap();
        let game_id = joined.game_id.unwrap();
        let game = matches.load_game(&game_id).await.unwrap().unwrap();

        for user in ["u1", "u2"] {
            let rooms = lobby.rooms_by_user_and_game(user, &game_id).await.unwrap();
            assert_eq!(rooms, vec!["100", "200"]);
        }
        let (meta, code) = lobby.meta_by_game(&game).await.unwrap().unwrap();
        assert_eq!(code, made.code);
        assert_eq!(meta.game_id.as_deref(), Some(game_id.as_str()));
        assert!(lobby
            .rooms_by_user_and_game("stranger", &game_id)
            .await
            .unwrap()
            .is_empty());
    }
}
