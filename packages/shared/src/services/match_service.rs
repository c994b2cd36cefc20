use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::warn;

use crate::models::game::{Color, ColorChoice, Game, GameOutcome, GameStatus};
use crate::repositories::kv_store::KvStore;
use crate::repositories::result_repository::ResultRepository;
use crate::services::chess_service::{ChessService, TerminalOutcome};
use crate::services::errors::chess_service_errors::ChessServiceError;
use crate::services::errors::match_service_errors::MatchServiceError;
use crate::services::render_service::{BoardRenderer, MoveHighlight, RenderRequest};

pub(crate) const GAME_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Outcome of a move command. `NotYourTurn` and `IllegalMove` are
/// message-level sentinels, not transaction faults: nothing was written.
#[derive(Debug)]
pub enum PlayOutcome {
    Applied { game: Game },
    NotYourTurn { game: Game },
    IllegalMove { game: Game },
}

/// PvP match coordinator. All mutations run inside watch transactions on the
/// game key so concurrent bot replicas serialize through the store.
pub struct MatchService {
    store: Arc<dyn KvStore>,
    rules: ChessService,
    renderer: Arc<dyn BoardRenderer>,
    results: Option<Arc<dyn ResultRepository>>,
}

impl MatchService {
    pub fn new(
        store: Arc<dyn KvStore>,
        renderer: Arc<dyn BoardRenderer>,
        results: Option<Arc<dyn ResultRepository>>,
    ) -> Self {
        MatchService {
            store,
            rules: ChessService::new(),
            renderer,
            results,
        }
    }

    /// Create a new game between a challenger and a target. Colors are
    /// assigned by `choice`; `Random` uses a cryptographic coin flip.
    pub async fn create_game(
        &self,
        origin_room: &str,
        resolve_room: &str,
        challenger_id: &str,
        challenger_name: &str,
        target_id: &str,
        target_name: &str,
        choice: ColorChoice,
    ) -> Result<Game, MatchServiceError> {
        let challenger_id = challenger_id.trim();
        let target_id = target_id.trim();
        if challenger_id.is_empty() || target_id.is_empty() {
            return Err(MatchServiceError::InvalidArgs);
        }

        let challenger_is_white = match choice {
            ColorChoice::White => true,
            ColorChoice::Black => false,
            ColorChoice::Random => OsRng.next_u32() & 1 == 0,
        };
        let (white_id, white_name, black_id, black_name) = if challenger_is_white {
            (challenger_id, challenger_name, target_id, target_name)
        } else {
            (target_id, target_name, challenger_id, challenger_name)
        };

        let now = Utc::now();
        let game = Game {
            id: new_game_id(),
            fen: "startpos".to_string(),
            moves_uci: Vec::new(),
            moves_san: Vec::new(),
            turn: Color::White,
            status: GameStatus::Active,
            white_id: white_id.to_string(),
            white_name: white_name.trim().to_string(),
            black_id: black_id.to_string(),
            black_name: black_name.trim().to_string(),
            origin_room: origin_room.trim().to_string(),
            resolve_room: resolve_room.trim().to_string(),
            created_at: now,
            updated_at: now,
            winner: None,
            outcome: None,
        };

        self.save(&game).await?;
        self.store
            .set_add(&user_index_key(&game.white_id), &game.id, GAME_TTL)
            .await?;
        self.store
            .set_add(&user_index_key(&game.black_id), &game.id, GAME_TTL)
            .await?;
        Ok(game)
    }

    pub async fn load_game(&self, id: &str) -> Result<Option<Game>, MatchServiceError> {
        match self.store.get(&game_key(id)).await? {
            Some(raw) => Ok(Some(decode(&raw)?)),
            None => Ok(None),
        }
    }

    /// The user's most recently updated ACTIVE game addressable from the
    /// given room. Room scoping matters: one user may hold concurrent games
    /// in different rooms and a command must hit the one tied to its room.
    pub async fn get_active_game_by_user_in_room(
        &self,
        user_id: &str,
        room_id: &str,
    ) -> Result<Option<Game>, MatchServiceError> {
        let user_id = user_id.trim();
        if user_id.is_empty() || room_id.trim().is_empty() {
            return Ok(None);
        }
        let ids = self.store.set_members(&user_index_key(user_id)).await?;
        let mut best: Option<Game> = None;
        for id in ids {
            let raw = match self.store.get(&game_key(&id)).await? {
                Some(raw) => raw,
                None => continue,
            };
            let game: Game = match serde_json::from_str(&raw) {
                Ok(game) => game,
                Err(err) => {
                    warn!("skipping undecodable game {}: {}", id, err);
                    continue;
                }
            };
            if game.status != GameStatus::Active || !game.in_room(room_id) {
                continue;
            }
            if best
                .as_ref()
                .map(|b| game.updated_at > b.updated_at)
                .unwrap_or(true)
            {
                best = Some(game);
            }
        }
        Ok(best)
    }

    /// Apply a move for the user in the room-scoped game. Runs under a watch
    /// transaction on the game key; the losing side of a concurrent race
    /// gets `Conflict` and is told to retry rather than silently retried.
    pub async fn play_move_by_room(
        &self,
        user_id: &str,
        room_id: &str,
        move_text: &str,
    ) -> Result<PlayOutcome, MatchServiceError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(MatchServiceError::InvalidArgs);
        }
        let observed = self
            .get_active_game_by_user_in_room(user_id, room_id)
            .await?
            .ok_or(MatchServiceError::NotFound)?;
        let expected_moves = observed.moves_uci.len();

        let key = game_key(&observed.id);
        let mut tx = self.store.watch(std::slice::from_ref(&key)).await?;

        let raw = tx.get(&key).await?.ok_or(MatchServiceError::NotFound)?;
        let mut game: Game = decode(&raw)?;
        if game.status != GameStatus::Active {
            return Err(MatchServiceError::Conflict);
        }
        // Primary lost-update guard: another replica applied a move between
        // our observation and the WATCH.
        if game.moves_uci.len() != expected_moves {
            return Err(MatchServiceError::Conflict);
        }
        if !game.in_room(room_id) {
            return Err(MatchServiceError::Conflict);
        }

        let color = game
            .player_color(user_id)
            .ok_or(MatchServiceError::NotFound)?;
        if color != game.turn {
            return Ok(PlayOutcome::NotYourTurn { game });
        }

        let applied = match self.rules.apply(&game.moves_uci, move_text) {
            Ok(applied) => applied,
            Err(ChessServiceError::IllegalMove) | Err(ChessServiceError::BadInput) => {
                return Ok(PlayOutcome::IllegalMove { game });
            }
            Err(err) => return Err(err.into()),
        };

        game.moves_uci.push(applied.uci);
        game.moves_san.push(applied.san);
        game.fen = applied.fen;
        game.turn = applied.turn;
        game.updated_at = Utc::now();
        match applied.outcome {
            TerminalOutcome::WhiteWon => {
                game.status = GameStatus::Finished;
                game.winner = Some(game.white_id.clone());
                game.outcome = Some(GameOutcome::White);
            }
            TerminalOutcome::BlackWon => {
                game.status = GameStatus::Finished;
                game.winner = Some(game.black_id.clone());
                game.outcome = Some(GameOutcome::Black);
            }
            TerminalOutcome::Draw => {
                game.status = GameStatus::Draw;
                game.outcome = Some(GameOutcome::Draw);
            }
            TerminalOutcome::None => {}
        }

        tx.queue_set(&key, &encode(&game)?, GAME_TTL);
        tx.exec().await?;

        if game.status.is_terminal() {
            self.persist_final(&game).await;
        }
        Ok(PlayOutcome::Applied { game })
    }

    /// Resign the room-scoped game: same transactional envelope as a move.
    pub async fn resign_by_room(
        &self,
        user_id: &str,
        room_id: &str,
    ) -> Result<Game, MatchServiceError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(MatchServiceError::InvalidArgs);
        }
        let observed = self
            .get_active_game_by_user_in_room(user_id, room_id)
            .await?
            .ok_or(MatchServiceError::NotFound)?;

        let key = game_key(&observed.id);
        let mut tx = self.store.watch(std::slice::from_ref(&key)).await?;

        let raw = tx.get(&key).await?.ok_or(MatchServiceError::NotFound)?;
        let mut game: Game = decode(&raw)?;
        if game.status != GameStatus::Active {
            return Err(MatchServiceError::Conflict);
        }
        if !game.in_room(room_id) {
            return Err(MatchServiceError::Conflict);
        }
        let winner = game
            .opponent_id(user_id)
            .ok_or(MatchServiceError::NotFound)?
            .to_string();

        game.status = GameStatus::Resigned;
        game.winner = Some(winner);
        game.outcome = Some(GameOutcome::Resign);
        game.updated_at = Utc::now();

        tx.queue_set(&key, &encode(&game)?, GAME_TTL);
        tx.exec().await?;

        self.persist_final(&game).await;
        Ok(game)
    }

    /// Render the board from the given viewer's perspective. The position is
    /// replayed from the UCI history, never taken from the stored FEN.
    pub async fn board_for_viewer(
        &self,
        game: &Game,
        viewer_id: &str,
    ) -> Result<Vec<u8>, MatchServiceError> {
        let fen = self.rules.fen_after(&game.moves_uci)?;
        let viewer_is_black = viewer_id.trim() == game.black_id;
        let (my_name, opp_name) = if viewer_is_black {
            (&game.black_name, &game.white_name)
        } else {
            (&game.white_name, &game.black_name)
        };
        let turn_number = game.moves_uci.len() / 2 + 1;
        let turn_label = if viewer_is_black {
            format!("Black • {}턴", turn_number)
        } else {
            format!("White • {}턴", turn_number)
        };
        let highlight = game.moves_uci.last().and_then(|uci| {
            if uci.len() >= 4 {
                Some(MoveHighlight {
                    from: uci[0..2].to_string(),
                    to: uci[2..4].to_string(),
                })
            } else {
                None
            }
        });
        let request = RenderRequest {
            fen,
            flip: viewer_is_black,
            header: format!("{} vs {}", my_name.trim(), opp_name.trim()),
            turn_label,
            highlight,
        };
        self.renderer
            .render(&request)
            .await
            .map_err(|e| MatchServiceError::Render(e.to_string()))
    }

    async fn save(&self, game: &Game) -> Result<(), MatchServiceError> {
        self.store
            .set(&game_key(&game.id), &encode(game)?, GAME_TTL)
            .await?;
        Ok(())
    }

    /// Best-effort hand-off of a finished game to the durable store.
    async fn persist_final(&self, game: &Game) {
        let repo = match &self.results {
            Some(repo) => repo,
            None => return,
        };
        let method = match game.status {
            GameStatus::Finished => "checkmate",
            GameStatus::Draw => "draw",
            GameStatus::Resigned => "resignation",
            GameStatus::Active => return,
        };
        if let Err(err) = repo.save_result(game, method).await {
            warn!("failed to persist final result for {}: {}", game.id, err);
        }
    }
}

fn game_key(id: &str) -> String {
    format!("pvp:game:{}", id.trim())
}

fn user_index_key(user_id: &str) -> String {
    format!("pvp:index:user:{}", user_id.trim())
}

fn new_game_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let mut suffix = [0u8; 3];
    OsRng.fill_bytes(&mut suffix);
    format!(
        "pvp-{}-{:02x}{:02x}{:02x}",
        nanos, suffix[0], suffix[1], suffix[2]
    )
}

fn encode(game: &Game) -> Result<String, MatchServiceError> {
    serde_json::to_string(game).map_err(|e| MatchServiceError::Serialization(e.to_string()))
}

fn decode(raw: &str) -> Result<Game, MatchServiceError> {
    serde_json::from_str(raw).map_err(|e| MatchServiceError::Serialization(e.to_string()))
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::repositories::errors::kv_store_errors::KvStoreError;
    use crate::repositories::errors::result_repository_errors::ResultRepositoryError;
    use crate::repositories::kv_store::memory::MemoryKvStore;
    use crate::repositories::kv_store::WatchTx;
    use crate::services::render_service::SvgBoardRenderer;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Captures finished-game hand-offs for assertions.
    #[derive(Default)]
    pub struct RecordingResultRepository {
        pub saved: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ResultRepository for RecordingResultRepository {
        async fn save_result(
            &self,
            game: &Game,
            method: &str,
        ) -> Result<(), ResultRepositoryError> {
            self.saved
                .lock()
                .unwrap()
                .push((game.id.clone(), method.to_string()));
            Ok(())
        }
    }

    /// Store wrapper that rewrites the first watched key right after WATCH,
    /// simulating another bot instance winning the race.
    struct RacingKvStore {
        inner: MemoryKvStore,
        raced: AtomicBool,
    }

    #[async_trait]
    impl KvStore for RacingKvStore {
        async fn get(&self, key: &str) -> Result<Option<String>, KvStoreError> {
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvStoreError> {
            self.inner.set(key, value, ttl).await
        }
        async fn set_if_absent(
            &self,
            key: &str,
            value: &str,
            ttl: Duration,
        ) -> Result<bool, KvStoreError> {
            self.inner.set_if_absent(key, value, ttl).await
        }
        async fn delete(&self, key: &str) -> Result<(), KvStoreError> {
            self.inner.delete(key).await
        }
        async fn set_add(
            &self,
            key: &str,
            member: &str,
            ttl: Duration,
        ) -> Result<(), KvStoreError> {
            self.inner.set_add(key, member, ttl).await
        }
        async fn set_remove(&self, key: &str, member: &str) -> Result<(), KvStoreError> {
            self.inner.set_remove(key, member).await
        }
        async fn set_members(&self, key: &str) -> Result<Vec<String>, KvStoreError> {
            self.inner.set_members(key).await
        }
        async fn set_card(&self, key: &str) -> Result<u64, KvStoreError> {
            self.inner.set_card(key).await
        }
        async fn expire(&self, key: &str, ttl: Duration) -> Result<(), KvStoreError> {
            self.inner.expire(key, ttl).await
        }
        async fn watch(&self, keys: &[String]) -> Result<Box<dyn WatchTx>, KvStoreError> {
            let tx = self.inner.watch(keys).await?;
            if !self.raced.swap(true, Ordering::SeqCst) {
                if let Some(key) = keys.first() {
                    if let Some(value) = self.inner.get(key).await? {
                        self.inner.set(key, &value, GAME_TTL).await?;
                    }
                }
            }
            Ok(tx)
        }
    }

    fn service(store: Arc<dyn KvStore>) -> MatchService {
        MatchService::new(store, Arc::new(SvgBoardRenderer::new()), None)
    }

    fn service_with_results(
        store: Arc<dyn KvStore>,
        results: Arc<RecordingResultRepository>,
    ) -> MatchService {
        MatchService::new(
            store,
            Arc::new(SvgBoardRenderer::new()),
            Some(results as Arc<dyn ResultRepository>),
        )
    }

    async fn fixed_game(svc: &MatchService) -> Game {
        svc.create_game("100", "200", "u1", "Alice", "u2", "Bob", ColorChoice::White)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn create_game_indexes_both_participants_with_ttl() {
        let store = MemoryKvStore::new();
        let svc = service(Arc::new(store.clone()));
        let game = fixed_game(&svc).await;

        assert_eq!(game.white_id, "u1");
        assert_eq!(game.black_id, "u2");
        assert!(game.id.starts_with("pvp-"));
        for user in ["u1", "u2"] {
            let ids = store.set_members(&user_index_key(user)).await.unwrap();
            assert_eq!(ids, vec![game.id.clone()]);
            assert!(store.ttl_of(&user_index_key(user)).unwrap() > 0);
        }
        assert!(store.ttl_of(&game_key(&game.id)).unwrap() > 0);
    }

    #[tokio::test]
    async fn moves_address_only_the_room_scoped_game() {
        let store = Arc::new(MemoryKvStore::new());
        let svc = service(store.clone());
        let g1 = fixed_game(&svc).await;
        let g2 = svc
            .create_game("300", "400", "u1", "Alice", "u3", "Cara", ColorChoice::White)
            .await
            .unwrap();

        let outcome = svc.play_move_by_room("u1", "100", "e2e4").await.unwrap();
        let game = match outcome {
            PlayOutcome::Applied { game } => game,
            other => panic!("expected applied move, got {:?}", other),
        };
        assert_eq!(game.id, g1.id);
        assert_eq!(game.moves_uci, vec!["e2e4"]);
        assert_eq!(game.moves_san, vec!["e4"]);
        assert_eq!(game.turn, Color::Black);

        let untouched = svc.load_game(&g2.id).await.unwrap().unwrap();
        assert!(untouched.moves_uci.is_empty());
    }

    #[tokio::test]
    async fn moving_out_of_turn_is_a_sentinel_not_a_write() {
        let store = Arc::new(MemoryKvStore::new());
        let svc = service(store.clone());
        let created = fixed_game(&svc).await;

        let outcome = svc.play_move_by_room("u2", "200", "e7e5").await.unwrap();
        assert!(matches!(outcome, PlayOutcome::NotYourTurn { .. }));
        let stored = svc.load_game(&created.id).await.unwrap().unwrap();
        assert!(stored.moves_uci.is_empty());
        assert_eq!(stored.turn, Color::White);
    }

    #[tokio::test]
    async fn illegal_moves_leave_the_game_untouched() {
        let store = Arc::new(MemoryKvStore::new());
        let svc = service(store.clone());
        let created = fixed_game(&svc).await;

        let outcome = svc.play_move_by_room("u1", "100", "e2e5").await.unwrap();
        assert!(matches!(outcome, PlayOutcome::IllegalMove { .. }));
        let stored = svc.load_game(&created.id).await.unwrap().unwrap();
        assert!(stored.moves_uci.is_empty());
    }

    #[tokio::test]
    async fn san_and_uci_histories_stay_parallel() {
        let store = Arc::new(MemoryKvStore::new());
        let svc = service(store.clone());
        let created = fixed_game(&svc).await;

        for (user, room, mv) in [
            ("u1", "100", "e2e4"),
            ("u2", "200", "Nc6"),
            ("u1", "100", "Nf3"),
            ("u2", "200", "e7e5"),
        ] {
            let outcome = svc.play_move_by_room(user, room, mv).await.unwrap();
            let game = match outcome {
                PlayOutcome::Applied { game } => game,
                other => panic!("move {} not applied: {:?}", mv, other),
            };
            assert_eq!(game.moves_uci.len(), game.moves_san.len());
        }
        let stored = svc.load_game(&created.id).await.unwrap().unwrap();
        assert_eq!(stored.moves_uci.len(), 4);
        assert_eq!(stored.moves_san, vec!["e4", "Nc6", "Nf3", "e5"]);
    }

    #[tokio::test]
    async fn checkmate_finishes_and_persists_the_result() {
        let store = Arc::new(MemoryKvStore::new());
        let results = Arc::new(RecordingResultRepository::default());
        let svc = service_with_results(store.clone(), results.clone());
        let created = fixed_game(&svc).await;

        for (user, room, mv) in [
            ("u1", "100", "f2f3"),
            ("u2", "200", "e7e5"),
            ("u1", "100", "g2g4"),
            ("u2", "200", "d8h4"),
        ] {
            let outcome = svc.play_move_by_room(user, room, mv).await.unwrap();
            assert!(matches!(outcome, PlayOutcome::Applied { .. }));
        }

        let stored = svc.load_game(&created.id).await.unwrap().unwrap();
        assert_eq!(stored.status, GameStatus::Finished);
        assert_eq!(stored.winner.as_deref(), Some("u2"));
        assert_eq!(stored.outcome, Some(GameOutcome::Black));

        let saved = results.saved.lock().unwrap();
        assert_eq!(saved.as_slice(), &[(created.id.clone(), "checkmate".to_string())]);
    }

    #[tokio::test]
    async fn terminal_games_reject_further_moves_and_resigns() {
        let store = Arc::new(MemoryKvStore::new());
        let svc = service(store.clone());
        let created = fixed_game(&svc).await;

        for (user, room, mv) in [
            ("u1", "100", "f2f3"),
            ("u2", "200", "e7e5"),
            ("u1", "100", "g2g4"),
            ("u2", "200", "d8h4"),
        ] {
            svc.play_move_by_room(user, room, mv).await.unwrap();
        }

        // No ACTIVE game is addressable any longer, so both operations
        // resolve to NotFound and the terminal state stays frozen.
        assert!(matches!(
            svc.play_move_by_room("u1", "100", "a2a3").await,
            Err(MatchServiceError::NotFound)
        ));
        assert!(matches!(
            svc.resign_by_room("u1", "100").await,
            Err(MatchServiceError::NotFound)
        ));
        let stored = svc.load_game(&created.id).await.unwrap().unwrap();
        assert_eq!(stored.status, GameStatus::Finished);
        assert_eq!(stored.moves_uci.len(), 4);
    }

    #[tokio::test]
    async fn resign_awards_the_opponent_and_persists() {
        let store = Arc::new(MemoryKvStore::new());
        let results = Arc::new(RecordingResultRepository::default());
        let svc = service_with_results(store.clone(), results.clone());
        let created = fixed_game(&svc).await;

        let game = svc.resign_by_room("u1", "100").await.unwrap();
        assert_eq!(game.status, GameStatus::Resigned);
        assert_eq!(game.winner.as_deref(), Some("u2"));
        assert_eq!(game.outcome, Some(GameOutcome::Resign));

        let saved = results.saved.lock().unwrap();
        assert_eq!(
            saved.as_slice(),
            &[(created.id.clone(), "resignation".to_string())]
        );
    }

    #[tokio::test]
    async fn losing_a_concurrent_race_surfaces_conflict() {
        let inner = MemoryKvStore::new();
        let racing = Arc::new(RacingKvStore {
            inner: inner.clone(),
            raced: AtomicBool::new(true),
        });
        let svc = service(racing.clone());
        let created = fixed_game(&svc).await;

        // Arm the race for the next watch transaction.
        racing.raced.store(false, Ordering::SeqCst);
        match svc.play_move_by_room("u1", "100", "e2e4").await {
            Err(MatchServiceError::Conflict) => {}
            other => panic!("expected Conflict, got {:?}", other),
        }
        let stored = svc.load_game(&created.id).await.unwrap().unwrap();
        assert!(stored.moves_uci.is_empty());
    }

    #[tokio::test]
    async fn viewer_boards_render_from_replayed_history() {
        let store = Arc::new(MemoryKvStore::new());
        let svc = service(store.clone());
        fixed_game(&svc).await;
        let game = match svc.play_move_by_room("u1", "100", "e2e4").await.unwrap() {
            PlayOutcome::Applied { game } => game,
            other => panic!("unexpected {:?}", other),
        };

        let white_view = svc.board_for_viewer(&game, "u1").await.unwrap();
        let black_view = svc.board_for_viewer(&game, "u2").await.unwrap();
        assert!(String::from_utf8_lossy(&white_view).contains("Alice vs Bob"));
        assert!(String::from_utf8_lossy(&black_view).contains("Bob vs Alice"));
        assert_ne!(white_view, black_view);
    }
}
