use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use iris::Frame;
use sha1::{Digest, Sha1};
use tracing::{debug, info, warn};

use crate::handlers::{lobby, pvp, reply};
use crate::solo::{SessionMeta, SoloCommand, SoloError, SoloService};
use crate::state::AppState;

const DEDUP_TTL: Duration = Duration::from_secs(2);

/// Ingress front door: filters every frame, then runs the accepted command
/// on its own task.
pub struct Router {
    state: Arc<AppState>,
}

impl Router {
    pub fn new(state: Arc<AppState>) -> Self {
        Router { state }
    }

    pub fn on_frame(&self, frame: Frame) {
        let state = self.state.clone();
        tokio::spawn(async move {
            ingress(state, frame).await;
        });
    }
}

/// Gate pipeline, in order: text extraction and sanitation, sender-name
/// merge, room allow-list, ignored senders, command prefix, cross-instance
/// dedup, in-process dedup. Survivors are parsed and dispatched.
pub(crate) async fn ingress(state: Arc<AppState>, frame: Frame) {
    let room_id = extract_room_id(&frame);
    let text = sanitize_text(frame.text());
    if text.is_empty() {
        debug!("drop frame: empty text, room={}", room_id);
        return;
    }

    // Minimal frames (sender name only) feed the merge cache; the
    // structured twin that follows carries the ids and gets dispatched.
    if frame.is_minimal() {
        if let Some(sender) = frame.sender.as_deref() {
            state.cache_sender_name(&room_id, &text, sender);
        }
        debug!("minimal frame cached: room={}", room_id);
        return;
    }
    if room_id.is_empty() {
        debug!("drop frame: no room id");
        return;
    }

    if !state.config.allowed_rooms.is_empty() && !room_allowed(&state.config.allowed_rooms, &room_id)
    {
        debug!("drop frame: room {} not allowed", room_id);
        return;
    }

    let display_name = state
        .cached_sender_name(&room_id, &text)
        .unwrap_or_else(|| fallback_sender_name(&frame));
    if is_ignored_sender(&state.config.ignore_senders, &display_name) {
        debug!("drop frame: ignored sender {}", display_name.trim());
        return;
    }

    let prefix = sanitize_text(&state.config.bot_prefix);
    let raw = match text.strip_prefix(prefix.as_str()) {
        Some(rest) => rest.trim().to_string(),
        None => {
            info!("recv_message: room_id={} user={}", room_id, display_name.trim());
            return;
        }
    };

    // Cross-instance dedup: first SETNX wins, replicas drop the frame.
    let dedup_key = format!("dedupe:{}:{:x}", room_id, Sha1::digest(text.as_bytes()));
    match state.store.set_if_absent(&dedup_key, "1", DEDUP_TTL).await {
        Ok(true) => {}
        Ok(false) => {
            debug!("drop frame: store dedup, room={}", room_id);
            return;
        }
        Err(err) => {
            warn!("dedup check failed, dropping frame: {}", err);
            return;
        }
    }
    if state.already_processed(&room_id, &text) {
        debug!("drop frame: in-process dedup, room={}", room_id);
        return;
    }

    let user_id = frame
        .user_id()
        .map(str::to_string)
        .unwrap_or_else(|| display_name.trim().to_string());

    if raw.is_empty() {
        reply(
            &state,
            &room_id,
            "help.korean",
            &[("Prefix", state.config.bot_prefix.as_str())],
        )
        .await;
        return;
    }

    let command = parse_command(&raw);
    info!(
        "recv_message: room_id={} user={} cmd={}",
        room_id,
        display_name.trim(),
        command.label()
    );
    dispatch(&state, &room_id, &user_id, &display_name, command).await;
}

#[derive(Debug, PartialEq)]
pub(crate) enum Command {
    Help,
    LobbyMake,
    LobbyList,
    Join { code: String },
    Board,
    Resign,
    Solo(SoloCommand),
    Move { input: String },
    /// Malformed invocation; the key names the catalog reply to send.
    Usage(&'static str),
}

impl Command {
    fn label(&self) -> &'static str {
        match self {
            Command::Help => "help",
            Command::LobbyMake => "lobby_make",
            Command::LobbyList => "lobby_list",
            Command::Join { .. } => "join",
            Command::Board => "status",
            Command::Resign => "resign",
            Command::Solo(_) => "solo",
            Command::Move { .. } => "move",
            Command::Usage(_) => "usage",
        }
    }
}

/// Token matching over the Korean vocabulary. Unknown tokens are move
/// attempts; there are no English aliases besides `help`.
pub(crate) fn parse_command(raw: &str) -> Command {
    let parts: Vec<&str> = raw.split_whitespace().collect();
    let head = match parts.first() {
        Some(head) => head.to_lowercase(),
        None => return Command::Help,
    };

    match head.as_str() {
        "help" | "도움" => Command::Help,
        "방" => match parts.get(1).map(|s| s.to_lowercase()).as_deref() {
            Some("리스트") | Some("목록") => Command::LobbyList,
            Some("생성") | Some("만들기") => Command::LobbyMake,
            _ => Command::Usage("usage.lobby"),
        },
        "방생성" | "방만들기" => Command::LobbyMake,
        "방리스트" | "방목록" => Command::LobbyList,
        "참가" | "방참가" => match parts.get(1) {
            Some(code) => Command::Join {
                code: code.to_string(),
            },
            None => Command::Usage("usage.join"),
        },
        "보드" | "현황" => Command::Board,
        "기권" => Command::Resign,
        "시작" => Command::Solo(SoloCommand::Start {
            preset: parts.get(1).map(|s| s.to_string()),
        }),
        "무르기" => Command::Solo(SoloCommand::Undo),
        "기록" => Command::Solo(SoloCommand::History {
            limit: parts
                .get(1)
                .and_then(|s| s.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(10),
        }),
        "기보" => match parts.get(1) {
            Some(arg) => match arg.parse::<i64>() {
                Ok(id) => Command::Solo(SoloCommand::GameRecord { id }),
                Err(_) => Command::Usage("game.id.invalid"),
            },
            None => Command::Usage("usage.game"),
        },
        "프로필" => Command::Solo(SoloCommand::Profile),
        "선호" => match parts.get(1) {
            Some(preset) => Command::Solo(SoloCommand::SetPreferred {
                preset: preset.to_string(),
            }),
            None => Command::Usage("usage.preset"),
        },
        _ => Command::Move {
            input: raw.trim().to_string(),
        },
    }
}

async fn dispatch(
    state: &Arc<AppState>,
    room_id: &str,
    user_id: &str,
    display_name: &str,
    command: Command,
) {
    match command {
        Command::Help => {
            reply(
                state,
                room_id,
                "help.korean",
                &[("Prefix", state.config.bot_prefix.as_str())],
            )
            .await;
        }
        Command::Usage(key) => {
            let prefix = state.config.bot_prefix.as_str();
            let params: Vec<(&str, &str)> = if key.starts_with("usage.") {
                vec![("Prefix", prefix)]
            } else {
                Vec::new()
            };
            reply(state, room_id, key, &params).await;
        }
        Command::LobbyMake => {
            lobby::handle_make(state, room_id, user_id, display_name).await;
        }
        Command::LobbyList => {
            lobby::handle_list(state, room_id).await;
        }
        Command::Join { code } => {
            lobby::handle_join(state, room_id, &code, user_id, display_name).await;
        }
        Command::Board => {
            if pvp::handle_board(state, room_id, user_id).await {
                return;
            }
            session_first_fallback(state, room_id, user_id, display_name, SoloCommand::Status)
                .await;
        }
        Command::Resign => {
            if pvp::handle_resign(state, room_id, user_id).await {
                return;
            }
            session_first_fallback(state, room_id, user_id, display_name, SoloCommand::Resign)
                .await;
        }
        Command::Move { input } => {
            if pvp::handle_move(state, room_id, user_id, &input).await {
                return;
            }
            session_first_fallback(
                state,
                room_id,
                user_id,
                display_name,
                SoloCommand::Move { input },
            )
            .await;
        }
        Command::Solo(solo_command) => {
            let solo = match &state.solo {
                Some(solo) => solo.clone(),
                None => {
                    reply(state, room_id, "engine.disabled", &[]).await;
                    return;
                }
            };
            let meta = SessionMeta::new(room_id, user_id, display_name);
            run_solo(state, &solo, &meta, solo_command, room_id).await;
        }
    }
}

/// Ambiguous command with no PvP game in this room: try the single-player
/// session, else report absence.
async fn session_first_fallback(
    state: &Arc<AppState>,
    room_id: &str,
    user_id: &str,
    display_name: &str,
    command: SoloCommand,
) {
    if let Some(solo) = &state.solo {
        let meta = SessionMeta::new(room_id, user_id, display_name);
        if solo.has_session(&meta).await {
            info!(
                "route: cmd={:?} mode=solo room={} user={}",
                command, room_id, user_id
            );
            run_solo(state, solo, &meta, command, room_id).await;
            return;
        }
    }
    info!("route: mode=none room={} user={}", room_id, user_id);
    reply(state, room_id, "no.active.game", &[]).await;
}

async fn run_solo(
    state: &Arc<AppState>,
    solo: &Arc<dyn SoloService>,
    meta: &SessionMeta,
    command: SoloCommand,
    room_id: &str,
) {
    match solo.handle(meta, command).await {
        Ok(result) => {
            state.broadcaster.send_text(room_id, &result.text).await;
            if let Some(image) = result.image {
                tokio::time::sleep(state.config.start_image_delay).await;
                if let Err(err) = state
                    .client
                    .send_image(room_id, &general_purpose::STANDARD.encode(&image))
                    .await
                {
                    warn!("solo board send failed: room={}: {}", room_id, err);
                    reply(state, room_id, "board.send.failed", &[]).await;
                }
            }
        }
        Err(SoloError::NoSession) => {
            reply(state, room_id, "no.active.game", &[]).await;
        }
        Err(SoloError::Engine(msg)) => {
            warn!("solo command failed: room={}: {}", room_id, msg);
            reply(state, room_id, "move.failed_with_error", &[("Error", msg.as_str())]).await;
        }
    }
}

/// Strip zero-width characters, map NBSP to a regular space, and trim.
pub(crate) fn sanitize_text(s: &str) -> String {
    s.chars()
        .filter_map(|c| match c {
            '\u{200b}' | '\u{200c}' | '\u{200d}' | '\u{2060}' | '\u{feff}' => None,
            '\u{00a0}' => Some(' '),
            other => Some(other),
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Digits only, after sanitation. Room ids are numeric in every supported
/// gateway schema.
pub(crate) fn sanitize_room_id(s: &str) -> String {
    sanitize_text(s)
        .chars()
        .filter(char::is_ascii_digit)
        .collect()
}

/// Structured `room_id`, legacy `chat_id`, the digits of the top-level room
/// field, then the sanitized room name as a last resort.
pub(crate) fn extract_room_id(frame: &Frame) -> String {
    if let Some(payload) = &frame.json {
        let rid = sanitize_room_id(payload.room_id.as_deref().unwrap_or(""));
        if !rid.is_empty() {
            return rid;
        }
        let cid = sanitize_room_id(payload.chat_id.as_deref().unwrap_or(""));
        if !cid.is_empty() {
            return cid;
        }
    }
    let room = frame.room.as_deref().unwrap_or("");
    let digits = sanitize_room_id(room);
    if !digits.is_empty() {
        return digits;
    }
    sanitize_text(room)
}

fn fallback_sender_name(frame: &Frame) -> String {
    if let Some(sender) = frame.sender.as_deref() {
        let sender = sender.trim();
        if !sender.is_empty() {
            return sender.to_string();
        }
    }
    frame
        .user_id()
        .map(str::to_string)
        .unwrap_or_else(|| "player".to_string())
}

fn room_allowed(allowed: &[String], room_id: &str) -> bool {
    if room_id.is_empty() || !room_id.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    allowed.iter().any(|r| r == room_id)
}

fn is_ignored_sender(ignored: &[String], name: &str) -> bool {
    let name = name.trim();
    if name.is_empty() {
        return false;
    }
    ignored
        .iter()
        .any(|entry| entry.trim().eq_ignore_ascii_case(name) || entry.trim() == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::Broadcaster;
    use crate::catalog::Catalog;
    use crate::config::Config;
    use crate::state::AppState;
    use iris::{FramePayload, IrisClient};
    use shared::repositories::kv_store::memory::MemoryKvStore;
    use shared::repositories::kv_store::KvStore;
    use shared::services::lobby_service::LobbyService;
    use shared::services::match_service::MatchService;
    use shared::services::render_service::SvgBoardRenderer;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn test_state(store: MemoryKvStore, ignore: &[&str]) -> Arc<AppState> {
        let store: Arc<dyn KvStore> = Arc::new(store);
        let matches = Arc::new(MatchService::new(
            store.clone(),
            Arc::new(SvgBoardRenderer::new()),
            None,
        ));
        let lobby = Arc::new(LobbyService::new(store.clone(), matches.clone()));
        let catalog = Arc::new(Catalog::new(None).unwrap());
        // Nothing listens on this address; sends fail fast and are logged.
        let client = IrisClient::new("http://127.0.0.1:9").unwrap();
        let config = Config {
            iris_base_url: "http://127.0.0.1:9".to_string(),
            iris_ws_url: "ws://127.0.0.1:9".to_string(),
            bot_prefix: "!체스".to_string(),
            redis_url: "redis://unused".to_string(),
            database_url: None,
            allowed_rooms: Vec::new(),
            pvp_only: true,
            ignore_senders: ignore.iter().map(|s| s.to_string()).collect(),
            start_image_delay: Duration::from_millis(0),
            fanout_image_delay: Duration::from_millis(0),
            template_dir: None,
        };
        let broadcaster = Broadcaster::new(
            client.clone(),
            catalog.clone(),
            config.start_image_delay,
            config.fanout_image_delay,
        );
        Arc::new(AppState {
            config,
            store,
            matches,
            lobby,
            client,
            catalog,
            broadcaster,
            solo: None,
            sender_names: Mutex::new(HashMap::new()),
            processed: Mutex::new(HashMap::new()),
        })
    }

    fn structured_frame(room: &str, user: &str, text: &str) -> Frame {
        Frame {
            room: Some(room.to_string()),
            msg: Some(text.to_string()),
            sender: Some(user.to_string()),
            json: Some(FramePayload {
                user_id: Some(user.to_string()),
                room_id: Some(room.to_string()),
                chat_id: None,
                message: Some(text.to_string()),
                kind: Some("1".to_string()),
            }),
        }
    }

    #[test]
    fn sanitation_strips_zero_width_and_nbsp() {
        assert_eq!(sanitize_text("\u{200b}!체스\u{feff} 보드\u{00a0} "), "!체스 보드");
        assert_eq!(sanitize_room_id(" 1\u{200d}00호 "), "100");
    }

    #[test]
    fn room_id_extraction_follows_the_fallback_chain() {
        let mut frame = structured_frame("100", "u1", "!체스 보드");
        assert_eq!(extract_room_id(&frame), "100");

        frame.json.as_mut().unwrap().room_id = None;
        frame.json.as_mut().unwrap().chat_id = Some("200".to_string());
        assert_eq!(extract_room_id(&frame), "200");

        frame.json.as_mut().unwrap().chat_id = None;
        frame.room = Some("room-300".to_string());
        assert_eq!(extract_room_id(&frame), "300");

        frame.room = Some("개발방".to_string());
        assert_eq!(extract_room_id(&frame), "개발방");
    }

    #[test]
    fn command_vocabulary_parses() {
        assert_eq!(parse_command("help"), Command::Help);
        assert_eq!(parse_command("도움"), Command::Help);
        assert_eq!(parse_command("방 생성"), Command::LobbyMake);
        assert_eq!(parse_command("방생성"), Command::LobbyMake);
        assert_eq!(parse_command("방 리스트"), Command::LobbyList);
        assert_eq!(parse_command("방목록"), Command::LobbyList);
        assert_eq!(parse_command("방 뭐지"), Command::Usage("usage.lobby"));
        assert_eq!(
            parse_command("참가 CH-A1B2C3"),
            Command::Join {
                code: "CH-A1B2C3".to_string()
            }
        );
        assert_eq!(parse_command("참가"), Command::Usage("usage.join"));
        assert_eq!(parse_command("보드"), Command::Board);
        assert_eq!(parse_command("현황"), Command::Board);
        assert_eq!(parse_command("기권"), Command::Resign);
        assert_eq!(
            parse_command("시작 level3"),
            Command::Solo(SoloCommand::Start {
                preset: Some("level3".to_string())
            })
        );
        assert_eq!(parse_command("무르기"), Command::Solo(SoloCommand::Undo));
        assert_eq!(
            parse_command("기록 5"),
            Command::Solo(SoloCommand::History { limit: 5 })
        );
        assert_eq!(parse_command("기보 abc"), Command::Usage("game.id.invalid"));
        assert_eq!(
            parse_command("e2e4"),
            Command::Move {
                input: "e2e4".to_string()
            }
        );
        assert_eq!(
            parse_command("Nf3"),
            Command::Move {
                input: "Nf3".to_string()
            }
        );
    }

    #[test]
    fn ignored_sender_matching_is_case_insensitive() {
        let ignored = vec!["Iris".to_string()];
        assert!(is_ignored_sender(&ignored, "Iris"));
        assert!(is_ignored_sender(&ignored, " iris "));
        assert!(!is_ignored_sender(&ignored, "Alice"));
        assert!(!is_ignored_sender(&ignored, ""));
    }

    #[tokio::test]
    async fn duplicate_frames_create_exactly_one_channel() {
        let store = MemoryKvStore::new();
        let state = test_state(store.clone(), &["Iris"]);

        ingress(state.clone(), structured_frame("100", "u1", "!체스 방 생성")).await;
        ingress(state.clone(), structured_frame("100", "u1", "!체스 방 생성")).await;

        assert_eq!(store.set_card("ch:lobby").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn ignored_senders_cause_no_state_change() {
        let store = MemoryKvStore::new();
        let state = test_state(store.clone(), &["Iris"]);

        ingress(state.clone(), structured_frame("100", "Iris", "!체스 방 생성")).await;

        assert_eq!(store.set_card("ch:lobby").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn allow_list_gates_unlisted_rooms() {
        let store = MemoryKvStore::new();
        let state = test_state(store.clone(), &[]);
        let mut config = state.config.clone();
        config.allowed_rooms = vec!["100".to_string()];
        let state = Arc::new(AppState {
            config,
            store: state.store.clone(),
            matches: state.matches.clone(),
            lobby: state.lobby.clone(),
            client: state.client.clone(),
            catalog: state.catalog.clone(),
            broadcaster: Broadcaster::new(
                state.client.clone(),
                state.catalog.clone(),
                Duration::from_millis(0),
                Duration::from_millis(0),
            ),
            solo: None,
            sender_names: Mutex::new(HashMap::new()),
            processed: Mutex::new(HashMap::new()),
        });

        ingress(state.clone(), structured_frame("999", "u1", "!체스 방 생성")).await;
        assert_eq!(store.set_card("ch:lobby").await.unwrap(), 0);

        ingress(state.clone(), structured_frame("100", "u1", "!체스 방 생성")).await;
        assert_eq!(store.set_card("ch:lobby").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn minimal_frames_feed_the_name_cache_only() {
        let store = MemoryKvStore::new();
        let state = test_state(store.clone(), &[]);

        let minimal = Frame {
            room: Some("100".to_string()),
            msg: Some("!체스 방 생성".to_string()),
            sender: Some("Alice".to_string()),
            json: None,
        };
        ingress(state.clone(), minimal).await;

        // No dispatch happened, but the name is ready to merge.
        assert_eq!(store.set_card("ch:lobby").await.unwrap(), 0);
        assert_eq!(
            state.cached_sender_name("100", "!체스 방 생성").as_deref(),
            Some("Alice")
        );
    }
}
