use shared::services::errors::lobby_service_errors::LobbyServiceError;
use tracing::warn;

use crate::handlers::reply;
use crate::solo::SessionMeta;
use crate::state::AppState;

/// `방 생성`: create a lobby channel in the commanding room.
pub async fn handle_make(state: &AppState, room_id: &str, user_id: &str, user_name: &str) {
    if user_id.trim().is_empty() {
        reply(state, room_id, "user.identify.error", &[]).await;
        return;
    }
    if is_busy(state, room_id, user_id, user_name).await {
        reply(state, room_id, "pvp.busy.in_room", &[]).await;
        return;
    }

    match state.lobby.make(room_id, user_id, user_name).await {
        Ok(made) => {
            reply(
                state,
                room_id,
                "lobby_make.success",
                &[
                    ("Code", made.code.as_str()),
                    ("Prefix", state.config.bot_prefix.as_str()),
                ],
            )
            .await;
        }
        Err(LobbyServiceError::CreatorHasLobby) => {
            reply(state, room_id, "lobby.make.limit", &[]).await;
        }
        Err(LobbyServiceError::PlayerBusyInRoom) => {
            reply(state, room_id, "pvp.busy.in_room", &[]).await;
        }
        Err(err) => {
            warn!("lobby make failed: room={} user={}: {}", room_id, user_id, err);
            let text = err.to_string();
            reply(state, room_id, "channel.create.error", &[("Error", text.as_str())]).await;
        }
    }
}

/// `방 리스트`: show channels waiting for an opponent.
pub async fn handle_list(state: &AppState, room_id: &str) {
    let metas = match state.lobby.list_lobby().await {
        Ok(metas) => metas,
        Err(err) => {
            warn!("lobby list failed: {}", err);
            reply(state, room_id, "lobby.list.error", &[]).await;
            return;
        }
    };
    if metas.is_empty() {
        reply(state, room_id, "lobby.none", &[]).await;
        return;
    }

    let mut body = state
        .catalog
        .render("lobby.list.header", &[])
        .unwrap_or_else(|_| "대기 중인 방:".to_string());
    for meta in &metas {
        body.push('\n');
        match state.catalog.render(
            "lobby.list.item",
            &[
                ("Code", meta.id.as_str()),
                ("CreatorName", meta.creator_name.as_str()),
            ],
        ) {
            Ok(item) => body.push_str(&item),
            Err(_) => body.push_str(&format!("• 코드: {} | 만든이: {}", meta.id, meta.creator_name)),
        }
    }
    state.broadcaster.send_text(room_id, &body).await;
}

/// `참가 <code>`: join a lobby; the second join starts the game and fans
/// the opening board out to every bound room.
pub async fn handle_join(
    state: &AppState,
    room_id: &str,
    code: &str,
    user_id: &str,
    user_name: &str,
) {
    if user_id.trim().is_empty() {
        reply(state, room_id, "user.identify.error", &[]).await;
        return;
    }
    if is_busy(state, room_id, user_id, user_name).await {
        reply(state, room_id, "pvp.busy.in_room", &[]).await;
        return;
    }

    let joined = match state.lobby.join(room_id, code, user_id, user_name).await {
        Ok(joined) => joined,
        Err(LobbyServiceError::PlayerBusyInRoom) => {
            reply(state, room_id, "pvp.busy.in_room", &[]).await;
            return;
        }
        Err(err) => {
            warn!("lobby join failed: code={} user={}: {}", code, user_id, err);
            let text = err.to_string();
            reply(state, room_id, "join.error", &[("Error", text.as_str())]).await;
            return;
        }
    };

    if !joined.started {
        reply(state, room_id, "join.waiting", &[]).await;
        return;
    }

    let game = match joined.game_id.as_deref() {
        Some(id) => state.matches.load_game(id).await.ok().flatten(),
        None => None,
    };
    let game = match game {
        Some(game) => game,
        None => {
            reply(state, room_id, "game.not_found", &[]).await;
            return;
        }
    };

    let announce = state
        .catalog
        .render(
            "pvp.start.announce",
            &[
                ("WhiteName", game.white_name.as_str()),
                ("BlackName", game.black_name.as_str()),
            ],
        )
        .ok();
    state
        .broadcaster
        .broadcast_board(
            &state.lobby,
            &state.matches,
            &game,
            room_id,
            announce.as_deref(),
            "start",
        )
        .await;
}

/// A player already in an ACTIVE game in this room (PvP or single-player)
/// cannot open or join another lobby here.
async fn is_busy(state: &AppState, room_id: &str, user_id: &str, user_name: &str) -> bool {
    match state
        .matches
        .get_active_game_by_user_in_room(user_id, room_id)
        .await
    {
        Ok(Some(_)) => return true,
        Ok(None) => {}
        Err(err) => {
            warn!("busy check failed: room={} user={}: {}", room_id, user_id, err);
        }
    }
    if let Some(solo) = &state.solo {
        let meta = SessionMeta::new(room_id, user_id, user_name);
        if solo.has_session(&meta).await {
            return true;
        }
    }
    false
}
