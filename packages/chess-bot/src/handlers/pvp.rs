use shared::models::game::{GameOutcome, GameStatus};
use shared::services::errors::match_service_errors::MatchServiceError;
use shared::services::match_service::PlayOutcome;
use tracing::{info, warn};

use crate::handlers::reply;
use crate::state::AppState;

/// `보드` / `현황` with an ACTIVE PvP game in this room. Returns false when
/// there is no such game so the router can fall through to the next target.
pub async fn handle_board(state: &AppState, room_id: &str, user_id: &str) -> bool {
    let game = match state
        .matches
        .get_active_game_by_user_in_room(user_id, room_id)
        .await
    {
        Ok(Some(game)) => game,
        Ok(None) => return false,
        Err(err) => {
            warn!("pvp lookup failed: room={} user={}: {}", room_id, user_id, err);
            reply(state, room_id, "move.state.error", &[]).await;
            return true;
        }
    };
    info!("route: cmd=status mode=pvp room={} user={}", room_id, user_id);
    state
        .broadcaster
        .broadcast_board(&state.lobby, &state.matches, &game, room_id, None, "status")
        .await;
    true
}

/// `기권` with an ACTIVE PvP game in this room.
pub async fn handle_resign(state: &AppState, room_id: &str, user_id: &str) -> bool {
    let observed = match state
        .matches
        .get_active_game_by_user_in_room(user_id, room_id)
        .await
    {
        Ok(Some(game)) => game,
        Ok(None) => return false,
        Err(err) => {
            warn!("pvp lookup failed: room={} user={}: {}", room_id, user_id, err);
            reply(state, room_id, "move.state.error", &[]).await;
            return true;
        }
    };
    info!("route: cmd=resign mode=pvp room={} user={}", room_id, user_id);

    match state.matches.resign_by_room(user_id, room_id).await {
        Ok(game) => {
            state
                .broadcaster
                .broadcast_resign(&state.lobby, &game, room_id, user_id)
                .await;
        }
        Err(err) => {
            warn!("resign failed: game={} user={}: {}", observed.id, user_id, err);
            // The game may have ended under us (opponent's mate or resign
            // race). If the final state is terminal, still deliver the
            // personalized endings instead of a bare failure.
            match state.matches.load_game(&observed.id).await {
                Ok(Some(game)) if game.status != GameStatus::Active => {
                    state
                        .broadcaster
                        .broadcast_resign(&state.lobby, &game, room_id, user_id)
                        .await;
                }
                _ => {
                    reply(state, room_id, "resign.process.error", &[]).await;
                }
            }
        }
    }
    true
}

/// A bare move with an ACTIVE PvP game in this room.
pub async fn handle_move(state: &AppState, room_id: &str, user_id: &str, input: &str) -> bool {
    if input.trim().is_empty() {
        return false;
    }
    match state
        .matches
        .get_active_game_by_user_in_room(user_id, room_id)
        .await
    {
        Ok(Some(_)) => {}
        Ok(None) => return false,
        Err(err) => {
            warn!("pvp lookup failed: room={} user={}: {}", room_id, user_id, err);
            reply(state, room_id, "move.state.error", &[]).await;
            return true;
        }
    }
    info!("route: cmd=move mode=pvp room={} user={}", room_id, user_id);

    let outcome = match state.matches.play_move_by_room(user_id, room_id, input).await {
        Ok(outcome) => outcome,
        Err(MatchServiceError::Conflict) => {
            reply(state, room_id, "pvp.conflict.retry", &[]).await;
            return true;
        }
        Err(MatchServiceError::NotFound) => {
            // The game vanished between lookup and transaction.
            reply(state, room_id, "move.failed", &[]).await;
            return true;
        }
        Err(err) => {
            warn!("move failed: room={} user={}: {}", room_id, user_id, err);
            let text = err.to_string();
            reply(state, room_id, "move.failed_with_error", &[("Error", text.as_str())]).await;
            return true;
        }
    };

    let game = match outcome {
        PlayOutcome::Applied { game } => game,
        PlayOutcome::NotYourTurn { .. } => {
            reply(state, room_id, "pvp.not_your_turn", &[]).await;
            return true;
        }
        PlayOutcome::IllegalMove { .. } => {
            reply(state, room_id, "move.bad_input", &[]).await;
            return true;
        }
    };

    let finish_text = match game.status {
        GameStatus::Finished => {
            let winner = match game.outcome {
                Some(GameOutcome::Black) => game.black_name.as_str(),
                _ => game.white_name.as_str(),
            };
            state
                .catalog
                .render("finish.checkmate", &[("Winner", winner)])
                .ok()
        }
        GameStatus::Draw => state.catalog.render("finish.draw", &[]).ok(),
        _ => None,
    };

    state
        .broadcaster
        .broadcast_board(
            &state.lobby,
            &state.matches,
            &game,
            room_id,
            finish_text.as_deref(),
            "move",
        )
        .await;
    true
}
