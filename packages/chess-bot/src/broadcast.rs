use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use iris::IrisClient;
use shared::models::channel::ChannelMeta;
use shared::models::game::Game;
use shared::services::lobby_service::LobbyService;
use shared::services::match_service::MatchService;
use tracing::{info, warn};

use crate::catalog::Catalog;

/// Fans game updates out to every room bound to a match, rendering each
/// board from that room's viewer perspective. Sends are paced to reduce
/// gateway drops of rapid text+image pairs.
pub struct Broadcaster {
    client: IrisClient,
    catalog: Arc<Catalog>,
    start_image_delay: Duration,
    fanout_image_delay: Duration,
}

impl Broadcaster {
    pub fn new(
        client: IrisClient,
        catalog: Arc<Catalog>,
        start_image_delay: Duration,
        fanout_image_delay: Duration,
    ) -> Self {
        Broadcaster {
            client,
            catalog,
            start_image_delay,
            fanout_image_delay,
        }
    }

    /// Union of the channel's rooms, both participants' room-of-game
    /// lookups, and the originating room, with the originating room first.
    pub async fn rooms_for_game(
        &self,
        lobby: &LobbyService,
        game: &Game,
        origin_room: &str,
    ) -> Vec<String> {
        let mut base: Vec<String> = vec![origin_room.to_string()];
        if let Ok(Some((_, code))) = lobby.meta_by_game(game).await {
            if let Ok(rooms) = lobby.rooms(&code).await {
                base.extend(rooms);
            }
        }
        for user in [&game.white_id, &game.black_id] {
            if let Ok(rooms) = lobby.rooms_by_user_and_game(user, &game.id).await {
                base.extend(rooms);
            }
        }
        prioritize_rooms(merge_rooms(base, game), origin_room)
    }

    /// Board fanout for start/status/move phases. `lead_text` (start
    /// announcements, finish texts) goes out before each image.
    pub async fn broadcast_board(
        &self,
        lobby: &LobbyService,
        matches: &MatchService,
        game: &Game,
        origin_room: &str,
        lead_text: Option<&str>,
        phase: &str,
    ) {
        let white_view = matches.board_for_viewer(game, &game.white_id).await;
        let black_view = matches.board_for_viewer(game, &game.black_id).await;
        let (white_view, black_view) = match (white_view, black_view) {
            (Ok(w), Ok(b)) => (w, b),
            (Err(err), _) | (_, Err(err)) => {
                warn!("board render failed for {}: {}", game.id, err);
                let fallback = lead_text
                    .map(str::to_string)
                    .or_else(|| self.catalog.render("render.board.failed", &[]).ok())
                    .unwrap_or_else(|| "보드 렌더링 실패".to_string());
                self.send_text(origin_room, &fallback).await;
                return;
            }
        };

        let rooms = self.rooms_for_game(lobby, game, origin_room).await;
        info!(
            "pvp fanout: game_id={} phase={} rooms={:?}",
            game.id, phase, rooms
        );
        let meta = lobby.meta_by_game(game).await.ok().flatten();
        for (i, room) in rooms.iter().enumerate() {
            let viewer = viewer_for(meta.as_ref().map(|(m, _)| m), room, game);
            let image = if viewer == game.black_id {
                &black_view
            } else {
                &white_view
            };
            if let Some(text) = lead_text.filter(|t| !t.trim().is_empty()) {
                self.send_text(room, text).await;
                tokio::time::sleep(self.start_image_delay).await;
            }
            if let Err(err) = self
                .client
                .send_image(room, &general_purpose::STANDARD.encode(image))
                .await
            {
                warn!(
                    "board send failed: room={} game_id={} phase={}: {}",
                    room, game.id, phase, err
                );
                let fallback = self
                    .catalog
                    .render("board.send.failed", &[])
                    .unwrap_or_else(|_| "보드 전송 실패".to_string());
                self.send_text(room, &fallback).await;
            }
            if i + 1 < rooms.len() {
                tokio::time::sleep(self.fanout_image_delay).await;
            }
        }
    }

    /// Resignation fanout: text only, personalized per viewer. The
    /// resigner's room reads a loss, the opponent's room a win.
    pub async fn broadcast_resign(
        &self,
        lobby: &LobbyService,
        game: &Game,
        origin_room: &str,
        resigner_id: &str,
    ) {
        let resigner_name = game.name_of(resigner_id).unwrap_or("").trim().to_string();
        let winner_name = game.winner_name().unwrap_or("").trim().to_string();
        let announce = self
            .catalog
            .render(
                "pvp.resign.announce",
                &[
                    ("ResignerName", resigner_name.as_str()),
                    ("WinnerName", winner_name.as_str()),
                ],
            )
            .unwrap_or_default();

        let rooms = self.rooms_for_game(lobby, game, origin_room).await;
        info!(
            "pvp fanout: game_id={} phase=resign rooms={:?}",
            game.id, rooms
        );
        let meta = lobby.meta_by_game(game).await.ok().flatten();
        for (i, room) in rooms.iter().enumerate() {
            let viewer = viewer_for(meta.as_ref().map(|(m, _)| m), room, game);
            let key = if viewer == resigner_id.trim() {
                "pvp.resign.loser"
            } else {
                "pvp.resign.winner"
            };
            let text = self
                .catalog
                .render(key, &[])
                .ok()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| announce.clone());
            self.send_text(room, &text).await;
            if i + 1 < rooms.len() {
                tokio::time::sleep(self.fanout_image_delay).await;
            }
        }
    }

    pub async fn send_text(&self, room: &str, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        if let Err(err) = self.client.send_text(room, text).await {
            warn!("text send failed: room={}: {}", room, err);
        }
    }
}

/// Trim-normalized union preserving first-seen order, always including the
/// game's own origin and resolve rooms.
pub(crate) fn merge_rooms(base: Vec<String>, game: &Game) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |room: &str| {
        let room = room.trim();
        if !room.is_empty() && !out.iter().any(|r| r == room) {
            out.push(room.to_string());
        }
    };
    for room in &base {
        push(room);
    }
    push(&game.origin_room);
    push(&game.resolve_room);
    out
}

/// Move the originating room to position 0 so the commanding chat always
/// hears back first even under pacing.
pub(crate) fn prioritize_rooms(rooms: Vec<String>, current: &str) -> Vec<String> {
    let current = current.trim();
    if current.is_empty() {
        return rooms;
    }
    let mut out = vec![current.to_string()];
    for room in rooms {
        let room = room.trim();
        if !room.is_empty() && !out.iter().any(|r| r == room) {
            out.push(room.to_string());
        }
    }
    out
}

/// Which participant a room is bound to: the creator in the creator's room,
/// the opponent elsewhere. Unknown channels fall back to the white player.
pub(crate) fn viewer_for(meta: Option<&ChannelMeta>, room: &str, game: &Game) -> String {
    let meta = match meta {
        Some(meta) => meta,
        None => return game.white_id.clone(),
    };
    let creator = meta.creator_id.trim();
    if room.trim() == meta.creator_room.trim() {
        return creator.to_string();
    }
    if creator == game.white_id {
        game.black_id.clone()
    } else {
        game.white_id.clone()
    }
}
