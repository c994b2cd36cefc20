use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

use crate::models::game::{Game, GameOutcome};
use crate::repositories::errors::result_repository_errors::ResultRepositoryError;

/// Durable sink for finished games. Writes are best-effort: the match core
/// logs failures and keeps serving chat.
#[async_trait]
pub trait ResultRepository: Send + Sync {
    async fn save_result(&self, game: &Game, method: &str) -> Result<(), ResultRepositoryError>;
}

pub struct PgResultRepository {
    pool: PgPool,
}

impl PgResultRepository {
    pub async fn connect(database_url: &str) -> Result<Self, ResultRepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl ResultRepository for PgResultRepository {
    async fn save_result(&self, game: &Game, method: &str) -> Result<(), ResultRepositoryError> {
        let result = result_token(game);
        let pgn_result = map_result_to_pgn(result);
        let pgn = build_pgn(game, pgn_result, method);

        let moves_uci = serde_json::to_string(&game.moves_uci)
            .map_err(|e| ResultRepositoryError::Serialization(e.to_string()))?;
        let moves_san = serde_json::to_string(&game.moves_san)
            .map_err(|e| ResultRepositoryError::Serialization(e.to_string()))?;
        let duration_ms = (game.updated_at - game.created_at).num_milliseconds().max(0);

        sqlx::query(
            r#"INSERT INTO pvp_games (
                game_id, white_id, white_name, black_id, black_name,
                origin_room, resolve_room,
                result, result_method, moves_uci, moves_san, pgn,
                started_at, ended_at, duration_ms
            ) VALUES (
                $1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15
            ) ON CONFLICT (game_id) DO UPDATE SET
                white_id=EXCLUDED.white_id,
                white_name=EXCLUDED.white_name,
                black_id=EXCLUDED.black_id,
                black_name=EXCLUDED.black_name,
                origin_room=EXCLUDED.origin_room,
                resolve_room=EXCLUDED.resolve_room,
                result=EXCLUDED.result,
                result_method=EXCLUDED.result_method,
                moves_uci=EXCLUDED.moves_uci,
                moves_san=EXCLUDED.moves_san,
                pgn=EXCLUDED.pgn,
                started_at=EXCLUDED.started_at,
                ended_at=EXCLUDED.ended_at,
                duration_ms=EXCLUDED.duration_ms"#,
        )
        .bind(&game.id)
        .bind(&game.white_id)
        .bind(&game.white_name)
        .bind(&game.black_id)
        .bind(&game.black_name)
        .bind(&game.origin_room)
        .bind(&game.resolve_room)
        .bind(result)
        .bind(method.trim())
        .bind(&moves_uci)
        .bind(&moves_san)
        .bind(&pgn)
        .bind(game.created_at)
        .bind(game.updated_at)
        .bind(duration_ms)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Result token for the `result` column. Resignations are recorded by the
/// winning color rather than by the literal "resign".
fn result_token(game: &Game) -> &'static str {
    match game.outcome {
        Some(GameOutcome::White) => "white",
        Some(GameOutcome::Black) => "black",
        Some(GameOutcome::Draw) => "draw",
        Some(GameOutcome::Resign) => match game.winner.as_deref() {
            Some(w) if w == game.white_id => "white",
            Some(w) if w == game.black_id => "black",
            _ => "",
        },
        None => "",
    }
}

fn map_result_to_pgn(result: &str) -> &'static str {
    match result {
        "white" => "1-0",
        "black" => "0-1",
        "draw" => "1/2-1/2",
        _ => "*",
    }
}

fn build_pgn(game: &Game, pgn_result: &str, method: &str) -> String {
    use std::fmt::Write as _;

    let mut out = String::new();
    let date = game.updated_at;
    out.push_str("[Event \"KakaoPvP\"]\n");
    out.push_str("[Site \"Iris\"]\n");
    let _ = writeln!(out, "[Date \"{}\"]", date.format("%Y.%m.%d"));
    let _ = writeln!(out, "[White \"{}\"]", sanitize_pgn(&game.white_name));
    let _ = writeln!(out, "[Black \"{}\"]", sanitize_pgn(&game.black_name));
    if !method.trim().is_empty() {
        let _ = writeln!(
            out,
            "[Termination \"{}\"]",
            sanitize_pgn(&method.to_lowercase())
        );
    }
    let _ = writeln!(out, "[Result \"{}\"]", pgn_result);
    out.push('\n');

    for (i, pair) in game.moves_san.chunks(2).enumerate() {
        let _ = write!(out, "{}. {}", i + 1, pair[0].trim());
        if let Some(reply) = pair.get(1) {
            let _ = write!(out, " {}", reply.trim());
        }
        out.push(' ');
    }
    out.push_str(pgn_result);
    out
}

fn sanitize_pgn(s: &str) -> String {
    s.replace('\\', " ").replace('"', "'").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::game::{Color, GameStatus};
    use chrono::Utc;

    fn finished_game() -> Game {
        Game {
            id: "pvp-1-abc".to_string(),
            fen: "fen".to_string(),
            moves_uci: vec!["f2f3".into(), "e7e5".into(), "g2g4".into(), "d8h4".into()],
            moves_san: vec!["f3".into(), "e5".into(), "g4".into(), "Qh4#".into()],
            turn: Color::White,
            status: GameStatus::Finished,
            white_id: "u1".to_string(),
            white_name: "Alice".to_string(),
            black_id: "u2".to_string(),
            black_name: "Bob \"the rook\"".to_string(),
            origin_room: "100".to_string(),
            resolve_room: "200".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            winner: Some("u2".to_string()),
            outcome: Some(GameOutcome::Black),
        }
    }

    #[test]
    fn pgn_contains_numbered_movetext_and_result() {
        let game = finished_game();
        let pgn = build_pgn(&game, "0-1", "checkmate");
        assert!(pgn.contains("[White \"Alice\"]"));
        assert!(pgn.contains("[Black \"Bob 'the rook'\"]"));
        assert!(pgn.contains("[Termination \"checkmate\"]"));
        assert!(pgn.contains("1. f3 e5 2. g4 Qh4# 0-1"));
    }

    #[test]
    fn resignation_result_maps_to_winner_color() {
        let mut game = finished_game();
        game.status = GameStatus::Resigned;
        game.outcome = Some(GameOutcome::Resign);
        game.winner = Some("u1".to_string());
        assert_eq!(result_token(&game), "white");
        assert_eq!(map_result_to_pgn(result_token(&game)), "1-0");
    }

    #[test]
    fn draw_maps_to_half_points() {
        let mut game = finished_game();
        game.status = GameStatus::Draw;
        game.outcome = Some(GameOutcome::Draw);
        game.winner = None;
        assert_eq!(map_result_to_pgn(result_token(&game)), "1/2-1/2");
    }
}
