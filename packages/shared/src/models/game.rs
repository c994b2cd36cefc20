use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Side identifier, serialized in lowercase to match the stored JSON.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
}

impl Color {
    pub fn opposite(self) -> Color {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }
}

/// Color preference threaded through game creation. The lobby always passes
/// `Random`; named sides exist for direct game creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorChoice {
    White,
    Black,
    Random,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum GameStatus {
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "FINISHED")]
    Finished,
    #[serde(rename = "RESIGNED")]
    Resigned,
    #[serde(rename = "DRAW")]
    Draw,
}

impl GameStatus {
    pub fn is_terminal(self) -> bool {
        self != GameStatus::Active
    }
}

/// How a finished game ended, from the winner's point of view.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GameOutcome {
    White,
    Black,
    Draw,
    Resign,
}

/// Persisted state of a PvP match, stored as JSON under `pvp:game:<id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    pub id: String,
    pub fen: String,
    pub moves_uci: Vec<String>,
    pub moves_san: Vec<String>,
    pub turn: Color,
    pub status: GameStatus,
    pub white_id: String,
    pub white_name: String,
    pub black_id: String,
    pub black_name: String,
    pub origin_room: String,
    pub resolve_room: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub winner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub outcome: Option<GameOutcome>,
}

impl Game {
    /// Which side the given user plays, if they are a participant.
    pub fn player_color(&self, user_id: &str) -> Option<Color> {
        let user_id = user_id.trim();
        if self.white_id == user_id {
            Some(Color::White)
        } else if self.black_id == user_id {
            Some(Color::Black)
        } else {
            None
        }
    }

    pub fn opponent_id(&self, user_id: &str) -> Option<&str> {
        match self.player_color(user_id)? {
            Color::White => Some(&self.black_id),
            Color::Black => Some(&self.white_id),
        }
    }

    pub fn name_of(&self, user_id: &str) -> Option<&str> {
        match self.player_color(user_id)? {
            Color::White => Some(&self.white_name),
            Color::Black => Some(&self.black_name),
        }
    }

    pub fn winner_name(&self) -> Option<&str> {
        let winner = self.winner.as_deref()?;
        self.name_of(winner)
    }

    /// A game is addressable from the room it was created in and the room
    /// the second participant joined from.
    pub fn in_room(&self, room_id: &str) -> bool {
        let room_id = room_id.trim();
        self.origin_room == room_id || self.resolve_room == room_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Game {
        Game {
            id: "pvp-1-abc".to_string(),
            fen: "startpos".to_string(),
            moves_uci: vec![],
            moves_san: vec![],
            turn: Color::White,
            status: GameStatus::Active,
            white_id: "u1".to_string(),
            white_name: "Alice".to_string(),
            black_id: "u2".to_string(),
            black_name: "Bob".to_string(),
            origin_room: "100".to_string(),
            resolve_room: "200".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            winner: None,
            outcome: None,
        }
    }

    #[test]
    fn player_color_matches_participants() {
        let g = sample();
        assert_eq!(g.player_color("u1"), Some(Color::White));
        assert_eq!(g.player_color("u2"), Some(Color::Black));
        assert_eq!(g.player_color("u3"), None);
        assert_eq!(g.opponent_id("u1"), Some("u2"));
    }

    #[test]
    fn room_scope_covers_origin_and_resolve() {
        let g = sample();
        assert!(g.in_room("100"));
        assert!(g.in_room("200"));
        assert!(!g.in_room("300"));
    }

    #[test]
    fn status_round_trips_as_stored_tokens() {
        let g = sample();
        let raw = serde_json::to_string(&g).unwrap();
        assert!(raw.contains("\"ACTIVE\""));
        assert!(raw.contains("\"white\""));
        let back: Game = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.status, GameStatus::Active);
        assert_eq!(back.turn, Color::White);
        assert!(back.winner.is_none());
    }
}
