use std::str::FromStr;

use chess::{Board, ChessMove, File, Game, GameResult, MoveGen, Piece};

use crate::models::game::Color;
use crate::services::errors::chess_service_errors::ChessServiceError;

/// Terminal outcome of a position after a move was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalOutcome {
    None,
    WhiteWon,
    BlackWon,
    Draw,
}

/// Result of applying a single move on top of a replayed history.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedMove {
    pub uci: String,
    pub san: String,
    pub fen: String,
    pub turn: Color,
    pub outcome: TerminalOutcome,
}

/// Pure move validation over the `chess` crate. Positions are always
/// reconstructed by replaying the stored UCI list from the initial position;
/// the FEN a game carries is a presentation artifact and must never be used
/// as a replay starting point alongside the same move list.
#[derive(Clone)]
pub struct ChessService;

impl ChessService {
    pub fn new() -> Self {
        ChessService
    }

    /// Replay a stored UCI history from the starting position.
    pub fn replay(&self, moves_uci: &[String]) -> Result<Game, ChessServiceError> {
        let mut game = Game::new();
        for (i, mv) in moves_uci.iter().enumerate() {
            let text = mv.trim();
            let parsed = if text.is_ascii() && (4..=5).contains(&text.len()) {
                ChessMove::from_str(text).ok()
            } else {
                None
            };
            let parsed = parsed.ok_or_else(|| {
                ChessServiceError::CorruptHistory(format!("move {} unparseable: {}", i, mv))
            })?;
            if !game.make_move(parsed) {
                return Err(ChessServiceError::CorruptHistory(format!(
                    "move {} illegal in replay: {}",
                    i, mv
                )));
            }
        }
        Ok(game)
    }

    /// FEN of the position after replaying the given history.
    pub fn fen_after(&self, moves_uci: &[String]) -> Result<String, ChessServiceError> {
        Ok(self.replay(moves_uci)?.current_position().to_string())
    }

    /// Apply `input` (UCI tried first, SAN second) on top of the replayed
    /// history and report the applied move plus the resulting state.
    pub fn apply(
        &self,
        moves_uci: &[String],
        input: &str,
    ) -> Result<AppliedMove, ChessServiceError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ChessServiceError::BadInput);
        }

        let mut game = self.replay(moves_uci)?;
        let board = game.current_position();

        // UCI coordinates are 4-5 ascii bytes ("e2e4", "e7e8q"); anything
        // else goes straight to the SAN parser.
        let lowered = trimmed.to_lowercase();
        let uci = if lowered.is_ascii() && (4..=5).contains(&lowered.len()) {
            ChessMove::from_str(&lowered)
                .ok()
                .filter(|parsed| board.legal(*parsed))
        } else {
            None
        };
        let mv = match uci {
            Some(parsed) => parsed,
            None => ChessMove::from_san(&board, trimmed)
                .map_err(|_| ChessServiceError::IllegalMove)?,
        };

        let san = san_for_move(&board, mv);
        if !game.make_move(mv) {
            return Err(ChessServiceError::IllegalMove);
        }
        if game.result().is_none() && game.can_declare_draw() {
            game.declare_draw();
        }

        let position = game.current_position();
        let outcome = match game.result() {
            Some(GameResult::WhiteCheckmates) => TerminalOutcome::WhiteWon,
            Some(GameResult::BlackCheckmates) => TerminalOutcome::BlackWon,
            Some(GameResult::WhiteResigns) => TerminalOutcome::BlackWon,
            Some(GameResult::BlackResigns) => TerminalOutcome::WhiteWon,
            Some(GameResult::Stalemate)
            | Some(GameResult::DrawAccepted)
            | Some(GameResult::DrawDeclared) => TerminalOutcome::Draw,
            None => TerminalOutcome::None,
        };

        Ok(AppliedMove {
            uci: mv.to_string(),
            san,
            fen: position.to_string(),
            turn: side_to_color(position.side_to_move()),
            outcome,
        })
    }
}

pub(crate) fn side_to_color(side: chess::Color) -> Color {
    match side {
        chess::Color::White => Color::White,
        chess::Color::Black => Color::Black,
    }
}

/// Standard algebraic notation for a legal move in the given position. The
/// `chess` crate only parses SAN, so encoding lives here.
fn san_for_move(board: &Board, mv: ChessMove) -> String {
    let src = mv.get_source();
    let dst = mv.get_dest();
    let piece = match board.piece_on(src) {
        Some(p) => p,
        None => return mv.to_string(),
    };

    let mut san = String::new();
    let file_delta =
        (src.get_file().to_index() as i32 - dst.get_file().to_index() as i32).abs();
    let is_castle = piece == Piece::King && file_delta == 2;

    if is_castle {
        san.push_str(if dst.get_file() == File::G {
            "O-O"
        } else {
            "O-O-O"
        });
    } else {
        // En passant shows as a pawn changing file onto an empty square.
        let is_capture = board.piece_on(dst).is_some()
            || (piece == Piece::Pawn && src.get_file() != dst.get_file());

        if piece == Piece::Pawn {
            if is_capture {
                san.push(file_char(src.get_file()));
            }
        } else {
            san.push(piece_letter(piece));
            san.push_str(&disambiguation(board, mv, piece));
        }
        if is_capture {
            san.push('x');
        }
        san.push_str(&dst.to_string());
        if let Some(promotion) = mv.get_promotion() {
            san.push('=');
            san.push(piece_letter(promotion));
        }
    }

    let after = board.make_move_new(mv);
    if after.checkers().popcnt() > 0 {
        if MoveGen::new_legal(&after).len() == 0 {
            san.push('#');
        } else {
            san.push('+');
        }
    }
    san
}

/// File/rank qualifier when another identical piece could reach the same
/// destination.
fn disambiguation(board: &Board, mv: ChessMove, piece: Piece) -> String {
    let src = mv.get_source();
    let dst = mv.get_dest();
    let rivals: Vec<chess::Square> = MoveGen::new_legal(board)
        .filter(|other| {
            other.get_dest() == dst
                && other.get_source() != src
                && board.piece_on(other.get_source()) == Some(piece)
        })
        .map(|other| other.get_source())
        .collect();
    if rivals.is_empty() {
        return String::new();
    }

    let shares_file = rivals.iter().any(|s| s.get_file() == src.get_file());
    let shares_rank = rivals.iter().any(|s| s.get_rank() == src.get_rank());
    let mut out = String::new();
    if !shares_file {
        out.push(file_char(src.get_file()));
    } else if !shares_rank {
        out.push(rank_char(src.get_rank()));
    } else {
        out.push(file_char(src.get_file()));
        out.push(rank_char(src.get_rank()));
    }
    out
}

fn piece_letter(piece: Piece) -> char {
    match piece {
        Piece::Pawn => 'P',
        Piece::Knight => 'N',
        Piece::Bishop => 'B',
        Piece::Rook => 'R',
        Piece::Queen => 'Q',
        Piece::King => 'K',
    }
}

fn file_char(file: File) -> char {
    (b'a' + file.to_index() as u8) as char
}

fn rank_char(rank: chess::Rank) -> char {
    (b'1' + rank.to_index() as u8) as char
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moves(list: &[&str]) -> Vec<String> {
        list.iter().map(|m| m.to_string()).collect()
    }

    #[test]
    fn uci_move_is_applied_with_san_notation() {
        let svc = ChessService::new();
        let applied = svc.apply(&[], "e2e4").unwrap();
        assert_eq!(applied.uci, "e2e4");
        assert_eq!(applied.san, "e4");
        assert_eq!(applied.turn, Color::Black);
        assert!(applied.fen.starts_with("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b"));
        assert_eq!(applied.outcome, TerminalOutcome::None);
    }

    #[test]
    fn san_input_is_accepted_when_uci_fails() {
        let svc = ChessService::new();
        let applied = svc.apply(&[], "Nf3").unwrap();
        assert_eq!(applied.uci, "g1f3");
        assert_eq!(applied.san, "Nf3");
    }

    #[test]
    fn illegal_input_is_rejected() {
        let svc = ChessService::new();
        assert_eq!(svc.apply(&[], "e2e5"), Err(ChessServiceError::IllegalMove));
        assert_eq!(svc.apply(&[], "zzz"), Err(ChessServiceError::IllegalMove));
        assert_eq!(svc.apply(&[], "   "), Err(ChessServiceError::BadInput));
    }

    #[test]
    fn capture_and_check_suffixes_are_encoded() {
        let svc = ChessService::new();
        // 1. e4 d5 2. exd5 Qxd5
        let history = moves(&["e2e4", "d7d5"]);
        let capture = svc.apply(&history, "e4d5").unwrap();
        assert_eq!(capture.san, "exd5");

        let history = moves(&["e2e4", "e7e5", "d1h5", "b8c6"]);
        let check = svc.apply(&history, "h5f7").unwrap();
        assert_eq!(check.san, "Qxf7+");
        assert_eq!(check.outcome, TerminalOutcome::None);
    }

    #[test]
    fn fools_mate_finishes_black_won() {
        let svc = ChessService::new();
        let history = moves(&["f2f3", "e7e5", "g2g4"]);
        let applied = svc.apply(&history, "d8h4").unwrap();
        assert_eq!(applied.san, "Qh4#");
        assert_eq!(applied.outcome, TerminalOutcome::BlackWon);
    }

    #[test]
    fn scholars_mate_finishes_white_won() {
        let svc = ChessService::new();
        let history = moves(&["e2e4", "e7e5", "f1c4", "b8c6", "d1h5", "g8f6"]);
        let applied = svc.apply(&history, "h5f7").unwrap();
        assert_eq!(applied.san, "Qxf7#");
        assert_eq!(applied.outcome, TerminalOutcome::WhiteWon);
    }

    #[test]
    fn castling_is_encoded_as_ooo_tokens() {
        let svc = ChessService::new();
        let history = moves(&["e2e4", "e7e5", "g1f3", "b8c6", "f1c4", "g8f6"]);
        let applied = svc.apply(&history, "e1g1").unwrap();
        assert_eq!(applied.san, "O-O");
    }

    #[test]
    fn rook_moves_disambiguate_by_file() {
        let svc = ChessService::new();
        // Both rooks can reach h3 after clearing their paths.
        let history = moves(&["a2a4", "h7h6", "h2h4", "g7g6", "a1a3", "d7d6"]);
        let applied = svc.apply(&history, "h1h3").unwrap();
        assert_eq!(applied.san, "Rhh3");
    }

    #[test]
    fn promotion_is_encoded_with_equals() {
        let svc = ChessService::new();
        let history = moves(&[
            "h2h4", "g7g5", "h4g5", "g8f6", "g5g6", "f6g8", "g6g7", "g8f6",
        ]);
        let applied = svc.apply(&history, "g7h8q").unwrap();
        assert_eq!(applied.san, "gxh8=Q");
        assert_eq!(applied.uci, "g7h8q");
    }

    #[test]
    fn replay_from_start_matches_incremental_fens() {
        let svc = ChessService::new();
        let sequence = ["e2e4", "c7c5", "g1f3", "d7d6", "d2d4", "c5d4"];
        let mut history: Vec<String> = Vec::new();
        for mv in sequence {
            let applied = svc.apply(&history, mv).unwrap();
            history.push(applied.uci.clone());
            assert_eq!(svc.fen_after(&history).unwrap(), applied.fen);
        }
        assert_eq!(history.len(), 6);
    }

    #[test]
    fn corrupt_history_is_reported() {
        let svc = ChessService::new();
        let err = svc.apply(&moves(&["e2e5"]), "e7e5").unwrap_err();
        assert!(matches!(err, ChessServiceError::CorruptHistory(_)));
    }
}
