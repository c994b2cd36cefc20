pub mod chess_service;
pub mod errors;
pub mod lobby_service;
pub mod match_service;
pub mod render_service;
