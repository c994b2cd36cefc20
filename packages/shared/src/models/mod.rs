pub mod channel;
pub mod game;
