pub mod models;
pub mod repositories;
pub mod services;

pub use models::channel::{ChannelMeta, ChannelState, JoinResult, MakeResult};
pub use models::game::{Color, ColorChoice, Game, GameOutcome, GameStatus};
