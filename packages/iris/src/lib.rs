pub mod client;
pub mod message;
pub mod ws;

pub use client::{EgressError, IrisClient};
pub use message::{Frame, FramePayload};
pub use ws::{WsConfig, WsError, WsRunner};
