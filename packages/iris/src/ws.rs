use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::message::Frame;

const PING_INTERVAL: Duration = Duration::from_secs(30);
const MAX_PING_FAILURES: u32 = 2;

#[derive(Debug)]
pub enum WsError {
    Connect(String),
    ReconnectExhausted { attempts: u32 },
}

impl std::fmt::Display for WsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WsError::Connect(msg) => write!(f, "websocket connect failed: {}", msg),
            WsError::ReconnectExhausted { attempts } => {
                write!(f, "websocket reconnect exhausted after {} attempts", attempts)
            }
        }
    }
}

impl std::error::Error for WsError {}

#[derive(Debug, Clone)]
pub struct WsConfig {
    pub url: String,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay: Duration,
}

impl WsConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            max_reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_millis(100),
        }
    }
}

/// Gateway ingress loop. Connects, reads frames, and hands each decoded
/// frame to the callback; reconnects with exponential backoff on failure.
pub struct WsRunner {
    config: WsConfig,
}

impl WsRunner {
    pub fn new(config: WsConfig) -> Self {
        Self { config }
    }

    /// Run until the reconnect budget is exhausted. The callback is invoked
    /// on the runner task; it should hand work off (spawn) rather than block.
    pub async fn run<F>(&self, on_frame: F) -> Result<(), WsError>
    where
        F: Fn(Frame) + Send + Sync,
    {
        let mut attempt: u32 = 0;
        loop {
            match connect_async(self.config.url.as_str()).await {
                Ok((stream, _)) => {
                    info!("ws connected: {}", self.config.url);
                    attempt = 0;
                    self.read_until_closed(stream, &on_frame).await;
                    warn!("ws disconnected, scheduling reconnect");
                }
                Err(err) => {
                    warn!("ws connect failed (attempt {}): {}", attempt + 1, err);
                }
            }

            attempt += 1;
            if attempt > self.config.max_reconnect_attempts {
                return Err(WsError::ReconnectExhausted {
                    attempts: self.config.max_reconnect_attempts,
                });
            }
            let delay = backoff(self.config.reconnect_base_delay, attempt);
            info!("ws reconnect attempt {} in {:?}", attempt, delay);
            tokio::time::sleep(delay).await;
        }
    }

    async fn read_until_closed<F>(
        &self,
        stream: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        on_frame: &F,
    ) where
        F: Fn(Frame) + Send + Sync,
    {
        let (mut sink, mut reader) = stream.split();
        let mut ping_timer = tokio::time::interval(PING_INTERVAL);
        ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping_timer.tick().await; // first tick fires immediately
        let mut ping_failures: u32 = 0;

        loop {
            tokio::select! {
                incoming = reader.next() => {
                    match incoming {
                        Some(Ok(Message::Text(raw))) => match serde_json::from_str::<Frame>(&raw) {
                            Ok(frame) => on_frame(frame),
                            Err(err) => debug!("dropping undecodable frame: {}", err),
                        },
                        Some(Ok(Message::Close(_))) | None => {
                            return;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!("ws read error: {}", err);
                            return;
                        }
                    }
                }
                _ = ping_timer.tick() => {
                    if sink.send(Message::Ping(Vec::new())).await.is_err() {
                        ping_failures += 1;
                        if ping_failures >= MAX_PING_FAILURES {
                            warn!("ws ping failed {} times, reconnecting", ping_failures);
                            return;
                        }
                    } else {
                        ping_failures = 0;
                    }
                }
            }
        }
    }
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    let capped = attempt.clamp(1, 6);
    base * 2u32.pow(capped - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff(base, 1), Duration::from_millis(100));
        assert_eq!(backoff(base, 2), Duration::from_millis(200));
        assert_eq!(backoff(base, 6), Duration::from_millis(3200));
        assert_eq!(backoff(base, 12), Duration::from_millis(3200));
    }

    #[tokio::test]
    async fn run_gives_up_after_the_reconnect_budget() {
        let mut config = WsConfig::new("ws://127.0.0.1:1"); // nothing listens here
        config.max_reconnect_attempts = 2;
        config.reconnect_base_delay = Duration::from_millis(1);
        let runner = WsRunner::new(config);
        match runner.run(|_frame| {}).await {
            Err(WsError::ReconnectExhausted { attempts }) => assert_eq!(attempts, 2),
            other => panic!("expected exhaustion, got {:?}", other.err()),
        }
    }
}
