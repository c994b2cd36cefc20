use std::time::Duration;

use serde::Serialize;
use tracing::warn;

#[derive(Debug)]
pub enum EgressError {
    Request(String),
    Status { status: u16, body: String },
}

impl std::fmt::Display for EgressError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EgressError::Request(msg) => write!(f, "request failed: {}", msg),
            EgressError::Status { status, body } => {
                write!(f, "iris api error: status={} body={}", status, body)
            }
        }
    }
}

impl std::error::Error for EgressError {}

#[derive(Serialize)]
struct ReplyRequest<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    room: &'a str,
    data: &'a str,
}

/// HTTP egress to the gateway's `/reply` endpoint. Sends are not retried
/// here: failures are logged by the caller and the next command tries again.
#[derive(Clone)]
pub struct IrisClient {
    base_url: String,
    http: reqwest::Client,
}

impl IrisClient {
    pub fn new(base_url: &str) -> Result<Self, EgressError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| EgressError::Request(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub async fn send_text(&self, room: &str, message: &str) -> Result<(), EgressError> {
        self.reply(&ReplyRequest {
            kind: "text",
            room,
            data: message,
        })
        .await
    }

    pub async fn send_image(&self, room: &str, image_base64: &str) -> Result<(), EgressError> {
        self.reply(&ReplyRequest {
            kind: "image",
            room,
            data: image_base64,
        })
        .await
    }

    async fn reply(&self, request: &ReplyRequest<'_>) -> Result<(), EgressError> {
        let url = format!("{}/reply", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| EgressError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body = truncate(&body, 512);
            warn!("iris reply rejected: status={} room={}", status, request.room);
            return Err(EgressError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_request_serializes_with_type_field() {
        let raw = serde_json::to_string(&ReplyRequest {
            kind: "text",
            room: "100",
            data: "hello",
        })
        .unwrap();
        assert_eq!(raw, r#"{"type":"text","room":"100","data":"hello"}"#);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("abcdef", 4), "abcd");
        // Multi-byte Hangul must not be split mid-character.
        let t = truncate("체스체스", 4);
        assert_eq!(t, "체");
    }

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let client = IrisClient::new("http://iris.local/").unwrap();
        assert_eq!(client.base_url, "http://iris.local");
    }
}
