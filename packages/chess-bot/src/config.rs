use std::env;
use std::time::Duration;

#[derive(Debug)]
pub enum ConfigError {
    Missing(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(name) => write!(f, "{} is required", name),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone)]
pub struct Config {
    pub iris_base_url: String,
    pub iris_ws_url: String,
    pub bot_prefix: String,

    pub redis_url: String,
    pub database_url: Option<String>,

    /// Empty means every room is allowed.
    pub allowed_rooms: Vec<String>,
    pub pvp_only: bool,
    pub ignore_senders: Vec<String>,

    pub start_image_delay: Duration,
    pub fanout_image_delay: Duration,

    pub template_dir: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        let iris_base_url = required("IRIS_BASE_URL")?;
        let iris_ws_url = required("IRIS_WS_URL")?;
        let bot_prefix = required("BOT_PREFIX")?;
        let redis_url = required("REDIS_URL")?;

        let mut allowed_rooms = csv_var("ALLOWED_ROOMS");
        if allowed_rooms.is_empty() {
            allowed_rooms = csv_var("CHESS_ALLOWED_ROOMS");
        }

        let mut ignore_senders = csv_var("CHESS_IGNORE_SENDERS");
        if ignore_senders.is_empty() {
            ignore_senders = csv_var("IGNORE_SENDERS");
        }
        if ignore_senders.is_empty() {
            // The gateway echoes its own messages back; never answer them.
            ignore_senders.push("Iris".to_string());
        }

        Ok(Config {
            iris_base_url,
            iris_ws_url,
            bot_prefix,
            redis_url,
            database_url: optional("DATABASE_URL"),
            allowed_rooms,
            pvp_only: bool_var("CHESS_PVP_ONLY"),
            ignore_senders,
            start_image_delay: millis_var("START_IMAGE_DELAY_MS", 150),
            fanout_image_delay: millis_var("FANOUT_IMAGE_DELAY_MS", 200),
            template_dir: optional("TEMPLATE_DIR"),
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::Missing(name))
}

fn optional(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn csv_var(name: &str) -> Vec<String> {
    optional(name)
        .map(|v| {
            v.split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn bool_var(name: &str) -> bool {
    optional(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn millis_var(name: &str, default_ms: u64) -> Duration {
    let ms = optional(name)
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default_ms);
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_parsing_trims_and_drops_empties() {
        env::set_var("TEST_CSV_ROOMS", " 100, ,200 ,");
        assert_eq!(csv_var("TEST_CSV_ROOMS"), vec!["100", "200"]);
        env::remove_var("TEST_CSV_ROOMS");
        assert!(csv_var("TEST_CSV_ROOMS").is_empty());
    }

    #[test]
    fn bool_parsing_accepts_common_truthy_tokens() {
        for v in ["1", "true", "TRUE", "yes", "on"] {
            env::set_var("TEST_BOOL_FLAG", v);
            assert!(bool_var("TEST_BOOL_FLAG"), "{} should be true", v);
        }
        env::set_var("TEST_BOOL_FLAG", "0");
        assert!(!bool_var("TEST_BOOL_FLAG"));
        env::remove_var("TEST_BOOL_FLAG");
    }

    #[test]
    fn delay_defaults_apply_when_unset() {
        env::remove_var("TEST_DELAY_MS");
        assert_eq!(millis_var("TEST_DELAY_MS", 150), Duration::from_millis(150));
        env::set_var("TEST_DELAY_MS", "25");
        assert_eq!(millis_var("TEST_DELAY_MS", 150), Duration::from_millis(25));
        env::remove_var("TEST_DELAY_MS");
    }
}
