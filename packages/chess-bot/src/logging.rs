use std::fs::OpenOptions;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber from environment variables:
/// `LOG_LEVEL` (EnvFilter syntax), `LOG_FORMAT` ∈ {legacy, console, json},
/// `LOG_FILE`, `LOG_TO_CONSOLE`, `LOG_TO_FILE`.
pub fn init_from_env() -> Result<(), String> {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let format = std::env::var("LOG_FORMAT").unwrap_or_default();
    let to_file = flag("LOG_TO_FILE");
    let to_console = !to_file || flag("LOG_TO_CONSOLE");

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if to_file || std::env::var("LOG_FILE").is_ok() {
        let path = std::env::var("LOG_FILE").unwrap_or_else(|_| "chess-bot.log".to_string());
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| format!("open log file {}: {}", path, e))?;
        if !to_console {
            let builder = builder.with_writer(Arc::new(file)).with_ansi(false);
            if format.trim() == "json" {
                builder.json().try_init().map_err(|e| e.to_string())?;
            } else {
                builder.try_init().map_err(|e| e.to_string())?;
            }
            return Ok(());
        }
    }

    if format.trim() == "json" {
        builder.json().try_init().map_err(|e| e.to_string())?;
    } else {
        builder.try_init().map_err(|e| e.to_string())?;
    }
    Ok(())
}

fn flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}
