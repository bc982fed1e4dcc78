use anyhow::{Context, Result};
use std::path::Path;
use std::str::FromStr;
use tracing::Level;

/// Environment variable overriding the `-v` verbosity, e.g. `PETLEDGER_LOG=debug`.
pub const LOG_ENV: &str = "PETLEDGER_LOG";

pub fn level_for(verbosity: u8, env_override: Option<&str>) -> Level {
    if let Some(level) = env_override.and_then(|raw| Level::from_str(raw.trim()).ok()) {
        return level;
    }
    match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Installs the fmt subscriber. Logs go to stderr, or to `log_file` when given,
/// so stdout stays clean JSON.
pub fn init(verbosity: u8, log_file: Option<&Path>) -> Result<()> {
    let level = level_for(verbosity, std::env::var(LOG_ENV).ok().as_deref());

    if let Some(path) = log_file {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create log file '{}'", path.display()))?;
        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}
