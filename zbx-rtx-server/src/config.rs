//! Environment-variable configuration per spec §6, with a small `clap`
//! derive for the handful of flags worth overriding from the command line.
//!
//! Grounded on the teacher's `main.rs` `Args` struct (`#[derive(Parser)]`
//! with `env = "..."` attributes so CLI flags and env vars both work) and
//! `ConfigLoader::load`'s best-effort `dotenvy::dotenv()` call.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "zbx-rtx-server")]
#[command(about = "Tails a Zabbix real-time NDJSON export directory and fans it out over SSE")]
pub struct Args {
    /// HTTP listen port (overrides PORT).
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Directory to tail (overrides ZBX_RTX_DIR).
    #[arg(long, env = "ZBX_RTX_DIR")]
    pub dir: Option<PathBuf>,
}

/// Fully resolved configuration, after merging CLI flags, environment
/// variables, and the defaults from spec §6.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub dir: PathBuf,
    pub rb_capacity: usize,
    pub heartbeat_ms: u64,
    pub poll_interval_ms: u64,
    pub max_backoff_ms: u64,
    pub sse_drop_threshold: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("environment variable {name} must be a positive integer, got {value:?}")]
    InvalidInteger { name: &'static str, value: String },
}

impl Settings {
    /// Loads a `.env` file if present (missing file is not an error, any
    /// other failure is), then resolves every setting from, in priority
    /// order: CLI flag, environment variable, spec-pinned default.
    pub fn load(args: Args) -> Result<Self, ConfigError> {
        if let Err(err) = dotenvy::dotenv() {
            if !matches!(err, dotenvy::Error::Io(_)) {
                tracing::warn!(error = %err, ".env file present but unreadable");
            }
        }

        let port = args
            .port
            .map(Ok)
            .unwrap_or_else(|| env_or("PORT", 3000))?;
        let dir = args
            .dir
            .unwrap_or_else(|| env_path_or("ZBX_RTX_DIR", "./zbx-rtx"));
        let rb_capacity = env_or("RB_CAPACITY", 50_000)?;
        let heartbeat_ms = env_or("HEARTBEAT_MS", 20_000)?;
        let poll_interval_ms = env_or("POLL_INTERVAL_MS", 250)?;
        let max_backoff_ms = env_or("MAX_BACKOFF_MS", 2_000)?;
        let sse_drop_threshold = env_or("SSE_DROP_THRESHOLD", 65_536)?;

        Ok(Self {
            port,
            dir,
            rb_capacity,
            heartbeat_ms,
            poll_interval_ms,
            max_backoff_ms,
            sse_drop_threshold,
        })
    }
}

fn env_or<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidInteger { name, value }),
        Err(_) => Ok(default),
    }
}

fn env_path_or(name: &'static str, default: &str) -> PathBuf {
    std::env::var(name)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}
