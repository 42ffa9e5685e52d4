//! Configuration system for the `ScreenLink` relay server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/screenlink-relay/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur when loading relay configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A value was out of range.
    #[error("invalid setting {key}: {reason}")]
    Invalid {
        /// Offending key.
        key: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure for the relay.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RelayConfigFile {
    server: ServerFileConfig,
    liveness: LivenessFileConfig,
}

/// `[server]` section of the relay config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    max_message_size: Option<usize>,
    outbound_queue_size: Option<usize>,
}

/// `[liveness]` section of the relay config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct LivenessFileConfig {
    heartbeat_interval_secs: Option<u64>,
    reap_interval_secs: Option<u64>,
    stale_after_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the relay server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "ScreenLink signaling relay")]
pub struct RelayCliArgs {
    /// Address to bind the relay server to.
    #[arg(short, long, env = "RELAY_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/screenlink-relay/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum inbound WebSocket message size in bytes.
    #[arg(long)]
    pub max_message_size: Option<usize>,

    /// Capacity of each connection's outbound queue.
    #[arg(long)]
    pub outbound_queue_size: Option<usize>,

    /// Seconds between heartbeat probes.
    #[arg(long)]
    pub heartbeat_interval_secs: Option<u64>,

    /// Seconds between stale-entry sweeps.
    #[arg(long)]
    pub reap_interval_secs: Option<u64>,

    /// Seconds without a probe response before a peer is evicted.
    #[arg(long)]
    pub stale_after_secs: Option<u64>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "RELAY_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:9000`).
    pub bind_addr: String,
    /// Maximum inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Capacity of each connection's outbound queue.
    pub outbound_queue_size: usize,
    /// Period of the heartbeat sweep.
    pub heartbeat_interval: Duration,
    /// Period of the stale-entry sweep.
    pub reap_interval: Duration,
    /// Age past which a registry entry is evicted.
    pub stale_after: Duration,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9000".to_string(),
            max_message_size: 64 * 1024,
            outbound_queue_size: 256,
            heartbeat_interval: Duration::from_secs(30),
            reap_interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(300),
            log_level: "info".to_string(),
        }
    }
}

impl RelayConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and missing file
    /// is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed, or if a resolved value is zero where it must be positive or the
    /// stale-entry age does not exceed the heartbeat interval.
    pub fn load(cli: &RelayCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file).validate()
    }

    /// Resolve a `RelayConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &RelayCliArgs, file: &RelayConfigFile) -> Self {
        let defaults = Self::default();
        let secs = |cli: Option<u64>, file: Option<u64>, default: Duration| {
            cli.or(file).map_or(default, Duration::from_secs)
        };

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            max_message_size: cli
                .max_message_size
                .or(file.server.max_message_size)
                .unwrap_or(defaults.max_message_size),
            outbound_queue_size: cli
                .outbound_queue_size
                .or(file.server.outbound_queue_size)
                .unwrap_or(defaults.outbound_queue_size),
            heartbeat_interval: secs(
                cli.heartbeat_interval_secs,
                file.liveness.heartbeat_interval_secs,
                defaults.heartbeat_interval,
            ),
            reap_interval: secs(
                cli.reap_interval_secs,
                file.liveness.reap_interval_secs,
                defaults.reap_interval,
            ),
            stale_after: secs(
                cli.stale_after_secs,
                file.liveness.stale_after_secs,
                defaults.stale_after,
            ),
            log_level: cli.log_level.clone(),
        }
    }

    /// Rejects settings that would stall the relay.
    fn validate(self) -> Result<Self, ConfigError> {
        if self.outbound_queue_size == 0 {
            return Err(ConfigError::Invalid {
                key: "outbound_queue_size",
                reason: "must be at least 1",
            });
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "heartbeat_interval_secs",
                reason: "must be at least 1",
            });
        }
        if self.reap_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "reap_interval_secs",
                reason: "must be at least 1",
            });
        }
        if self.stale_after.is_zero() {
            return Err(ConfigError::Invalid {
                key: "stale_after_secs",
                reason: "must be at least 1",
            });
        }
        // Live peers refresh last-seen once per heartbeat.
        if self.stale_after <= self.heartbeat_interval {
            return Err(ConfigError::Invalid {
                key: "stale_after_secs",
                reason: "must be longer than heartbeat_interval_secs",
            });
        }
        Ok(self)
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file for the relay.
fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<RelayConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(RelayConfigFile::default());
        };
        config_dir.join("screenlink-relay").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RelayConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
