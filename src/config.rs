//! Configuration file parsing for the bot.
//!
//! This module handles loading and parsing the `config.toml` file for the non-secret
//! settings: chain parameters, explorer and chat endpoints, conversation keywords and
//! the optional health server.
//!
//! Configuration is optional and every section falls back to defaults suitable for
//! Ethereum mainnet. Secrets never live here, see [`crate::from_env`].

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Complete bot configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BotConfig {
    pub chain: ChainConfig,
    pub explorer: ExplorerConfig,
    pub telegram: TelegramConfig,
    pub conversation: ConversationConfig,
    pub server: ServerConfig,
}

impl BotConfig {
    /// Load configuration from a TOML file.
    ///
    /// If the file doesn't exist, returns the default configuration.
    /// If the file exists but is malformed, returns an error.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        config::Config::builder()
            .add_source(config::File::from(path))
            .build()?
            .try_deserialize()
    }

    /// Load configuration from environment variable CONFIG_FILE or default path.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());
        Self::from_file(config_path)
    }
}

/// How the gas limit of each transfer is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GasLimitMode {
    /// Estimate against the pending state, then apply `gas_buffer`.
    Estimate,
    /// Always use `gas_limit_ceiling`.
    Fixed,
}

/// Chain and transaction settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChainConfig {
    /// EIP-155 chain id used when signing.
    pub chain_id: u64,
    /// Timeout for individual RPC requests in seconds.
    pub rpc_request_timeout_seconds: u64,
    /// HTTP connection establishment timeout in seconds.
    pub connection_timeout_seconds: u64,
    /// Wait for a receipt after relaying. When false, the hash is reported immediately.
    pub wait_for_receipt: bool,
    /// How long to wait for a receipt before reporting the bare hash.
    pub receipt_timeout_seconds: u64,
    /// Receipt polling interval in milliseconds.
    pub receipt_poll_interval_ms: u64,
    pub gas_limit_mode: GasLimitMode,
    /// Gas limit used in `fixed` mode.
    pub gas_limit_ceiling: u64,
    /// Multiplier applied to estimated gas (e.g., 1.2 = 20% buffer).
    pub gas_buffer: f64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            rpc_request_timeout_seconds: 30,
            connection_timeout_seconds: 10,
            wait_for_receipt: true,
            receipt_timeout_seconds: 120,
            receipt_poll_interval_ms: 2_000,
            gas_limit_mode: GasLimitMode::Estimate,
            gas_limit_ceiling: 150_000,
            gas_buffer: 1.2,
        }
    }
}

impl ChainConfig {
    /// Get the RPC request timeout duration.
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_request_timeout_seconds)
    }

    /// Get the total receipt timeout duration.
    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_seconds)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }
}

/// Block explorer settings, shared by the ABI lookup and the gas price oracle.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExplorerConfig {
    /// Etherscan-compatible API endpoint.
    pub api_url: String,
    pub request_timeout_seconds: u64,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.etherscan.io/v2/api".to_string(),
            request_timeout_seconds: 15,
        }
    }
}

impl ExplorerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// Telegram Bot API settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub api_url: String,
    /// Long-poll timeout passed to `getUpdates`.
    pub poll_timeout_seconds: u64,
    /// Pause after a failed poll before trying again.
    pub error_backoff_ms: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.telegram.org".to_string(),
            poll_timeout_seconds: 30,
            error_backoff_ms: 1_000,
        }
    }
}

/// Commands and keywords recognised in chat.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConversationConfig {
    pub start_command: String,
    pub reset_command: String,
    /// Compared case-insensitively.
    pub completion_keyword: String,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            start_command: "/start".to_string(),
            reset_command: "/reset".to_string(),
            completion_keyword: "done".to_string(),
        }
    }
}

/// Optional health endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}
