//! Secrets and endpoints read from the process environment.
//!
//! `.env` is loaded by `main` before anything here runs. Values are parsed into typed
//! form as early as possible so the raw private key string does not travel further
//! than [`Credentials::from_env`].

use alloy::network::EthereumWallet;
use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use std::fmt;
use std::str::FromStr;

pub const ENV_OWNER_PRIVATE_KEY: &str = "CONTRACT_OWNER_PRIVATE_KEY";
pub const ENV_TELEGRAM_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
pub const ENV_NODE_URL: &str = "ETHEREUM_NODE_URL";
pub const ENV_ETHERSCAN_API_KEY: &str = "ETHERSCAN_API_KEY";
pub const ENV_RECIPIENT: &str = "RECIPIENT";

#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    #[error("environment variable {0} is not set")]
    Missing(&'static str),
    #[error("environment variable {name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Everything the bot needs from the environment.
pub struct Credentials {
    /// Signs every transfer; its address is the transaction `from`.
    pub signer: PrivateKeySigner,
    pub recipient: Address,
    pub node_url: url::Url,
    pub telegram_token: String,
    pub explorer_api_key: String,
}

impl Credentials {
    pub fn from_env() -> Result<Self, EnvError> {
        let signer = parse_private_key(&required(ENV_OWNER_PRIVATE_KEY)?)?;
        let recipient =
            Address::from_str(required(ENV_RECIPIENT)?.trim()).map_err(|e| EnvError::Invalid {
                name: ENV_RECIPIENT,
                reason: e.to_string(),
            })?;
        let node_url =
            url::Url::parse(required(ENV_NODE_URL)?.trim()).map_err(|e| EnvError::Invalid {
                name: ENV_NODE_URL,
                reason: e.to_string(),
            })?;

        Ok(Self {
            signer,
            recipient,
            node_url,
            telegram_token: required(ENV_TELEGRAM_BOT_TOKEN)?,
            explorer_api_key: required(ENV_ETHERSCAN_API_KEY)?,
        })
    }

    pub fn wallet(&self) -> EthereumWallet {
        EthereumWallet::from(self.signer.clone())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("signer", &self.signer.address())
            .field("recipient", &self.recipient)
            .field("node_url", &self.node_url.host_str())
            .field("telegram_token", &"<redacted>")
            .field("explorer_api_key", &"<redacted>")
            .finish()
    }
}

fn required(name: &'static str) -> Result<String, EnvError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(EnvError::Missing(name)),
    }
}

/// Accepts the key with or without a `0x` prefix.
///
/// The parse error is replaced with a fixed message so no part of the key can leak
/// through error formatting.
fn parse_private_key(raw: &str) -> Result<PrivateKeySigner, EnvError> {
    let trimmed = raw.trim();
    let hex = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    PrivateKeySigner::from_str(hex).map_err(|_| EnvError::Invalid {
        name: ENV_OWNER_PRIVATE_KEY,
        reason: "not a 32-byte hex secp256k1 key".to_string(),
    })
}
