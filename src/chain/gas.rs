//! Gas price and gas limit selection.
//!
//! The price always comes from an external oracle; the bot never derives it from
//! recent blocks. The limit is either estimated against the pending call or taken
//! from the configured ceiling.

use alloy::primitives::utils::parse_units;
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;

use crate::chain::etherscan::EtherscanClient;
use crate::chain::{NodeClient, TransferError};
use crate::config::{ChainConfig, GasLimitMode};

/// Source of the current price per unit of gas.
#[async_trait]
pub trait GasPriceOracle: Send + Sync {
    /// Price per gas unit in wei.
    async fn gas_price(&self) -> Result<u128, TransferError>;
}

/// Etherscan gas tracker, `ProposeGasPrice` in gwei.
#[derive(Debug, Clone)]
pub struct EtherscanGasOracle {
    client: EtherscanClient,
}

impl EtherscanGasOracle {
    pub fn new(client: EtherscanClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GasPriceOracle for EtherscanGasOracle {
    async fn gas_price(&self) -> Result<u128, TransferError> {
        let result = self
            .client
            .query(&[("module", "gastracker"), ("action", "gasoracle")])
            .await
            .map_err(TransferError::Estimation)?;
        let price = parse_gas_oracle_result(&result)?;
        tracing::debug!(gas_price_wei = price, "gas price fetched");
        Ok(price)
    }
}

/// Extract `ProposeGasPrice` from a gas oracle `result` object and convert it to wei.
pub fn parse_gas_oracle_result(result: &serde_json::Value) -> Result<u128, TransferError> {
    let proposed = result
        .get("ProposeGasPrice")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            TransferError::Estimation("gas oracle response has no ProposeGasPrice".to_string())
        })?;
    gwei_to_wei(proposed)
}

/// Convert a decimal gwei amount such as `"12.5"` to wei.
pub fn gwei_to_wei(gwei: &str) -> Result<u128, TransferError> {
    let gwei = gwei.trim();
    if gwei.starts_with('-') {
        return Err(TransferError::Estimation(format!(
            "negative gas price {gwei} gwei"
        )));
    }
    let parsed = parse_units(gwei, "gwei")
        .map_err(|e| TransferError::Estimation(format!("invalid gas price {gwei:?}: {e}")))?;
    let wei = u128::try_from(parsed.get_absolute())
        .map_err(|_| TransferError::Estimation(format!("gas price {gwei} gwei out of range")))?;
    if wei == 0 {
        return Err(TransferError::Estimation("gas oracle returned zero".to_string()));
    }
    Ok(wei)
}

/// Where a transfer's gas limit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasLimitSource {
    Estimated,
    Ceiling,
}

impl std::fmt::Display for GasLimitSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GasLimitSource::Estimated => write!(f, "estimated"),
            GasLimitSource::Ceiling => write!(f, "ceiling"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasLimit {
    pub value: u64,
    pub source: GasLimitSource,
}

/// Choose the gas limit for `tx` according to the configured mode.
pub async fn select_gas_limit(
    node: &dyn NodeClient,
    tx: &TransactionRequest,
    config: &ChainConfig,
) -> Result<GasLimit, TransferError> {
    match config.gas_limit_mode {
        GasLimitMode::Fixed => Ok(GasLimit {
            value: config.gas_limit_ceiling,
            source: GasLimitSource::Ceiling,
        }),
        GasLimitMode::Estimate => {
            let estimated = node.estimate_gas(tx).await?;
            let gas_buffer = if config.gas_buffer > 1.0 {
                config.gas_buffer
            } else {
                1.0
            };
            let buffered_gas = (estimated as f64 * gas_buffer) as u64;
            tracing::info!(estimated, gas_buffer, buffered_gas, "gas estimation completed");
            Ok(GasLimit {
                value: buffered_gas,
                source: GasLimitSource::Estimated,
            })
        }
    }
}
