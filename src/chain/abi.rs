//! Contract ABI lookup.

use alloy::json_abi::JsonAbi;
use async_trait::async_trait;
use std::sync::Arc;

use crate::chain::TransferError;
use crate::chain::etherscan::EtherscanClient;

/// Resolves a contract address to its interface description.
///
/// Implementations must not retry: the conversation re-prompts instead.
#[async_trait]
pub trait AbiResolver: Send + Sync {
    async fn resolve(&self, contract: &str) -> Result<Arc<JsonAbi>, TransferError>;
}

/// Fetches verified ABIs from an Etherscan-compatible explorer.
#[derive(Debug, Clone)]
pub struct EtherscanAbiResolver {
    client: EtherscanClient,
}

impl EtherscanAbiResolver {
    pub fn new(client: EtherscanClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AbiResolver for EtherscanAbiResolver {
    #[tracing::instrument(skip(self))]
    async fn resolve(&self, contract: &str) -> Result<Arc<JsonAbi>, TransferError> {
        let result = self
            .client
            .query(&[
                ("module", "contract"),
                ("action", "getabi"),
                ("address", contract.trim()),
            ])
            .await
            .map_err(TransferError::Resolution);

        let abi = result.and_then(|value| parse_abi_result(&value));
        match &abi {
            Ok(abi) => tracing::info!(functions = abi.functions().count(), "ABI resolved"),
            Err(e) => tracing::warn!(error = %e, "ABI lookup failed"),
        }
        abi.map(Arc::new)
    }
}

/// Parse the explorer's `result` field, a JSON document encoded as a string.
///
/// An ABI with no functions cannot encode a transfer and counts as a failed lookup.
pub fn parse_abi_result(result: &serde_json::Value) -> Result<JsonAbi, TransferError> {
    let raw = result
        .as_str()
        .ok_or_else(|| TransferError::Resolution("ABI result is not a string".to_string()))?;
    let abi: JsonAbi = serde_json::from_str(raw)
        .map_err(|e| TransferError::Resolution(format!("ABI is not valid JSON: {e}")))?;
    if abi.functions().next().is_none() {
        return Err(TransferError::Resolution("ABI is empty".to_string()));
    }
    Ok(abi)
}
