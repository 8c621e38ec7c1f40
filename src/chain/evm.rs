//! JSON-RPC node access over HTTP with alloy.
//!
//! [`AlloyNode`] implements [`NodeClient`] on a bare [`RootProvider`]: no fillers,
//! because nonce, gas and chain id are chosen explicitly by the transfer pipeline
//! and the transaction is signed locally before it reaches the node.
//!
//! RPC failures are turned into short, user-presentable reasons: decoded revert
//! strings, insufficient funds, nonce mismatches (kept verbatim so the expected
//! nonce can be parsed back out), connection errors. The node URL may embed an API
//! key, so it is scrubbed from every reason.

use alloy::network::{Ethereum, ReceiptResponse};
use alloy::primitives::{Address, Bytes, TxHash, hex};
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::client::RpcClient;
use alloy::rpc::types::{BlockId, TransactionRequest};
use alloy::sol_types::{Panic, Revert, SolError};
use async_trait::async_trait;
use std::time::Duration;

use crate::chain::{NodeClient, ReceiptSummary, TransferError};
use crate::config::ChainConfig;

/// HTTP JSON-RPC node.
#[derive(Debug, Clone)]
pub struct AlloyNode {
    provider: RootProvider<Ethereum>,
    /// Rendered node URL, scrubbed from error messages.
    node_url: String,
}

impl AlloyNode {
    /// Build the provider with explicit HTTP timeouts to prevent indefinite hangs.
    pub fn try_new(
        node_url: url::Url,
        config: &ChainConfig,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        tracing::debug!(
            rpc_timeout_secs = config.rpc_timeout().as_secs(),
            connection_timeout_secs = config.connection_timeout_seconds,
            "Configuring RPC client with timeout"
        );

        let http_client = alloy::transports::http::reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .timeout(config.rpc_timeout())
            .build()
            .map_err(|e| -> Box<dyn std::error::Error> {
                format!("failed to build HTTP client for node: {}", e.without_url()).into()
            })?;
        let rendered = node_url.as_str().to_string();
        let transport = alloy::transports::http::Http::with_client(http_client, node_url);
        let client = RpcClient::new(transport, false);
        let provider = RootProvider::<Ethereum>::new(client);

        Ok(Self {
            provider,
            node_url: rendered,
        })
    }

    /// Fail fast when the node serves a different chain than the one we sign for.
    pub async fn verify_chain_id(&self, expected: u64) -> Result<(), Box<dyn std::error::Error>> {
        let chain_id = self
            .provider
            .get_chain_id()
            .await
            .map_err(|e| -> Box<dyn std::error::Error> {
                self.describe(&e, "chain id lookup").into()
            })?;
        if chain_id != expected {
            tracing::error!(expected, got = chain_id, "RPC chainId mismatch");
            return Err(format!("node serves chain {chain_id}, configured chain is {expected}").into());
        }
        tracing::info!(chain_id, "RPC endpoint validated");
        Ok(())
    }

    fn describe<E>(&self, e: &E, context: &str) -> String
    where
        E: std::fmt::Debug + std::fmt::Display,
    {
        let reason = categorize_rpc_error(&format!("{e:?}"), &e.to_string(), context);
        reason.replace(&self.node_url, "<node>")
    }
}

#[async_trait]
impl NodeClient for AlloyNode {
    async fn pending_nonce(&self, address: Address) -> Result<u64, TransferError> {
        match self.provider.get_transaction_count(address).pending().await {
            Ok(pending_nonce) => Ok(pending_nonce),
            Err(e) => {
                tracing::warn!(
                    %address,
                    error = %self.describe(&e, "nonce lookup"),
                    "pending block tag not supported by RPC, falling back to latest"
                );
                let latest_nonce = self
                    .provider
                    .get_transaction_count(address)
                    .latest()
                    .await
                    .map_err(|e| TransferError::Submission(self.describe(&e, "nonce lookup")))?;
                tracing::warn!(
                    %address,
                    nonce = latest_nonce,
                    block_tag = "latest",
                    "nonce fetched from latest block - may miss in-flight transactions"
                );
                Ok(latest_nonce)
            }
        }
    }

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64, TransferError> {
        let gas_start = std::time::Instant::now();
        let estimated = self
            .provider
            .estimate_gas(tx.clone())
            .block(BlockId::pending())
            .await
            .map_err(|e| TransferError::Estimation(self.describe(&e, "gas estimation")))?;
        tracing::debug!(
            estimated,
            gas_estimate_ms = gas_start.elapsed().as_millis() as u64,
            "node gas estimate"
        );
        Ok(estimated)
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<TxHash, TransferError> {
        let send_start = std::time::Instant::now();
        let pending = self
            .provider
            .send_raw_transaction(&raw)
            .await
            .map_err(|e| TransferError::Submission(self.describe(&e, "relay")))?;
        let tx_hash = *pending.tx_hash();
        tracing::info!(
            %tx_hash,
            send_tx_ms = send_start.elapsed().as_millis() as u64,
            "Transaction submitted"
        );
        Ok(tx_hash)
    }

    async fn transaction_receipt(
        &self,
        tx_hash: TxHash,
    ) -> Result<Option<ReceiptSummary>, TransferError> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| TransferError::Submission(self.describe(&e, "receipt lookup")))?;
        Ok(receipt.map(|receipt| ReceiptSummary {
            tx_hash: receipt.transaction_hash,
            success: receipt.status(),
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
        }))
    }
}

/// The nonce a node says it wants, read from wording such as
/// `nonce too low: next nonce 1210, tx nonce 1209`.
pub fn next_nonce_hint(msg: &str) -> Option<u64> {
    let (_, rest) = msg.split_once("next nonce ")?;
    let digits = rest
        .find(|c: char| !c.is_ascii_digit())
        .map_or(rest, |end| &rest[..end]);
    digits.parse().ok()
}

/// Readable form of hex revert data.
///
/// `Error(string)` gives its message and `Panic(uint256)` its code. Custom errors
/// are named by selector only, since the contract ABI is not consulted here.
fn decode_revert_reason(data: &str) -> Option<String> {
    let bytes = hex::decode(data).ok()?;
    let selector = bytes.get(..4)?;

    if selector == Revert::SELECTOR {
        return Revert::abi_decode(&bytes).ok().map(|revert| revert.reason);
    }
    if selector == Panic::SELECTOR {
        let panic = Panic::abi_decode(&bytes).ok()?;
        return Some(match u64::try_from(panic.code) {
            Ok(code) => format!("Panic(0x{code:02x})"),
            Err(_) => format!("Panic({})", panic.code),
        });
    }
    Some(format!("UnknownError(0x{})", hex::encode(selector)))
}

/// Revert data carried in the debug rendering of an RPC error as
/// `data: Some(RawValue("0x…"))`. Quotes may be escaped.
fn revert_reason_from_debug(debug: &str) -> Option<String> {
    const MARKERS: [(&str, &str); 2] = [
        ("data: Some(RawValue(\"", "\""),
        (r#"data: Some(RawValue(\""#, r#"\""#),
    ];
    MARKERS.iter().find_map(|(open, close)| {
        let (_, rest) = debug.split_once(open)?;
        let (data, _) = rest.split_once(close)?;
        decode_revert_reason(data)
    })
}

/// Turn a transport/RPC error into a reason string for the chat user.
///
/// `debug` is the `{:?}` rendering (carries revert data), `display_str` the `{}` one.
fn categorize_rpc_error(debug: &str, display_str: &str, context: &str) -> String {
    if let Some(revert_reason) = revert_reason_from_debug(debug) {
        tracing::error!("{context}: contract reverted: {revert_reason}");
        return format!("execution reverted: {revert_reason}");
    }

    let lower = display_str.to_lowercase();
    if lower.contains("execution reverted") {
        tracing::error!("{context}: contract reverted: {display_str}");
        return display_str
            .find("execution reverted")
            .map(|i| display_str[i..].to_string())
            .unwrap_or_else(|| display_str.to_string());
    }
    if lower.contains("insufficient funds") {
        tracing::error!("{context}: insufficient funds: {display_str}");
        return "insufficient funds for gas * price + value".to_string();
    }
    if lower.contains("nonce too low") || lower.contains("nonce too high") {
        tracing::error!("{context}: nonce mismatch: {display_str}");
        // Keep the node's wording so `next nonce N` can be parsed back
        return display_str
            .find("nonce too")
            .map(|i| display_str[i..].to_string())
            .unwrap_or_else(|| display_str.to_string());
    }
    if lower.contains("replacement transaction underpriced") || lower.contains("already known") {
        tracing::warn!("{context}: duplicate transaction: {display_str}");
        return "a transaction with this nonce is already pending".to_string();
    }
    if debug.contains("Connection refused")
        || debug.contains("Connection reset")
        || debug.contains("No route to host")
        || debug.contains("timeout")
        || debug.contains("Timeout")
        || debug.contains("dns error")
    {
        tracing::error!("{context}: RPC connection error: {display_str}");
        return format!("{context}: connection error");
    }

    tracing::error!("{context}: RPC call failed: {display_str}");
    format!("{context}: {display_str}")
}
