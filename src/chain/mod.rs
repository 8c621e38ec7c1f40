//! On-chain side of a transfer round.
//!
//! Each external collaborator sits behind a trait so the conversation can be driven
//! against fakes:
//! - [`abi::AbiResolver`] for contract interface lookup,
//! - [`gas::GasPriceOracle`] for the network gas price,
//! - [`NodeClient`] for the JSON-RPC node (nonce, estimation, relay, receipts).
//!
//! Signing happens locally with an alloy [`alloy::network::EthereumWallet`], see
//! [`submitter`].

use alloy::primitives::{Bytes, TxHash};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;

pub mod abi;
pub mod builder;
pub mod etherscan;
pub mod evm;
pub mod gas;
pub mod nonce;
pub mod submitter;

/// Failure taxonomy for everything between "contract address received" and
/// "transaction outcome known".
///
/// Messages are shown to the chat user verbatim, so variants carry a short
/// reason string and never credentials.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    /// ABI lookup failed (network, explorer status or parse).
    #[error("ABI resolution failed: {0}")]
    Resolution(String),
    /// Gas price or gas limit could not be obtained.
    #[error("gas estimation failed: {0}")]
    Estimation(String),
    /// The call could not be encoded against the resolved ABI.
    #[error("could not encode transfer: {0}")]
    Encoding(String),
    #[error("signing failed: {0}")]
    Signing(String),
    /// The node rejected the relay or the transaction reverted.
    #[error("submission failed: {0}")]
    Submission(String),
    #[error("{0}")]
    Validation(String),
}

/// The part of a receipt the bot reports back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptSummary {
    pub tx_hash: TxHash,
    pub success: bool,
    pub block_number: Option<u64>,
    pub gas_used: u64,
}

/// Blockchain RPC node operations used by the transfer pipeline.
///
/// Errors are already categorized into [`TransferError`] by the implementation.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Transaction count of `address` including mempool transactions.
    async fn pending_nonce(&self, address: alloy::primitives::Address) -> Result<u64, TransferError>;

    /// Gas needed to execute `tx` against the pending state.
    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64, TransferError>;

    /// Relay an EIP-2718 encoded signed transaction.
    async fn send_raw_transaction(&self, raw: Bytes) -> Result<TxHash, TransferError>;

    /// `None` while the transaction is not yet mined.
    async fn transaction_receipt(
        &self,
        tx_hash: TxHash,
    ) -> Result<Option<ReceiptSummary>, TransferError>;
}
