//! Local signing, relay and receipt resolution.
//!
//! Submission is split in two phases so callers can hold the signer's submission
//! lock only while nonces are in play:
//! 1. [`Submitter::sign`] + [`Submitter::relay`]: fast, nonce-ordered
//! 2. [`Submitter::await_receipt`]: slow, safe to run after the lock is released

use alloy::eips::eip2718::Encodable2718;
use alloy::network::{Ethereum, EthereumWallet, TransactionBuilder};
use alloy::primitives::{Bytes, TxHash};
use alloy::rpc::types::TransactionRequest;
use std::sync::Arc;
use std::time::Duration;

use crate::chain::{NodeClient, ReceiptSummary, TransferError};
use crate::config::ChainConfig;

/// EIP-2718 encoded signed transaction, ready to relay.
#[derive(Debug, Clone)]
pub struct SignedTransfer {
    pub tx_hash: TxHash,
    pub raw: Bytes,
}

/// What became of a relayed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptOutcome {
    Confirmed(ReceiptSummary),
    /// Mined with status 0.
    Reverted(ReceiptSummary),
    /// No receipt within the wait window, or waiting is disabled.
    Unconfirmed(TxHash),
}

#[derive(Clone)]
pub struct Submitter {
    node: Arc<dyn NodeClient>,
    wallet: EthereumWallet,
    wait_for_receipt: bool,
    receipt_timeout: Duration,
    poll_interval: Duration,
}

impl std::fmt::Debug for Submitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Submitter")
            .field("wait_for_receipt", &self.wait_for_receipt)
            .field("receipt_timeout", &self.receipt_timeout)
            .finish_non_exhaustive()
    }
}

impl Submitter {
    pub fn new(node: Arc<dyn NodeClient>, wallet: EthereumWallet, config: &ChainConfig) -> Self {
        Self {
            node,
            wallet,
            wait_for_receipt: config.wait_for_receipt,
            receipt_timeout: config.receipt_timeout(),
            poll_interval: config.receipt_poll_interval(),
        }
    }

    /// Sign `tx` with the owner key. The request must carry nonce, gas and price.
    pub async fn sign(&self, tx: TransactionRequest) -> Result<SignedTransfer, TransferError> {
        let envelope = <TransactionRequest as TransactionBuilder<Ethereum>>::build(tx, &self.wallet)
            .await
            .map_err(|e| TransferError::Signing(e.to_string()))?;
        let tx_hash = *envelope.tx_hash();
        Ok(SignedTransfer {
            tx_hash,
            raw: envelope.encoded_2718().into(),
        })
    }

    pub async fn relay(&self, signed: &SignedTransfer) -> Result<TxHash, TransferError> {
        let tx_hash = self.node.send_raw_transaction(signed.raw.clone()).await?;
        if tx_hash != signed.tx_hash {
            tracing::warn!(
                local = %signed.tx_hash,
                node = %tx_hash,
                "node returned a different transaction hash"
            );
        }
        Ok(tx_hash)
    }

    /// Poll for the receipt until it appears or the wait window closes.
    ///
    /// Lookup errors are logged and polling continues; the transaction is already
    /// in flight, so a flaky node must not turn it into a failure.
    pub async fn await_receipt(&self, tx_hash: TxHash) -> ReceiptOutcome {
        if !self.wait_for_receipt {
            return ReceiptOutcome::Unconfirmed(tx_hash);
        }

        let receipt_start = std::time::Instant::now();
        let poll = async {
            loop {
                match self.node.transaction_receipt(tx_hash).await {
                    Ok(Some(receipt)) => return receipt,
                    Ok(None) => {}
                    Err(e) => tracing::warn!(%tx_hash, error = %e, "receipt lookup failed"),
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        match tokio::time::timeout(self.receipt_timeout, poll).await {
            Ok(receipt) => {
                tracing::info!(
                    %tx_hash,
                    success = receipt.success,
                    block_number = ?receipt.block_number,
                    gas_used = receipt.gas_used,
                    wait_receipt_ms = receipt_start.elapsed().as_millis() as u64,
                    "Transaction mined"
                );
                if receipt.success {
                    ReceiptOutcome::Confirmed(receipt)
                } else {
                    ReceiptOutcome::Reverted(receipt)
                }
            }
            Err(_) => {
                tracing::warn!(
                    %tx_hash,
                    timeout_secs = self.receipt_timeout.as_secs(),
                    "receipt not seen before timeout"
                );
                ReceiptOutcome::Unconfirmed(tx_hash)
            }
        }
    }
}
