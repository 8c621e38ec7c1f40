//! One transfer round: every collected token id pulled to the recipient.
//!
//! The round runs in two phases:
//! 1. Under the signer's submission lock, each token is prepared, assigned the next
//!    nonce, signed and relayed, strictly in collection order.
//! 2. With the lock released, receipts of the relayed transactions are awaited.
//!
//! Every token id yields exactly one [`TransferOutcome`]; a failure is recorded on
//! that token and the round moves on.

use alloy::json_abi::JsonAbi;
use alloy::network::{Ethereum, EthereumWallet, NetworkWallet};
use alloy::primitives::{Address, TxHash};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::chain::builder::{GasQuote, TransferBuilder, TransferRequest};
use crate::chain::evm::next_nonce_hint;
use crate::chain::gas::GasPriceOracle;
use crate::chain::nonce::NonceCursor;
use crate::chain::submitter::{ReceiptOutcome, Submitter};
use crate::chain::{NodeClient, TransferError};
use crate::config::ChainConfig;

/// The batch a finished session hands to the pipeline.
#[derive(Debug, Clone)]
pub struct TransferJob {
    pub sender: String,
    pub contract: String,
    pub abi: Arc<JsonAbi>,
    pub token_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeStatus {
    /// Mined successfully.
    Confirmed { tx_hash: TxHash, block_number: Option<u64> },
    /// Relayed, but no receipt was observed.
    Submitted { tx_hash: TxHash },
    Failed { reason: String },
}

/// Result for a single token id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub token_id: String,
    pub status: OutcomeStatus,
    /// Present once the transaction was priced.
    pub gas: Option<GasQuote>,
    /// Present once a nonce was allocated.
    pub nonce: Option<u64>,
}

impl TransferOutcome {
    fn failed(token_id: &str, error: &TransferError, gas: Option<GasQuote>, nonce: Option<u64>) -> Self {
        Self {
            token_id: token_id.to_string(),
            status: OutcomeStatus::Failed {
                reason: error.to_string(),
            },
            gas,
            nonce,
        }
    }

    pub fn success(&self) -> bool {
        !matches!(self.status, OutcomeStatus::Failed { .. })
    }

    pub fn tx_hash(&self) -> Option<TxHash> {
        match &self.status {
            OutcomeStatus::Confirmed { tx_hash, .. } | OutcomeStatus::Submitted { tx_hash } => {
                Some(*tx_hash)
            }
            OutcomeStatus::Failed { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.status {
            OutcomeStatus::Failed { reason } => Some(reason),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.status {
            OutcomeStatus::Confirmed {
                tx_hash,
                block_number,
            } => {
                write!(f, "Token {}: transferred. Tx hash: {tx_hash}", self.token_id)?;
                if let Some(block) = block_number {
                    write!(f, " (block {block})")?;
                }
            }
            OutcomeStatus::Submitted { tx_hash } => write!(
                f,
                "Token {}: submitted, not yet confirmed. Tx hash: {tx_hash}",
                self.token_id
            )?,
            OutcomeStatus::Failed { reason } => {
                write!(f, "Token {}: failed: {reason}", self.token_id)?
            }
        }
        if let Some(gas) = &self.gas {
            write!(
                f,
                " [gas limit {} ({}), gas price {} wei",
                gas.limit, gas.source, gas.price
            )?;
            if let Some(nonce) = self.nonce {
                write!(f, ", nonce {nonce}")?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

/// Builds, signs and relays transfers for the single configured signer.
pub struct TransferPipeline {
    node: Arc<dyn NodeClient>,
    builder: TransferBuilder,
    submitter: Submitter,
    signer: Address,
    recipient: Address,
    /// Serializes nonce allocation and relay across concurrent rounds.
    submission_lock: Mutex<()>,
}

impl TransferPipeline {
    pub fn new(
        node: Arc<dyn NodeClient>,
        oracle: Arc<dyn GasPriceOracle>,
        wallet: EthereumWallet,
        recipient: Address,
        chain: ChainConfig,
    ) -> Self {
        let signer = <EthereumWallet as NetworkWallet<Ethereum>>::default_signer_address(&wallet);
        let builder = TransferBuilder::new(node.clone(), oracle, signer, chain.clone());
        let submitter = Submitter::new(node.clone(), wallet, &chain);
        Self {
            node,
            builder,
            submitter,
            signer,
            recipient,
            submission_lock: Mutex::new(()),
        }
    }

    pub fn signer(&self) -> Address {
        self.signer
    }

    pub fn recipient(&self) -> Address {
        self.recipient
    }

    /// Run the whole round. Returns one outcome per token id, in order.
    #[tracing::instrument(skip_all, fields(contract = %job.contract, tokens = job.token_ids.len()))]
    pub async fn run(&self, job: &TransferJob) -> Vec<TransferOutcome> {
        let mut outcomes = Vec::with_capacity(job.token_ids.len());
        {
            let _guard = self.submission_lock.lock().await;
            let mut cursor = NonceCursor::new(self.signer);
            for token_id in &job.token_ids {
                outcomes.push(self.submit_one(&mut cursor, job, token_id).await);
            }
        }

        for outcome in outcomes.iter_mut() {
            if let OutcomeStatus::Submitted { tx_hash } = outcome.status {
                outcome.status = match self.submitter.await_receipt(tx_hash).await {
                    ReceiptOutcome::Confirmed(receipt) => OutcomeStatus::Confirmed {
                        tx_hash: receipt.tx_hash,
                        block_number: receipt.block_number,
                    },
                    ReceiptOutcome::Reverted(receipt) => OutcomeStatus::Failed {
                        reason: TransferError::Submission(format!(
                            "transaction {} reverted",
                            receipt.tx_hash
                        ))
                        .to_string(),
                    },
                    ReceiptOutcome::Unconfirmed(tx_hash) => OutcomeStatus::Submitted { tx_hash },
                };
            }
        }

        for outcome in &outcomes {
            tracing::debug!(
                token_id = %outcome.token_id,
                tx_hash = ?outcome.tx_hash(),
                error = outcome.error_message(),
                "token outcome"
            );
        }
        let succeeded = outcomes.iter().filter(|o| o.success()).count();
        tracing::info!(
            succeeded,
            failed = outcomes.len() - succeeded,
            "transfer round finished"
        );
        outcomes
    }

    /// Phase one for a single token. Never fails the round.
    async fn submit_one(
        &self,
        cursor: &mut NonceCursor,
        job: &TransferJob,
        token_id: &str,
    ) -> TransferOutcome {
        let request = TransferRequest {
            sender: job.sender.clone(),
            contract: job.contract.clone(),
            recipient: self.recipient,
            token_id: token_id.to_string(),
            abi: job.abi.clone(),
        };

        let prepared = match self.builder.prepare(&request).await {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::warn!(token_id, error = %e, "transfer not prepared");
                return TransferOutcome::failed(token_id, &e, None, None);
            }
        };
        let gas = Some(prepared.gas);

        let nonce = match cursor.allocate(self.node.as_ref()).await {
            Ok(nonce) => nonce,
            Err(e) => {
                tracing::warn!(token_id, error = %e, "nonce lookup failed");
                return TransferOutcome::failed(token_id, &e, gas, None);
            }
        };

        let signed = match self.submitter.sign(prepared.with_nonce(nonce)).await {
            Ok(signed) => signed,
            Err(e) => {
                tracing::error!(token_id, nonce, error = %e, "signing failed");
                cursor.rewind(nonce);
                return TransferOutcome::failed(token_id, &e, gas, Some(nonce));
            }
        };

        match self.submitter.relay(&signed).await {
            Ok(tx_hash) => {
                tracing::info!(token_id, nonce, %tx_hash, "transfer relayed");
                TransferOutcome {
                    token_id: token_id.to_string(),
                    status: OutcomeStatus::Submitted { tx_hash },
                    gas,
                    nonce: Some(nonce),
                }
            }
            Err(e) => {
                tracing::warn!(token_id, nonce, error = %e, "relay failed");
                match next_nonce_hint(&e.to_string()) {
                    Some(expected) => cursor.set_next(expected),
                    None => cursor.reset(),
                }
                TransferOutcome::failed(token_id, &e, gas, Some(nonce))
            }
        }
    }
}
