//! Nonce allocation for one transfer batch.
//!
//! The signer's pending nonce is fetched on first use and then incremented locally,
//! so transactions in a batch get strictly increasing, non-colliding nonces without
//! a lookup per token. The cursor lives for exactly one batch; batches sharing the
//! signer are serialized by the caller, and the next batch fetches again.

use alloy::primitives::Address;

use crate::chain::{NodeClient, TransferError};

#[derive(Debug, Clone)]
pub struct NonceCursor {
    address: Address,
    /// Next nonce to hand out. `None` until fetched, or after [`NonceCursor::reset`].
    next: Option<u64>,
}

impl NonceCursor {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            next: None,
        }
    }

    /// Hand out the next nonce, querying the node if the cursor is empty.
    pub async fn allocate(&mut self, node: &dyn NodeClient) -> Result<u64, TransferError> {
        let nonce = match self.next {
            Some(next) => {
                tracing::debug!(address = %self.address, nonce = next, "allocating next nonce");
                next
            }
            None => {
                let fetched = node.pending_nonce(self.address).await?;
                tracing::info!(address = %self.address, nonce = fetched, "nonce fetched from node");
                fetched
            }
        };
        self.next = Some(nonce + 1);
        Ok(nonce)
    }

    /// Give back a nonce that never reached the network (signing failed).
    ///
    /// Only valid for the most recently allocated nonce.
    pub fn rewind(&mut self, nonce: u64) {
        if self.next == Some(nonce + 1) {
            self.next = Some(nonce);
            tracing::debug!(address = %self.address, nonce, "nonce returned to cursor");
        } else {
            self.reset();
        }
    }

    /// Forget the local value so the next allocation queries the node.
    ///
    /// Used after a relay failure, when it is unknown whether the transaction
    /// reached the mempool.
    pub fn reset(&mut self) {
        self.next = None;
        tracing::debug!(address = %self.address, "reset nonce cursor, will requery on next use");
    }

    /// Use the nonce the node reported as expected (e.g. "nonce too low: next nonce X").
    pub fn set_next(&mut self, nonce: u64) {
        self.next = Some(nonce);
        tracing::info!(address = %self.address, nonce, "nonce cursor set from RPC error");
    }
}
