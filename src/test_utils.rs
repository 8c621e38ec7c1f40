//! Hand-written fakes for the external collaborators.

use alloy::consensus::TxEnvelope;
use alloy::eips::eip2718::Decodable2718;
use alloy::json_abi::JsonAbi;
use alloy::primitives::{Address, Bytes, TxHash, keccak256};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::chain::abi::AbiResolver;
use crate::chain::gas::GasPriceOracle;
use crate::chain::{NodeClient, ReceiptSummary, TransferError};
use crate::chat::{ChatError, ChatId, ChatTransport, InboundMessage, MessageHandler};
use crate::session::{SessionState, SessionStore};

/// Verified-ABI payload with a single ERC-721 `transferFrom`.
pub const ERC721_TRANSFER_FROM_ABI: &str = r#"[{"type":"function","name":"transferFrom","stateMutability":"nonpayable","inputs":[{"name":"from","type":"address","internalType":"address"},{"name":"to","type":"address","internalType":"address"},{"name":"tokenId","type":"uint256","internalType":"uint256"}],"outputs":[]}]"#;

alloy::sol! {
    interface IERC721 {
        function transferFrom(address from, address to, uint256 tokenId) external;
    }
}

pub fn erc721_abi() -> Arc<JsonAbi> {
    Arc::new(serde_json::from_str(ERC721_TRANSFER_FROM_ABI).expect("valid test ABI"))
}

pub fn decode_relayed(raw: &Bytes) -> TxEnvelope {
    TxEnvelope::decode_2718(&mut raw.as_ref()).expect("relayed bytes decode")
}

// ============================================================================
// Node
// ============================================================================

/// In-memory node. The pending nonce is `start_nonce` plus accepted relays.
///
/// Relay call numbers are 1-based.
pub struct FakeNode {
    start_nonce: u64,
    estimate: Result<u64, TransferError>,
    nonce_failure: bool,
    relay_failures: HashMap<usize, TransferError>,
    reverted: HashSet<usize>,
    pending_receipts: bool,
    nonce_lookups: AtomicUsize,
    estimate_calls: AtomicUsize,
    receipt_lookups: AtomicUsize,
    relay_attempts: AtomicUsize,
    /// (raw, hash, relay call number)
    accepted: Mutex<Vec<(Bytes, TxHash, usize)>>,
}

impl FakeNode {
    pub fn new(start_nonce: u64) -> Self {
        Self {
            start_nonce,
            estimate: Ok(60_000),
            nonce_failure: false,
            relay_failures: HashMap::new(),
            reverted: HashSet::new(),
            pending_receipts: false,
            nonce_lookups: AtomicUsize::new(0),
            estimate_calls: AtomicUsize::new(0),
            receipt_lookups: AtomicUsize::new(0),
            relay_attempts: AtomicUsize::new(0),
            accepted: Mutex::new(Vec::new()),
        }
    }

    pub fn with_estimate(mut self, estimate: Result<u64, TransferError>) -> Self {
        self.estimate = estimate;
        self
    }

    pub fn with_nonce_failure(mut self) -> Self {
        self.nonce_failure = true;
        self
    }

    pub fn with_relay_failure(mut self, call: usize, error: TransferError) -> Self {
        self.relay_failures.insert(call, error);
        self
    }

    pub fn with_reverted_receipt(mut self, call: usize) -> Self {
        self.reverted.insert(call);
        self
    }

    /// Receipts never appear.
    pub fn with_pending_receipts(mut self) -> Self {
        self.pending_receipts = true;
        self
    }

    pub fn nonce_lookups(&self) -> usize {
        self.nonce_lookups.load(Ordering::SeqCst)
    }

    pub fn estimate_calls(&self) -> usize {
        self.estimate_calls.load(Ordering::SeqCst)
    }

    pub fn receipt_lookups(&self) -> usize {
        self.receipt_lookups.load(Ordering::SeqCst)
    }

    /// Raw bytes of accepted relays, in order.
    pub fn relayed(&self) -> Vec<Bytes> {
        self.accepted
            .lock()
            .unwrap()
            .iter()
            .map(|(raw, _, _)| raw.clone())
            .collect()
    }
}

#[async_trait]
impl NodeClient for FakeNode {
    async fn pending_nonce(&self, _address: Address) -> Result<u64, TransferError> {
        self.nonce_lookups.fetch_add(1, Ordering::SeqCst);
        if self.nonce_failure {
            return Err(TransferError::Submission(
                "nonce lookup: connection error".to_string(),
            ));
        }
        Ok(self.start_nonce + self.accepted.lock().unwrap().len() as u64)
    }

    async fn estimate_gas(&self, _tx: &TransactionRequest) -> Result<u64, TransferError> {
        self.estimate_calls.fetch_add(1, Ordering::SeqCst);
        self.estimate.clone()
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<TxHash, TransferError> {
        let call = self.relay_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(error) = self.relay_failures.get(&call) {
            return Err(error.clone());
        }
        let tx_hash = keccak256(&raw);
        self.accepted.lock().unwrap().push((raw, tx_hash, call));
        Ok(tx_hash)
    }

    async fn transaction_receipt(
        &self,
        tx_hash: TxHash,
    ) -> Result<Option<ReceiptSummary>, TransferError> {
        self.receipt_lookups.fetch_add(1, Ordering::SeqCst);
        if self.pending_receipts {
            return Ok(None);
        }
        let accepted = self.accepted.lock().unwrap();
        Ok(accepted
            .iter()
            .enumerate()
            .find(|(_, (_, hash, _))| *hash == tx_hash)
            .map(|(position, (_, hash, call))| ReceiptSummary {
                tx_hash: *hash,
                success: !self.reverted.contains(call),
                block_number: Some(100 + position as u64),
                gas_used: 52_000,
            }))
    }
}

// ============================================================================
// Gas oracle
// ============================================================================

/// Fixed-price oracle. Failing call numbers are 1-based.
pub struct FakeOracle {
    price: u128,
    delay: Duration,
    fail_on: HashSet<usize>,
    calls: AtomicUsize,
    observer: Option<(SessionStore, ChatId)>,
    observed: Mutex<Vec<SessionState>>,
}

impl FakeOracle {
    pub fn new(price: u128) -> Self {
        Self {
            price,
            delay: Duration::ZERO,
            fail_on: HashSet::new(),
            calls: AtomicUsize::new(0),
            observer: None,
            observed: Mutex::new(Vec::new()),
        }
    }

    /// Sleep before answering, so concurrent rounds interleave.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_on(mut self, calls: &[usize]) -> Self {
        self.fail_on.extend(calls.iter().copied());
        self
    }

    /// Record the state of `chat`'s session on every call.
    pub fn observing(mut self, store: SessionStore, chat: ChatId) -> Self {
        self.observer = Some((store, chat));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn observed(&self) -> Vec<SessionState> {
        self.observed.lock().unwrap().clone()
    }
}

#[async_trait]
impl GasPriceOracle for FakeOracle {
    async fn gas_price(&self) -> Result<u128, TransferError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some((store, chat)) = &self.observer {
            self.observed.lock().unwrap().push(store.state_of(*chat));
        }
        if self.fail_on.contains(&call) {
            return Err(TransferError::Estimation(
                "Max rate limit reached (no details)".to_string(),
            ));
        }
        Ok(self.price)
    }
}

// ============================================================================
// ABI resolver
// ============================================================================

/// Resolves every address to the ERC-721 ABI after `failures` failed lookups.
#[derive(Default)]
pub struct FakeResolver {
    failures: AtomicUsize,
    lookups: Mutex<Vec<String>>,
}

impl FakeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            lookups: Mutex::new(Vec::new()),
        }
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }
}

#[async_trait]
impl AbiResolver for FakeResolver {
    async fn resolve(&self, contract: &str) -> Result<Arc<JsonAbi>, TransferError> {
        self.lookups.lock().unwrap().push(contract.to_string());
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(TransferError::Resolution("ABI is empty".to_string()));
        }
        Ok(erc721_abi())
    }
}

// ============================================================================
// Chat
// ============================================================================

enum PollStep {
    Messages(Vec<InboundMessage>),
    Error,
}

/// Scripted inbound batches; records every reply.
#[derive(Default)]
pub struct RecordingTransport {
    inbound: Mutex<VecDeque<PollStep>>,
    sent: Mutex<Vec<(ChatId, String)>>,
    fail_sends: bool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_sends() -> Self {
        Self {
            fail_sends: true,
            ..Self::default()
        }
    }

    pub fn push_inbound(&self, messages: Vec<InboundMessage>) {
        self.inbound
            .lock()
            .unwrap()
            .push_back(PollStep::Messages(messages));
    }

    pub fn push_poll_error(&self) {
        self.inbound.lock().unwrap().push_back(PollStep::Error);
    }

    pub fn sent_to(&self, chat: ChatId) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| *c == chat)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn poll(&self) -> Result<Vec<InboundMessage>, ChatError> {
        let step = self.inbound.lock().unwrap().pop_front();
        match step {
            Some(PollStep::Messages(messages)) => Ok(messages),
            Some(PollStep::Error) => Err(ChatError::Http("connection reset".to_string())),
            None => {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(Vec::new())
            }
        }
    }

    async fn send(&self, chat: ChatId, text: &str) -> Result<(), ChatError> {
        self.sent.lock().unwrap().push((chat, text.to_string()));
        if self.fail_sends {
            return Err(ChatError::Api("Forbidden: bot was blocked by the user".to_string()));
        }
        Ok(())
    }
}

/// Records handled messages and the peak per-chat concurrency.
#[derive(Default)]
pub struct RecordingHandler {
    delay: Duration,
    handled: Mutex<Vec<InboundMessage>>,
    in_flight: Mutex<HashMap<ChatId, (usize, usize)>>,
}

impl RecordingHandler {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn handled(&self) -> Vec<InboundMessage> {
        self.handled.lock().unwrap().clone()
    }

    pub fn texts_for(&self, chat: ChatId) -> Vec<String> {
        self.handled()
            .into_iter()
            .filter(|m| m.chat == chat)
            .map(|m| m.text)
            .collect()
    }

    pub fn max_in_flight(&self, chat: ChatId) -> usize {
        self.in_flight
            .lock()
            .unwrap()
            .get(&chat)
            .map(|(_, max)| *max)
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(&self, message: InboundMessage) {
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            let entry = in_flight.entry(message.chat).or_insert((0, 0));
            entry.0 += 1;
            entry.1 = entry.1.max(entry.0);
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            if let Some(entry) = in_flight.get_mut(&message.chat) {
                entry.0 -= 1;
            }
        }
        self.handled.lock().unwrap().push(message);
    }
}
