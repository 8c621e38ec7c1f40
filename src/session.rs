//! Per-chat session data and the map that owns it.

use alloy::json_abi::JsonAbi;
use dashmap::DashMap;
use std::sync::Arc;

use crate::chain::TransferError;
use crate::chat::ChatId;
use crate::transfer::TransferJob;

/// Position of a chat in the collect-then-transfer cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session exists.
    Idle,
    AwaitingSender,
    AwaitingContract,
    AwaitingTokenIds,
    Transferring,
    /// Outcomes reported; the session is about to be released.
    Done,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::AwaitingSender => "awaiting_sender",
            SessionState::AwaitingContract => "awaiting_contract",
            SessionState::AwaitingTokenIds => "awaiting_token_ids",
            SessionState::Transferring => "transferring",
            SessionState::Done => "done",
        };
        f.write_str(name)
    }
}

/// One chat's request. Fields are written once, in order, by the conversation.
#[derive(Debug, Clone)]
pub struct Session {
    state: SessionState,
    sender: Option<String>,
    contract: Option<String>,
    abi: Option<Arc<JsonAbi>>,
    token_ids: Vec<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::AwaitingSender,
            sender: None,
            contract: None,
            abi: None,
            token_ids: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn set_sender(&mut self, sender: String) {
        if self.sender.is_none() {
            self.sender = Some(sender);
        }
        self.state = SessionState::AwaitingContract;
    }

    /// Record the contract together with its resolved ABI and move on to token ids.
    pub fn set_contract(&mut self, contract: String, abi: Arc<JsonAbi>) {
        if self.contract.is_none() {
            self.contract = Some(contract);
            self.abi = Some(abi);
        }
        self.state = SessionState::AwaitingTokenIds;
    }

    pub fn push_token_id(&mut self, token_id: String) {
        self.token_ids.push(token_id);
    }

    /// Move to `Transferring` and hand out the batch to run.
    ///
    /// Refuses when no token id was collected or the ABI is missing; the session is
    /// left untouched in that case.
    pub fn begin_transfer(&mut self) -> Result<TransferJob, TransferError> {
        if self.token_ids.is_empty() {
            return Err(TransferError::Validation(
                "no token ids collected".to_string(),
            ));
        }
        let (Some(sender), Some(contract), Some(abi)) =
            (self.sender.clone(), self.contract.clone(), self.abi.clone())
        else {
            return Err(TransferError::Validation(
                "sender, contract and ABI are required before transferring".to_string(),
            ));
        };

        self.state = SessionState::Transferring;
        Ok(TransferJob {
            sender,
            contract,
            abi,
            token_ids: self.token_ids.clone(),
        })
    }

    pub fn finish(&mut self) {
        self.state = SessionState::Done;
    }
}

#[cfg(test)]
impl Session {
    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    pub fn contract(&self) -> Option<&str> {
        self.contract.as_deref()
    }

    pub fn token_ids(&self) -> &[String] {
        &self.token_ids
    }
}

/// Owns every live session, keyed by chat.
///
/// Callers only see copies or run closures under the entry lock, so a half-updated
/// session is never observable.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<DashMap<ChatId, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace any session of `chat` with a fresh one.
    pub fn start(&self, chat: ChatId) {
        self.sessions.insert(chat, Session::new());
    }

    /// Copy of the session of `chat`.
    #[cfg(test)]
    pub fn get(&self, chat: ChatId) -> Option<Session> {
        self.sessions.get(&chat).map(|s| s.clone())
    }

    pub fn state_of(&self, chat: ChatId) -> SessionState {
        self.sessions
            .get(&chat)
            .map(|s| s.state())
            .unwrap_or(SessionState::Idle)
    }

    /// Run `f` on the session of `chat`. `None` when there is no session.
    pub fn update<R>(&self, chat: ChatId, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        self.sessions.get_mut(&chat).map(|mut s| f(s.value_mut()))
    }

    /// Drop the session of `chat`. Returns whether one existed.
    pub fn release(&self, chat: ChatId) -> bool {
        self.sessions.remove(&chat).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
