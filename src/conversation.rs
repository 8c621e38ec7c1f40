//! The guided chat flow: sender, contract, token ids, then the transfer round.
//!
//! One call to [`Conversation::on_message`] performs at most one state transition.
//! Messages of a chat arrive strictly in order (see [`crate::chat_queue`]), so a
//! `/reset` sent while a round is running is seen only after the round finished.

use async_trait::async_trait;
use std::sync::Arc;

use crate::chain::abi::AbiResolver;
use crate::chat::{
    ChatId, ChatTransport, InboundMessage, MAX_MESSAGE_LEN, MessageHandler, split_message,
};
use crate::config::ConversationConfig;
use crate::session::{SessionState, SessionStore};
use crate::transfer::{TransferOutcome, TransferPipeline};

pub const ASK_SENDER: &str = "Sender Address (The address where the NFT is getting sent from)";
pub const ASK_CONTRACT: &str = "What is the contract address of the NFT you want to pull?";
pub const ABI_ERROR: &str =
    "Error retrieving ABI for contract. Please check the contract address and try again.";
pub const ASK_TOKEN_IDS: &str = "What are the token IDs you want to pull? (Enter one at a time)";
pub const TRANSFERRING: &str = "Calling transferFrom method to pull out the NFTs...";
pub const RESET_DONE: &str = "State machine reset";
pub const NO_SESSION: &str = "No active request. Send /start to begin.";
pub const BUSY: &str = "A transfer is already running for this chat. Please wait for the result.";

pub struct Conversation {
    sessions: SessionStore,
    resolver: Arc<dyn AbiResolver>,
    pipeline: Arc<TransferPipeline>,
    transport: Arc<dyn ChatTransport>,
    config: ConversationConfig,
}

impl Conversation {
    pub fn new(
        sessions: SessionStore,
        resolver: Arc<dyn AbiResolver>,
        pipeline: Arc<TransferPipeline>,
        transport: Arc<dyn ChatTransport>,
        config: ConversationConfig,
    ) -> Self {
        Self {
            sessions,
            resolver,
            pipeline,
            transport,
            config,
        }
    }

    #[tracing::instrument(skip_all, fields(chat = %message.chat))]
    pub async fn on_message(&self, message: InboundMessage) {
        let chat = message.chat;
        let text = message.text;

        if is_command(&text, &self.config.reset_command) {
            let existed = self.sessions.release(chat);
            tracing::info!(existed, "session reset");
            self.reply(chat, RESET_DONE).await;
            return;
        }
        if is_command(&text, &self.config.start_command) {
            self.sessions.start(chat);
            tracing::info!("session started");
            self.reply(chat, ASK_SENDER).await;
            return;
        }

        match self.sessions.state_of(chat) {
            SessionState::AwaitingSender => {
                if self.sessions.update(chat, |s| s.set_sender(text)).is_some() {
                    self.reply(chat, ASK_CONTRACT).await;
                }
            }
            SessionState::AwaitingContract => self.on_contract(chat, text).await,
            SessionState::AwaitingTokenIds => {
                if self.is_completion(&text) {
                    self.complete(chat).await;
                } else if self.sessions.update(chat, |s| s.push_token_id(text)).is_some() {
                    let prompt = self.another_token_prompt();
                    self.reply(chat, &prompt).await;
                }
            }
            SessionState::Transferring | SessionState::Done => self.reply(chat, BUSY).await,
            SessionState::Idle => self.reply(chat, NO_SESSION).await,
        }
    }

    async fn on_contract(&self, chat: ChatId, contract: String) {
        match self.resolver.resolve(contract.trim()).await {
            Ok(abi) => {
                if self
                    .sessions
                    .update(chat, |s| s.set_contract(contract, abi))
                    .is_some()
                {
                    self.reply(chat, ASK_TOKEN_IDS).await;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "contract ABI not resolved, staying on contract prompt");
                self.reply(chat, ABI_ERROR).await;
            }
        }
    }

    /// Run the round, report every outcome, then drop the session whatever happened.
    async fn complete(&self, chat: ChatId) {
        let job = match self.sessions.update(chat, |s| s.begin_transfer()) {
            Some(Ok(job)) => job,
            Some(Err(e)) => {
                tracing::info!(reason = %e, "completion rejected");
                let prompt = format!(
                    "You must enter at least one token ID. {}",
                    self.another_token_prompt()
                );
                self.reply(chat, &prompt).await;
                return;
            }
            None => {
                self.reply(chat, NO_SESSION).await;
                return;
            }
        };

        tracing::info!(tokens = job.token_ids.len(), "starting transfer round");
        self.reply(chat, TRANSFERRING).await;

        let outcomes = self.pipeline.run(&job).await;
        self.sessions.update(chat, |s| s.finish());
        let report = format_report(&outcomes);
        for part in split_message(&report, MAX_MESSAGE_LEN) {
            self.reply(chat, &part).await;
        }
        self.sessions.release(chat);
    }

    fn is_completion(&self, text: &str) -> bool {
        text.trim().to_lowercase() == self.config.completion_keyword.to_lowercase()
    }

    fn another_token_prompt(&self) -> String {
        format!(
            "Enter another token ID or type {} to finish.",
            self.config.completion_keyword
        )
    }

    /// Send failures are logged and dropped.
    async fn reply(&self, chat: ChatId, text: &str) {
        if let Err(e) = self.transport.send(chat, text).await {
            tracing::warn!(%chat, error = %e, "failed to send reply");
        }
    }
}

#[async_trait]
impl MessageHandler for Conversation {
    async fn handle(&self, message: InboundMessage) {
        self.on_message(message).await;
    }
}

/// `/start`, `/start@some_bot` and `/start payload` all match `/start`.
fn is_command(text: &str, command: &str) -> bool {
    let Some(word) = text.split_whitespace().next() else {
        return false;
    };
    match word.strip_prefix(command) {
        Some("") => true,
        Some(rest) => rest.len() > 1 && rest.starts_with('@'),
        None => false,
    }
}

/// Summary line followed by one line per outcome. Long reports are split by the
/// caller.
pub fn format_report(outcomes: &[TransferOutcome]) -> String {
    let succeeded = outcomes.iter().filter(|o| o.success()).count();
    let mut report = format!(
        "Transfer complete. {succeeded} of {} succeeded.",
        outcomes.len()
    );
    for outcome in outcomes {
        report.push('\n');
        report.push_str(&outcome.to_string());
    }
    report
}
