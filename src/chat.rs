//! Chat transport abstraction and the inbound polling loop.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::chat_queue::ChatQueueManager;

/// Longest text a single chat message may carry, in UTF-16 code units.
pub const MAX_MESSAGE_LEN: usize = 4096;

/// Identity of one conversation. Sessions and queues are keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChatId(pub i64);

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A text message received from a chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub chat: ChatId,
    pub text: String,
}

impl InboundMessage {
    pub fn new(chat: ChatId, text: impl Into<String>) -> Self {
        Self {
            chat,
            text: text.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// Network or HTTP-level failure. Never carries the request URL.
    #[error("chat API request failed: {0}")]
    Http(String),
    /// The chat API answered with `ok: false`.
    #[error("chat API returned an error: {0}")]
    Api(String),
}

/// Delivery of inbound messages and plain-text replies.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Next batch of inbound text messages, possibly empty after a long-poll timeout.
    async fn poll(&self) -> Result<Vec<InboundMessage>, ChatError>;

    async fn send(&self, chat: ChatId, text: &str) -> Result<(), ChatError>;
}

/// Split `text` into messages of at most `limit` UTF-16 code units.
///
/// Breaks fall on line boundaries; a single line longer than `limit` is cut
/// between characters.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split('\n') {
        let line_len = line.encode_utf16().count();
        let separator = usize::from(!current.is_empty());
        if current_len + separator + line_len <= limit {
            if separator == 1 {
                current.push('\n');
            }
            current.push_str(line);
            current_len += separator + line_len;
            continue;
        }

        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        for ch in line.chars() {
            let ch_len = ch.len_utf16();
            if current_len + ch_len > limit {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            current.push(ch);
            current_len += ch_len;
        }
    }
    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Consumer of inbound messages, called once per message in per-chat order.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: InboundMessage);
}

/// Poll `transport` until `cancel` fires, handing every message to its chat queue.
///
/// A failed poll is logged and retried after `error_backoff`.
pub async fn poll_loop(
    transport: Arc<dyn ChatTransport>,
    queues: Arc<ChatQueueManager>,
    error_backoff: Duration,
    cancel: CancellationToken,
) {
    tracing::info!("chat polling started");
    loop {
        let polled = tokio::select! {
            _ = cancel.cancelled() => break,
            polled = transport.poll() => polled,
        };

        match polled {
            Ok(messages) => {
                for message in messages {
                    queues.enqueue(message);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "chat poll failed");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(error_backoff) => {}
                }
            }
        }
    }
    tracing::info!("chat polling stopped");
}
