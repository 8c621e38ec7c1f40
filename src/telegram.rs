//! Telegram Bot API transport: `getUpdates` long polling and `sendMessage`.
//!
//! The bot token is part of every request path, so request URLs are stripped from
//! all errors and the token is never logged.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use crate::chat::{ChatError, ChatId, ChatTransport, InboundMessage};
use crate::config::TelegramConfig;

/// Extra time on top of the long-poll timeout before the HTTP client gives up.
const POLL_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

impl<T> ApiResponse<T> {
    fn into_result(self) -> Result<T, ChatError> {
        match (self.ok, self.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(ChatError::Api(
                self.description
                    .unwrap_or_else(|| "no description".to_string()),
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
}

/// Text messages in `updates` and the offset that acknowledges all of them.
///
/// Updates without a text message (stickers, edits, joins) are skipped but still
/// acknowledged.
pub fn collect_messages(updates: Vec<Update>, offset: i64) -> (Vec<InboundMessage>, i64) {
    let next_offset = updates
        .iter()
        .map(|u| u.update_id + 1)
        .max()
        .map_or(offset, |next| next.max(offset));
    let messages = updates
        .into_iter()
        .filter_map(|u| u.message)
        .filter_map(|m| m.text.map(|text| InboundMessage::new(ChatId(m.chat.id), text)))
        .collect();
    (messages, next_offset)
}

pub struct TelegramTransport {
    http: reqwest::Client,
    /// `{api_url}/bot{token}`
    base_url: String,
    poll_timeout_seconds: u64,
    offset: AtomicI64,
}

impl std::fmt::Debug for TelegramTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramTransport")
            .field("poll_timeout_seconds", &self.poll_timeout_seconds)
            .field("offset", &self.offset.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl TelegramTransport {
    pub fn new(config: &TelegramConfig, token: &str) -> Result<Self, ChatError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.poll_timeout_seconds) + POLL_GRACE)
            .build()
            .map_err(http_error)?;
        Ok(Self {
            http,
            base_url: format!("{}/bot{token}", config.api_url.trim_end_matches('/')),
            poll_timeout_seconds: config.poll_timeout_seconds,
            offset: AtomicI64::new(0),
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/{method}", self.base_url)
    }
}

fn http_error(e: reqwest::Error) -> ChatError {
    ChatError::Http(e.without_url().to_string())
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn poll(&self) -> Result<Vec<InboundMessage>, ChatError> {
        let offset = self.offset.load(Ordering::SeqCst);
        let response: ApiResponse<Vec<Update>> = self
            .http
            .get(self.endpoint("getUpdates"))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", self.poll_timeout_seconds.to_string()),
                ("allowed_updates", r#"["message"]"#.to_string()),
            ])
            .send()
            .await
            .map_err(http_error)?
            .json()
            .await
            .map_err(http_error)?;

        let (messages, next_offset) = collect_messages(response.into_result()?, offset);
        self.offset.store(next_offset, Ordering::SeqCst);
        if !messages.is_empty() {
            tracing::debug!(count = messages.len(), next_offset, "updates received");
        }
        Ok(messages)
    }

    async fn send(&self, chat: ChatId, text: &str) -> Result<(), ChatError> {
        let response: ApiResponse<serde_json::Value> = self
            .http
            .post(self.endpoint("sendMessage"))
            .json(&SendMessage {
                chat_id: chat.0,
                text,
            })
            .send()
            .await
            .map_err(http_error)?
            .json()
            .await
            .map_err(http_error)?;
        response.into_result().map(|_| ())
    }
}
