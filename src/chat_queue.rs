//! Per-chat message queues.
//!
//! This module provides a manager that maintains a separate FIFO queue per chat.
//! Messages of one chat are handled strictly one after another, so a transfer round
//! finishes before that chat's next message (including `/reset`) is looked at, while
//! different chats proceed concurrently.
//!
//! A chat has an entry in the map exactly while its worker runs. The worker pops
//! messages and removes the entry when the queue is empty, both under the map's
//! shard lock, so `enqueue` either sees a running worker or starts a new one.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::chat::{ChatId, InboundMessage, MessageHandler};

/// Manager for per-chat queues.
pub struct ChatQueueManager {
    /// Pending messages of every chat with a running worker
    queues: Arc<DashMap<ChatId, ChatQueue>>,
    handler: Arc<dyn MessageHandler>,
}

impl ChatQueueManager {
    pub fn new(handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            queues: Arc::new(DashMap::new()),
            handler,
        }
    }

    /// Enqueues a message on its chat's queue.
    ///
    /// If the chat has no queue, one is created and a background worker is spawned
    /// for it.
    pub fn enqueue(&self, message: InboundMessage) {
        let chat = message.chat;
        match self.queues.entry(chat) {
            Entry::Occupied(mut queue) => {
                let pending = &mut queue.get_mut().pending;
                pending.push_back(message);
                tracing::debug!(%chat, queue_size = pending.len(), "enqueued chat message");
            }
            Entry::Vacant(vacant) => {
                vacant.insert(ChatQueue::with_first(message));
                tracing::debug!(%chat, "spawning chat worker task");

                let worker = ChatWorker {
                    chat,
                    queues: Arc::clone(&self.queues),
                    handler: Arc::clone(&self.handler),
                };
                tokio::spawn(worker.process_loop());
            }
        }
    }

    /// Returns statistics about active queues.
    pub fn stats(&self) -> ChatQueueStats {
        ChatQueueStats {
            active_chats: self.queues.len(),
            queued_messages: self.queues.iter().map(|q| q.pending.len()).sum(),
        }
    }

    /// Wait until no worker is running, or `timeout` elapses. Returns whether all
    /// queues drained.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let drained = tokio::time::timeout(timeout, async {
            while !self.queues.is_empty() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;
        drained.is_ok()
    }
}

/// Statistics about the chat queue manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatQueueStats {
    /// Chats with a worker currently handling messages.
    pub active_chats: usize,
    /// Messages waiting behind the one being handled.
    pub queued_messages: usize,
}

/// FIFO queue of one chat's messages.
#[derive(Debug, Default)]
pub struct ChatQueue {
    pending: VecDeque<InboundMessage>,
}

impl ChatQueue {
    fn with_first(message: InboundMessage) -> Self {
        Self {
            pending: VecDeque::from([message]),
        }
    }
}

/// Drains one chat's queue, then removes it.
struct ChatWorker {
    chat: ChatId,
    queues: Arc<DashMap<ChatId, ChatQueue>>,
    handler: Arc<dyn MessageHandler>,
}

impl ChatWorker {
    /// Next message, or `None` after removing the now empty queue.
    fn pop_or_retire(&self) -> Option<InboundMessage> {
        match self.queues.entry(self.chat) {
            Entry::Occupied(mut queue) => {
                let next = queue.get_mut().pending.pop_front();
                if next.is_none() {
                    queue.remove();
                }
                next
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Handle messages one at a time until the queue is empty.
    ///
    /// Each message runs in its own task. A panic is logged and the loop moves on.
    async fn process_loop(self) {
        while let Some(message) = self.pop_or_retire() {
            let handler = Arc::clone(&self.handler);
            if let Err(e) = tokio::spawn(async move { handler.handle(message).await }).await {
                tracing::error!(chat = %self.chat, error = %e, "chat handler failed");
            }
        }
        tracing::debug!(chat = %self.chat, "chat worker exiting, queue idle");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RecordingHandler;

    #[tokio::test]
    async fn test_messages_of_one_chat_handled_in_order() {
        let handler = Arc::new(RecordingHandler::with_delay(Duration::from_millis(2)));
        let manager = ChatQueueManager::new(handler.clone());

        for i in 0..20 {
            manager.enqueue(InboundMessage::new(ChatId(1), i.to_string()));
            manager.enqueue(InboundMessage::new(ChatId(2), format!("b{i}")));
        }
        assert!(manager.wait_idle(Duration::from_secs(5)).await);

        let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
        assert_eq!(handler.texts_for(ChatId(1)), expected);
        assert_eq!(handler.texts_for(ChatId(2)).len(), 20);
        assert_eq!(handler.max_in_flight(ChatId(1)), 1);
    }

    #[tokio::test]
    async fn test_worker_respawns_after_idle() {
        let handler = Arc::new(RecordingHandler::default());
        let manager = ChatQueueManager::new(handler.clone());

        manager.enqueue(InboundMessage::new(ChatId(5), "first"));
        assert!(manager.wait_idle(Duration::from_secs(5)).await);
        assert!(manager.queues.is_empty());
        manager.enqueue(InboundMessage::new(ChatId(5), "second"));
        assert!(manager.wait_idle(Duration::from_secs(5)).await);

        assert_eq!(
            handler.texts_for(ChatId(5)),
            vec!["first".to_string(), "second".to_string()]
        );
        assert_eq!(
            manager.stats(),
            ChatQueueStats {
                active_chats: 0,
                queued_messages: 0
            }
        );
        assert!(manager.queues.is_empty());
    }

    struct PanickingHandler {
        inner: RecordingHandler,
    }

    #[async_trait::async_trait]
    impl MessageHandler for PanickingHandler {
        async fn handle(&self, message: InboundMessage) {
            if message.text == "boom" {
                panic!("handler blew up");
            }
            self.inner.handle(message).await;
        }
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_wedge_chat() {
        let handler = Arc::new(PanickingHandler {
            inner: RecordingHandler::default(),
        });
        let manager = ChatQueueManager::new(handler.clone());

        for text in ["before", "boom", "after"] {
            manager.enqueue(InboundMessage::new(ChatId(3), text));
        }
        assert!(manager.wait_idle(Duration::from_secs(5)).await);
        manager.enqueue(InboundMessage::new(ChatId(3), "later"));
        assert!(manager.wait_idle(Duration::from_secs(5)).await);

        assert_eq!(
            handler.inner.texts_for(ChatId(3)),
            vec!["before".to_string(), "after".to_string(), "later".to_string()]
        );
        assert!(manager.queues.is_empty());
    }
}
