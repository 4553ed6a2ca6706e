//! Background conversation events.
//!
//! Message and session-end notifications are raised on the hot path of a
//! conversation but persisted by a slower external memory store. The
//! [`EventDispatcher`] hands them to worker pools so the caller never waits
//! on the store.

use std::fmt;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::utils::{WorkerPool, WorkerPoolResult, WorkerPoolStats};

pub const DEFAULT_EVENT_WORKERS: usize = 10;
pub const DEFAULT_EVENT_QUEUE_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Long-term conversation store notified by the pipeline.
#[async_trait]
pub trait ConversationMemory: Send + Sync {
    async fn add_message(&self, memory_id: &str, message: &ChatMessage) -> anyhow::Result<()>;

    /// Persist whatever the store buffered for `memory_id`.
    async fn flush(&self, memory_id: &str) -> anyhow::Result<()>;
}

/// Who a conversation event belongs to.
#[derive(Clone)]
pub struct SessionIdentity {
    pub device_id: String,
    pub agent_id: String,
    pub memory: Option<Arc<dyn ConversationMemory>>,
}

impl SessionIdentity {
    /// Memory key: the device id, or the agent id for device-less sessions.
    pub fn memory_id(&self) -> &str {
        if self.device_id.is_empty() {
            &self.agent_id
        } else {
            &self.device_id
        }
    }
}

impl fmt::Debug for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionIdentity")
            .field("device_id", &self.device_id)
            .field("agent_id", &self.agent_id)
            .field("has_memory", &self.memory.is_some())
            .finish()
    }
}

#[derive(Debug)]
struct MessageAdded {
    session: SessionIdentity,
    message: ChatMessage,
}

/// Process-scoped dispatcher for conversation events.
pub struct EventDispatcher {
    messages: WorkerPool<MessageAdded>,
    session_ends: WorkerPool<SessionIdentity>,
}

impl EventDispatcher {
    pub fn new(workers: usize, queue_size: usize) -> Self {
        let messages = WorkerPool::new("message-added", workers, queue_size, |event: MessageAdded| async move {
            let Some(memory) = event.session.memory.as_ref() else {
                return Ok(());
            };
            memory
                .add_message(event.session.memory_id(), &event.message)
                .await
                .with_context(|| format!("add message for {}", event.session.memory_id()))
        });

        let session_ends = WorkerPool::new("session-ended", workers, queue_size, |session: SessionIdentity| async move {
            let Some(memory) = session.memory.as_ref() else {
                return Ok(());
            };
            memory
                .flush(session.memory_id())
                .await
                .with_context(|| format!("flush memory for {}", session.memory_id()))
        });

        Self {
            messages,
            session_ends,
        }
    }

    /// Queue a message for the session's memory store.
    pub async fn publish_message_added(
        &self,
        session: &SessionIdentity,
        message: ChatMessage,
    ) -> WorkerPoolResult<()> {
        debug!(memory_id = %session.memory_id(), role = ?message.role, "Message added");
        self.messages
            .submit(MessageAdded {
                session: session.clone(),
                message,
            })
            .await
    }

    /// Queue a memory flush. Returns `false` when the session has no memory
    /// store and nothing was queued.
    pub async fn publish_session_ended(&self, session: &SessionIdentity) -> WorkerPoolResult<bool> {
        if session.memory.is_none() {
            return Ok(false);
        }
        info!(device_id = %session.device_id, "Session ended");
        self.session_ends.submit(session.clone()).await?;
        Ok(true)
    }

    /// Stop intake and wait for queued events to be handled.
    pub async fn shutdown(&self) {
        self.messages.stop().await;
        self.session_ends.stop().await;
    }

    pub fn stats(&self) -> (WorkerPoolStats, WorkerPoolStats) {
        (self.messages.stats(), self.session_ends.stats())
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_WORKERS, DEFAULT_EVENT_QUEUE_SIZE)
    }
}
