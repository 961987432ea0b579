use crate::error::ChatError;
use chrono::{DateTime, TimeZone, Utc};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use slumini_store::{LocalMessage, LocalPair, Role, StoredMessage};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;

/// One side of a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub id: String,
    pub name: String,
    pub role: Role,
}

impl Participant {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role,
        }
    }

    pub fn student(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, name, Role::Student)
    }

    pub fn alumni(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, name, Role::Alumni)
    }
}

/// A message as shown in a chat window, whichever backend holds it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_role: Role,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

impl From<StoredMessage> for ChatMessage {
    fn from(msg: StoredMessage) -> Self {
        Self {
            id: msg.id,
            sender_id: msg.sender_id,
            sender_name: msg.sender_name,
            sender_role: msg.sender_role,
            body: msg.body,
            timestamp: msg.timestamp,
            read: msg.read,
        }
    }
}

impl ChatMessage {
    /// Local entries carry only a role; the numeric id stands in for the name
    pub(crate) fn from_local(pair: LocalPair, msg: LocalMessage) -> Self {
        let sender_id = pair.id_of(msg.sender).to_string();
        Self {
            id: msg.id,
            sender_name: sender_id.clone(),
            sender_id,
            sender_role: msg.sender,
            body: msg.text,
            timestamp: Utc
                .timestamp_millis_opt(msg.timestamp)
                .single()
                .unwrap_or_default(),
            read: false,
        }
    }
}

/// Live view of one conversation.
///
/// Yields the whole ordered message list on every change. Dropping it, or
/// calling [`ChatSubscription::unsubscribe`], stops the underlying watcher.
pub struct ChatSubscription {
    inner: BoxStream<'static, Result<Vec<ChatMessage>, ChatError>>,
}

impl ChatSubscription {
    pub(crate) fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Vec<ChatMessage>, ChatError>> + Send + 'static,
    {
        Self {
            inner: stream.boxed(),
        }
    }

    pub async fn next_snapshot(&mut self) -> Option<Result<Vec<ChatMessage>, ChatError>> {
        self.inner.next().await
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Stream for ChatSubscription {
    type Item = Result<Vec<ChatMessage>, ChatError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

/// Handle returned by callback subscriptions
pub struct Unsubscribe {
    task: JoinHandle<()>,
}

impl Unsubscribe {
    pub(crate) fn new(task: JoinHandle<()>) -> Self {
        Self { task }
    }

    /// Stop delivering updates
    pub fn unsubscribe(self) {
        drop(self);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        self.task.abort();
    }
}
