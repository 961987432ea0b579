//! Local fallback chat - conversations kept only in the local store
//!
//! Keys are `portal_chat_{alumni}_{student}` over numeric ids. This scheme is
//! unrelated to [`crate::ConversationId`] and nothing here is mirrored into the
//! message store.

use crate::local_store::{LocalChange, LocalStore};
use crate::models::Role;
use anyhow::{Context, Result};
use futures::channel::mpsc;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::Poll;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

pub const LOCAL_CHAT_PREFIX: &str = "portal_chat_";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Storage key for a local conversation
pub fn local_chat_key(alumni_id: u64, student_id: u64) -> String {
    format!("{}{}_{}", LOCAL_CHAT_PREFIX, alumni_id, student_id)
}

/// The two numeric participants of a local conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocalPair {
    pub alumni_id: u64,
    pub student_id: u64,
}

impl LocalPair {
    pub fn new(alumni_id: u64, student_id: u64) -> Self {
        Self {
            alumni_id,
            student_id,
        }
    }

    /// Build the pair from the caller's point of view
    pub fn between(my_id: u64, my_role: Role, other_id: u64) -> Self {
        match my_role {
            Role::Student => Self::new(other_id, my_id),
            Role::Alumni => Self::new(my_id, other_id),
        }
    }

    pub fn key(&self) -> String {
        local_chat_key(self.alumni_id, self.student_id)
    }

    /// Parse a key produced by [`LocalPair::key`]
    pub fn from_key(key: &str) -> Option<Self> {
        let rest = key.strip_prefix(LOCAL_CHAT_PREFIX)?;
        let (alumni, student) = rest.split_once('_')?;
        Some(Self::new(alumni.parse().ok()?, student.parse().ok()?))
    }

    pub fn id_of(&self, role: Role) -> u64 {
        match role {
            Role::Student => self.student_id,
            Role::Alumni => self.alumni_id,
        }
    }
}

/// One entry of a local conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocalMessage {
    pub id: String,
    pub sender: Role,
    pub text: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

/// Fallback chat over a [`LocalStore`]
#[derive(Clone)]
pub struct LocalChatStore {
    store: LocalStore,
    poll_interval: Duration,
}

impl LocalChatStore {
    pub fn new(store: LocalStore) -> Self {
        Self::with_poll_interval(store, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(store: LocalStore, poll_interval: Duration) -> Self {
        Self {
            store,
            poll_interval,
        }
    }

    /// Load the whole conversation, oldest first
    pub async fn load(&self, pair: LocalPair) -> Result<Vec<LocalMessage>> {
        let raw = self.store.get(&pair.key()).await?;
        parse_messages(raw.as_deref())
    }

    /// Append a message and notify watchers
    pub async fn send(&self, pair: LocalPair, sender: Role, text: &str) -> Result<LocalMessage> {
        let key = pair.key();

        let message = LocalMessage {
            id: uuid::Uuid::new_v4().to_string(),
            sender,
            text: text.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        };

        let json = serde_json::to_string(&message)?;
        self.store
            .append_json(&key, &json)
            .await
            .with_context(|| format!("Failed to append to local conversation {}", key))?;

        debug!("Local message {} stored under {}", message.id, key);
        Ok(message)
    }

    /// Delete the whole conversation
    pub async fn clear(&self, pair: LocalPair) -> Result<()> {
        let key = pair.key();
        self.store.remove(&key).await?;
        info!("Cleared local conversation {}", key);
        Ok(())
    }

    /// Local conversations a participant takes part in
    pub async fn conversations_for(&self, my_id: u64, my_role: Role) -> Result<Vec<LocalPair>> {
        let keys = self.store.keys_with_prefix(LOCAL_CHAT_PREFIX).await?;

        Ok(keys
            .iter()
            .filter_map(|key| LocalPair::from_key(key))
            .filter(|pair| pair.id_of(my_role) == my_id)
            .collect())
    }

    /// Watch a conversation.
    ///
    /// Yields the current list, then reloads on every local change to the key
    /// and whenever polling sees a value written by another process.
    pub fn watch(&self, pair: LocalPair) -> LocalChatSubscription {
        let (sender, receiver) = mpsc::unbounded();
        let task = tokio::spawn(watch_key(
            self.store.clone(),
            pair.key(),
            self.store.subscribe(),
            self.poll_interval,
            sender,
        ));

        LocalChatSubscription {
            pair,
            receiver,
            task,
        }
    }
}

/// Handle to a watched local conversation. Dropping it stops the watcher.
pub struct LocalChatSubscription {
    pair: LocalPair,
    receiver: mpsc::UnboundedReceiver<Result<Vec<LocalMessage>>>,
    task: JoinHandle<()>,
}

impl LocalChatSubscription {
    pub fn pair(&self) -> LocalPair {
        self.pair
    }

    pub async fn next_snapshot(&mut self) -> Option<Result<Vec<LocalMessage>>> {
        self.receiver.next().await
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Stream for LocalChatSubscription {
    type Item = Result<Vec<LocalMessage>>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        self.receiver.poll_next_unpin(cx)
    }
}

impl Drop for LocalChatSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn watch_key(
    store: LocalStore,
    key: String,
    mut changes: broadcast::Receiver<LocalChange>,
    poll_interval: Duration,
    sender: mpsc::UnboundedSender<Result<Vec<LocalMessage>>>,
) {
    let mut last_seen = None;
    if !refresh(&store, &key, &sender, &mut last_seen, true).await {
        return;
    }

    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            change = changes.recv() => {
                match change {
                    Ok(LocalChange { key: changed }) if changed != key => continue,
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => return,
                }
                if !refresh(&store, &key, &sender, &mut last_seen, false).await {
                    return;
                }
            }
            // Writes from other processes never reach our change feed
            _ = ticker.tick() => {
                if !refresh(&store, &key, &sender, &mut last_seen, false).await {
                    return;
                }
            }
        }
    }
}

/// Re-read the key and deliver its list if it differs from `last_seen`
/// (or unconditionally when `force` is set). Returns false to stop watching.
async fn refresh(
    store: &LocalStore,
    key: &str,
    sender: &mpsc::UnboundedSender<Result<Vec<LocalMessage>>>,
    last_seen: &mut Option<String>,
    force: bool,
) -> bool {
    let raw = match store.get(key).await {
        Ok(raw) => raw,
        Err(e) => {
            error!("Loading local key {} failed: {}", key, e);
            let _ = sender.unbounded_send(Err(e.into()));
            return false;
        }
    };

    if !force && raw == *last_seen {
        return true;
    }

    debug!("Local conversation {} changed", key);
    let parsed = parse_messages(raw.as_deref());
    let failed = parsed.is_err();
    *last_seen = raw;

    sender.unbounded_send(parsed).is_ok() && !failed
}

fn parse_messages(raw: Option<&str>) -> Result<Vec<LocalMessage>> {
    match raw {
        Some(json) => serde_json::from_str(json).context("Corrupt local conversation"),
        None => Ok(Vec::new()),
    }
}
