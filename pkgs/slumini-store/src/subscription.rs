//! Live subscriptions over a conversation's message log

use crate::message_store::load_messages;
use crate::models::StoredMessage;
use anyhow::{Context as _, Result};
use futures::channel::mpsc;
use futures::{Stream, StreamExt};
use sea_orm::{ConnectionTrait, DatabaseConnection, DbBackend, Statement};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

/// Handle to a running subscription.
///
/// Each item is the full ordered message list of the conversation. After an
/// `Err` item the subscription ends. Dropping the handle (or calling
/// [`MessageSubscription::unsubscribe`]) stops the background task.
pub struct MessageSubscription {
    conversation_id: String,
    receiver: mpsc::UnboundedReceiver<Result<Vec<StoredMessage>>>,
    task: JoinHandle<()>,
}

impl MessageSubscription {
    pub(crate) fn spawn(
        db: DatabaseConnection,
        conversation_id: String,
        changes: broadcast::Receiver<String>,
        poll_interval: Duration,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded();
        let task = tokio::spawn(run(
            db,
            conversation_id.clone(),
            changes,
            poll_interval,
            sender,
        ));

        debug!("Subscribed to conversation {}", conversation_id);

        Self {
            conversation_id,
            receiver,
            task,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Wait for the next snapshot. `None` once the subscription has ended.
    pub async fn next_snapshot(&mut self) -> Option<Result<Vec<StoredMessage>>> {
        self.receiver.next().await
    }

    /// Stop receiving updates and release the background task
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Stream for MessageSubscription {
    type Item = Result<Vec<StoredMessage>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_next_unpin(cx)
    }
}

impl Drop for MessageSubscription {
    fn drop(&mut self) {
        self.task.abort();
        debug!("Unsubscribed from conversation {}", self.conversation_id);
    }
}

/// What polling compares to notice appends and read flags written elsewhere
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LogState {
    count: i64,
    max_seq: i64,
    read: i64,
}

impl LogState {
    fn of(messages: &[StoredMessage]) -> Self {
        Self {
            count: messages.len() as i64,
            max_seq: messages.iter().map(|m| m.seq).max().unwrap_or(0),
            read: messages.iter().filter(|m| m.read).count() as i64,
        }
    }
}

const LOG_STATE: &str = r#"
    SELECT COUNT(*) AS count,
           COALESCE(MAX(seq), 0) AS max_seq,
           COALESCE(SUM(CASE WHEN read THEN 1 ELSE 0 END), 0) AS read_count
    FROM messages
    WHERE conversation_id = ?
"#;

async fn log_state(db: &DatabaseConnection, conversation_id: &str) -> Result<LogState> {
    let row = db
        .query_one(Statement::from_sql_and_values(
            DbBackend::Sqlite,
            LOG_STATE,
            [conversation_id.into()],
        ))
        .await?
        .context("Log state query returned no row")?;

    Ok(LogState {
        count: row.try_get("", "count")?,
        max_seq: row.try_get("", "max_seq")?,
        read: row.try_get("", "read_count")?,
    })
}

async fn run(
    db: DatabaseConnection,
    conversation_id: String,
    mut changes: broadcast::Receiver<String>,
    poll_interval: Duration,
    sender: mpsc::UnboundedSender<Result<Vec<StoredMessage>>>,
) {
    let Some(mut seen) = deliver(&db, &conversation_id, &sender, None).await else {
        return;
    };

    let mut ticker = tokio::time::interval(poll_interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            change = changes.recv() => {
                match change {
                    Ok(changed) if changed != conversation_id => continue,
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        // Snapshots are whole lists, one re-read covers everything missed
                        debug!(
                            "Subscription to {} lagged by {} changes",
                            conversation_id, skipped
                        );
                    }
                    Err(RecvError::Closed) => return,
                }
            }
            // Appends through other connections never reach our change feed
            _ = ticker.tick() => {
                match log_state(&db, &conversation_id).await {
                    Ok(state) if state == seen => continue,
                    Ok(_) => {}
                    Err(e) => {
                        error!("Subscription to {} failed: {}", conversation_id, e);
                        let _ = sender.unbounded_send(Err(e));
                        return;
                    }
                }
            }
        }

        // A poll can see an append before its change event arrives
        match deliver(&db, &conversation_id, &sender, Some(seen)).await {
            Some(state) => seen = state,
            None => return,
        }
    }
}

/// Send one snapshot unless it matches `seen`. Returns the state now
/// delivered, or None when the subscription should stop.
async fn deliver(
    db: &DatabaseConnection,
    conversation_id: &str,
    sender: &mpsc::UnboundedSender<Result<Vec<StoredMessage>>>,
    seen: Option<LogState>,
) -> Option<LogState> {
    match load_messages(db, conversation_id).await {
        Ok(messages) => {
            let state = LogState::of(&messages);
            if seen != Some(state) {
                sender.unbounded_send(Ok(messages)).ok()?;
            }
            Some(state)
        }
        Err(e) => {
            error!("Subscription to {} failed: {}", conversation_id, e);
            let _ = sender.unbounded_send(Err(e));
            None
        }
    }
}
