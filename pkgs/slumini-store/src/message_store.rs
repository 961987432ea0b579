//! Message store - append-only message log per conversation

use crate::conversation_store::ConversationStore;
use crate::entities::messages;
use crate::models::{OutgoingMessage, StoredMessage};
use crate::subscription::MessageSubscription;
use crate::StoreConfig;
use anyhow::{Context, Result};
use chrono::Utc;
use sea_orm::*;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// Sequence number and timestamp are derived inside the statement so that
/// both stay monotonic per conversation without a separate read.
const APPEND_MESSAGE: &str = r#"
    INSERT INTO messages (
        id, conversation_id, seq, sender_id, sender_name, sender_role,
        body, timestamp, read, read_at
    )
    SELECT ?, ?, COALESCE(MAX(seq), 0) + 1, ?, ?, ?, ?,
           MAX(?, COALESCE(MAX(timestamp), 0)), 0, NULL
    FROM messages
    WHERE conversation_id = ?
"#;

/// Attempts for an append that loses a sequence-number race
const MAX_APPEND_ATTEMPTS: u32 = 5;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Message store - manages the message log and notifies live subscribers
#[derive(Clone)]
pub struct MessageStore {
    pub(crate) db: DatabaseConnection,
    conversations: ConversationStore,
    changes: broadcast::Sender<String>,
    poll_interval: Duration,
}

impl MessageStore {
    /// Create a new message store with default config
    pub async fn new(db_path: PathBuf) -> Result<Self> {
        Self::with_config(StoreConfig {
            db_path,
            ..Default::default()
        })
        .await
    }

    /// Create a message store with custom config
    pub async fn with_config(config: StoreConfig) -> Result<Self> {
        let db = crate::open_database(&config.db_path, config.max_connections).await?;

        info!("Message store initialized at {}", config.db_path.display());

        Ok(Self::with_connection(db, config.change_buffer)
            .with_poll_interval(Duration::from_millis(config.poll_interval_ms)))
    }

    /// Create a message store with an existing database connection
    pub fn with_connection(db: DatabaseConnection, change_buffer: usize) -> Self {
        let (changes, _) = broadcast::channel(change_buffer.max(1));
        Self {
            conversations: ConversationStore::with_connection(db.clone()),
            db,
            changes,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// How often subscriptions check for appends made through other connections
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Summary store sharing this store's connection
    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    /// Append a message and fold it into the conversation summary.
    ///
    /// The body is stored as given. If the summary upsert fails the message
    /// stays in the log and the error is returned.
    pub async fn append(&self, outgoing: OutgoingMessage) -> Result<String> {
        let message = self.insert_message(&outgoing).await?;

        let _ = self.changes.send(outgoing.conversation_id.clone());

        self.conversations
            .record_send(&outgoing, &message)
            .await
            .map_err(|e| {
                error!(
                    "Message {} stored but summary of {} is stale: {}",
                    message.id, outgoing.conversation_id, e
                );
                e
            })?;

        Ok(message.id)
    }

    async fn insert_message(&self, outgoing: &OutgoingMessage) -> Result<StoredMessage> {
        let mut attempt = 1;
        loop {
            let id = uuid::Uuid::new_v4().to_string();
            let stmt = Statement::from_sql_and_values(
                DbBackend::Sqlite,
                APPEND_MESSAGE,
                [
                    id.clone().into(),
                    outgoing.conversation_id.clone().into(),
                    outgoing.sender_id.clone().into(),
                    outgoing.sender_name.clone().into(),
                    outgoing.sender_role.as_str().into(),
                    outgoing.body.clone().into(),
                    Utc::now().timestamp_millis().into(),
                    outgoing.conversation_id.clone().into(),
                ],
            );

            match self.db.execute(stmt).await {
                Ok(_) => {
                    let message = self
                        .get_message(&id)
                        .await?
                        .context("Appended message not found")?;
                    debug!(
                        "Stored message {} (seq {}) in {}",
                        message.id, message.seq, message.conversation_id
                    );
                    return Ok(message);
                }
                Err(e)
                    if attempt < MAX_APPEND_ATTEMPTS
                        && matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) =>
                {
                    debug!(
                        "Sequence race in {} (attempt {}), retrying",
                        outgoing.conversation_id, attempt
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e).context("Failed to store message"),
            }
        }
    }

    /// Get all messages of a conversation, oldest first
    pub async fn list_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>> {
        load_messages(&self.db, conversation_id).await
    }

    /// Get a message by ID
    pub async fn get_message(&self, id: &str) -> Result<Option<StoredMessage>> {
        messages::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await?
            .map(StoredMessage::try_from)
            .transpose()
    }

    /// Set a message's read flag. Conversation counters are not touched.
    pub async fn mark_message_read(&self, id: &str) -> Result<bool> {
        let Some(model) = messages::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await?
        else {
            return Ok(false);
        };

        if model.read {
            return Ok(true);
        }

        let conversation_id = model.conversation_id.clone();
        let mut active: messages::ActiveModel = model.into();
        active.read = Set(true);
        active.read_at = Set(Some(Utc::now().timestamp_millis()));
        active.update(&self.db).await?;

        let _ = self.changes.send(conversation_id);
        Ok(true)
    }

    /// Subscribe to a conversation's log.
    ///
    /// The subscription yields the current list right away and the whole list
    /// again after every change. Changes made through this store arrive at
    /// once, changes from other connections on the next poll. Must be called
    /// within a tokio runtime.
    pub fn subscribe(&self, conversation_id: &str) -> MessageSubscription {
        MessageSubscription::spawn(
            self.db.clone(),
            conversation_id.to_string(),
            self.changes.subscribe(),
            self.poll_interval,
        )
    }
}

/// Load a conversation's messages ordered by timestamp, then sequence number
pub(crate) async fn load_messages(
    db: &DatabaseConnection,
    conversation_id: &str,
) -> Result<Vec<StoredMessage>> {
    let models = messages::Entity::find()
        .filter(messages::Column::ConversationId.eq(conversation_id))
        .order_by_asc(messages::Column::Timestamp)
        .order_by_asc(messages::Column::Seq)
        .all(db)
        .await
        .context("Failed to load messages")?;

    models.into_iter().map(StoredMessage::try_from).collect()
}
