//! Slumini Store - Persistent storage for student/alumni conversations
//!
//! This crate provides SQLite-based storage for the portal's chat feature using Sea-ORM.
//!
//! # Architecture
//!
//! - **MessageStore**: Append-only message log per conversation with live subscriptions
//! - **ConversationStore**: One denormalized summary per conversation (last message, unread counters)
//! - **LocalStore**: Small key-value store with change notifications, used by the fallback path
//! - **LocalChatStore**: Client-local fallback chat keyed by numeric participant ids
//!
//! # Database Schema
//!
//! - `conversations`: Summary per student/alumni pair, unread counters and read watermarks
//! - `messages`: Message bodies, per-conversation sequence numbers, read flags
//! - `local_kv`: Key-value pairs with last-write timestamps (fallback path only)
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use slumini_store::{AlumniId, ConversationId, MessageStore, OutgoingMessage, Role, StudentId};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = MessageStore::new("slumini.db".into()).await?;
//!
//! let id = ConversationId::resolve(&StudentId::new("s1@x.edu")?, &AlumniId::new("a1@y.com")?);
//! store
//!     .append(OutgoingMessage {
//!         conversation_id: id.to_string(),
//!         sender_id: "s1@x.edu".to_string(),
//!         sender_name: "Sam".to_string(),
//!         sender_role: Role::Student,
//!         body: "Hello".to_string(),
//!         recipient_id: "a1@y.com".to_string(),
//!         recipient_name: "Ada".to_string(),
//!     })
//!     .await?;
//!
//! for msg in store.list_messages(id.as_str()).await? {
//!     println!("{}: {}", msg.sender_name, msg.body);
//! }
//! # Ok(())
//! # }
//! ```

pub mod conversation_id;
pub mod conversation_store;
pub mod entities;
pub mod local_chat;
pub mod local_store;
pub mod message_store;
pub mod migration;
pub mod models;
pub mod subscription;

pub use conversation_id::{AlumniId, ConversationId, StudentId};
pub use conversation_store::ConversationStore;
pub use local_chat::{
    local_chat_key, LocalChatStore, LocalChatSubscription, LocalMessage, LocalPair, LOCAL_CHAT_PREFIX,
};
pub use local_store::{LocalChange, LocalStore};
pub use message_store::MessageStore;
pub use models::{Conversation, OutgoingMessage, Participants, Role, StoredMessage, UnreadCount};
pub use subscription::MessageSubscription;

use anyhow::{Context, Result};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use std::path::{Path, PathBuf};
use tracing::info;

/// Configuration for the storage layer
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the primary SQLite database (conversations and messages)
    pub db_path: PathBuf,

    /// Path to the client-local SQLite database used by the fallback chat
    pub local_db_path: PathBuf,

    /// Pool size for each database (default: 1, SQLite has a single writer)
    pub max_connections: u32,

    /// Capacity of the in-process change feed (default: 256)
    pub change_buffer: usize,

    /// Interval in milliseconds at which message subscriptions look for
    /// appends made through other connections (default: 500ms)
    pub poll_interval_ms: u64,

    /// Interval in milliseconds for detecting writes made by other processes
    /// to the local store (default: 500ms)
    pub local_poll_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("slumini.db"),
            local_db_path: PathBuf::from("slumini-local.db"),
            max_connections: 1,
            change_buffer: 256,
            poll_interval_ms: 500,
            local_poll_interval_ms: 500,
        }
    }
}

/// Open (creating if needed) a SQLite database and run all migrations
pub async fn open_database(db_path: &Path, max_connections: u32) -> Result<DatabaseConnection> {
    let db_path_str = db_path
        .to_str()
        .context("Invalid database path")?
        .replace("\\", "/");

    let db_url = format!("sqlite:{}?mode=rwc", db_path_str);

    let mut options = ConnectOptions::new(db_url);
    options
        .max_connections(max_connections.max(1))
        .sqlx_logging(false);

    let db: DatabaseConnection = Database::connect(options)
        .await
        .context("Failed to connect to database")?;

    migration::Migrator::up(&db, None)
        .await
        .context("Failed to run migrations")?;

    info!("Database ready at {}", db_path.display());

    Ok(db)
}
