//! Local store - small key-value store with change notifications

use crate::entities::local_kv;
use anyhow::Result;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Statement,
};
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::{debug, info};

const DEFAULT_CHANGE_BUFFER: usize = 64;

/// Appends to the JSON array under a key inside one statement, so concurrent
/// writers (in this process or another) never overwrite each other.
const APPEND_JSON: &str = r#"
    INSERT INTO local_kv (key, value, updated_at) VALUES (?, json_array(json(?)), ?)
    ON CONFLICT(key) DO UPDATE SET
        value = json_insert(local_kv.value, '$[#]', json(?)),
        updated_at = excluded.updated_at
"#;

/// Notification that a key was written or removed in this process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalChange {
    pub key: String,
}

/// Key-value store backed by the `local_kv` table
#[derive(Clone)]
pub struct LocalStore {
    db: DatabaseConnection,
    changes: broadcast::Sender<LocalChange>,
}

impl LocalStore {
    /// Create a new local store over an existing connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self::with_buffer(db, DEFAULT_CHANGE_BUFFER)
    }

    pub fn with_buffer(db: DatabaseConnection, change_buffer: usize) -> Self {
        let (changes, _) = broadcast::channel(change_buffer.max(1));
        Self { db, changes }
    }

    /// Open the local database file
    pub async fn open(db_path: PathBuf) -> Result<Self> {
        let db = crate::open_database(&db_path, 1).await?;
        info!("Local store initialized at {}", db_path.display());
        Ok(Self::new(db))
    }

    /// Get a value by key
    pub async fn get(&self, key: &str) -> Result<Option<String>, DbErr> {
        let result = local_kv::Entity::find_by_id(key.to_string())
            .one(&self.db)
            .await?;

        Ok(result.map(|model| model.value))
    }

    /// Set a value, replacing any previous one
    pub async fn set(&self, key: &str, value: &str) -> Result<(), DbErr> {
        debug!("Setting local key: {}", key);

        let now = chrono::Utc::now().timestamp_millis();

        self.db
            .execute(Statement::from_sql_and_values(
                DbBackend::Sqlite,
                r#"
                INSERT INTO local_kv (key, value, updated_at) VALUES (?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                "#,
                [key.into(), value.into(), now.into()],
            ))
            .await?;

        self.notify(key);
        Ok(())
    }

    /// Append one JSON value to the array stored under `key`, creating the
    /// array if the key is missing. Fails if the stored value is not JSON.
    pub async fn append_json(&self, key: &str, item: &str) -> Result<(), DbErr> {
        debug!("Appending to local key: {}", key);

        let now = chrono::Utc::now().timestamp_millis();

        self.db
            .execute(Statement::from_sql_and_values(
                DbBackend::Sqlite,
                APPEND_JSON,
                [key.into(), item.into(), now.into(), item.into()],
            ))
            .await?;

        self.notify(key);
        Ok(())
    }

    /// Delete a key. Returns true if it existed.
    pub async fn remove(&self, key: &str) -> Result<bool, DbErr> {
        debug!("Removing local key: {}", key);

        let result = local_kv::Entity::delete_many()
            .filter(local_kv::Column::Key.eq(key))
            .exec(&self.db)
            .await?;

        self.notify(key);
        Ok(result.rows_affected > 0)
    }

    /// List keys starting with `prefix`, in key order
    pub async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, DbErr> {
        let models = local_kv::Entity::find()
            .filter(local_kv::Column::Key.starts_with(prefix))
            .order_by_asc(local_kv::Column::Key)
            .all(&self.db)
            .await?;

        // LIKE treats '_' as a wildcard
        Ok(models
            .into_iter()
            .map(|m| m.key)
            .filter(|key| key.starts_with(prefix))
            .collect())
    }

    /// Receive change notifications for writes made through any clone of this store
    pub fn subscribe(&self) -> broadcast::Receiver<LocalChange> {
        self.changes.subscribe()
    }

    fn notify(&self, key: &str) {
        // No receivers is fine
        let _ = self.changes.send(LocalChange {
            key: key.to_string(),
        });
    }
}
