//! Conversation store - one denormalized summary per student/alumni pair

use crate::entities::{conversations, messages};
use crate::message_store::load_messages;
use crate::models::{Conversation, OutgoingMessage, Role, StoredMessage};
use crate::StoreConfig;
use anyhow::{Context, Result};
use sea_orm::sea_query::OnConflict;
use sea_orm::*;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Insert-or-update run on every send.
///
/// The recipient counter is carried in as 1 and the sender counter as 0, so a
/// fresh row starts at (1, 0) and an existing row adds them in place.
const UPSERT_ON_SEND: &str = r#"
    INSERT INTO conversations (
        id, student_id, student_name, alumni_id, alumni_name,
        last_message, last_message_time, last_message_sender,
        unread_student, unread_alumni, student_read_seq, alumni_read_seq,
        created_at, updated_at
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, 0, ?, ?)
    ON CONFLICT(id) DO UPDATE SET
        last_message = excluded.last_message,
        last_message_time = excluded.last_message_time,
        last_message_sender = excluded.last_message_sender,
        unread_student = conversations.unread_student + excluded.unread_student,
        unread_alumni = conversations.unread_alumni + excluded.unread_alumni,
        updated_at = excluded.updated_at
"#;

/// Conversation store
#[derive(Clone)]
pub struct ConversationStore {
    pub(crate) db: DatabaseConnection,
}

impl ConversationStore {
    /// Create a new conversation store
    pub async fn new(db_path: PathBuf) -> Result<Self> {
        let config = StoreConfig {
            db_path,
            ..Default::default()
        };
        let db = crate::open_database(&config.db_path, config.max_connections).await?;

        info!("Conversation store initialized at {}", config.db_path.display());

        Ok(Self { db })
    }

    /// Create a conversation store with an existing database connection
    pub fn with_connection(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Fold one send into the conversation summary, creating it if needed.
    ///
    /// `updated_at` follows the stored message timestamp, which is already
    /// monotonic per conversation.
    pub async fn record_send(&self, outgoing: &OutgoingMessage, sent: &StoredMessage) -> Result<()> {
        let sent_at = sent.timestamp.timestamp_millis();

        let (student, alumni) = match outgoing.sender_role {
            Role::Student => (
                (&outgoing.sender_id, &outgoing.sender_name),
                (&outgoing.recipient_id, &outgoing.recipient_name),
            ),
            Role::Alumni => (
                (&outgoing.recipient_id, &outgoing.recipient_name),
                (&outgoing.sender_id, &outgoing.sender_name),
            ),
        };

        let (unread_student, unread_alumni) = match outgoing.sender_role {
            Role::Student => (0, 1),
            Role::Alumni => (1, 0),
        };

        let stmt = Statement::from_sql_and_values(
            DbBackend::Sqlite,
            UPSERT_ON_SEND,
            [
                outgoing.conversation_id.clone().into(),
                student.0.clone().into(),
                student.1.clone().into(),
                alumni.0.clone().into(),
                alumni.1.clone().into(),
                sent.body.clone().into(),
                sent_at.into(),
                sent.sender_id.clone().into(),
                unread_student.into(),
                unread_alumni.into(),
                sent_at.into(),
                sent_at.into(),
            ],
        );

        self.db
            .execute(stmt)
            .await
            .context("Failed to upsert conversation summary")?;

        debug!(
            "Conversation {} summary updated by {}",
            outgoing.conversation_id, outgoing.sender_role
        );
        Ok(())
    }

    /// Get a single conversation by ID
    pub async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let conv = conversations::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await?;

        Ok(conv.map(Conversation::from))
    }

    /// Get the conversations a participant takes part in, most recently updated first
    pub async fn list_for_user(&self, user_id: &str, role: Role) -> Result<Vec<Conversation>> {
        let column = match role {
            Role::Student => conversations::Column::StudentId,
            Role::Alumni => conversations::Column::AlumniId,
        };

        let convs = conversations::Entity::find()
            .filter(column.eq(user_id))
            .order_by_desc(conversations::Column::UpdatedAt)
            .order_by_asc(conversations::Column::Id)
            .all(&self.db)
            .await?;

        Ok(convs.into_iter().map(Conversation::from).collect())
    }

    /// Reset one role's unread counter and move its read watermark to the
    /// latest message. Per-message read flags are left alone.
    ///
    /// Returns false if the conversation has no summary yet.
    pub async fn mark_read(&self, id: &str, role: Role) -> Result<bool> {
        let (counter, watermark) = match role {
            Role::Student => ("unread_student", "student_read_seq"),
            Role::Alumni => ("unread_alumni", "alumni_read_seq"),
        };

        let sql = format!(
            "UPDATE conversations SET {counter} = 0, \
             {watermark} = (SELECT COALESCE(MAX(seq), 0) FROM messages WHERE conversation_id = ?) \
             WHERE id = ?"
        );

        let result = self
            .db
            .execute(Statement::from_sql_and_values(
                DbBackend::Sqlite,
                sql,
                [id.into(), id.into()],
            ))
            .await
            .context("Failed to mark conversation as read")?;

        debug!("Conversation {} marked read by {}", id, role);
        Ok(result.rows_affected() > 0)
    }

    /// Recompute a summary from the message log.
    ///
    /// Unread counters become the number of messages from the other role past
    /// each role's read watermark. Returns None when the log is empty.
    pub async fn rebuild_summary(&self, id: &str) -> Result<Option<Conversation>> {
        let log = load_messages(&self.db, id).await?;
        let Some(last) = log.last() else {
            return Ok(None);
        };

        let existing = conversations::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await?;

        let (student_read_seq, alumni_read_seq) = existing
            .as_ref()
            .map(|m| (m.student_read_seq, m.alumni_read_seq))
            .unwrap_or((0, 0));

        let (student_id, student_name) = participant_from_log(&log, Role::Student, existing.as_ref(), id);
        let (alumni_id, alumni_name) = participant_from_log(&log, Role::Alumni, existing.as_ref(), id);

        let unread_student = log
            .iter()
            .filter(|m| m.sender_role == Role::Alumni && m.seq > student_read_seq)
            .count();
        let unread_alumni = log
            .iter()
            .filter(|m| m.sender_role == Role::Student && m.seq > alumni_read_seq)
            .count();

        let last_ts = last.timestamp.timestamp_millis();
        let created_at = existing
            .as_ref()
            .map(|m| m.created_at)
            .unwrap_or_else(|| log[0].timestamp.timestamp_millis());
        let updated_at = existing
            .as_ref()
            .map(|m| m.updated_at.max(last_ts))
            .unwrap_or(last_ts);

        let model = conversations::ActiveModel {
            id: Set(id.to_string()),
            student_id: Set(student_id),
            student_name: Set(student_name),
            alumni_id: Set(alumni_id),
            alumni_name: Set(alumni_name),
            last_message: Set(last.body.clone()),
            last_message_time: Set(last_ts),
            last_message_sender: Set(last.sender_id.clone()),
            unread_student: Set(i32::try_from(unread_student).unwrap_or(i32::MAX)),
            unread_alumni: Set(i32::try_from(unread_alumni).unwrap_or(i32::MAX)),
            student_read_seq: Set(student_read_seq),
            alumni_read_seq: Set(alumni_read_seq),
            created_at: Set(created_at),
            updated_at: Set(updated_at),
        };

        conversations::Entity::insert(model)
            .on_conflict(
                OnConflict::column(conversations::Column::Id)
                    .update_columns([
                        conversations::Column::StudentId,
                        conversations::Column::StudentName,
                        conversations::Column::AlumniId,
                        conversations::Column::AlumniName,
                        conversations::Column::LastMessage,
                        conversations::Column::LastMessageTime,
                        conversations::Column::LastMessageSender,
                        conversations::Column::UnreadStudent,
                        conversations::Column::UnreadAlumni,
                        conversations::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await
            .context("Failed to write rebuilt summary")?;

        info!("Rebuilt summary for conversation {}", id);
        self.get_conversation(id).await
    }

    /// Rebuild every conversation that has at least one message.
    ///
    /// Returns the number of summaries written.
    pub async fn rebuild_all(&self) -> Result<usize> {
        let ids: Vec<String> = messages::Entity::find()
            .select_only()
            .column(messages::Column::ConversationId)
            .distinct()
            .into_tuple()
            .all(&self.db)
            .await?;

        let mut rebuilt = 0;
        for id in ids {
            match self.rebuild_summary(&id).await {
                Ok(Some(_)) => rebuilt += 1,
                Ok(None) => {}
                Err(e) => warn!("Failed to rebuild conversation {}: {}", id, e),
            }
        }

        info!("Rebuilt {} conversation summaries", rebuilt);
        Ok(rebuilt)
    }
}

/// Work out one side's id and display name.
///
/// Prefers the latest message sent by that role, then the existing summary,
/// then the part of the conversation key left over once the other side's id
/// is stripped.
fn participant_from_log(
    log: &[StoredMessage],
    role: Role,
    existing: Option<&conversations::Model>,
    conversation_id: &str,
) -> (String, String) {
    if let Some(msg) = log.iter().rev().find(|m| m.sender_role == role) {
        return (msg.sender_id.clone(), msg.sender_name.clone());
    }

    if let Some(model) = existing {
        return match role {
            Role::Student => (model.student_id.clone(), model.student_name.clone()),
            Role::Alumni => (model.alumni_id.clone(), model.alumni_name.clone()),
        };
    }

    let other = log
        .iter()
        .find(|m| m.sender_role == role.counterpart())
        .map(|m| m.sender_id.as_str())
        .unwrap_or_default();

    let id = match role {
        Role::Student => conversation_id
            .strip_suffix(other)
            .and_then(|rest| rest.strip_suffix(crate::conversation_id::SEPARATOR)),
        Role::Alumni => conversation_id
            .strip_prefix(other)
            .and_then(|rest| rest.strip_prefix(crate::conversation_id::SEPARATOR)),
    }
    .unwrap_or(conversation_id)
    .to_string();

    (id.clone(), id)
}
