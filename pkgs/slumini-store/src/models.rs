//! Domain types for stored conversations and messages

use crate::entities::{conversations, messages};
use anyhow::{bail, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Participant role in a conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Alumni,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Alumni => "alumni",
        }
    }

    /// The other party of a two-party conversation
    pub fn counterpart(self) -> Role {
        match self {
            Role::Student => Role::Alumni,
            Role::Alumni => Role::Student,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "student" => Ok(Role::Student),
            "alumni" => Ok(Role::Alumni),
            other => bail!("Unknown role: {}", other),
        }
    }
}

/// A message to append to a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_role: Role,
    pub body: String,
    pub recipient_id: String,
    pub recipient_name: String,
}

/// Stored message (persistent)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    /// Per-conversation sequence number, breaks timestamp ties
    pub seq: i64,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_role: Role,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
    pub read_at: Option<DateTime<Utc>>,
}

impl TryFrom<messages::Model> for StoredMessage {
    type Error = anyhow::Error;

    fn try_from(model: messages::Model) -> Result<Self> {
        Ok(Self {
            sender_role: model.sender_role.parse()?,
            id: model.id,
            conversation_id: model.conversation_id,
            seq: model.seq,
            sender_id: model.sender_id,
            sender_name: model.sender_name,
            body: model.body,
            timestamp: millis_to_datetime(model.timestamp),
            read: model.read,
            read_at: model.read_at.map(millis_to_datetime),
        })
    }
}

/// Both parties of a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Participants {
    pub student_id: String,
    pub student_name: String,
    pub alumni_id: String,
    pub alumni_name: String,
}

impl Participants {
    pub fn id_of(&self, role: Role) -> &str {
        match role {
            Role::Student => &self.student_id,
            Role::Alumni => &self.alumni_id,
        }
    }

    pub fn name_of(&self, role: Role) -> &str {
        match role {
            Role::Student => &self.student_name,
            Role::Alumni => &self.alumni_name,
        }
    }
}

/// Unread counters per role
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnreadCount {
    pub student: u32,
    pub alumni: u32,
}

impl UnreadCount {
    pub fn get(&self, role: Role) -> u32 {
        match role {
            Role::Student => self.student,
            Role::Alumni => self.alumni,
        }
    }
}

/// Conversation summary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub participants: Participants,
    pub last_message: String,
    pub last_message_time: DateTime<Utc>,
    pub last_message_sender: String,
    pub unread_count: UnreadCount,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<conversations::Model> for Conversation {
    fn from(model: conversations::Model) -> Self {
        Self {
            id: model.id,
            participants: Participants {
                student_id: model.student_id,
                student_name: model.student_name,
                alumni_id: model.alumni_id,
                alumni_name: model.alumni_name,
            },
            last_message: model.last_message,
            last_message_time: millis_to_datetime(model.last_message_time),
            last_message_sender: model.last_message_sender,
            unread_count: UnreadCount {
                student: u32::try_from(model.unread_student).unwrap_or(0),
                alumni: u32::try_from(model.unread_alumni).unwrap_or(0),
            },
            created_at: millis_to_datetime(model.created_at),
            updated_at: millis_to_datetime(model.updated_at),
        }
    }
}

pub(crate) fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_default()
}
