//! Conversation identity - canonical key for a student/alumni pair
//!
//! The key is ordered by role, never by call order: the student id always
//! comes first. Participant ids are wrapped in role-tagged newtypes so a
//! swapped call does not compile.

use crate::models::Role;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator placed between the student id and the alumni id
pub const SEPARATOR: char = '_';

/// Identifier of a student-role participant
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentId(String);

impl StudentId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            bail!("Student id must not be empty");
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identifier of an alumni-role participant
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlumniId(String);

impl AlumniId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            bail!("Alumni id must not be empty");
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Canonical conversation key, `"{student_id}_{alumni_id}"`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Build the key for a student/alumni pair
    pub fn resolve(student: &StudentId, alumni: &AlumniId) -> Self {
        Self(format!("{}{}{}", student.as_str(), SEPARATOR, alumni.as_str()))
    }

    /// Build the key from the caller's point of view.
    ///
    /// `my_role` decides which of the two ids is the student, so both parties
    /// land on the same key whoever opens the conversation.
    pub fn between(my_id: &str, my_role: Role, other_id: &str) -> Result<Self> {
        let id = match my_role {
            Role::Student => Self::resolve(&StudentId::new(my_id)?, &AlumniId::new(other_id)?),
            Role::Alumni => Self::resolve(&StudentId::new(other_id)?, &AlumniId::new(my_id)?),
        };
        Ok(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ConversationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<ConversationId> for String {
    fn from(id: ConversationId) -> Self {
        id.0
    }
}
