//! Conversation repositories
//!
//! Call sites talk to [`ConversationRepository`] only. The remote and local
//! implementations use different key schemes and never share data.

use crate::config::Backend;
use crate::error::ChatError;
use crate::models::{ChatMessage, ChatSubscription, Participant};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::StreamExt;
use slumini_store::{
    Conversation, ConversationId, LocalChatStore, LocalPair, MessageStore, OutgoingMessage,
    Participants, UnreadCount,
};
use tracing::debug;

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    fn backend(&self) -> Backend;

    /// Append a message from `from` to `to`. Returns the new message id.
    async fn send(&self, from: &Participant, to: &Participant, body: &str) -> Result<String, ChatError>;

    /// Messages between `me` and `other_id`, oldest first
    async fn messages(&self, me: &Participant, other_id: &str) -> Result<Vec<ChatMessage>, ChatError>;

    /// Live view of the conversation between `me` and `other_id`
    async fn subscribe(&self, me: &Participant, other_id: &str) -> Result<ChatSubscription, ChatError>;

    /// Conversations `me` takes part in, most recently updated first
    async fn conversations(&self, me: &Participant) -> Result<Vec<Conversation>, ChatError>;

    /// Acknowledge everything `me` has received from `other_id`
    async fn mark_read(&self, me: &Participant, other_id: &str) -> Result<(), ChatError>;

    /// Delete the whole conversation
    async fn clear(&self, me: &Participant, other_id: &str) -> Result<(), ChatError>;
}

/// Repository over the primary [`MessageStore`]
#[derive(Clone)]
pub struct RemoteRepository {
    store: MessageStore,
}

impl RemoteRepository {
    pub fn new(store: MessageStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    fn conversation_id(me: &Participant, other_id: &str) -> Result<ConversationId, ChatError> {
        ConversationId::between(&me.id, me.role, other_id)
            .map_err(|e| ChatError::InvalidParticipant(e.to_string()))
    }
}

#[async_trait]
impl ConversationRepository for RemoteRepository {
    fn backend(&self) -> Backend {
        Backend::Remote
    }

    async fn send(&self, from: &Participant, to: &Participant, body: &str) -> Result<String, ChatError> {
        let conversation_id = Self::conversation_id(from, &to.id)?;

        self.store
            .append(OutgoingMessage {
                conversation_id: conversation_id.into(),
                sender_id: from.id.clone(),
                sender_name: from.name.clone(),
                sender_role: from.role,
                body: body.to_string(),
                recipient_id: to.id.clone(),
                recipient_name: to.name.clone(),
            })
            .await
            .map_err(ChatError::SendFailure)
    }

    async fn messages(&self, me: &Participant, other_id: &str) -> Result<Vec<ChatMessage>, ChatError> {
        let conversation_id = Self::conversation_id(me, other_id)?;

        let messages = self
            .store
            .list_messages(conversation_id.as_str())
            .await
            .map_err(ChatError::ReadFailure)?;

        Ok(messages.into_iter().map(ChatMessage::from).collect())
    }

    async fn subscribe(&self, me: &Participant, other_id: &str) -> Result<ChatSubscription, ChatError> {
        let conversation_id = Self::conversation_id(me, other_id)?;

        let stream = self.store.subscribe(conversation_id.as_str()).map(|snapshot| {
            snapshot
                .map(|messages| messages.into_iter().map(ChatMessage::from).collect())
                .map_err(ChatError::SubscriptionError)
        });

        Ok(ChatSubscription::new(stream))
    }

    async fn conversations(&self, me: &Participant) -> Result<Vec<Conversation>, ChatError> {
        self.store
            .conversations()
            .list_for_user(&me.id, me.role)
            .await
            .map_err(ChatError::ReadFailure)
    }

    async fn mark_read(&self, me: &Participant, other_id: &str) -> Result<(), ChatError> {
        let conversation_id = Self::conversation_id(me, other_id)?;

        let found = self
            .store
            .conversations()
            .mark_read(conversation_id.as_str(), me.role)
            .await
            .map_err(ChatError::UpdateFailure)?;

        if !found {
            debug!("No summary for {} yet, nothing to mark read", conversation_id);
        }
        Ok(())
    }

    async fn clear(&self, _me: &Participant, _other_id: &str) -> Result<(), ChatError> {
        // The message log is append-only
        Err(ChatError::Unsupported(Backend::Remote))
    }
}

/// Repository over the client-local fallback store
#[derive(Clone)]
pub struct LocalRepository {
    chat: LocalChatStore,
}

impl LocalRepository {
    pub fn new(chat: LocalChatStore) -> Self {
        Self { chat }
    }

    pub fn chat(&self) -> &LocalChatStore {
        &self.chat
    }

    fn pair(me: &Participant, other_id: &str) -> Result<LocalPair, ChatError> {
        Ok(LocalPair::between(
            numeric_id(&me.id)?,
            me.role,
            numeric_id(other_id)?,
        ))
    }
}

/// Local keys are built from numeric ids only
fn numeric_id(id: &str) -> Result<u64, ChatError> {
    id.trim()
        .parse()
        .map_err(|_| ChatError::InvalidParticipant(format!("'{}' is not a numeric id", id)))
}

#[async_trait]
impl ConversationRepository for LocalRepository {
    fn backend(&self) -> Backend {
        Backend::Local
    }

    async fn send(&self, from: &Participant, to: &Participant, body: &str) -> Result<String, ChatError> {
        let pair = Self::pair(from, &to.id)?;

        let message = self
            .chat
            .send(pair, from.role, body)
            .await
            .map_err(ChatError::SendFailure)?;

        Ok(message.id)
    }

    async fn messages(&self, me: &Participant, other_id: &str) -> Result<Vec<ChatMessage>, ChatError> {
        let pair = Self::pair(me, other_id)?;

        let messages = self.chat.load(pair).await.map_err(ChatError::ReadFailure)?;

        Ok(messages
            .into_iter()
            .map(|m| ChatMessage::from_local(pair, m))
            .collect())
    }

    async fn subscribe(&self, me: &Participant, other_id: &str) -> Result<ChatSubscription, ChatError> {
        let pair = Self::pair(me, other_id)?;

        let stream = self.chat.watch(pair).map(move |snapshot| {
            snapshot
                .map(|messages| {
                    messages
                        .into_iter()
                        .map(|m| ChatMessage::from_local(pair, m))
                        .collect()
                })
                .map_err(ChatError::SubscriptionError)
        });

        Ok(ChatSubscription::new(stream))
    }

    async fn conversations(&self, me: &Participant) -> Result<Vec<Conversation>, ChatError> {
        let my_id = numeric_id(&me.id)?;
        let pairs = self
            .chat
            .conversations_for(my_id, me.role)
            .await
            .map_err(ChatError::ReadFailure)?;

        let mut conversations = Vec::with_capacity(pairs.len());
        for pair in pairs {
            let messages = self.chat.load(pair).await.map_err(ChatError::ReadFailure)?;
            if let Some(summary) = summarize_local(pair, &messages) {
                conversations.push(summary);
            }
        }

        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }

    async fn mark_read(&self, me: &Participant, other_id: &str) -> Result<(), ChatError> {
        // No unread tracking on the local path
        Self::pair(me, other_id)?;
        Ok(())
    }

    async fn clear(&self, me: &Participant, other_id: &str) -> Result<(), ChatError> {
        let pair = Self::pair(me, other_id)?;
        self.chat.clear(pair).await.map_err(ChatError::UpdateFailure)
    }
}

/// Build a summary view of a local conversation. Unread counts are always zero.
fn summarize_local(pair: LocalPair, messages: &[slumini_store::LocalMessage]) -> Option<Conversation> {
    let first = messages.first()?;
    let last = messages.last()?;

    let to_time = |millis: i64| Utc.timestamp_millis_opt(millis).single().unwrap_or_default();
    let student_id = pair.student_id.to_string();
    let alumni_id = pair.alumni_id.to_string();

    Some(Conversation {
        id: pair.key(),
        participants: Participants {
            student_name: student_id.clone(),
            student_id,
            alumni_name: alumni_id.clone(),
            alumni_id,
        },
        last_message: last.text.clone(),
        last_message_time: to_time(last.timestamp),
        last_message_sender: pair.id_of(last.sender).to_string(),
        unread_count: UnreadCount::default(),
        created_at: to_time(first.timestamp),
        updated_at: to_time(last.timestamp),
    })
}
