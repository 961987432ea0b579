//! Chat service - what a chat window talks to

use crate::config::{Backend, ChatConfig};
use crate::error::ChatError;
use crate::models::{ChatMessage, ChatSubscription, Participant, Unsubscribe};
use crate::repository::{ConversationRepository, LocalRepository, RemoteRepository};
use futures::StreamExt;
use slumini_store::{Conversation, ConversationId, LocalChatStore, LocalStore, MessageStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Chat operations on behalf of one signed-in participant
#[derive(Clone)]
pub struct ChatService {
    repository: Arc<dyn ConversationRepository>,
    me: Participant,
}

impl ChatService {
    /// Open the repository selected by `config.backend`
    pub async fn open(config: &ChatConfig, me: Participant) -> Result<Self, ChatError> {
        let repository: Arc<dyn ConversationRepository> = match config.backend {
            Backend::Remote => {
                let store = MessageStore::with_config(config.store.clone()).await?;
                Arc::new(RemoteRepository::new(store))
            }
            Backend::Local => {
                let local = LocalStore::open(config.store.local_db_path.clone()).await?;
                Arc::new(LocalRepository::new(LocalChatStore::with_poll_interval(
                    local,
                    Duration::from_millis(config.store.local_poll_interval_ms),
                )))
            }
        };

        info!(
            "Chat service for {} ({}) using the {} backend",
            me.id, me.role, config.backend
        );

        Ok(Self::with_repository(repository, me))
    }

    pub fn with_repository(repository: Arc<dyn ConversationRepository>, me: Participant) -> Self {
        Self { repository, me }
    }

    pub fn me(&self) -> &Participant {
        &self.me
    }

    pub fn backend(&self) -> Backend {
        self.repository.backend()
    }

    /// Canonical id of the conversation with `other_id` in the primary store
    pub fn conversation_id(&self, other_id: &str) -> Result<ConversationId, ChatError> {
        ConversationId::between(&self.me.id, self.me.role, other_id)
            .map_err(|e| ChatError::InvalidParticipant(e.to_string()))
    }

    /// Send `body` to `to`.
    ///
    /// Blank bodies are rejected. A successful send also acknowledges what
    /// the sender has received in the conversation.
    pub async fn send(&self, to: &Participant, body: &str) -> Result<String, ChatError> {
        if body.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        if to.role == self.me.role {
            return Err(ChatError::InvalidParticipant(format!(
                "{} cannot message another {}",
                self.me.role, to.role
            )));
        }

        let id = self.repository.send(&self.me, to, body).await?;
        debug!("{} sent message {} to {}", self.me.id, id, to.id);

        // Replying means the sender has seen the thread. A failed send leaves
        // the sender's unread state untouched.
        if let Err(e) = self.repository.mark_read(&self.me, &to.id).await {
            warn!("Could not acknowledge conversation with {}: {}", to.id, e);
        }

        Ok(id)
    }

    pub async fn messages(&self, other_id: &str) -> Result<Vec<ChatMessage>, ChatError> {
        self.repository.messages(&self.me, other_id).await
    }

    pub async fn subscribe(&self, other_id: &str) -> Result<ChatSubscription, ChatError> {
        self.repository.subscribe(&self.me, other_id).await
    }

    /// Deliver every snapshot to `on_update` until the returned handle is
    /// dropped or a subscription error has been delivered.
    pub async fn subscribe_with<F>(&self, other_id: &str, mut on_update: F) -> Result<Unsubscribe, ChatError>
    where
        F: FnMut(Result<Vec<ChatMessage>, ChatError>) + Send + 'static,
    {
        let mut subscription = self.subscribe(other_id).await?;

        let task = tokio::spawn(async move {
            while let Some(snapshot) = subscription.next().await {
                let failed = snapshot.is_err();
                on_update(snapshot);
                if failed {
                    break;
                }
            }
        });

        Ok(Unsubscribe::new(task))
    }

    pub async fn conversations(&self) -> Result<Vec<Conversation>, ChatError> {
        self.repository.conversations(&self.me).await
    }

    pub async fn mark_read(&self, other_id: &str) -> Result<(), ChatError> {
        self.repository.mark_read(&self.me, other_id).await
    }

    pub async fn clear(&self, other_id: &str) -> Result<(), ChatError> {
        self.repository.clear(&self.me, other_id).await
    }
}
