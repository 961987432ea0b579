//! Slumini Chat - student/alumni messaging
//!
//! [`ChatService`] is the entry point for a signed-in participant. It talks to
//! a [`ConversationRepository`] chosen once at startup:
//!
//! - [`RemoteRepository`]: primary message store with conversation summaries,
//!   unread counters and live subscriptions
//! - [`LocalRepository`]: client-local fallback keyed by numeric ids, no
//!   unread tracking
//!
//! The two repositories never share data. [`import_local_conversation`] moves
//! a local conversation into the primary store.

mod config;
mod error;
mod import;
mod models;
mod repository;
mod service;

pub use config::{Backend, ChatConfig};
pub use error::ChatError;
pub use import::import_local_conversation;
pub use models::{ChatMessage, ChatSubscription, Participant, Unsubscribe};
pub use repository::{ConversationRepository, LocalRepository, RemoteRepository};
pub use service::ChatService;

pub use slumini_store::{Conversation, ConversationId, Role, UnreadCount};
