//! Sea-ORM entities for slumini-store

pub mod conversations;
pub mod local_kv;
pub mod messages;

pub use conversations::Entity as Conversations;
pub use local_kv::Entity as LocalKv;
pub use messages::Entity as Messages;
