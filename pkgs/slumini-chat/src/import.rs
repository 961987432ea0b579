//! One-time import of a local conversation into the primary store

use crate::error::ChatError;
use crate::models::Participant;
use slumini_store::{ConversationId, LocalChatStore, LocalPair, MessageStore, OutgoingMessage, Role};
use tracing::info;

/// Copy a local conversation into the message store, oldest first.
///
/// `student` and `alumni` give the primary-store identities of the two local
/// numeric ids. Imported messages get new store timestamps; order is kept by
/// sequence number. The local copy is removed only when `clear_local` is set
/// and every message went through.
pub async fn import_local_conversation(
    local: &LocalChatStore,
    remote: &MessageStore,
    pair: LocalPair,
    student: &Participant,
    alumni: &Participant,
    clear_local: bool,
) -> Result<usize, ChatError> {
    if student.role != Role::Student || alumni.role != Role::Alumni {
        return Err(ChatError::InvalidParticipant(
            "import needs one student and one alumni".to_string(),
        ));
    }

    let conversation_id = ConversationId::between(&student.id, Role::Student, &alumni.id)
        .map_err(|e| ChatError::InvalidParticipant(e.to_string()))?;

    let messages = local.load(pair).await.map_err(ChatError::ReadFailure)?;

    for msg in &messages {
        let (from, to) = match msg.sender {
            Role::Student => (student, alumni),
            Role::Alumni => (alumni, student),
        };

        remote
            .append(OutgoingMessage {
                conversation_id: conversation_id.to_string(),
                sender_id: from.id.clone(),
                sender_name: from.name.clone(),
                sender_role: from.role,
                body: msg.text.clone(),
                recipient_id: to.id.clone(),
                recipient_name: to.name.clone(),
            })
            .await
            .map_err(ChatError::SendFailure)?;
    }

    if clear_local {
        local.clear(pair).await.map_err(ChatError::UpdateFailure)?;
    }

    info!(
        "Imported {} local messages from {} into {}",
        messages.len(),
        pair.key(),
        conversation_id
    );
    Ok(messages.len())
}
