// Copyright 2025 Slumini Team.
//
// Tests for MessageStore and ConversationStore

use sea_orm::{ConnectionTrait, EntityTrait};
use slumini_store::entities::conversations;
use slumini_store::{
    open_database, AlumniId, ConversationId, MessageStore, OutgoingMessage, Role, StoreConfig,
    StudentId,
};
use std::time::Duration;
use tempfile::NamedTempFile;

const STUDENT: &str = "s1@x.edu";
const ALUMNI: &str = "a1@y.com";

async fn create_store(temp_file: &NamedTempFile) -> MessageStore {
    MessageStore::new(temp_file.path().to_path_buf())
        .await
        .expect("Failed to create message store")
}

fn conversation_id() -> String {
    ConversationId::resolve(
        &StudentId::new(STUDENT).unwrap(),
        &AlumniId::new(ALUMNI).unwrap(),
    )
    .to_string()
}

fn from_student(body: &str) -> OutgoingMessage {
    OutgoingMessage {
        conversation_id: conversation_id(),
        sender_id: STUDENT.to_string(),
        sender_name: "Sam".to_string(),
        sender_role: Role::Student,
        body: body.to_string(),
        recipient_id: ALUMNI.to_string(),
        recipient_name: "Ada".to_string(),
    }
}

fn from_alumni(body: &str) -> OutgoingMessage {
    OutgoingMessage {
        conversation_id: conversation_id(),
        sender_id: ALUMNI.to_string(),
        sender_name: "Ada".to_string(),
        sender_role: Role::Alumni,
        body: body.to_string(),
        recipient_id: STUDENT.to_string(),
        recipient_name: "Sam".to_string(),
    }
}

#[tokio::test]
async fn test_append_and_list_in_order() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_store(&temp_file).await;

    for body in ["m1", "m2", "m3"] {
        store.append(from_student(body)).await.unwrap();
    }

    let messages = store.list_messages(&conversation_id()).await.unwrap();
    let bodies: Vec<_> = messages.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, vec!["m1", "m2", "m3"]);

    let seqs: Vec<_> = messages.iter().map(|m| m.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3]);

    for pair in messages.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
    assert!(messages.iter().all(|m| !m.read));
}

#[tokio::test]
async fn test_append_returns_stored_id() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_store(&temp_file).await;

    let id = store.append(from_alumni("Welcome")).await.unwrap();
    let stored = store.get_message(&id).await.unwrap().unwrap();

    assert_eq!(stored.body, "Welcome");
    assert_eq!(stored.sender_role, Role::Alumni);
    assert_eq!(stored.sender_name, "Ada");
    assert_eq!(stored.conversation_id, conversation_id());
}

#[tokio::test]
async fn test_empty_conversation_lists_nothing() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_store(&temp_file).await;

    assert!(store.list_messages("nobody_here").await.unwrap().is_empty());
    assert!(store
        .conversations()
        .get_conversation("nobody_here")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_unread_accumulates_for_recipient() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_store(&temp_file).await;

    for i in 0..4 {
        store.append(from_alumni(&format!("tip {}", i))).await.unwrap();
    }

    let conv = store
        .conversations()
        .get_conversation(&conversation_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conv.unread_count.student, 4);
    assert_eq!(conv.unread_count.alumni, 0);
    assert_eq!(conv.last_message, "tip 3");
    assert_eq!(conv.last_message_sender, ALUMNI);

    let found = store
        .conversations()
        .mark_read(&conversation_id(), Role::Student)
        .await
        .unwrap();
    assert!(found);

    let conv = store
        .conversations()
        .get_conversation(&conversation_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conv.unread_count.student, 0);
    assert_eq!(conv.unread_count.alumni, 0);
}

#[tokio::test]
async fn test_sender_counter_left_unchanged() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_store(&temp_file).await;

    store.append(from_student("Hello")).await.unwrap();
    store.append(from_alumni("Hi there")).await.unwrap();

    let conv = store
        .conversations()
        .get_conversation(&conversation_id())
        .await
        .unwrap()
        .unwrap();

    // The reply does not clear the alumni's own counter
    assert_eq!(conv.unread_count.alumni, 1);
    assert_eq!(conv.unread_count.student, 1);
    assert_eq!(conv.last_message, "Hi there");
    assert_eq!(conv.participants.student_id, STUDENT);
    assert_eq!(conv.participants.student_name, "Sam");
    assert_eq!(conv.participants.alumni_id, ALUMNI);
    assert_eq!(conv.participants.alumni_name, "Ada");
}

#[tokio::test]
async fn test_mark_read_on_missing_conversation() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_store(&temp_file).await;

    let found = store
        .conversations()
        .mark_read("missing_pair", Role::Alumni)
        .await
        .unwrap();
    assert!(!found);
}

#[tokio::test]
async fn test_concurrent_first_sends_create_one_summary() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_store(&temp_file).await;

    let (a, b) = tokio::join!(
        store.append(from_student("first?")),
        store.append(from_alumni("no, me first"))
    );
    a.unwrap();
    b.unwrap();

    let for_student = store
        .conversations()
        .list_for_user(STUDENT, Role::Student)
        .await
        .unwrap();
    assert_eq!(for_student.len(), 1);

    let all = conversations::Entity::find()
        .all(&open_database(temp_file.path(), 1).await.unwrap())
        .await
        .unwrap();
    assert_eq!(all.len(), 1);

    let conv = &for_student[0];
    assert_eq!(conv.unread_count.student, 1);
    assert_eq!(conv.unread_count.alumni, 1);
    assert_eq!(store.list_messages(&conv.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_list_for_user_most_recent_first() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_store(&temp_file).await;

    let mut older = from_alumni("first pair");
    older.conversation_id = "s2@x.edu_a1@y.com".to_string();
    older.recipient_id = "s2@x.edu".to_string();
    older.recipient_name = "Sue".to_string();

    store.append(older).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    store.append(from_alumni("second pair")).await.unwrap();

    let convs = store
        .conversations()
        .list_for_user(ALUMNI, Role::Alumni)
        .await
        .unwrap();
    let ids: Vec<_> = convs.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["s1@x.edu_a1@y.com", "s2@x.edu_a1@y.com"]);

    let for_sue = store
        .conversations()
        .list_for_user("s2@x.edu", Role::Student)
        .await
        .unwrap();
    assert_eq!(for_sue.len(), 1);
    assert_eq!(for_sue[0].participants.student_name, "Sue");

    // Ids only match the role they were stored under
    assert!(store
        .conversations()
        .list_for_user(ALUMNI, Role::Student)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_message_read_flag_independent_of_counters() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_store(&temp_file).await;

    let id = store.append(from_student("ping")).await.unwrap();
    assert!(store.mark_message_read(&id).await.unwrap());
    assert!(!store.mark_message_read("no-such-id").await.unwrap());

    let stored = store.get_message(&id).await.unwrap().unwrap();
    assert!(stored.read);
    assert!(stored.read_at.is_some());

    let conv = store
        .conversations()
        .get_conversation(&conversation_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conv.unread_count.alumni, 1);
}

#[tokio::test]
async fn test_subscription_delivers_full_snapshots() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_store(&temp_file).await;

    store.append(from_student("before")).await.unwrap();

    let mut sub = store.subscribe(&conversation_id());
    assert_eq!(sub.conversation_id(), conversation_id());

    let initial = tokio::time::timeout(Duration::from_secs(5), sub.next_snapshot())
        .await
        .expect("no initial snapshot")
        .unwrap()
        .unwrap();
    assert_eq!(initial.len(), 1);

    store.append(from_alumni("after")).await.unwrap();

    let updated = tokio::time::timeout(Duration::from_secs(5), sub.next_snapshot())
        .await
        .expect("no update snapshot")
        .unwrap()
        .unwrap();
    let bodies: Vec<_> = updated.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, vec!["before", "after"]);

    sub.unsubscribe();
    store.append(from_student("unobserved")).await.unwrap();
    assert_eq!(store.list_messages(&conversation_id()).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_subscription_ignores_other_conversations() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_store(&temp_file).await;

    let mut sub = store.subscribe(&conversation_id());
    let initial = sub.next_snapshot().await.unwrap().unwrap();
    assert!(initial.is_empty());

    let mut elsewhere = from_student("elsewhere");
    elsewhere.conversation_id = "s1@x.edu_a9@y.com".to_string();
    store.append(elsewhere).await.unwrap();

    let quiet = tokio::time::timeout(Duration::from_millis(200), sub.next_snapshot()).await;
    assert!(quiet.is_err(), "unrelated append must not produce a snapshot");
}

#[tokio::test]
async fn test_rebuild_summary_from_log() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = open_database(temp_file.path(), 1).await.unwrap();
    let store = MessageStore::with_connection(db.clone(), 16);

    store.append(from_student("one")).await.unwrap();
    store.append(from_student("two")).await.unwrap();
    store
        .conversations()
        .mark_read(&conversation_id(), Role::Alumni)
        .await
        .unwrap();
    store.append(from_student("three")).await.unwrap();
    store.append(from_alumni("reply")).await.unwrap();

    let before = store
        .conversations()
        .get_conversation(&conversation_id())
        .await
        .unwrap()
        .unwrap();

    conversations::Entity::delete_by_id(conversation_id())
        .exec(&db)
        .await
        .unwrap();

    let rebuilt = store
        .conversations()
        .rebuild_summary(&conversation_id())
        .await
        .unwrap()
        .unwrap();

    // Watermarks went with the row, so every message from the other side counts
    assert_eq!(rebuilt.unread_count.alumni, 3);
    assert_eq!(rebuilt.unread_count.student, 1);
    assert_eq!(rebuilt.last_message, "reply");
    assert_eq!(rebuilt.participants, before.participants);

    // With the row present, watermarks are honoured
    let again = store
        .conversations()
        .rebuild_summary(&conversation_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(again.unread_count, rebuilt.unread_count);
}

#[tokio::test]
async fn test_rebuild_keeps_read_watermark() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_store(&temp_file).await;

    store.append(from_student("one")).await.unwrap();
    store.append(from_student("two")).await.unwrap();
    store
        .conversations()
        .mark_read(&conversation_id(), Role::Alumni)
        .await
        .unwrap();
    store.append(from_student("three")).await.unwrap();

    let rebuilt = store
        .conversations()
        .rebuild_summary(&conversation_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rebuilt.unread_count.alumni, 1);
    assert_eq!(rebuilt.unread_count.student, 0);
}

#[tokio::test]
async fn test_rebuild_infers_silent_participant_from_key() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = open_database(temp_file.path(), 1).await.unwrap();
    let store = MessageStore::with_connection(db.clone(), 16);

    store.append(from_alumni("anyone there?")).await.unwrap();
    conversations::Entity::delete_by_id(conversation_id())
        .exec(&db)
        .await
        .unwrap();

    let rebuilt = store
        .conversations()
        .rebuild_summary(&conversation_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rebuilt.participants.student_id, STUDENT);
    assert_eq!(rebuilt.participants.alumni_id, ALUMNI);
    assert_eq!(rebuilt.unread_count.student, 1);
}

#[tokio::test]
async fn test_rebuild_all_and_empty_log() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_store(&temp_file).await;

    assert!(store
        .conversations()
        .rebuild_summary("nothing_here")
        .await
        .unwrap()
        .is_none());

    store.append(from_student("a")).await.unwrap();
    let mut other = from_student("b");
    other.conversation_id = "s1@x.edu_a2@y.com".to_string();
    other.recipient_id = "a2@y.com".to_string();
    store.append(other).await.unwrap();

    assert_eq!(store.conversations().rebuild_all().await.unwrap(), 2);
}

async fn create_polling_store(temp_file: &NamedTempFile) -> MessageStore {
    MessageStore::with_config(StoreConfig {
        db_path: temp_file.path().to_path_buf(),
        poll_interval_ms: 20,
        ..Default::default()
    })
    .await
    .expect("Failed to create message store")
}

#[tokio::test]
async fn test_subscription_sees_appends_from_other_handle() {
    let temp_file = NamedTempFile::new().unwrap();
    let watcher = create_polling_store(&temp_file).await;
    let writer = create_store(&temp_file).await;

    let mut sub = watcher.subscribe(&conversation_id());
    assert!(sub.next_snapshot().await.unwrap().unwrap().is_empty());

    let id = writer.append(from_student("hello")).await.unwrap();

    let seen = tokio::time::timeout(Duration::from_secs(3), sub.next_snapshot())
        .await
        .expect("append through another handle not delivered")
        .unwrap()
        .unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].body, "hello");

    writer.mark_message_read(&id).await.unwrap();

    let seen = tokio::time::timeout(Duration::from_secs(3), sub.next_snapshot())
        .await
        .expect("read flag set through another handle not delivered")
        .unwrap()
        .unwrap();
    assert!(seen[0].read);

    // Nothing changed since, polling must stay quiet
    let quiet = tokio::time::timeout(Duration::from_millis(200), sub.next_snapshot()).await;
    assert!(quiet.is_err());
}

#[tokio::test]
async fn test_local_append_not_delivered_twice_by_polling() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_polling_store(&temp_file).await;

    let mut sub = store.subscribe(&conversation_id());
    assert!(sub.next_snapshot().await.unwrap().unwrap().is_empty());

    store.append(from_student("once")).await.unwrap();

    let seen = tokio::time::timeout(Duration::from_secs(3), sub.next_snapshot())
        .await
        .expect("no snapshot after append")
        .unwrap()
        .unwrap();
    assert_eq!(seen.len(), 1);

    let quiet = tokio::time::timeout(Duration::from_millis(200), sub.next_snapshot()).await;
    assert!(quiet.is_err(), "polling repeated an already delivered snapshot");
}

#[tokio::test]
async fn test_summary_failure_keeps_message_and_rebuild_repairs() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_store(&temp_file).await;
    store.append(from_student("one")).await.unwrap();

    let admin = open_database(temp_file.path(), 1).await.unwrap();
    admin
        .execute_unprepared(
            "CREATE TRIGGER block_summary_insert BEFORE INSERT ON conversations \
             BEGIN SELECT RAISE(ABORT, 'summary locked'); END;",
        )
        .await
        .unwrap();
    admin
        .execute_unprepared(
            "CREATE TRIGGER block_summary_update BEFORE UPDATE ON conversations \
             BEGIN SELECT RAISE(ABORT, 'summary locked'); END;",
        )
        .await
        .unwrap();

    assert!(store.append(from_alumni("two")).await.is_err());

    // The message is in the log even though its summary update failed
    let bodies: Vec<_> = store
        .list_messages(&conversation_id())
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.body)
        .collect();
    assert_eq!(bodies, vec!["one", "two"]);

    let stale = store
        .conversations()
        .get_conversation(&conversation_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stale.last_message, "one");
    assert_eq!(stale.unread_count.student, 0);

    for trigger in ["block_summary_insert", "block_summary_update"] {
        admin
            .execute_unprepared(&format!("DROP TRIGGER {}", trigger))
            .await
            .unwrap();
    }

    let repaired = store
        .conversations()
        .rebuild_summary(&conversation_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(repaired.last_message, "two");
    assert_eq!(repaired.last_message_sender, ALUMNI);
    assert_eq!(repaired.unread_count.student, 1);
    assert_eq!(repaired.unread_count.alumni, 1);
}

#[tokio::test]
async fn test_summary_times_follow_message_timestamp() {
    let temp_file = NamedTempFile::new().unwrap();
    let store = create_store(&temp_file).await;

    let first = store.append(from_student("first")).await.unwrap();
    let first = store.get_message(&first).await.unwrap().unwrap();

    let conv = store
        .conversations()
        .get_conversation(&conversation_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conv.created_at, first.timestamp);
    assert_eq!(conv.updated_at, first.timestamp);
    assert_eq!(conv.last_message_time, first.timestamp);

    let second = store.append(from_alumni("second")).await.unwrap();
    let second = store.get_message(&second).await.unwrap().unwrap();

    let conv = store
        .conversations()
        .get_conversation(&conversation_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conv.created_at, first.timestamp);
    assert_eq!(conv.updated_at, second.timestamp);
    assert_eq!(conv.updated_at, conv.last_message_time);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_from_two_handles_get_distinct_seqs() {
    let temp_file = NamedTempFile::new().unwrap();
    let first = create_store(&temp_file).await;
    let second = create_store(&temp_file).await;

    let mut handles = Vec::new();
    for i in 0..10 {
        let first = first.clone();
        handles.push(tokio::spawn(async move {
            first.append(from_student(&format!("s{}", i))).await
        }));
        let second = second.clone();
        handles.push(tokio::spawn(async move {
            second.append(from_alumni(&format!("a{}", i))).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let messages = first.list_messages(&conversation_id()).await.unwrap();
    let mut seqs: Vec<_> = messages.iter().map(|m| m.seq).collect();
    seqs.sort();
    assert_eq!(seqs, (1..=20).collect::<Vec<i64>>());

    let conv = first
        .conversations()
        .get_conversation(&conversation_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conv.unread_count.student, 10);
    assert_eq!(conv.unread_count.alumni, 10);
}
