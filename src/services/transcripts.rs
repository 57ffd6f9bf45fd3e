use crate::access::{self, Principal};
use crate::db::{Store, TranscriptUpsert, UpsertOutcome};
use crate::domain::models::{Transcript, TranscriptMessage};
use crate::domain::transcript::MessageTally;
use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};

pub async fn ingest_transcript(
    store: &dyn Store,
    principal: &Principal,
    conversation_id: &str,
    messages: Vec<TranscriptMessage>,
    webhook_timestamp: DateTime<Utc>,
) -> SyncResult<(Transcript, UpsertOutcome)> {
    access::require_service(principal)?;
    if conversation_id.trim().is_empty() {
        return Err(SyncError::validation("conversation id must not be empty"));
    }

    let tally = MessageTally::of(&messages);
    tally.validate()?;

    if store
        .find_session_by_conversation(conversation_id)
        .await?
        .is_none()
    {
        return Err(SyncError::not_found(format!(
            "session for conversation {conversation_id}"
        )));
    }

    let (transcript, outcome) = store
        .upsert_transcript(TranscriptUpsert {
            conversation_id: conversation_id.to_string(),
            messages,
            tally,
            webhook_timestamp,
        })
        .await?;

    tracing::info!(
        "Transcript for conversation {} {:?}: {} messages ({} user, {} assistant)",
        conversation_id,
        outcome,
        tally.total,
        tally.user,
        tally.assistant
    );
    Ok((transcript, outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::domain::models::MessageRole;
    use crate::services::sessions;
    use uuid::Uuid;

    fn conversation(user: usize, assistant: usize) -> Vec<TranscriptMessage> {
        let mut messages = Vec::new();
        for i in 0..user.max(assistant) {
            if i < assistant {
                messages.push(TranscriptMessage {
                    role: MessageRole::Assistant,
                    content: format!("Question {i}"),
                });
            }
            if i < user {
                messages.push(TranscriptMessage {
                    role: MessageRole::User,
                    content: format!("Answer {i}"),
                });
            }
        }
        messages
    }

    async fn store_with_conversation(conversation_id: &str) -> MemoryStore {
        let store = MemoryStore::new();
        let owner = Principal::User(Uuid::new_v4());
        let session = sessions::create_session(&store, &owner, "technical", "Mock", 30)
            .await
            .unwrap();
        sessions::attach_conversation_id(&store, &owner, session.id, conversation_id)
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_ingest_counts_messages() {
        let store = store_with_conversation("abc123").await;
        let (transcript, outcome) = ingest_transcript(
            &store,
            &Principal::Service,
            "abc123",
            conversation(6, 4),
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);
        assert_eq!(transcript.message_count, 10);
        assert_eq!(transcript.user_message_count, 6);
        assert_eq!(transcript.assistant_message_count, 4);
    }

    #[tokio::test]
    async fn test_identical_redelivery_is_noop() {
        let store = store_with_conversation("abc123").await;
        let at = Utc::now();
        let (first, _) =
            ingest_transcript(&store, &Principal::Service, "abc123", conversation(2, 2), at)
                .await
                .unwrap();
        let (second, outcome) =
            ingest_transcript(&store, &Principal::Service, "abc123", conversation(2, 2), at)
                .await
                .unwrap();

        assert_eq!(outcome, UpsertOutcome::Unchanged);
        assert_eq!(first, second);
        assert_eq!(store.transcript_count().await, 1);
    }

    #[tokio::test]
    async fn test_later_delivery_replaces_payload() {
        let store = store_with_conversation("abc123").await;
        let at = Utc::now();
        ingest_transcript(&store, &Principal::Service, "abc123", conversation(1, 1), at)
            .await
            .unwrap();
        let (updated, outcome) = ingest_transcript(
            &store,
            &Principal::Service,
            "abc123",
            conversation(3, 3),
            at + chrono::Duration::seconds(5),
        )
        .await
        .unwrap();

        assert_eq!(outcome, UpsertOutcome::Updated);
        assert_eq!(updated.message_count, 6);
        assert_eq!(store.transcript_count().await, 1);
    }

    #[tokio::test]
    async fn test_older_delivery_keeps_newer_payload() {
        let store = store_with_conversation("abc123").await;
        let at = Utc::now();
        ingest_transcript(&store, &Principal::Service, "abc123", conversation(3, 3), at)
            .await
            .unwrap();
        let (kept, outcome) = ingest_transcript(
            &store,
            &Principal::Service,
            "abc123",
            conversation(1, 1),
            at - chrono::Duration::minutes(30),
        )
        .await
        .unwrap();

        assert_eq!(outcome, UpsertOutcome::Unchanged);
        assert_eq!(kept.message_count, 6);
        assert_eq!(kept.webhook_timestamp, at);
    }

    #[tokio::test]
    async fn test_same_messages_with_later_timestamp_is_noop() {
        let store = store_with_conversation("abc123").await;
        let at = Utc::now();
        ingest_transcript(&store, &Principal::Service, "abc123", conversation(2, 2), at)
            .await
            .unwrap();
        let (_, outcome) = ingest_transcript(
            &store,
            &Principal::Service,
            "abc123",
            conversation(2, 2),
            at + chrono::Duration::minutes(1),
        )
        .await
        .unwrap();
        assert_eq!(outcome, UpsertOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_unknown_conversation_and_wrong_principal() {
        let store = store_with_conversation("abc123").await;
        let err = ingest_transcript(&store, &Principal::Service, "nope", vec![], Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));

        let err = ingest_transcript(
            &store,
            &Principal::User(Uuid::new_v4()),
            "abc123",
            vec![],
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SyncError::Authorization(_)));
    }
}
