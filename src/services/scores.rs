use crate::access::{self, Principal};
use crate::db::Store;
use crate::domain::models::ScoreDetails;
use crate::domain::scoring::ScoreInput;
use crate::error::{SyncError, SyncResult};

pub async fn ingest_score(
    store: &dyn Store,
    principal: &Principal,
    conversation_id: &str,
    score: &ScoreInput,
) -> SyncResult<ScoreDetails> {
    access::require_service(principal)?;
    score.validate()?;

    if store
        .find_session_by_conversation(conversation_id)
        .await?
        .is_none()
    {
        return Err(SyncError::not_found(format!(
            "session for conversation {conversation_id}"
        )));
    }

    let details = store.upsert_score(conversation_id, score).await?;
    tracing::info!(
        "Score stored for conversation {}: clarity={} grammar={} substance={} composite={}",
        conversation_id,
        score.clarity,
        score.grammar,
        score.substance,
        details.composite()
    );
    Ok(details)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::domain::models::ScoreReasons;
    use crate::services::sessions;
    use uuid::Uuid;

    fn input(clarity: i32, grammar: i32, substance: i32) -> ScoreInput {
        ScoreInput {
            clarity,
            grammar,
            substance,
            reasons: ScoreReasons {
                clarity: "Structured answers".into(),
                grammar: "Minor slips".into(),
                substance: "Good depth".into(),
            },
        }
    }

    #[tokio::test]
    async fn test_score_upsert_updates_session_summary() {
        let store = MemoryStore::new();
        let owner = Principal::User(Uuid::new_v4());
        let session = sessions::create_session(&store, &owner, "technical", "Mock", 30)
            .await
            .unwrap();
        sessions::attach_conversation_id(&store, &owner, session.id, "c-1")
            .await
            .unwrap();

        let first = ingest_score(&store, &Principal::Service, "c-1", &input(80, 90, 70))
            .await
            .unwrap();
        assert_eq!(first.composite(), 77);

        let second = ingest_score(&store, &Principal::Service, "c-1", &input(85, 90, 75))
            .await
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.clarity_score, 85);

        let session = store.find_session(session.id).await.unwrap().unwrap();
        assert_eq!(session.score, Some(81));
    }

    #[tokio::test]
    async fn test_rejects_out_of_range_before_lookup() {
        let store = MemoryStore::new();
        let err = ingest_score(&store, &Principal::Service, "missing", &input(101, 50, 50))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));

        let err = ingest_score(&store, &Principal::Service, "missing", &input(50, 50, 50))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }
}
