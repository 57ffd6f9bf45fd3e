use crate::access::{self, Principal};
use crate::db::Store;
use crate::domain::models::{Availability, ScoreDetails, SessionDetail, Transcript};
use crate::error::{SyncError, SyncResult};
use uuid::Uuid;

/// Session merged with whatever ingest data has arrived so far. Missing
/// transcript or score is reported as pending, never as an error.
pub async fn get_session_detail(
    store: &dyn Store,
    principal: &Principal,
    session_id: Uuid,
) -> SyncResult<SessionDetail> {
    let session = access::owned_session(store, principal, session_id).await?;

    let (transcript, score) = match access::visible_conversation(&session) {
        Some(conversation_id) => {
            let (transcript, score) = tokio::try_join!(
                store.find_transcript(conversation_id),
                store.find_score(conversation_id)
            )?;
            (transcript, score)
        }
        None => (None, None),
    };

    let composite_score = score.as_ref().map(ScoreDetails::composite);
    Ok(SessionDetail {
        session,
        transcript: Availability::from_option(transcript),
        score: Availability::from_option(score),
        composite_score,
    })
}

pub async fn get_transcript(
    store: &dyn Store,
    principal: &Principal,
    session_id: Uuid,
) -> SyncResult<Transcript> {
    let session = access::owned_session(store, principal, session_id).await?;
    let conversation_id = access::visible_conversation(&session)
        .ok_or_else(|| SyncError::not_found(format!("transcript for session {session_id}")))?;
    store
        .find_transcript(conversation_id)
        .await?
        .ok_or_else(|| SyncError::not_found(format!("transcript for session {session_id}")))
}

pub async fn get_score(
    store: &dyn Store,
    principal: &Principal,
    session_id: Uuid,
) -> SyncResult<ScoreDetails> {
    let session = access::owned_session(store, principal, session_id).await?;
    let conversation_id = access::visible_conversation(&session)
        .ok_or_else(|| SyncError::not_found(format!("score for session {session_id}")))?;
    store
        .find_score(conversation_id)
        .await?
        .ok_or_else(|| SyncError::not_found(format!("score for session {session_id}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::domain::models::{
        MessageRole, ScoreReasons, SessionStatus, TranscriptMessage,
    };
    use crate::domain::scoring::ScoreInput;
    use crate::services::{scores, sessions, transcripts};
    use chrono::Utc;

    fn messages(user: usize, assistant: usize) -> Vec<TranscriptMessage> {
        let user_msgs = (0..user).map(|i| TranscriptMessage {
            role: MessageRole::User,
            content: format!("answer {i}"),
        });
        let assistant_msgs = (0..assistant).map(|i| TranscriptMessage {
            role: MessageRole::Assistant,
            content: format!("question {i}"),
        });
        assistant_msgs.chain(user_msgs).collect()
    }

    fn score(clarity: i32, grammar: i32, substance: i32) -> ScoreInput {
        ScoreInput {
            clarity,
            grammar,
            substance,
            reasons: ScoreReasons::default(),
        }
    }

    #[tokio::test]
    async fn test_new_session_has_pending_ingest() {
        let store = MemoryStore::new();
        let owner = Principal::User(Uuid::new_v4());
        let session = sessions::create_session(&store, &owner, "behavioral", "Mock", 20)
            .await
            .unwrap();

        let detail = get_session_detail(&store, &owner, session.id).await.unwrap();
        assert_eq!(detail.session.status, SessionStatus::Created);
        assert!(detail.transcript.is_pending());
        assert!(detail.score.is_pending());
        assert_eq!(detail.composite_score, None);
    }

    #[tokio::test]
    async fn test_other_users_cannot_read() {
        let store = MemoryStore::new();
        let owner = Principal::User(Uuid::new_v4());
        let intruder = Principal::User(Uuid::new_v4());
        let session = sessions::create_session(&store, &owner, "technical", "Mock", 30)
            .await
            .unwrap();
        sessions::attach_conversation_id(&store, &owner, session.id, "c-7")
            .await
            .unwrap();
        transcripts::ingest_transcript(&store, &Principal::Service, "c-7", messages(1, 1), Utc::now())
            .await
            .unwrap();
        scores::ingest_score(&store, &Principal::Service, "c-7", &score(50, 50, 50))
            .await
            .unwrap();

        for result in [
            get_session_detail(&store, &intruder, session.id).await.map(|_| ()),
            get_transcript(&store, &intruder, session.id).await.map(|_| ()),
            get_score(&store, &intruder, session.id).await.map(|_| ()),
            get_session_detail(&store, &Principal::Service, session.id).await.map(|_| ()),
        ] {
            assert!(matches!(result, Err(SyncError::Authorization(_))));
        }
    }

    #[tokio::test]
    async fn test_score_before_transcript_is_tolerated() {
        let store = MemoryStore::new();
        let owner = Principal::User(Uuid::new_v4());
        let session = sessions::create_session(&store, &owner, "technical", "Mock", 30)
            .await
            .unwrap();
        sessions::attach_conversation_id(&store, &owner, session.id, "c-8")
            .await
            .unwrap();
        scores::ingest_score(&store, &Principal::Service, "c-8", &score(60, 70, 80))
            .await
            .unwrap();

        let detail = get_session_detail(&store, &owner, session.id).await.unwrap();
        assert!(detail.transcript.is_pending());
        assert_eq!(detail.composite_score, Some(72));
        assert!(matches!(
            get_transcript(&store, &owner, session.id).await,
            Err(SyncError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_cascades_to_ingest_records() {
        let store = MemoryStore::new();
        let owner = Principal::User(Uuid::new_v4());
        let session = sessions::create_session(&store, &owner, "technical", "Mock", 30)
            .await
            .unwrap();
        sessions::attach_conversation_id(&store, &owner, session.id, "c-9")
            .await
            .unwrap();
        transcripts::ingest_transcript(&store, &Principal::Service, "c-9", messages(2, 2), Utc::now())
            .await
            .unwrap();
        scores::ingest_score(&store, &Principal::Service, "c-9", &score(90, 90, 90))
            .await
            .unwrap();

        sessions::delete_session(&store, &owner, session.id).await.unwrap();

        assert!(store.find_transcript("c-9").await.unwrap().is_none());
        assert!(store.find_score("c-9").await.unwrap().is_none());
        assert!(matches!(
            get_transcript(&store, &owner, session.id).await,
            Err(SyncError::NotFound(_))
        ));
        assert!(matches!(
            get_score(&store, &owner, session.id).await,
            Err(SyncError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_full_interview_scenario() {
        let store = MemoryStore::new();
        let owner = Principal::User(Uuid::new_v4());

        let session = sessions::create_session(&store, &owner, "Technical", "Backend round", 30)
            .await
            .unwrap();
        sessions::attach_conversation_id(&store, &owner, session.id, "abc123")
            .await
            .unwrap();
        sessions::advance_by_conversation(
            &store,
            &Principal::Service,
            "abc123",
            SessionStatus::Active,
            None,
            None,
        )
        .await
        .unwrap();

        let t1 = Utc::now();
        transcripts::ingest_transcript(&store, &Principal::Service, "abc123", messages(6, 4), t1)
            .await
            .unwrap();
        scores::ingest_score(&store, &Principal::Service, "abc123", &score(85, 90, 75))
            .await
            .unwrap();

        sessions::transition_status(
            &store,
            &owner,
            session.id,
            SessionStatus::Completed,
            Some("manual".into()),
            Some(28),
        )
        .await
        .unwrap();

        let detail = get_session_detail(&store, &owner, session.id).await.unwrap();
        assert_eq!(detail.session.status, SessionStatus::Completed);
        assert_eq!(detail.session.actual_duration_minutes, Some(28));
        let transcript = detail.transcript.as_ref().unwrap();
        assert_eq!(transcript.message_count, 10);
        assert_eq!(transcript.webhook_timestamp, t1);
        assert_eq!(detail.composite_score, Some(81));
        assert_eq!(detail.session.score, Some(81));
    }
}
