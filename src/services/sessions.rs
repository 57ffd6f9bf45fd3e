use crate::access::{self, Principal};
use crate::db::{NewSession, SessionFilter, Store};
use crate::domain::lifecycle::plan_transition;
use crate::domain::models::{InterviewSession, SessionCategory, SessionStatus};
use crate::error::{SyncError, SyncResult};
use chrono::Utc;
use uuid::Uuid;

const MAX_SESSION_NAME_LEN: usize = 200;

pub async fn create_session(
    store: &dyn Store,
    principal: &Principal,
    category: &str,
    session_name: &str,
    expected_duration_minutes: i32,
) -> SyncResult<InterviewSession> {
    let user_id = access::require_user(principal)?;

    let category = SessionCategory::try_from(category)
        .map_err(|_| SyncError::validation(format!("unknown category {category:?}")))?;
    if expected_duration_minutes <= 0 {
        return Err(SyncError::validation(
            "expected duration must be a positive number of minutes",
        ));
    }
    let session_name = session_name.trim();
    if session_name.is_empty() || session_name.len() > MAX_SESSION_NAME_LEN {
        return Err(SyncError::validation(format!(
            "session name must be 1-{MAX_SESSION_NAME_LEN} characters"
        )));
    }

    let session = store
        .insert_session(NewSession {
            user_id,
            category,
            session_name: session_name.to_string(),
            expected_duration_minutes,
        })
        .await?;
    tracing::info!(
        "Session {} created for user {} ({}, {} min)",
        session.id,
        user_id,
        category.as_str(),
        expected_duration_minutes
    );
    Ok(session)
}

pub async fn attach_conversation_id(
    store: &dyn Store,
    principal: &Principal,
    session_id: Uuid,
    conversation_id: &str,
) -> SyncResult<InterviewSession> {
    let conversation_id = conversation_id.trim();
    if conversation_id.is_empty() {
        return Err(SyncError::validation("conversation id must not be empty"));
    }

    let session = access::owned_session(store, principal, session_id).await?;
    match session.conversation_id.as_deref() {
        Some(existing) if existing == conversation_id => return Ok(session),
        Some(existing) => {
            return Err(SyncError::conflict(format!(
                "session {session_id} already bound to conversation {existing}"
            )))
        }
        None => {}
    }

    let session = store.set_conversation_id(session_id, conversation_id).await?;
    tracing::info!(
        "Conversation {} attached to session {}",
        conversation_id,
        session_id
    );
    Ok(session)
}

pub async fn transition_status(
    store: &dyn Store,
    principal: &Principal,
    session_id: Uuid,
    new_status: SessionStatus,
    end_reason: Option<String>,
    reported_duration_minutes: Option<i32>,
) -> SyncResult<InterviewSession> {
    let mut session = access::lifecycle_session(store, principal, session_id).await?;

    // Compare-and-set on the stored status; a concurrent change re-plans
    // against the fresh row.
    loop {
        let change = plan_transition(
            session.status,
            new_status,
            end_reason.clone(),
            reported_duration_minutes,
            session.created_at,
            Utc::now(),
        )?;

        if let Some(updated) = store
            .apply_status_change(session_id, session.status, change)
            .await?
        {
            tracing::info!(
                "Session {} moved {} -> {}",
                session_id,
                session.status,
                updated.status
            );
            return Ok(updated);
        }

        session = store
            .find_session(session_id)
            .await?
            .ok_or_else(|| SyncError::not_found(format!("session {session_id}")))?;
    }
}

/// Apply a provider lifecycle event. Events that would not move the session
/// forward (redelivery, late arrival after a terminal state) are skipped.
pub async fn advance_by_conversation(
    store: &dyn Store,
    principal: &Principal,
    conversation_id: &str,
    new_status: SessionStatus,
    end_reason: Option<String>,
    reported_duration_minutes: Option<i32>,
) -> SyncResult<Option<InterviewSession>> {
    access::require_service(principal)?;
    let session = store
        .find_session_by_conversation(conversation_id)
        .await?
        .ok_or_else(|| SyncError::not_found(format!("session for conversation {conversation_id}")))?;

    if !session.status.can_transition_to(new_status) {
        tracing::debug!(
            "Ignoring {} event for session {} already {}",
            new_status,
            session.id,
            session.status
        );
        return Ok(None);
    }

    match transition_status(
        store,
        principal,
        session.id,
        new_status,
        end_reason,
        reported_duration_minutes,
    )
    .await
    {
        Ok(updated) => Ok(Some(updated)),
        Err(SyncError::InvalidTransition { from, to }) => {
            tracing::debug!("Lost race moving session {} {} -> {}", session.id, from, to);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

pub async fn list_sessions(
    store: &dyn Store,
    principal: &Principal,
    category: Option<&str>,
) -> SyncResult<Vec<InterviewSession>> {
    let user_id = access::require_user(principal)?;
    let category = category
        .map(|c| {
            SessionCategory::try_from(c)
                .map_err(|_| SyncError::validation(format!("unknown category {c:?}")))
        })
        .transpose()?;
    store
        .list_sessions(user_id, &SessionFilter { category })
        .await
}

pub async fn delete_session(
    store: &dyn Store,
    principal: &Principal,
    session_id: Uuid,
) -> SyncResult<()> {
    let session = access::owned_session(store, principal, session_id).await?;
    if !store.delete_session(session.id).await? {
        return Err(SyncError::not_found(format!("session {session_id}")));
    }
    tracing::info!(
        "Session {} deleted by owner (conversation {:?})",
        session_id,
        session.conversation_id
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use chrono::Duration;

    fn user() -> Principal {
        Principal::User(Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_create_validates_input() {
        let store = MemoryStore::new();
        let who = user();

        let err = create_session(&store, &who, "technical", "Mock", 0)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));

        let err = create_session(&store, &who, "sales", "Mock", 30)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));

        let err = create_session(&store, &who, "technical", "   ", 30)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));

        let session = create_session(&store, &who, " Technical ", "Mock", 30)
            .await
            .unwrap();
        assert_eq!(session.category, SessionCategory::Technical);
        assert_eq!(session.status, SessionStatus::Created);
        assert_eq!(Some(session.user_id), who.user_id());
    }

    #[tokio::test]
    async fn test_service_cannot_create_sessions() {
        let store = MemoryStore::new();
        let err = create_session(&store, &Principal::Service, "technical", "Mock", 30)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Authorization(_)));
    }

    #[tokio::test]
    async fn test_attach_conflicts() {
        let store = MemoryStore::new();
        let alice = user();
        let bob = user();
        let a = create_session(&store, &alice, "technical", "A", 30).await.unwrap();
        let b = create_session(&store, &bob, "behavioral", "B", 20).await.unwrap();

        attach_conversation_id(&store, &alice, a.id, "abc123").await.unwrap();
        // same binding again is a no-op
        let again = attach_conversation_id(&store, &alice, a.id, "abc123").await.unwrap();
        assert_eq!(again.conversation_id.as_deref(), Some("abc123"));

        let err = attach_conversation_id(&store, &bob, b.id, "abc123")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Conflict(_)));

        let err = attach_conversation_id(&store, &alice, a.id, "other")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Conflict(_)));

        let err = attach_conversation_id(&store, &alice, b.id, "zzz")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Authorization(_)));
    }

    #[tokio::test]
    async fn test_completed_is_final() {
        let store = MemoryStore::new();
        let who = user();
        let session = create_session(&store, &who, "technical", "Mock", 30).await.unwrap();
        store
            .backdate_session(session.id, Utc::now() - Duration::minutes(25))
            .await;

        transition_status(&store, &who, session.id, SessionStatus::Active, None, None)
            .await
            .unwrap();
        let done = transition_status(
            &store,
            &who,
            session.id,
            SessionStatus::Completed,
            Some("timeout".into()),
            None,
        )
        .await
        .unwrap();
        assert_eq!(done.status, SessionStatus::Completed);
        assert_eq!(done.actual_duration_minutes, Some(25));
        assert!(done.completed_timestamp.is_some());
        assert_eq!(done.end_reason.as_deref(), Some("timeout"));

        for next in [
            SessionStatus::Created,
            SessionStatus::Active,
            SessionStatus::Cancelled,
            SessionStatus::Error,
            SessionStatus::Completed,
        ] {
            let err = transition_status(&store, &who, session.id, next, None, None)
                .await
                .unwrap_err();
            assert!(matches!(err, SyncError::InvalidTransition { .. }));
        }
    }

    #[tokio::test]
    async fn test_provider_events_are_idempotent() {
        let store = MemoryStore::new();
        let who = user();
        let session = create_session(&store, &who, "behavioral", "Mock", 30).await.unwrap();
        attach_conversation_id(&store, &who, session.id, "conv-9").await.unwrap();

        let first = advance_by_conversation(
            &store,
            &Principal::Service,
            "conv-9",
            SessionStatus::Active,
            None,
            None,
        )
        .await
        .unwrap();
        assert!(first.is_some());

        let repeat = advance_by_conversation(
            &store,
            &Principal::Service,
            "conv-9",
            SessionStatus::Active,
            None,
            None,
        )
        .await
        .unwrap();
        assert!(repeat.is_none());

        let err = advance_by_conversation(
            &store,
            &Principal::Service,
            "unknown",
            SessionStatus::Active,
            None,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_filters_and_orders() {
        let store = MemoryStore::new();
        let who = user();
        let first = create_session(&store, &who, "technical", "First", 30).await.unwrap();
        store
            .backdate_session(first.id, Utc::now() - Duration::hours(2))
            .await;
        let second = create_session(&store, &who, "behavioral", "Second", 30).await.unwrap();
        create_session(&store, &user(), "technical", "Someone else", 30)
            .await
            .unwrap();

        let all = list_sessions(&store, &who, None).await.unwrap();
        assert_eq!(
            all.iter().map(|s| s.id).collect::<Vec<_>>(),
            vec![second.id, first.id]
        );

        let technical = list_sessions(&store, &who, Some("technical")).await.unwrap();
        assert_eq!(technical.len(), 1);
        assert_eq!(technical[0].id, first.id);
    }

    #[tokio::test]
    async fn test_delete_requires_owner() {
        let store = MemoryStore::new();
        let owner = user();
        let session = create_session(&store, &owner, "technical", "Mock", 30).await.unwrap();

        let err = delete_session(&store, &user(), session.id).await.unwrap_err();
        assert!(matches!(err, SyncError::Authorization(_)));

        delete_session(&store, &owner, session.id).await.unwrap();
        assert!(store.find_session(session.id).await.unwrap().is_none());
    }
}
