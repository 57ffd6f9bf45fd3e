//! Row-level authorization. Every service operation resolves the rows it
//! touches through these helpers, so ownership is checked no matter which
//! entry point (HTTP handler, pending queue, scoring worker) calls it.

use crate::db::Store;
use crate::domain::models::InterviewSession;
use crate::error::{SyncError, SyncResult};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Principal {
    /// Authenticated end user; sees only sessions they own.
    User(Uuid),
    /// Webhook and worker identity; may write ingest data but not read
    /// user data through the query path.
    Service,
}

impl Principal {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Principal::User(id) => Some(*id),
            Principal::Service => None,
        }
    }
}

pub fn require_user(principal: &Principal) -> SyncResult<Uuid> {
    principal
        .user_id()
        .ok_or_else(|| SyncError::forbidden("operation requires an end user"))
}

pub fn require_service(principal: &Principal) -> SyncResult<()> {
    match principal {
        Principal::Service => Ok(()),
        Principal::User(_) => Err(SyncError::forbidden(
            "ingest is restricted to the service principal",
        )),
    }
}

fn check_owner(user_id: Uuid, session: &InterviewSession) -> SyncResult<()> {
    if session.user_id != user_id {
        tracing::warn!(
            "User {} denied access to session {} owned by another user",
            user_id,
            session.id
        );
        return Err(SyncError::forbidden(format!(
            "session {} belongs to another user",
            session.id
        )));
    }
    Ok(())
}

/// Load a session the calling end user owns.
pub async fn owned_session(
    store: &dyn Store,
    principal: &Principal,
    session_id: Uuid,
) -> SyncResult<InterviewSession> {
    let user_id = require_user(principal)?;
    let session = store
        .find_session(session_id)
        .await?
        .ok_or_else(|| SyncError::not_found(format!("session {session_id}")))?;
    check_owner(user_id, &session)?;
    Ok(session)
}

/// Load a session for a lifecycle change: the owner or the service principal.
pub async fn lifecycle_session(
    store: &dyn Store,
    principal: &Principal,
    session_id: Uuid,
) -> SyncResult<InterviewSession> {
    match principal {
        Principal::User(_) => owned_session(store, principal, session_id).await,
        Principal::Service => store
            .find_session(session_id)
            .await?
            .ok_or_else(|| SyncError::not_found(format!("session {session_id}"))),
    }
}

/// The conversation id through which a user may see ingest records. Ingest
/// rows are reachable only via an owned session with an attached id.
pub fn visible_conversation(session: &InterviewSession) -> Option<&str> {
    session.conversation_id.as_deref()
}
