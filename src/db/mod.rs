pub mod memory;
pub mod postgres;
pub mod seed;

use crate::domain::lifecycle::StatusChange;
use crate::domain::models::{
    AppConfigEntry, InterviewSession, ScoreDetails, SessionCategory, Transcript, TranscriptMessage,
};
use crate::domain::scoring::ScoreInput;
use crate::domain::transcript::MessageTally;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: Uuid,
    pub category: SessionCategory,
    pub session_name: String,
    pub expected_duration_minutes: i32,
}

#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub category: Option<SessionCategory>,
}

#[derive(Debug, Clone)]
pub struct TranscriptUpsert {
    pub conversation_id: String,
    pub messages: Vec<TranscriptMessage>,
    pub tally: MessageTally,
    pub webhook_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingKind {
    Transcript,
    Score,
    Scoring,
}

impl PendingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingKind::Transcript => "transcript",
            PendingKind::Score => "score",
            PendingKind::Scoring => "scoring",
        }
    }
}

impl TryFrom<&str> for PendingKind {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "transcript" => Ok(PendingKind::Transcript),
            "score" => Ok(PendingKind::Score),
            "scoring" => Ok(PendingKind::Scoring),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingIngest {
    pub id: Uuid,
    pub conversation_id: String,
    pub kind: PendingKind,
    pub payload: serde_json::Value,
    pub attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub dead: bool,
    pub created_at: DateTime<Utc>,
}

/// Persistence for sessions, ingest records, runtime config and the pending
/// ingest log. Implementations perform no authorization; callers go through
/// [`crate::access`].
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_session(&self, new: NewSession) -> SyncResult<InterviewSession>;
    async fn find_session(&self, id: Uuid) -> SyncResult<Option<InterviewSession>>;
    async fn find_session_by_conversation(
        &self,
        conversation_id: &str,
    ) -> SyncResult<Option<InterviewSession>>;
    /// Fails with `Conflict` when another session already holds the id.
    async fn set_conversation_id(
        &self,
        id: Uuid,
        conversation_id: &str,
    ) -> SyncResult<InterviewSession>;
    /// Applies the change only if the stored status still equals `expected`.
    async fn apply_status_change(
        &self,
        id: Uuid,
        expected: crate::domain::models::SessionStatus,
        change: StatusChange,
    ) -> SyncResult<Option<InterviewSession>>;
    async fn list_sessions(
        &self,
        user_id: Uuid,
        filter: &SessionFilter,
    ) -> SyncResult<Vec<InterviewSession>>;
    /// Removes the session with its transcript and score.
    async fn delete_session(&self, id: Uuid) -> SyncResult<bool>;

    /// Newest delivery wins. A delivery with the stored messages, or one
    /// older than the stored `webhook_timestamp`, is `Unchanged`.
    async fn upsert_transcript(
        &self,
        upsert: TranscriptUpsert,
    ) -> SyncResult<(Transcript, UpsertOutcome)>;
    async fn find_transcript(&self, conversation_id: &str) -> SyncResult<Option<Transcript>>;

    /// Upserts the score and mirrors the composite onto the session.
    async fn upsert_score(
        &self,
        conversation_id: &str,
        score: &ScoreInput,
    ) -> SyncResult<ScoreDetails>;
    async fn find_score(&self, conversation_id: &str) -> SyncResult<Option<ScoreDetails>>;

    async fn list_config(&self, public_only: bool) -> SyncResult<Vec<AppConfigEntry>>;
    /// Inserts the key if absent. Existing values are kept.
    async fn seed_config(
        &self,
        key_name: &str,
        key_value: &str,
        is_public: bool,
        description: &str,
    ) -> SyncResult<()>;
    /// Inserts or overwrites the key. For values derived from the running
    /// configuration.
    async fn put_config(
        &self,
        key_name: &str,
        key_value: &str,
        is_public: bool,
        description: &str,
    ) -> SyncResult<()>;

    async fn enqueue_pending(
        &self,
        kind: PendingKind,
        conversation_id: &str,
        payload: serde_json::Value,
    ) -> SyncResult<Uuid>;
    async fn due_pending(&self, now: DateTime<Utc>, limit: i64) -> SyncResult<Vec<PendingIngest>>;
    async fn reschedule_pending(
        &self,
        id: Uuid,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        last_error: &str,
        dead: bool,
    ) -> SyncResult<()>;
    async fn delete_pending(&self, id: Uuid) -> SyncResult<()>;
}

pub type SharedStore = Arc<dyn Store>;

/// Run a storage call, retrying transient failures with linear backoff.
pub async fn with_retry<T, F, Fut>(attempts: u32, mut op: F) -> SyncResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SyncResult<T>>,
{
    let mut tries = 0;
    loop {
        match op().await {
            Err(err) if err.is_transient() && tries + 1 < attempts.max(1) => {
                tries += 1;
                tracing::warn!("transient storage error (attempt {}): {}", tries, err);
                sleep(Duration::from_millis(200 * tries as u64)).await;
            }
            other => return other,
        }
    }
}

/// Settle a unique violation raised by a retried insert. A retry after an
/// I/O error may hit the row its own earlier attempt committed; if `reread`
/// finds that row it is the result.
pub async fn committed_or<T, F, Fut>(result: SyncResult<T>, reread: F) -> SyncResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = SyncResult<Option<T>>>,
{
    match result {
        Err(SyncError::Conflict(reason)) => match reread().await? {
            Some(row) => {
                tracing::warn!("insert retried after commit, using stored row");
                Ok(row)
            }
            None => Err(SyncError::Conflict(reason)),
        },
        other => other,
    }
}

pub(crate) fn missing(what: &str, key: impl std::fmt::Display) -> SyncError {
    SyncError::not_found(format!("{what} {key}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_recovers_from_transient_errors() {
        let calls = AtomicU32::new(0);
        let result = with_retry(3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(SyncError::Unavailable("pool timed out".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_is_bounded_and_skips_fatal_errors() {
        let calls = AtomicU32::new(0);
        let result: SyncResult<()> = with_retry(2, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(SyncError::Unavailable("down".into())) }
        })
        .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        calls.store(0, Ordering::SeqCst);
        let result: SyncResult<()> = with_retry(5, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(SyncError::validation("bad")) }
        })
        .await;
        assert!(matches!(result, Err(SyncError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retried_insert_conflict_resolves_to_committed_row() {
        // first attempt committed before the connection dropped, the retry
        // hit the primary key
        let calls = AtomicU32::new(0);
        let result: SyncResult<u32> = with_retry(3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(SyncError::Unavailable("connection reset".into()))
                } else {
                    Err(SyncError::conflict("duplicate key value"))
                }
            }
        })
        .await;
        assert!(matches!(result, Err(SyncError::Conflict(_))));

        let settled = committed_or(result, || async { Ok(Some(7u32)) }).await;
        assert_eq!(settled.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_conflict_without_stored_row_is_kept() {
        let result: SyncResult<u32> = Err(SyncError::conflict("taken"));
        let settled = committed_or(result, || async { Ok(None) }).await;
        assert!(matches!(settled, Err(SyncError::Conflict(_))));

        let ok = committed_or(Ok(1u32), || async { Ok(Some(2u32)) }).await;
        assert_eq!(ok.unwrap(), 1);
    }
}
