use crate::access::Principal;
use crate::db::{PendingIngest, PendingKind, SharedStore, Store, UpsertOutcome};
use crate::domain::models::TranscriptMessage;
use crate::domain::scoring::ScoreInput;
use crate::error::{SyncError, SyncResult};
use crate::services::scoring::{ScoringJob, ScoringQueue};
use crate::services::{scores, transcripts};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const BASE_BACKOFF_SECS: i64 = 15;
const MAX_BACKOFF_SECS: i64 = 600;
const DRAIN_BATCH: i64 = 50;

/// An externally delivered ingest payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum IngestEvent {
    Transcript {
        conversation_id: String,
        messages: Vec<TranscriptMessage>,
        webhook_timestamp: DateTime<Utc>,
    },
    Score {
        conversation_id: String,
        score: ScoreInput,
    },
    /// Deferred scoring of the stored transcript. Must stay last: untagged
    /// matching would otherwise take every payload as this variant.
    Scoring { conversation_id: String },
}

impl IngestEvent {
    pub fn conversation_id(&self) -> &str {
        match self {
            IngestEvent::Transcript {
                conversation_id, ..
            }
            | IngestEvent::Score {
                conversation_id, ..
            }
            | IngestEvent::Scoring { conversation_id } => conversation_id,
        }
    }

    pub fn kind(&self) -> PendingKind {
        match self {
            IngestEvent::Transcript { .. } => PendingKind::Transcript,
            IngestEvent::Score { .. } => PendingKind::Score,
            IngestEvent::Scoring { .. } => PendingKind::Scoring,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum IngestReceipt {
    Applied,
    Unchanged,
    Queued { pending_id: Uuid },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub applied: usize,
    pub retried: usize,
    pub dead: usize,
}

/// Exponential backoff for the given number of failed attempts.
pub fn backoff_delay(attempts: i32) -> Duration {
    let exp = attempts.clamp(0, 16) as u32;
    let secs = BASE_BACKOFF_SECS
        .saturating_mul(2i64.saturating_pow(exp))
        .min(MAX_BACKOFF_SECS);
    Duration::seconds(secs)
}

#[derive(Clone)]
pub struct IngestPipeline {
    store: SharedStore,
    scoring: Option<ScoringQueue>,
    max_attempts: i32,
}

impl IngestPipeline {
    pub fn new(store: SharedStore, scoring: Option<ScoringQueue>, max_attempts: i32) -> Self {
        Self {
            store,
            scoring,
            max_attempts: max_attempts.max(1),
        }
    }

    async fn apply(&self, principal: &Principal, event: &IngestEvent) -> SyncResult<IngestReceipt> {
        let store = self.store.as_ref();
        match event {
            IngestEvent::Transcript {
                conversation_id,
                messages,
                webhook_timestamp,
            } => {
                let (transcript, outcome) = transcripts::ingest_transcript(
                    store,
                    principal,
                    conversation_id,
                    messages.clone(),
                    *webhook_timestamp,
                )
                .await?;
                if outcome == UpsertOutcome::Unchanged {
                    return Ok(IngestReceipt::Unchanged);
                }
                if let Some(scoring) = &self.scoring {
                    scoring
                        .submit(ScoringJob {
                            conversation_id: transcript.conversation_id,
                            messages: transcript.messages,
                        })
                        .await;
                }
                Ok(IngestReceipt::Applied)
            }
            IngestEvent::Score {
                conversation_id,
                score,
            } => {
                scores::ingest_score(store, principal, conversation_id, score).await?;
                Ok(IngestReceipt::Applied)
            }
            IngestEvent::Scoring { conversation_id } => {
                crate::access::require_service(principal)?;
                let scoring = self
                    .scoring
                    .as_ref()
                    .ok_or_else(|| SyncError::validation("scoring is disabled"))?;
                scoring.runner().score_stored(conversation_id).await?;
                Ok(IngestReceipt::Applied)
            }
        }
    }

    /// Apply an event now, or park it when its session is not known yet.
    pub async fn submit(
        &self,
        principal: &Principal,
        event: IngestEvent,
    ) -> SyncResult<IngestReceipt> {
        match self.apply(principal, &event).await {
            Err(SyncError::NotFound(reason)) => {
                let payload = serde_json::to_value(&event)
                    .map_err(|e| SyncError::Storage(format!("encode pending event: {e}")))?;
                let pending_id = self
                    .store
                    .enqueue_pending(event.kind(), event.conversation_id(), payload)
                    .await?;
                tracing::info!(
                    "Queued {} for conversation {} ({})",
                    event.kind().as_str(),
                    event.conversation_id(),
                    reason
                );
                Ok(IngestReceipt::Queued { pending_id })
            }
            other => other,
        }
    }

    /// Retry due pending events once.
    pub async fn drain(&self, now: DateTime<Utc>) -> SyncResult<DrainReport> {
        let due = self.store.due_pending(now, DRAIN_BATCH).await?;
        let mut report = DrainReport::default();

        for entry in due {
            match self.retry_entry(&entry).await {
                Ok(()) => {
                    self.store.delete_pending(entry.id).await?;
                    report.applied += 1;
                }
                Err(err) => {
                    let attempts = entry.attempts + 1;
                    let permanent = matches!(err, SyncError::Validation(_));
                    let dead = permanent || attempts >= self.max_attempts;
                    let jitter = Duration::milliseconds(rand::thread_rng().gen_range(0..1000));
                    let next = now + backoff_delay(attempts) + jitter;
                    self.store
                        .reschedule_pending(entry.id, attempts, next, &err.to_string(), dead)
                        .await?;
                    if dead {
                        report.dead += 1;
                        tracing::error!(
                            "Giving up on {} for conversation {} after {} attempts: {}",
                            entry.kind.as_str(),
                            entry.conversation_id,
                            attempts,
                            err
                        );
                    } else {
                        report.retried += 1;
                        tracing::debug!(
                            "Pending {} for {} retry {} at {}",
                            entry.kind.as_str(),
                            entry.conversation_id,
                            attempts,
                            next
                        );
                    }
                }
            }
        }

        if report != DrainReport::default() {
            tracing::info!(
                "Pending ingest drain: {} applied, {} retried, {} dead",
                report.applied,
                report.retried,
                report.dead
            );
        }
        Ok(report)
    }

    async fn retry_entry(&self, entry: &PendingIngest) -> SyncResult<()> {
        let event: IngestEvent = serde_json::from_value(entry.payload.clone())?;
        if event.kind() != entry.kind {
            return Err(SyncError::validation(format!(
                "pending {} holds a {} payload",
                entry.id,
                event.kind().as_str()
            )));
        }
        self.apply(&Principal::Service, &event).await.map(|_| ())
    }
}
