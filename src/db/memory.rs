//! In-process store used by tests and `STORE=memory` local runs. Mirrors the
//! PostgreSQL constraints: unique conversation ids, cascade deletes and
//! foreign keys from ingest tables to sessions.

use super::{
    missing, NewSession, PendingIngest, PendingKind, SessionFilter, Store, TranscriptUpsert,
    UpsertOutcome,
};
use crate::domain::lifecycle::StatusChange;
use crate::domain::models::{
    AppConfigEntry, InterviewSession, ScoreDetails, SessionStatus, Transcript,
};
use crate::domain::scoring::ScoreInput;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    sessions: HashMap<Uuid, InterviewSession>,
    transcripts: HashMap<String, Transcript>,
    scores: HashMap<String, ScoreDetails>,
    config: HashMap<String, AppConfigEntry>,
    pending: HashMap<Uuid, PendingIngest>,
}

impl Tables {
    fn session_by_conversation(&self, conversation_id: &str) -> Option<&InterviewSession> {
        self.sessions
            .values()
            .find(|s| s.conversation_id.as_deref() == Some(conversation_id))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn transcript_count(&self) -> usize {
        self.tables.read().await.transcripts.len()
    }

    #[cfg(test)]
    pub async fn backdate_session(&self, id: Uuid, created_at: DateTime<Utc>) {
        if let Some(session) = self.tables.write().await.sessions.get_mut(&id) {
            session.created_at = created_at;
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_session(&self, new: NewSession) -> SyncResult<InterviewSession> {
        let now = Utc::now();
        let session = InterviewSession {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            category: new.category,
            session_name: new.session_name,
            expected_duration_minutes: new.expected_duration_minutes,
            actual_duration_minutes: None,
            conversation_id: None,
            status: SessionStatus::Created,
            end_reason: None,
            score: None,
            created_at: now,
            updated_at: now,
            completed_timestamp: None,
        };
        self.tables
            .write()
            .await
            .sessions
            .insert(session.id, session.clone());
        Ok(session)
    }

    async fn find_session(&self, id: Uuid) -> SyncResult<Option<InterviewSession>> {
        Ok(self.tables.read().await.sessions.get(&id).cloned())
    }

    async fn find_session_by_conversation(
        &self,
        conversation_id: &str,
    ) -> SyncResult<Option<InterviewSession>> {
        Ok(self
            .tables
            .read()
            .await
            .session_by_conversation(conversation_id)
            .cloned())
    }

    async fn set_conversation_id(
        &self,
        id: Uuid,
        conversation_id: &str,
    ) -> SyncResult<InterviewSession> {
        let mut tables = self.tables.write().await;
        if let Some(holder) = tables.session_by_conversation(conversation_id) {
            if holder.id != id {
                return Err(SyncError::conflict(format!(
                    "conversation {conversation_id} is attached to another session"
                )));
            }
        }
        let session = tables.sessions.get_mut(&id).ok_or_else(|| missing("session", id))?;
        session.conversation_id = Some(conversation_id.to_string());
        session.updated_at = Utc::now();
        Ok(session.clone())
    }

    async fn apply_status_change(
        &self,
        id: Uuid,
        expected: SessionStatus,
        change: StatusChange,
    ) -> SyncResult<Option<InterviewSession>> {
        let mut tables = self.tables.write().await;
        let Some(session) = tables.sessions.get_mut(&id) else {
            return Ok(None);
        };
        if session.status != expected {
            return Ok(None);
        }
        session.status = change.status;
        if change.end_reason.is_some() {
            session.end_reason = change.end_reason;
        }
        if change.completed_timestamp.is_some() {
            session.completed_timestamp = change.completed_timestamp;
        }
        if change.actual_duration_minutes.is_some() {
            session.actual_duration_minutes = change.actual_duration_minutes;
        }
        session.updated_at = Utc::now();
        Ok(Some(session.clone()))
    }

    async fn list_sessions(
        &self,
        user_id: Uuid,
        filter: &SessionFilter,
    ) -> SyncResult<Vec<InterviewSession>> {
        let tables = self.tables.read().await;
        let mut sessions: Vec<InterviewSession> = tables
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .filter(|s| filter.category.map_or(true, |c| s.category == c))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn delete_session(&self, id: Uuid) -> SyncResult<bool> {
        let mut tables = self.tables.write().await;
        let Some(session) = tables.sessions.remove(&id) else {
            return Ok(false);
        };
        if let Some(conversation_id) = session.conversation_id {
            tables.transcripts.remove(&conversation_id);
            tables.scores.remove(&conversation_id);
        }
        Ok(true)
    }

    async fn upsert_transcript(
        &self,
        upsert: TranscriptUpsert,
    ) -> SyncResult<(Transcript, UpsertOutcome)> {
        let mut tables = self.tables.write().await;
        if tables.session_by_conversation(&upsert.conversation_id).is_none() {
            return Err(missing("session for conversation", &upsert.conversation_id));
        }

        let now = Utc::now();
        if let Some(existing) = tables.transcripts.get_mut(&upsert.conversation_id) {
            // same content, or a delivery older than the stored one
            if existing.messages == upsert.messages
                || upsert.webhook_timestamp < existing.webhook_timestamp
            {
                return Ok((existing.clone(), UpsertOutcome::Unchanged));
            }
            existing.messages = upsert.messages;
            existing.message_count = upsert.tally.total;
            existing.user_message_count = upsert.tally.user;
            existing.assistant_message_count = upsert.tally.assistant;
            existing.webhook_timestamp = upsert.webhook_timestamp;
            existing.updated_at = now;
            return Ok((existing.clone(), UpsertOutcome::Updated));
        }

        let transcript = Transcript {
            id: Uuid::new_v4(),
            conversation_id: upsert.conversation_id.clone(),
            messages: upsert.messages,
            message_count: upsert.tally.total,
            user_message_count: upsert.tally.user,
            assistant_message_count: upsert.tally.assistant,
            webhook_timestamp: upsert.webhook_timestamp,
            created_at: now,
            updated_at: now,
        };
        tables
            .transcripts
            .insert(upsert.conversation_id, transcript.clone());
        Ok((transcript, UpsertOutcome::Inserted))
    }

    async fn find_transcript(&self, conversation_id: &str) -> SyncResult<Option<Transcript>> {
        Ok(self.tables.read().await.transcripts.get(conversation_id).cloned())
    }

    async fn upsert_score(
        &self,
        conversation_id: &str,
        score: &ScoreInput,
    ) -> SyncResult<ScoreDetails> {
        let mut tables = self.tables.write().await;
        let session_id = tables
            .session_by_conversation(conversation_id)
            .map(|s| s.id)
            .ok_or_else(|| missing("session for conversation", conversation_id))?;

        let now = Utc::now();
        let (id, created_at) = tables
            .scores
            .get(conversation_id)
            .map(|s| (s.id, s.created_at))
            .unwrap_or_else(|| (Uuid::new_v4(), now));
        let details = ScoreDetails {
            id,
            conversation_id: conversation_id.to_string(),
            clarity_score: score.clarity,
            clarity_reason: score.reasons.clarity.clone(),
            grammar_score: score.grammar,
            grammar_reason: score.reasons.grammar.clone(),
            substance_score: score.substance,
            substance_reason: score.reasons.substance.clone(),
            created_at,
            updated_at: now,
        };
        tables
            .scores
            .insert(conversation_id.to_string(), details.clone());
        if let Some(session) = tables.sessions.get_mut(&session_id) {
            session.score = Some(score.composite());
            session.updated_at = now;
        }
        Ok(details)
    }

    async fn find_score(&self, conversation_id: &str) -> SyncResult<Option<ScoreDetails>> {
        Ok(self.tables.read().await.scores.get(conversation_id).cloned())
    }

    async fn list_config(&self, public_only: bool) -> SyncResult<Vec<AppConfigEntry>> {
        let tables = self.tables.read().await;
        let mut entries: Vec<AppConfigEntry> = tables
            .config
            .values()
            .filter(|e| e.is_public || !public_only)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.key_name.cmp(&b.key_name));
        Ok(entries)
    }

    async fn seed_config(
        &self,
        key_name: &str,
        key_value: &str,
        is_public: bool,
        description: &str,
    ) -> SyncResult<()> {
        let now = Utc::now();
        self.tables
            .write()
            .await
            .config
            .entry(key_name.to_string())
            .or_insert_with(|| AppConfigEntry {
                id: Uuid::new_v4(),
                key_name: key_name.to_string(),
                key_value: key_value.to_string(),
                is_public,
                description: Some(description.to_string()),
                created_at: now,
                updated_at: now,
            });
        Ok(())
    }

    async fn put_config(
        &self,
        key_name: &str,
        key_value: &str,
        is_public: bool,
        description: &str,
    ) -> SyncResult<()> {
        let now = Utc::now();
        let mut tables = self.tables.write().await;
        match tables.config.get_mut(key_name) {
            Some(entry) => {
                if entry.key_value != key_value || entry.is_public != is_public {
                    entry.key_value = key_value.to_string();
                    entry.is_public = is_public;
                    entry.description = Some(description.to_string());
                    entry.updated_at = now;
                }
            }
            None => {
                tables.config.insert(
                    key_name.to_string(),
                    AppConfigEntry {
                        id: Uuid::new_v4(),
                        key_name: key_name.to_string(),
                        key_value: key_value.to_string(),
                        is_public,
                        description: Some(description.to_string()),
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
        }
        Ok(())
    }

    async fn enqueue_pending(
        &self,
        kind: PendingKind,
        conversation_id: &str,
        payload: serde_json::Value,
    ) -> SyncResult<Uuid> {
        let now = Utc::now();
        let entry = PendingIngest {
            id: Uuid::new_v4(),
            conversation_id: conversation_id.to_string(),
            kind,
            payload,
            attempts: 0,
            next_attempt_at: now,
            last_error: None,
            dead: false,
            created_at: now,
        };
        let id = entry.id;
        self.tables.write().await.pending.insert(id, entry);
        Ok(id)
    }

    async fn due_pending(&self, now: DateTime<Utc>, limit: i64) -> SyncResult<Vec<PendingIngest>> {
        let tables = self.tables.read().await;
        let mut due: Vec<PendingIngest> = tables
            .pending
            .values()
            .filter(|p| !p.dead && p.next_attempt_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|p| p.next_attempt_at);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn reschedule_pending(
        &self,
        id: Uuid,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        last_error: &str,
        dead: bool,
    ) -> SyncResult<()> {
        let mut tables = self.tables.write().await;
        let entry = tables
            .pending
            .get_mut(&id)
            .ok_or_else(|| missing("pending ingest", id))?;
        entry.attempts = attempts;
        entry.next_attempt_at = next_attempt_at;
        entry.last_error = Some(last_error.to_string());
        entry.dead = dead;
        Ok(())
    }

    async fn delete_pending(&self, id: Uuid) -> SyncResult<()> {
        self.tables.write().await.pending.remove(&id);
        Ok(())
    }
}
