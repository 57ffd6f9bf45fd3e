use super::{
    committed_or, missing, with_retry, NewSession, PendingIngest, PendingKind, SessionFilter, Store,
    TranscriptUpsert, UpsertOutcome,
};
use crate::domain::lifecycle::StatusChange;
use crate::domain::models::{
    AppConfigEntry, InterviewSession, ScoreDetails, SessionCategory, SessionStatus, Transcript,
    TranscriptMessage,
};
use crate::domain::scoring::ScoreInput;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::Json, FromRow, PgPool};
use uuid::Uuid;

const SESSION_COLUMNS: &str = r#"
    id,
    user_id,
    category,
    session_name,
    expected_duration_minutes,
    actual_duration_minutes,
    conversation_id,
    session_status,
    end_reason,
    score,
    created_at,
    updated_at,
    completed_timestamp
"#;

const TRANSCRIPT_COLUMNS: &str = r#"
    id,
    conversation_id,
    transcript_data,
    message_count,
    user_message_count,
    assistant_message_count,
    webhook_timestamp,
    created_at,
    updated_at
"#;

const SCORE_COLUMNS: &str = r#"
    id,
    conversation_id,
    clarity_score,
    clarity_reason,
    grammar_score,
    grammar_reason,
    substance_score,
    substance_reason,
    created_at,
    updated_at
"#;

#[derive(Debug, FromRow)]
struct SessionRow {
    id: Uuid,
    user_id: Uuid,
    category: String,
    session_name: String,
    expected_duration_minutes: i32,
    actual_duration_minutes: Option<i32>,
    conversation_id: Option<String>,
    session_status: String,
    end_reason: Option<String>,
    score: Option<i32>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_timestamp: Option<DateTime<Utc>>,
}

impl TryFrom<SessionRow> for InterviewSession {
    type Error = SyncError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let category = SessionCategory::try_from(row.category.as_str())
            .map_err(|_| SyncError::Storage(format!("unknown category {}", row.category)))?;
        let status = SessionStatus::try_from(row.session_status.as_str())
            .map_err(|_| SyncError::Storage(format!("unknown status {}", row.session_status)))?;
        Ok(InterviewSession {
            id: row.id,
            user_id: row.user_id,
            category,
            session_name: row.session_name,
            expected_duration_minutes: row.expected_duration_minutes,
            actual_duration_minutes: row.actual_duration_minutes,
            conversation_id: row.conversation_id,
            status,
            end_reason: row.end_reason,
            score: row.score,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_timestamp: row.completed_timestamp,
        })
    }
}

#[derive(Debug, FromRow)]
struct TranscriptRow {
    id: Uuid,
    conversation_id: String,
    transcript_data: Json<Vec<TranscriptMessage>>,
    message_count: i32,
    user_message_count: i32,
    assistant_message_count: i32,
    webhook_timestamp: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<TranscriptRow> for Transcript {
    fn from(row: TranscriptRow) -> Self {
        Transcript {
            id: row.id,
            conversation_id: row.conversation_id,
            messages: row.transcript_data.0,
            message_count: row.message_count,
            user_message_count: row.user_message_count,
            assistant_message_count: row.assistant_message_count,
            webhook_timestamp: row.webhook_timestamp,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct ScoreRow {
    id: Uuid,
    conversation_id: String,
    clarity_score: i32,
    clarity_reason: String,
    grammar_score: i32,
    grammar_reason: String,
    substance_score: i32,
    substance_reason: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ScoreRow> for ScoreDetails {
    fn from(row: ScoreRow) -> Self {
        ScoreDetails {
            id: row.id,
            conversation_id: row.conversation_id,
            clarity_score: row.clarity_score,
            clarity_reason: row.clarity_reason,
            grammar_score: row.grammar_score,
            grammar_reason: row.grammar_reason,
            substance_score: row.substance_score,
            substance_reason: row.substance_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct ConfigRow {
    id: Uuid,
    key_name: String,
    key_value: String,
    is_public: bool,
    description: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct PendingRow {
    id: Uuid,
    conversation_id: String,
    kind: String,
    payload: serde_json::Value,
    attempts: i32,
    next_attempt_at: DateTime<Utc>,
    last_error: Option<String>,
    dead: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<PendingRow> for PendingIngest {
    type Error = SyncError;

    fn try_from(row: PendingRow) -> Result<Self, Self::Error> {
        let kind = PendingKind::try_from(row.kind.as_str())
            .map_err(|_| SyncError::Storage(format!("unknown pending kind {}", row.kind)))?;
        Ok(PendingIngest {
            id: row.id,
            conversation_id: row.conversation_id,
            kind,
            payload: row.payload,
            attempts: row.attempts,
            next_attempt_at: row.next_attempt_at,
            last_error: row.last_error,
            dead: row.dead,
            created_at: row.created_at,
        })
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    retry_attempts: u32,
}

impl PgStore {
    pub fn new(pool: PgPool, retry_attempts: u32) -> Self {
        Self {
            pool,
            retry_attempts,
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_session(&self, new: NewSession) -> SyncResult<InterviewSession> {
        let pool = &self.pool;
        let new = &new;
        let id = Uuid::new_v4();
        let sql = format!(
            r#"
            INSERT INTO interview_sessions
                (id, user_id, category, session_name, expected_duration_minutes, session_status)
            VALUES ($1, $2, $3, $4, $5, 'created')
            RETURNING {SESSION_COLUMNS}
            "#
        );
        let sql = sql.as_str();
        let inserted = with_retry(self.retry_attempts, || async move {
            sqlx::query_as::<_, SessionRow>(sql)
                .bind(id)
                .bind(new.user_id)
                .bind(new.category.as_str())
                .bind(&new.session_name)
                .bind(new.expected_duration_minutes)
                .fetch_one(pool)
                .await
                .map_err(SyncError::from)
        })
        .await
        .and_then(InterviewSession::try_from);
        committed_or(inserted, || self.find_session(id)).await
    }

    async fn find_session(&self, id: Uuid) -> SyncResult<Option<InterviewSession>> {
        let pool = &self.pool;
        let sql = format!("SELECT {SESSION_COLUMNS} FROM interview_sessions WHERE id = $1");
        let sql = sql.as_str();
        let row = with_retry(self.retry_attempts, || async move {
            sqlx::query_as::<_, SessionRow>(sql)
                .bind(id)
                .fetch_optional(pool)
                .await
                .map_err(SyncError::from)
        })
        .await?;
        row.map(InterviewSession::try_from).transpose()
    }

    async fn find_session_by_conversation(
        &self,
        conversation_id: &str,
    ) -> SyncResult<Option<InterviewSession>> {
        let pool = &self.pool;
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM interview_sessions WHERE conversation_id = $1"
        );
        let sql = sql.as_str();
        let row = with_retry(self.retry_attempts, || async move {
            sqlx::query_as::<_, SessionRow>(sql)
                .bind(conversation_id)
                .fetch_optional(pool)
                .await
                .map_err(SyncError::from)
        })
        .await?;
        row.map(InterviewSession::try_from).transpose()
    }

    async fn set_conversation_id(
        &self,
        id: Uuid,
        conversation_id: &str,
    ) -> SyncResult<InterviewSession> {
        let pool = &self.pool;
        let sql = format!(
            r#"
            UPDATE interview_sessions
            SET conversation_id = $2, updated_at = now()
            WHERE id = $1
            RETURNING {SESSION_COLUMNS}
            "#
        );
        let sql = sql.as_str();
        let row = with_retry(self.retry_attempts, || async move {
            sqlx::query_as::<_, SessionRow>(sql)
                .bind(id)
                .bind(conversation_id)
                .fetch_optional(pool)
                .await
                .map_err(|e| match SyncError::from(e) {
                    SyncError::Conflict(_) => SyncError::conflict(format!(
                        "conversation {conversation_id} is attached to another session"
                    )),
                    other => other,
                })
        })
        .await?;
        row.ok_or_else(|| missing("session", id))?.try_into()
    }

    async fn apply_status_change(
        &self,
        id: Uuid,
        expected: SessionStatus,
        change: StatusChange,
    ) -> SyncResult<Option<InterviewSession>> {
        let pool = &self.pool;
        let change = &change;
        let sql = format!(
            r#"
            UPDATE interview_sessions
            SET session_status = $3,
                end_reason = COALESCE($4, end_reason),
                completed_timestamp = COALESCE($5, completed_timestamp),
                actual_duration_minutes = COALESCE($6, actual_duration_minutes),
                updated_at = now()
            WHERE id = $1 AND session_status = $2
            RETURNING {SESSION_COLUMNS}
            "#
        );
        let sql = sql.as_str();
        let row = with_retry(self.retry_attempts, || async move {
            sqlx::query_as::<_, SessionRow>(sql)
                .bind(id)
                .bind(expected.as_str())
                .bind(change.status.as_str())
                .bind(change.end_reason.as_deref())
                .bind(change.completed_timestamp)
                .bind(change.actual_duration_minutes)
                .fetch_optional(pool)
                .await
                .map_err(SyncError::from)
        })
        .await?;
        row.map(InterviewSession::try_from).transpose()
    }

    async fn list_sessions(
        &self,
        user_id: Uuid,
        filter: &SessionFilter,
    ) -> SyncResult<Vec<InterviewSession>> {
        let pool = &self.pool;
        let category = filter.category.map(|c| c.as_str());
        let sql = format!(
            r#"
            SELECT {SESSION_COLUMNS}
            FROM interview_sessions
            WHERE user_id = $1
              AND ($2::text IS NULL OR category = $2)
            ORDER BY created_at DESC
            "#
        );
        let sql = sql.as_str();
        let rows = with_retry(self.retry_attempts, || async move {
            sqlx::query_as::<_, SessionRow>(sql)
                .bind(user_id)
                .bind(category)
                .fetch_all(pool)
                .await
                .map_err(SyncError::from)
        })
        .await?;
        rows.into_iter().map(InterviewSession::try_from).collect()
    }

    async fn delete_session(&self, id: Uuid) -> SyncResult<bool> {
        let pool = &self.pool;
        // transcript and score rows go with the session via ON DELETE CASCADE
        let result = with_retry(self.retry_attempts, || async move {
            sqlx::query("DELETE FROM interview_sessions WHERE id = $1")
                .bind(id)
                .execute(pool)
                .await
                .map_err(SyncError::from)
        })
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_transcript(
        &self,
        upsert: TranscriptUpsert,
    ) -> SyncResult<(Transcript, UpsertOutcome)> {
        #[derive(FromRow)]
        struct UpsertRow {
            #[sqlx(flatten)]
            transcript: TranscriptRow,
            inserted: bool,
        }

        let pool = &self.pool;
        let upsert = &upsert;
        let id = Uuid::new_v4();
        let sql = format!(
            r#"
            INSERT INTO interview_transcripts
                (id, conversation_id, transcript_data, message_count,
                 user_message_count, assistant_message_count, webhook_timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (conversation_id) DO UPDATE
            SET transcript_data = EXCLUDED.transcript_data,
                message_count = EXCLUDED.message_count,
                user_message_count = EXCLUDED.user_message_count,
                assistant_message_count = EXCLUDED.assistant_message_count,
                webhook_timestamp = EXCLUDED.webhook_timestamp,
                updated_at = now()
            WHERE interview_transcripts.transcript_data IS DISTINCT FROM EXCLUDED.transcript_data
              AND EXCLUDED.webhook_timestamp >= interview_transcripts.webhook_timestamp
            RETURNING {TRANSCRIPT_COLUMNS}, (xmax = 0) AS inserted
            "#
        );
        let sql = sql.as_str();
        let row = with_retry(self.retry_attempts, || async move {
            sqlx::query_as::<_, UpsertRow>(sql)
                .bind(id)
                .bind(&upsert.conversation_id)
                .bind(Json(&upsert.messages))
                .bind(upsert.tally.total)
                .bind(upsert.tally.user)
                .bind(upsert.tally.assistant)
                .bind(upsert.webhook_timestamp)
                .fetch_optional(pool)
                .await
                .map_err(|e| match SyncError::from(e) {
                    SyncError::NotFound(_) => {
                        missing("session for conversation", &upsert.conversation_id)
                    }
                    other => other,
                })
        })
        .await?;

        match row {
            Some(UpsertRow {
                transcript,
                inserted,
            }) => {
                let outcome = if inserted {
                    UpsertOutcome::Inserted
                } else {
                    UpsertOutcome::Updated
                };
                Ok((transcript.into(), outcome))
            }
            // the conflict guard skipped an identical or older delivery
            None => {
                let existing = self
                    .find_transcript(&upsert.conversation_id)
                    .await?
                    .ok_or_else(|| missing("transcript", &upsert.conversation_id))?;
                Ok((existing, UpsertOutcome::Unchanged))
            }
        }
    }

    async fn find_transcript(&self, conversation_id: &str) -> SyncResult<Option<Transcript>> {
        let pool = &self.pool;
        let sql = format!(
            "SELECT {TRANSCRIPT_COLUMNS} FROM interview_transcripts WHERE conversation_id = $1"
        );
        let sql = sql.as_str();
        let row = with_retry(self.retry_attempts, || async move {
            sqlx::query_as::<_, TranscriptRow>(sql)
                .bind(conversation_id)
                .fetch_optional(pool)
                .await
                .map_err(SyncError::from)
        })
        .await?;
        Ok(row.map(Transcript::from))
    }

    async fn upsert_score(
        &self,
        conversation_id: &str,
        score: &ScoreInput,
    ) -> SyncResult<ScoreDetails> {
        let pool = &self.pool;
        let sql = format!(
            r#"
            INSERT INTO score_details
                (id, conversation_id, clarity_score, clarity_reason, grammar_score,
                 grammar_reason, substance_score, substance_reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (conversation_id) DO UPDATE
            SET clarity_score = EXCLUDED.clarity_score,
                clarity_reason = EXCLUDED.clarity_reason,
                grammar_score = EXCLUDED.grammar_score,
                grammar_reason = EXCLUDED.grammar_reason,
                substance_score = EXCLUDED.substance_score,
                substance_reason = EXCLUDED.substance_reason,
                updated_at = now()
            RETURNING {SCORE_COLUMNS}
            "#
        );
        let sql = sql.as_str();
        let row = with_retry(self.retry_attempts, || async move {
            write_score(pool, sql, conversation_id, score)
                .await
                .map_err(|e| match SyncError::from(e) {
                    SyncError::NotFound(_) => missing("session for conversation", conversation_id),
                    other => other,
                })
        })
        .await?;
        Ok(row.into())
    }

    async fn find_score(&self, conversation_id: &str) -> SyncResult<Option<ScoreDetails>> {
        let pool = &self.pool;
        let sql = format!("SELECT {SCORE_COLUMNS} FROM score_details WHERE conversation_id = $1");
        let sql = sql.as_str();
        let row = with_retry(self.retry_attempts, || async move {
            sqlx::query_as::<_, ScoreRow>(sql)
                .bind(conversation_id)
                .fetch_optional(pool)
                .await
                .map_err(SyncError::from)
        })
        .await?;
        Ok(row.map(ScoreDetails::from))
    }

    async fn list_config(&self, public_only: bool) -> SyncResult<Vec<AppConfigEntry>> {
        let pool = &self.pool;
        let rows = with_retry(self.retry_attempts, || async move {
            sqlx::query_as::<_, ConfigRow>(
                r#"
                SELECT id, key_name, key_value, is_public, description, created_at, updated_at
                FROM app_config
                WHERE is_public OR NOT $1
                ORDER BY key_name
                "#,
            )
            .bind(public_only)
            .fetch_all(pool)
            .await
            .map_err(SyncError::from)
        })
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| AppConfigEntry {
                id: row.id,
                key_name: row.key_name,
                key_value: row.key_value,
                is_public: row.is_public,
                description: row.description,
                created_at: row.created_at,
                updated_at: row.updated_at,
            })
            .collect())
    }

    async fn seed_config(
        &self,
        key_name: &str,
        key_value: &str,
        is_public: bool,
        description: &str,
    ) -> SyncResult<()> {
        let pool = &self.pool;
        with_retry(self.retry_attempts, || async move {
            sqlx::query(
                r#"
                INSERT INTO app_config (id, key_name, key_value, is_public, description)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (key_name) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(key_name)
            .bind(key_value)
            .bind(is_public)
            .bind(description)
            .execute(pool)
            .await
            .map_err(SyncError::from)
        })
        .await?;
        Ok(())
    }

    async fn put_config(
        &self,
        key_name: &str,
        key_value: &str,
        is_public: bool,
        description: &str,
    ) -> SyncResult<()> {
        let pool = &self.pool;
        with_retry(self.retry_attempts, || async move {
            sqlx::query(
                r#"
                INSERT INTO app_config (id, key_name, key_value, is_public, description)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (key_name) DO UPDATE
                SET key_value = EXCLUDED.key_value,
                    is_public = EXCLUDED.is_public,
                    description = EXCLUDED.description,
                    updated_at = now()
                WHERE app_config.key_value IS DISTINCT FROM EXCLUDED.key_value
                   OR app_config.is_public IS DISTINCT FROM EXCLUDED.is_public
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(key_name)
            .bind(key_value)
            .bind(is_public)
            .bind(description)
            .execute(pool)
            .await
            .map_err(SyncError::from)
        })
        .await?;
        Ok(())
    }

    async fn enqueue_pending(
        &self,
        kind: PendingKind,
        conversation_id: &str,
        payload: serde_json::Value,
    ) -> SyncResult<Uuid> {
        let pool = &self.pool;
        let payload = &payload;
        let id = Uuid::new_v4();
        with_retry(self.retry_attempts, || async move {
            sqlx::query(
                r#"
                INSERT INTO pending_ingest_events (id, conversation_id, kind, payload)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(id)
            .bind(conversation_id)
            .bind(kind.as_str())
            .bind(payload)
            .execute(pool)
            .await
            .map_err(SyncError::from)
        })
        .await?;
        Ok(id)
    }

    async fn due_pending(&self, now: DateTime<Utc>, limit: i64) -> SyncResult<Vec<PendingIngest>> {
        let pool = &self.pool;
        let rows = with_retry(self.retry_attempts, || async move {
            sqlx::query_as::<_, PendingRow>(
                r#"
                SELECT id, conversation_id, kind, payload, attempts, next_attempt_at,
                       last_error, dead, created_at
                FROM pending_ingest_events
                WHERE dead = false AND next_attempt_at <= $1
                ORDER BY next_attempt_at
                LIMIT $2
                "#,
            )
            .bind(now)
            .bind(limit)
            .fetch_all(pool)
            .await
            .map_err(SyncError::from)
        })
        .await?;
        rows.into_iter().map(PendingIngest::try_from).collect()
    }

    async fn reschedule_pending(
        &self,
        id: Uuid,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        last_error: &str,
        dead: bool,
    ) -> SyncResult<()> {
        let pool = &self.pool;
        with_retry(self.retry_attempts, || async move {
            sqlx::query(
                r#"
                UPDATE pending_ingest_events
                SET attempts = $2, next_attempt_at = $3, last_error = $4, dead = $5
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(attempts)
            .bind(next_attempt_at)
            .bind(last_error)
            .bind(dead)
            .execute(pool)
            .await
            .map_err(SyncError::from)
        })
        .await?;
        Ok(())
    }

    async fn delete_pending(&self, id: Uuid) -> SyncResult<()> {
        let pool = &self.pool;
        with_retry(self.retry_attempts, || async move {
            sqlx::query("DELETE FROM pending_ingest_events WHERE id = $1")
                .bind(id)
                .execute(pool)
                .await
                .map_err(SyncError::from)
        })
        .await?;
        Ok(())
    }
}

async fn write_score(
    pool: &PgPool,
    sql: &str,
    conversation_id: &str,
    score: &ScoreInput,
) -> Result<ScoreRow, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let row = sqlx::query_as::<_, ScoreRow>(sql)
        .bind(Uuid::new_v4())
        .bind(conversation_id)
        .bind(score.clarity)
        .bind(&score.reasons.clarity)
        .bind(score.grammar)
        .bind(&score.reasons.grammar)
        .bind(score.substance)
        .bind(&score.reasons.substance)
        .fetch_one(&mut *tx)
        .await?;
    sqlx::query(
        r#"
        UPDATE interview_sessions
        SET score = $2, updated_at = now()
        WHERE conversation_id = $1
        "#,
    )
    .bind(conversation_id)
    .bind(score.composite())
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(row)
}
