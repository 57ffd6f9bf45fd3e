use crate::access::Principal;
use crate::db::{PendingKind, SharedStore};
use crate::domain::models::{MessageRole, ScoreReasons, TranscriptMessage};
use crate::domain::scoring::ScoreInput;
use crate::error::{SyncError, SyncResult};
use crate::services::scores;
use anyhow::{anyhow, Result};
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestUserMessage, ChatCompletionRequestUserMessageContent,
    CreateChatCompletionRequestArgs, Role,
};
use async_openai::{config::OpenAIConfig, Client};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{sleep, Duration};

const SYSTEM_PROMPT: &str = r#"You grade mock job interviews from a transcript.
Roles: "assistant" is the interviewer, "user" is the candidate.
Score only the candidate on three axes, each an integer 0-100:
- clarity: structure and directness of answers
- grammar: correctness of spoken language
- substance: depth, accuracy and relevance of content
Reply with JSON only:
{"clarity_score": int, "clarity_reason": str,
 "grammar_score": int, "grammar_reason": str,
 "substance_score": int, "substance_reason": str}"#;

#[derive(Debug, Clone)]
pub struct ScoringJob {
    pub conversation_id: String,
    pub messages: Vec<TranscriptMessage>,
}

/// Produces a score breakdown for a finished conversation.
#[async_trait]
pub trait TranscriptScorer: Send + Sync {
    async fn score_transcript(
        &self,
        conversation_id: &str,
        messages: &[TranscriptMessage],
    ) -> Result<ScoreInput>;
}

#[derive(Debug, Deserialize)]
struct LlmScore {
    clarity_score: i32,
    #[serde(default)]
    clarity_reason: String,
    grammar_score: i32,
    #[serde(default)]
    grammar_reason: String,
    substance_score: i32,
    #[serde(default)]
    substance_reason: String,
}

impl From<LlmScore> for ScoreInput {
    fn from(raw: LlmScore) -> Self {
        ScoreInput {
            clarity: raw.clarity_score,
            grammar: raw.grammar_score,
            substance: raw.substance_score,
            reasons: ScoreReasons {
                clarity: raw.clarity_reason,
                grammar: raw.grammar_reason,
                substance: raw.substance_reason,
            },
        }
    }
}

/// Parse the model reply, tolerating a fenced ```json block.
pub fn parse_llm_score(content: &str) -> Result<ScoreInput> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    let raw: LlmScore =
        serde_json::from_str(body).map_err(|e| anyhow!("unparseable score reply: {e}"))?;
    Ok(raw.into())
}

pub fn render_transcript(messages: &[TranscriptMessage]) -> String {
    messages
        .iter()
        .filter(|m| m.role != MessageRole::System)
        .map(|m| {
            let speaker = match m.role {
                MessageRole::Assistant => "Interviewer",
                _ => "Candidate",
            };
            format!("{speaker}: {}", m.content.trim())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Clone)]
pub struct OpenAiScorer {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiScorer {
    pub fn new(api_key: String, model: String) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

#[async_trait]
impl TranscriptScorer for OpenAiScorer {
    async fn score_transcript(
        &self,
        conversation_id: &str,
        messages: &[TranscriptMessage],
    ) -> Result<ScoreInput> {
        let transcript = render_transcript(messages);
        if transcript.is_empty() {
            return Err(anyhow!("conversation {conversation_id} has no spoken messages"));
        }

        let mut retries = 0;
        loop {
            let request_messages = vec![
                ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                    role: Role::System,
                    content: SYSTEM_PROMPT.to_string(),
                    name: None,
                }),
                ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                    role: Role::User,
                    content: ChatCompletionRequestUserMessageContent::Text(format!(
                        "Transcript:\n{transcript}"
                    )),
                    name: None,
                }),
            ];

            let request = CreateChatCompletionRequestArgs::default()
                .model(self.model.as_str())
                .messages(request_messages)
                .build()?;

            match self.client.chat().create(request).await {
                Ok(resp) => {
                    let content = resp
                        .choices
                        .first()
                        .and_then(|c| c.message.content.clone())
                        .unwrap_or_default();
                    return parse_llm_score(&content);
                }
                Err(err) => {
                    retries += 1;
                    if retries > 3 {
                        return Err(anyhow!("OpenAI error: {err}"));
                    }
                    tracing::warn!(
                        "Scoring request for {} failed (attempt {}): {}",
                        conversation_id,
                        retries,
                        err
                    );
                    sleep(Duration::from_millis(500 * retries)).await;
                }
            }
        }
    }
}

/// Scores stored transcripts and parks work that cannot finish now in the
/// pending ingest log, where the drain job retries it.
#[derive(Clone)]
pub struct ScoringRunner {
    store: SharedStore,
    scorer: Arc<dyn TranscriptScorer>,
}

impl ScoringRunner {
    pub fn new(store: SharedStore, scorer: Arc<dyn TranscriptScorer>) -> Self {
        Self { store, scorer }
    }

    async fn score_messages(
        &self,
        conversation_id: &str,
        messages: &[TranscriptMessage],
    ) -> SyncResult<()> {
        let score = self
            .scorer
            .score_transcript(conversation_id, messages)
            .await
            .map_err(|e| SyncError::Unavailable(format!("scorer failed: {e}")))?;
        scores::ingest_score(self.store.as_ref(), &Principal::Service, conversation_id, &score)
            .await?;
        Ok(())
    }

    /// Score the transcript currently stored for the conversation.
    pub async fn score_stored(&self, conversation_id: &str) -> SyncResult<()> {
        let transcript = self
            .store
            .find_transcript(conversation_id)
            .await?
            .ok_or_else(|| SyncError::not_found(format!("transcript for {conversation_id}")))?;
        self.score_messages(conversation_id, &transcript.messages).await
    }

    pub async fn defer(&self, conversation_id: &str, reason: &str) {
        let payload = serde_json::json!({ "conversation_id": conversation_id });
        match self
            .store
            .enqueue_pending(PendingKind::Scoring, conversation_id, payload)
            .await
        {
            Ok(pending_id) => tracing::warn!(
                "Scoring for {} deferred as {}: {}",
                conversation_id,
                pending_id,
                reason
            ),
            Err(e) => tracing::error!(
                "Scoring for {} lost, could not defer ({}): {}",
                conversation_id,
                reason,
                e
            ),
        }
    }
}

/// Sending half handed to the ingest pipeline.
#[derive(Clone)]
pub struct ScoringQueue {
    tx: mpsc::Sender<ScoringJob>,
    runner: ScoringRunner,
}

impl ScoringQueue {
    /// Hand a job to the worker, or defer it when the channel is full or closed.
    pub async fn submit(&self, job: ScoringJob) {
        let (job, reason) = match self.tx.try_send(job) {
            Ok(()) => return,
            Err(TrySendError::Full(job)) => (job, "scoring queue full"),
            Err(TrySendError::Closed(job)) => (job, "scoring worker stopped"),
        };
        self.runner.defer(&job.conversation_id, reason).await;
    }

    pub fn runner(&self) -> &ScoringRunner {
        &self.runner
    }
}

pub fn channel(
    runner: ScoringRunner,
    capacity: usize,
) -> (ScoringQueue, mpsc::Receiver<ScoringJob>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ScoringQueue { tx, runner }, rx)
}

pub async fn run_worker(runner: ScoringRunner, mut rx: mpsc::Receiver<ScoringJob>) {
    tracing::info!("Scoring worker started");
    while let Some(job) = rx.recv().await {
        score_one(&runner, job).await;
    }
    tracing::info!("Scoring worker stopped");
}

async fn score_one(runner: &ScoringRunner, job: ScoringJob) {
    match runner
        .score_messages(&job.conversation_id, &job.messages)
        .await
    {
        Ok(()) => {}
        Err(SyncError::NotFound(_)) => {
            tracing::warn!(
                "Session for {} disappeared before scoring finished",
                job.conversation_id
            );
        }
        Err(e) => {
            tracing::error!("Scoring failed for {}: {}", job.conversation_id, e);
            runner.defer(&job.conversation_id, &e.to_string()).await;
        }
    }
}
