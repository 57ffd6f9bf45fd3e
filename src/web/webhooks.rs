use crate::access::Principal;
use crate::domain::models::SessionStatus;
use crate::domain::scoring::ScoreInput;
use crate::domain::transcript::parse_messages;
use crate::error::{SyncError, SyncResult};
use crate::middleware::service_principal;
use crate::services::pending::{IngestEvent, IngestReceipt};
use crate::services::sessions;
use crate::state::SharedState;
use crate::web::extract::ApiJson;
use axum::{extract::State, middleware, routing::post, Extension, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Provider conversation callback.
#[derive(Debug, Deserialize)]
pub struct ConversationEvent {
    pub conversation_id: String,
    pub event_type: String,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub properties: ConversationProperties,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConversationProperties {
    pub shutdown_reason: Option<String>,
    pub duration_minutes: Option<i32>,
    pub error: Option<String>,
    pub transcript: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct ScoreEvent {
    pub conversation_id: String,
    #[serde(flatten)]
    pub score: ScoreInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum WebhookAck {
    Applied,
    Unchanged,
    Queued { pending_id: Uuid },
    Ignored,
}

impl From<IngestReceipt> for WebhookAck {
    fn from(receipt: IngestReceipt) -> Self {
        match receipt {
            IngestReceipt::Applied => WebhookAck::Applied,
            IngestReceipt::Unchanged => WebhookAck::Unchanged,
            IngestReceipt::Queued { pending_id } => WebhookAck::Queued { pending_id },
        }
    }
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/conversation", post(conversation))
        .route("/score", post(score))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            service_principal,
        ))
        .with_state(state)
}

async fn conversation(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    ApiJson(event): ApiJson<ConversationEvent>,
) -> SyncResult<Json<WebhookAck>> {
    tracing::info!(
        "Webhook {} for conversation {}",
        event.event_type,
        event.conversation_id
    );
    let props = event.properties;

    let lifecycle = match event.event_type.as_str() {
        "system.replica_joined" => Some((SessionStatus::Active, None)),
        "system.shutdown" => Some((SessionStatus::Completed, props.shutdown_reason)),
        "system.error" => Some((SessionStatus::Error, props.error)),
        "application.transcription_ready" => None,
        other => {
            tracing::debug!("Ignoring webhook event {}", other);
            return Ok(Json(WebhookAck::Ignored));
        }
    };

    if let Some((status, end_reason)) = lifecycle {
        let moved = sessions::advance_by_conversation(
            state.store(),
            &principal,
            &event.conversation_id,
            status,
            end_reason,
            props.duration_minutes,
        )
        .await?;
        let ack = if moved.is_some() {
            WebhookAck::Applied
        } else {
            WebhookAck::Ignored
        };
        return Ok(Json(ack));
    }

    let raw = props
        .transcript
        .ok_or_else(|| SyncError::validation("transcription_ready event without transcript"))?;
    let messages = parse_messages(&raw)?;
    let receipt = state
        .pipeline
        .submit(
            &principal,
            IngestEvent::Transcript {
                conversation_id: event.conversation_id,
                messages,
                webhook_timestamp: event.timestamp.unwrap_or_else(Utc::now),
            },
        )
        .await?;
    Ok(Json(receipt.into()))
}

async fn score(
    State(state): State<SharedState>,
    Extension(principal): Extension<Principal>,
    ApiJson(event): ApiJson<ScoreEvent>,
) -> SyncResult<Json<WebhookAck>> {
    event.score.validate()?;
    let receipt = state
        .pipeline
        .submit(
            &principal,
            IngestEvent::Score {
                conversation_id: event.conversation_id,
                score: event.score,
            },
        )
        .await?;
    Ok(Json(receipt.into()))
}
