use crate::domain::models::{
    InterviewSession, ScoreDetails, SessionDetail, SessionStatus, Transcript,
};
use crate::error::{SyncError, SyncResult};
use crate::services::{query, sessions};
use crate::state::SharedState;
use crate::web::extract::ApiJson;
use crate::web::session::UserSession;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct CreateSessionPayload {
    pub category: String,
    pub session_name: String,
    pub expected_duration_minutes: i32,
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub category: Option<String>,
}

#[derive(Deserialize)]
pub struct AttachPayload {
    pub conversation_id: String,
}

#[derive(Deserialize)]
pub struct StatusPayload {
    pub status: String,
    pub end_reason: Option<String>,
    pub actual_duration_minutes: Option<i32>,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", post(create).get(list))
        .route("/:id", get(detail).delete(remove))
        .route("/:id/transcript", get(transcript))
        .route("/:id/score", get(score))
        .route("/:id/conversation", post(attach))
        .route("/:id/status", post(change_status))
        .with_state(state)
}

async fn create(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    ApiJson(payload): ApiJson<CreateSessionPayload>,
) -> SyncResult<(StatusCode, Json<InterviewSession>)> {
    let session = sessions::create_session(
        state.store(),
        &principal,
        &payload.category,
        &payload.session_name,
        payload.expected_duration_minutes,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn list(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> SyncResult<Json<Vec<InterviewSession>>> {
    let sessions =
        sessions::list_sessions(state.store(), &principal, query.category.as_deref()).await?;
    Ok(Json(sessions))
}

async fn detail(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> SyncResult<Json<SessionDetail>> {
    Ok(Json(
        query::get_session_detail(state.store(), &principal, id).await?,
    ))
}

async fn remove(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> SyncResult<StatusCode> {
    sessions::delete_session(state.store(), &principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn transcript(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> SyncResult<Json<Transcript>> {
    Ok(Json(query::get_transcript(state.store(), &principal, id).await?))
}

async fn score(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> SyncResult<Json<ScoreDetails>> {
    Ok(Json(query::get_score(state.store(), &principal, id).await?))
}

async fn attach(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    ApiJson(payload): ApiJson<AttachPayload>,
) -> SyncResult<Json<InterviewSession>> {
    let session =
        sessions::attach_conversation_id(state.store(), &principal, id, &payload.conversation_id)
            .await?;
    Ok(Json(session))
}

async fn change_status(
    UserSession(principal): UserSession,
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    ApiJson(payload): ApiJson<StatusPayload>,
) -> SyncResult<Json<InterviewSession>> {
    let status = SessionStatus::try_from(payload.status.as_str())
        .map_err(|_| SyncError::validation(format!("unknown status {}", payload.status)))?;
    let session = sessions::transition_status(
        state.store(),
        &principal,
        id,
        status,
        payload.end_reason,
        payload.actual_duration_minutes,
    )
    .await?;
    Ok(Json(session))
}
