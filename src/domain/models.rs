use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SessionCategory {
    Technical,
    Behavioral,
}

impl SessionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionCategory::Technical => "technical",
            SessionCategory::Behavioral => "behavioral",
        }
    }
}

impl TryFrom<&str> for SessionCategory {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_lowercase().as_str() {
            "technical" => Ok(SessionCategory::Technical),
            "behavioral" | "behavioural" => Ok(SessionCategory::Behavioral),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Created,
    Active,
    Completed,
    Cancelled,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Error => "error",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for SessionStatus {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, <SessionStatus as TryFrom<&str>>::Error> {
        match value.trim().to_lowercase().as_str() {
            "created" => Ok(SessionStatus::Created),
            "active" => Ok(SessionStatus::Active),
            "completed" => Ok(SessionStatus::Completed),
            "cancelled" | "canceled" => Ok(SessionStatus::Cancelled),
            "error" => Ok(SessionStatus::Error),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InterviewSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub category: SessionCategory,
    pub session_name: String,
    pub expected_duration_minutes: i32,
    pub actual_duration_minutes: Option<i32>,
    pub conversation_id: Option<String>,
    pub status: SessionStatus,
    pub end_reason: Option<String>,
    pub score: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranscriptMessage {
    pub role: MessageRole,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transcript {
    pub id: Uuid,
    pub conversation_id: String,
    pub messages: Vec<TranscriptMessage>,
    pub message_count: i32,
    pub user_message_count: i32,
    pub assistant_message_count: i32,
    pub webhook_timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ScoreReasons {
    pub clarity: String,
    pub grammar: String,
    pub substance: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreDetails {
    pub id: Uuid,
    pub conversation_id: String,
    pub clarity_score: i32,
    pub clarity_reason: String,
    pub grammar_score: i32,
    pub grammar_reason: String,
    pub substance_score: i32,
    pub substance_reason: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScoreDetails {
    pub fn composite(&self) -> i32 {
        crate::domain::scoring::composite_score(
            self.clarity_score,
            self.grammar_score,
            self.substance_score,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfigEntry {
    pub id: Uuid,
    pub key_name: String,
    pub key_value: String,
    pub is_public: bool,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A record that may not have been delivered yet.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "state", content = "data", rename_all = "snake_case")]
pub enum Availability<T> {
    Available(T),
    Pending,
}

impl<T> Availability<T> {
    pub fn from_option(value: Option<T>) -> Self {
        match value {
            Some(v) => Availability::Available(v),
            None => Availability::Pending,
        }
    }

    pub fn as_ref(&self) -> Option<&T> {
        match self {
            Availability::Available(v) => Some(v),
            Availability::Pending => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Availability::Pending)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionDetail {
    pub session: InterviewSession,
    pub transcript: Availability<Transcript>,
    pub score: Availability<ScoreDetails>,
    pub composite_score: Option<i32>,
}
