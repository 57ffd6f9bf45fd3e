use crate::domain::models::SessionStatus;
use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Cancelled | SessionStatus::Error
        )
    }

    fn rank(&self) -> u8 {
        match self {
            SessionStatus::Created => 0,
            SessionStatus::Active => 1,
            SessionStatus::Completed | SessionStatus::Cancelled | SessionStatus::Error => 2,
        }
    }

    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

/// Field changes produced by a legal status transition.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub status: SessionStatus,
    pub end_reason: Option<String>,
    pub completed_timestamp: Option<DateTime<Utc>>,
    pub actual_duration_minutes: Option<i32>,
}

pub fn plan_transition(
    current: SessionStatus,
    next: SessionStatus,
    end_reason: Option<String>,
    reported_duration_minutes: Option<i32>,
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> SyncResult<StatusChange> {
    if !current.can_transition_to(next) {
        return Err(SyncError::InvalidTransition {
            from: current,
            to: next,
        });
    }

    let end_reason = end_reason
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());

    let change = match next {
        SessionStatus::Completed => {
            if let Some(minutes) = reported_duration_minutes {
                if minutes < 0 {
                    return Err(SyncError::validation(
                        "actual duration must not be negative",
                    ));
                }
            }
            StatusChange {
                status: next,
                end_reason,
                completed_timestamp: Some(now),
                actual_duration_minutes: Some(
                    reported_duration_minutes.unwrap_or_else(|| elapsed_minutes(created_at, now)),
                ),
            }
        }
        SessionStatus::Cancelled | SessionStatus::Error => StatusChange {
            status: next,
            end_reason: end_reason.or_else(|| Some(next.as_str().to_string())),
            completed_timestamp: None,
            actual_duration_minutes: None,
        },
        _ => StatusChange {
            status: next,
            end_reason: None,
            completed_timestamp: None,
            actual_duration_minutes: None,
        },
    };

    Ok(change)
}

/// Whole minutes between two instants, rounded to nearest, never negative.
pub fn elapsed_minutes(start: DateTime<Utc>, end: DateTime<Utc>) -> i32 {
    let seconds = (end - start).num_seconds().max(0);
    ((seconds + 30) / 60) as i32
}
