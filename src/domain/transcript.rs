use crate::domain::models::{MessageRole, TranscriptMessage};
use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageTally {
    pub total: i32,
    pub user: i32,
    pub assistant: i32,
}

impl MessageTally {
    pub fn of(messages: &[TranscriptMessage]) -> Self {
        messages.iter().fold(Self::default(), |mut tally, msg| {
            tally.total += 1;
            match msg.role {
                MessageRole::User => tally.user += 1,
                MessageRole::Assistant => tally.assistant += 1,
                // system prompts count toward the total only
                MessageRole::System => {}
            }
            tally
        })
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.total < 0 || self.user < 0 || self.assistant < 0 {
            return Err(SyncError::validation("message counts must not be negative"));
        }
        if self.user + self.assistant > self.total {
            return Err(SyncError::validation(
                "user and assistant messages exceed total message count",
            ));
        }
        Ok(())
    }
}

/// Parse a provider transcript payload. Unknown roles are rejected.
pub fn parse_messages(raw: &serde_json::Value) -> SyncResult<Vec<TranscriptMessage>> {
    let messages: Vec<TranscriptMessage> = serde_json::from_value(raw.clone())
        .map_err(|e| SyncError::validation(format!("malformed transcript: {e}")))?;
    Ok(messages)
}
