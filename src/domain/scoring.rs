use crate::domain::models::ScoreReasons;
use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};

/// Sub-score weights in percent. They sum to 100.
pub const CLARITY_WEIGHT: i32 = 30;
pub const GRAMMAR_WEIGHT: i32 = 20;
pub const SUBSTANCE_WEIGHT: i32 = 50;

pub const MIN_SCORE: i32 = 0;
pub const MAX_SCORE: i32 = 100;

/// A score breakdown as produced by a scorer or delivered by webhook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoreInput {
    pub clarity: i32,
    pub grammar: i32,
    pub substance: i32,
    #[serde(default)]
    pub reasons: ScoreReasons,
}

impl ScoreInput {
    pub fn validate(&self) -> SyncResult<()> {
        for (name, value) in [
            ("clarity", self.clarity),
            ("grammar", self.grammar),
            ("substance", self.substance),
        ] {
            if !(MIN_SCORE..=MAX_SCORE).contains(&value) {
                return Err(SyncError::validation(format!(
                    "{name} score {value} outside {MIN_SCORE}..={MAX_SCORE}"
                )));
            }
        }
        Ok(())
    }

    pub fn composite(&self) -> i32 {
        composite_score(self.clarity, self.grammar, self.substance)
    }
}

/// `round(0.30*clarity + 0.20*grammar + 0.50*substance)` with halves rounding up.
pub fn composite_score(clarity: i32, grammar: i32, substance: i32) -> i32 {
    let weighted =
        CLARITY_WEIGHT * clarity + GRAMMAR_WEIGHT * grammar + SUBSTANCE_WEIGHT * substance;
    (weighted + 50).div_euclid(100)
}
