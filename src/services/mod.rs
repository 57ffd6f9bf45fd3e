pub mod pending;
pub mod query;
pub mod scores;
pub mod scoring;
pub mod sessions;
pub mod transcripts;
