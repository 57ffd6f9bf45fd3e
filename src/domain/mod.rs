pub mod lifecycle;
pub mod models;
pub mod scoring;
pub mod transcript;
