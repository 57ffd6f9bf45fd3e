use crate::error::SyncError;
use axum::extract::FromRequest;

/// `Json` whose rejections use the `{"error": ...}` body of every other failure.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(SyncError))]
pub struct ApiJson<T>(pub T);
