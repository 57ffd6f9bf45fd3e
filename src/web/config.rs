use crate::error::SyncResult;
use crate::state::SharedState;
use axum::{extract::State, routing::get, Json, Router};
use std::collections::BTreeMap;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/public", get(public_config))
        .with_state(state)
}

/// Public client settings as a flat key/value map.
async fn public_config(
    State(state): State<SharedState>,
) -> SyncResult<Json<BTreeMap<String, String>>> {
    let entries = state.store().list_config(true).await?;
    Ok(Json(
        entries
            .into_iter()
            .map(|entry| (entry.key_name, entry.key_value))
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::seed;
    use crate::state::test_state;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_only_public_keys_are_served() {
        let state = test_state();
        seed::seed_all(state.store(), &state.config).await.unwrap();

        let response = router(state.clone())
            .oneshot(Request::builder().uri("/public").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let map: BTreeMap<String, String> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(map.get("max_cv_size_mb").map(String::as_str), Some("5"));
        assert_eq!(map.get("scoring_enabled").map(String::as_str), Some("false"));
        assert!(!map.contains_key("scoring_model"));
    }
}
