use crate::server::AppState;
use axum::routing::get;
use axum::{Extension, Json};
use chrono::Utc;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new().route("/health", get(get_health))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_health(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    let llm = state.relay.llm();
    Json(serde_json::json!({
        "status": "ok",
        "provider": llm.provider(),
        "model": llm.model(),
        "api_key_configured": llm.has_api_key(),
        "notifications": state.relay.notifier_channel(),
        "trigger_keywords": state.relay.policy().trigger_keywords(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "checked_at": Utc::now(),
    }))
}
