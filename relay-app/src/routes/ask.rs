use crate::relay::RelayError;
use crate::server::AppState;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize)]
pub struct AskResponse {
    pub response: String,
}

pub fn router() -> axum::Router {
    axum::Router::new().route("/ask_jarvis", post(ask_jarvis))
}

#[tracing::instrument(level = "info", skip_all)]
async fn ask_jarvis(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> (StatusCode, Json<AskResponse>) {
    let result = match payload {
        Ok(Json(body)) => match command_from_body(&body) {
            Ok(command) => state.relay.ask(command).await,
            Err(e) => Err(e),
        },
        Err(rejection) => Err(RelayError::InvalidRequest(rejection.body_text())),
    };

    match result {
        Ok(reply) => (StatusCode::OK, Json(AskResponse { response: reply })),
        Err(e) => {
            let status = e.status_code();
            tracing::warn!(status = status.as_u16(), error = %e, "ask_jarvis failed");
            (
                status,
                Json(AskResponse {
                    response: e.public_message(),
                }),
            )
        }
    }
}

fn command_from_body(body: &serde_json::Value) -> Result<&str, RelayError> {
    match body.get("command") {
        Some(serde_json::Value::String(command)) if !command.trim().is_empty() => {
            Ok(command.as_str())
        }
        _ => Err(RelayError::MissingCommand),
    }
}
