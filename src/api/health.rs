use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status and a config summary. The credential itself is
/// never echoed.
pub fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = &state.config;
    let filter = &config.relay.artifact_filter;
    Json(json!({
        "status": "indictment-relay is running",
        "config": {
            "upstream": {
                "completions_url": state.completions_url(),
                "model": config.upstream.model,
                "credential_configured": state.credential().is_some(),
            },
            "relay": {
                "artifact_filter": filter.strategy.to_string(),
                "lookback": filter.lookback,
                "idle_timeout_secs": config.server.idle_timeout_secs,
            },
            "features": {
                "log_level": config.features.log_level,
                "custom_prompt_template": config.features.prompt_template.is_some(),
            }
        }
    }))
}
