use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use crate::error::RelayError;
use crate::prompt::{render_prompt, CompletionPayload, IndictmentRequest};
use crate::relay::relay_completion;
use crate::state::AppState;

/// `POST /api/generateIndictment`: stream the drafted complaint as plain text.
pub async fn handler(State(state): State<Arc<AppState>>, body: bytes::Bytes) -> Response {
    match handler_inner(state, body).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn handler_inner(state: Arc<AppState>, body: bytes::Bytes) -> Result<Response, RelayError> {
    let request: IndictmentRequest = serde_json::from_slice(&body)
        .map_err(|e| RelayError::InvalidRequest(format!("Invalid request body: {e}")))?;

    let Some(credential) = state.credential() else {
        tracing::warn!("upstream credential not configured, skipping completion request");
        return Ok(missing_credential_response(
            &state.config.features.missing_key_message,
        ));
    };

    let request_id = state.next_request_id();
    tracing::info!(
        %request_id,
        fact_len = request.fact.len(),
        appeal_len = request.appeal.len(),
        "generating indictment"
    );

    let prompt = render_prompt(state.prompt_template(), &request);
    let payload = CompletionPayload::new(&state.config.upstream, prompt);
    let ctx = state.relay_context(request_id, credential);
    let stream = relay_completion(&state.transport, state.completions_url(), &payload, ctx).await?;

    Ok(text_stream_response(Body::from_stream(stream)))
}

fn missing_credential_response(message: &str) -> Response {
    Json(json!({
        "id": "0",
        "role": "system",
        "text": message,
    }))
    .into_response()
}

fn text_stream_response(body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    response
}
