/// Error type shared by the relay, transport and ingress layers.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Upstream rejected request: status={status}, message={message}")]
    UpstreamRejected { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Malformed completion delta: {0}")]
    MalformedDelta(String),
    #[error("Upstream idle for more than {idle:?}")]
    IdleTimeout { idle: std::time::Duration },
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category for status code selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    Authentication,
    Permission,
    RateLimit,
    BadGateway,
    ServerError,
}

/// Map an upstream HTTP status code to an error category.
#[must_use]
pub fn category_from_upstream_status(status: u16) -> ErrorCategory {
    match status {
        400 => ErrorCategory::InvalidRequest,
        401 => ErrorCategory::Authentication,
        403 => ErrorCategory::Permission,
        429 => ErrorCategory::RateLimit,
        _ => ErrorCategory::BadGateway,
    }
}

impl RelayError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            RelayError::InvalidRequest(_) => ErrorCategory::InvalidRequest,
            RelayError::UpstreamRejected { status, .. } => category_from_upstream_status(*status),
            RelayError::Transport(_)
            | RelayError::MalformedDelta(_)
            | RelayError::IdleTimeout { .. } => ErrorCategory::BadGateway,
            RelayError::Config(_) | RelayError::Internal(_) => ErrorCategory::ServerError,
        }
    }
}

// ---------------------------------------------------------------------------
// Category -> HTTP status code
// ---------------------------------------------------------------------------

fn http_status_for_category(cat: ErrorCategory) -> http::StatusCode {
    match cat {
        ErrorCategory::InvalidRequest => http::StatusCode::BAD_REQUEST,
        ErrorCategory::Authentication => http::StatusCode::UNAUTHORIZED,
        ErrorCategory::Permission => http::StatusCode::FORBIDDEN,
        ErrorCategory::RateLimit => http::StatusCode::TOO_MANY_REQUESTS,
        ErrorCategory::BadGateway => http::StatusCode::BAD_GATEWAY,
        ErrorCategory::ServerError => http::StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_type(cat: ErrorCategory) -> &'static str {
    match cat {
        ErrorCategory::InvalidRequest => "invalid_request_error",
        ErrorCategory::Authentication => "authentication_error",
        ErrorCategory::Permission => "permission_error",
        ErrorCategory::RateLimit => "rate_limit_error",
        ErrorCategory::BadGateway => "upstream_error",
        ErrorCategory::ServerError => "server_error",
    }
}

fn error_code(cat: ErrorCategory) -> &'static str {
    match cat {
        ErrorCategory::InvalidRequest => "invalid_request",
        ErrorCategory::Authentication => "invalid_api_key",
        ErrorCategory::Permission => "permission_denied",
        ErrorCategory::RateLimit => "rate_limit_exceeded",
        ErrorCategory::BadGateway => "bad_gateway",
        ErrorCategory::ServerError => "server_error",
    }
}

/// Format an error as `(status_code, JSON body)` in the OpenAI error shape.
#[must_use]
pub fn format_error(err: &RelayError) -> (http::StatusCode, serde_json::Value) {
    let cat = err.category();
    let body = serde_json::json!({
        "error": {
            "message": err.to_string(),
            "type": error_type(cat),
            "code": error_code(cat),
            "param": null,
        }
    });
    (http_status_for_category(cat), body)
}

impl axum::response::IntoResponse for RelayError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = format_error(&self);
        (status, axum::Json(body)).into_response()
    }
}

/// Reduce an upstream error body to a short, log-safe message.
///
/// Prefers `error.message` from a JSON body and falls back to the lossy text,
/// both truncated on a character boundary.
#[must_use]
pub fn sanitize_upstream_error(body: &[u8]) -> String {
    const MAX_LEN: usize = 500;

    let message = serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|json| {
            json.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_owned)
        })
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned());

    if message.len() <= MAX_LEN {
        return message;
    }
    let mut cut = MAX_LEN;
    while !message.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &message[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_status_categories() {
        assert_eq!(category_from_upstream_status(401), ErrorCategory::Authentication);
        assert_eq!(category_from_upstream_status(429), ErrorCategory::RateLimit);
        assert_eq!(category_from_upstream_status(503), ErrorCategory::BadGateway);
        assert_eq!(category_from_upstream_status(404), ErrorCategory::BadGateway);
    }

    #[test]
    fn test_format_upstream_rejection() {
        let err = RelayError::UpstreamRejected {
            status: 401,
            message: "Incorrect API key provided".to_string(),
        };
        let (status, body) = format_error(&err);
        assert_eq!(status, http::StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "invalid_api_key");
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("Incorrect API key provided"));
    }

    #[test]
    fn test_format_transport_is_bad_gateway() {
        let (status, body) = format_error(&RelayError::Transport("refused".to_string()));
        assert_eq!(status, http::StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["type"], "upstream_error");
    }

    #[test]
    fn test_sanitize_prefers_json_message() {
        let body = br#"{"error":{"message":"model overloaded","type":"server_error"}}"#;
        assert_eq!(sanitize_upstream_error(body), "model overloaded");
    }

    #[test]
    fn test_sanitize_truncates_on_char_boundary() {
        let body = "事".repeat(300);
        let out = sanitize_upstream_error(body.as_bytes());
        assert!(out.ends_with("..."));
        assert!(out.len() <= 503);
    }
}
