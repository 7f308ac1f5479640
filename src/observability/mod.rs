use std::time::Duration;

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
///
/// `RUST_LOG`, when set, takes precedence over the configured level.
pub fn init_tracing(log_level: &str, json: bool) {
    let level = log_level.to_uppercase();

    if level == "DISABLED" {
        return;
    }

    let tracing_level = match level.as_str() {
        "WARNING" => "WARN",
        "CRITICAL" => "ERROR",
        other => other,
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(tracing_level))
        .unwrap_or_else(|_| EnvFilter::new("INFO"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    // try_init: a second call (tests, embedding) keeps the first subscriber.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Why a relay stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// `[DONE]` received.
    Sentinel,
    /// Upstream body ended without the sentinel.
    Exhausted,
    /// Malformed delta, transport failure or idle timeout.
    Failed,
    /// Client went away before the relay finished.
    Cancelled,
}

impl RelayEnd {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RelayEnd::Sentinel => "done",
            RelayEnd::Exhausted => "exhausted",
            RelayEnd::Failed => "failed",
            RelayEnd::Cancelled => "cancelled",
        }
    }
}

/// Per-relay counters, logged once when the relay ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Decoded upstream events, sentinel included.
    pub events: usize,
    /// Non-empty fragments written to the client.
    pub fragments: usize,
    pub bytes: usize,
    pub suppressed: usize,
}

/// Emit the single summary line for a finished relay.
pub fn log_relay_complete(
    request_id: &uuid::Uuid,
    stats: &RelayStats,
    end: RelayEnd,
    elapsed: Duration,
) {
    let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    match end {
        RelayEnd::Sentinel | RelayEnd::Exhausted => tracing::info!(
            %request_id,
            events = stats.events,
            fragments = stats.fragments,
            bytes = stats.bytes,
            suppressed = stats.suppressed,
            end = end.as_str(),
            elapsed_ms,
            "relay complete"
        ),
        RelayEnd::Failed | RelayEnd::Cancelled => tracing::warn!(
            %request_id,
            events = stats.events,
            fragments = stats.fragments,
            bytes = stats.bytes,
            suppressed = stats.suppressed,
            end = end.as_str(),
            elapsed_ms,
            "relay ended early"
        ),
    }
}
