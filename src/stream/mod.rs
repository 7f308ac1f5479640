pub mod sse;
pub mod transform;

pub use sse::{is_done_event, SseParser, DONE_SENTINEL};
pub use transform::{
    ArtifactFilter, CompletionDelta, LeadingNewlineFilter, NoopFilter, StreamTransform,
    TransformOutcome,
};

/// A parsed SSE frame from the upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// One item produced by the decoder.
///
/// Frames become [`SseMessage::Event`]; a valid `retry:` field becomes a
/// control item carrying the reconnect interval in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseMessage {
    Event(SseEvent),
    ReconnectInterval(u64),
}

impl SseMessage {
    #[must_use]
    pub fn as_event(&self) -> Option<&SseEvent> {
        match self {
            SseMessage::Event(event) => Some(event),
            SseMessage::ReconnectInterval(_) => None,
        }
    }
}

impl Default for SseMessage {
    fn default() -> Self {
        SseMessage::Event(SseEvent::default())
    }
}
