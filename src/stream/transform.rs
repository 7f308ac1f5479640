//! Event -> outbound bytes transform for completion streams.
//!
//! Each decoded event is either the `[DONE]` sentinel, which closes the
//! relay, or a completion delta whose first choice carries the next piece of
//! generated text. Some providers prepend blank-line artifacts to the first
//! deltas of a stream; an [`ArtifactFilter`] decides which early deltas to
//! drop.

use bytes::Bytes;
use serde::Deserialize;

use super::sse::is_done_event;
use super::{SseEvent, SseMessage};
use crate::config::{ArtifactFilterConfig, FilterStrategy, NewlineMatch};
use crate::error::RelayError;

/// Strategy for suppressing leading artifacts.
///
/// The predicate is consulted only while fewer than `lookback()` deltas have
/// been emitted.
pub trait ArtifactFilter: Send + Sync {
    fn lookback(&self) -> usize;

    fn is_artifact(&self, text: &str) -> bool;
}

/// Drops newline artifacts from the first deltas of a stream.
#[derive(Debug, Clone, Copy)]
pub struct LeadingNewlineFilter {
    lookback: usize,
    mode: NewlineMatch,
}

impl LeadingNewlineFilter {
    #[must_use]
    pub fn new(lookback: usize, mode: NewlineMatch) -> Self {
        Self { lookback, mode }
    }
}

impl Default for LeadingNewlineFilter {
    fn default() -> Self {
        Self::new(2, NewlineMatch::Contains)
    }
}

impl ArtifactFilter for LeadingNewlineFilter {
    fn lookback(&self) -> usize {
        self.lookback
    }

    fn is_artifact(&self, text: &str) -> bool {
        match self.mode {
            NewlineMatch::Contains => memchr::memchr(b'\n', text.as_bytes()).is_some(),
            NewlineMatch::Only => {
                !text.is_empty() && text.bytes().all(|b| b == b'\n' || b == b'\r')
            }
        }
    }
}

/// Never suppresses anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopFilter;

impl ArtifactFilter for NoopFilter {
    fn lookback(&self) -> usize {
        0
    }

    fn is_artifact(&self, _text: &str) -> bool {
        false
    }
}

/// Build the filter selected by configuration.
#[must_use]
pub fn filter_from_config(config: &ArtifactFilterConfig) -> Box<dyn ArtifactFilter> {
    match config.strategy {
        FilterStrategy::LeadingNewline => {
            Box::new(LeadingNewlineFilter::new(config.lookback, config.match_mode))
        }
        FilterStrategy::None => Box::new(NoopFilter),
    }
}

/// Wire shape of one streamed completion chunk.
#[derive(Debug, Deserialize)]
pub struct CompletionDelta {
    pub choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
pub struct CompletionChoice {
    pub text: String,
}

impl CompletionDelta {
    /// Parse an event's data field.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::MalformedDelta`] when the data is not JSON, or has
    /// no first choice with a string `text`.
    pub fn parse(data: &str) -> Result<Self, RelayError> {
        let delta: Self = serde_json::from_str(data)
            .map_err(|e| RelayError::MalformedDelta(format!("{e}")))?;
        if delta.choices.is_empty() {
            return Err(RelayError::MalformedDelta(
                "choices array is empty".to_string(),
            ));
        }
        Ok(delta)
    }

    /// Take the text increment of the first choice.
    #[must_use]
    pub fn into_text(self) -> String {
        self.choices
            .into_iter()
            .next()
            .map(|choice| choice.text)
            .unwrap_or_default()
    }
}

/// Result of feeding one decoded item through the transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformOutcome {
    /// Text to append to the outbound stream.
    Emit(Bytes),
    /// Dropped as a leading artifact.
    Suppressed,
    /// Control item, or anything after closure.
    Ignored,
    /// Sentinel seen; the outbound stream must close.
    Close,
}

/// Per-relay transform state: the artifact filter and the emission counter.
pub struct StreamTransform {
    filter: Box<dyn ArtifactFilter>,
    emitted: usize,
    suppressed: usize,
    closed: bool,
}

impl StreamTransform {
    #[must_use]
    pub fn new(filter: Box<dyn ArtifactFilter>) -> Self {
        Self {
            filter,
            emitted: 0,
            suppressed: 0,
            closed: false,
        }
    }

    /// Number of deltas that survived the filter.
    #[must_use]
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    #[must_use]
    pub fn suppressed(&self) -> usize {
        self.suppressed
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Feed one decoder item.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::MalformedDelta`] when an event's data is neither
    /// the sentinel nor a well-formed completion delta.
    pub fn apply(&mut self, message: SseMessage) -> Result<TransformOutcome, RelayError> {
        match message {
            SseMessage::Event(event) => self.apply_event(event),
            SseMessage::ReconnectInterval(_) => Ok(TransformOutcome::Ignored),
        }
    }

    /// Feed one decoded event.
    ///
    /// # Errors
    ///
    /// See [`StreamTransform::apply`].
    pub fn apply_event(&mut self, event: SseEvent) -> Result<TransformOutcome, RelayError> {
        if self.closed {
            return Ok(TransformOutcome::Ignored);
        }
        if is_done_event(&event) {
            self.closed = true;
            return Ok(TransformOutcome::Close);
        }

        let text = CompletionDelta::parse(&event.data)?.into_text();
        if self.emitted < self.filter.lookback() && self.filter.is_artifact(&text) {
            self.suppressed += 1;
            tracing::debug!(
                emitted = self.emitted,
                len = text.len(),
                "suppressed leading artifact"
            );
            return Ok(TransformOutcome::Suppressed);
        }

        self.emitted += 1;
        Ok(TransformOutcome::Emit(Bytes::from(text)))
    }
}

impl Default for StreamTransform {
    fn default() -> Self {
        Self::new(Box::new(LeadingNewlineFilter::default()))
    }
}
