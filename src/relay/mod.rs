//! Relay controller: one upstream completion stream -> one outbound byte stream.
//!
//! The upstream body is decoded incrementally, each event goes through the
//! [`StreamTransform`], and surviving text is yielded in arrival order. The
//! outbound stream ends cleanly on `[DONE]` or upstream exhaustion and ends
//! in error on a malformed delta, a body read failure or an idle timeout.
//! Dropping the outbound stream drops the upstream body, which aborts the
//! upstream read.

mod idle;

use std::fmt::Display;
use std::pin::Pin;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use http::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use smallvec::SmallVec;

pub use idle::IdleTimeout;

use crate::error::{sanitize_upstream_error, RelayError};
use crate::observability::{log_relay_complete, RelayEnd, RelayStats};
use crate::prompt::CompletionPayload;
use crate::stream::{SseMessage, SseParser, StreamTransform, TransformOutcome};
use crate::transport::HttpTransport;

/// Request-scoped relay state. Never shared between requests.
pub struct RelayContext {
    pub request_id: uuid::Uuid,
    credential: String,
    parser: SseParser,
    transform: StreamTransform,
    idle_timeout: Option<Duration>,
}

impl RelayContext {
    #[must_use]
    pub fn new(request_id: uuid::Uuid, credential: impl Into<String>, transform: StreamTransform) -> Self {
        Self {
            request_id,
            credential: credential.into(),
            parser: SseParser::new(),
            transform,
            idle_timeout: None,
        }
    }

    /// `None` disables the idle deadline.
    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    fn auth_header(&self) -> Result<HeaderValue, RelayError> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", self.credential)).map_err(
            |_| RelayError::Config("credential contains characters not allowed in a header".to_string()),
        )?;
        value.set_sensitive(true);
        Ok(value)
    }
}

/// Open the upstream completion stream and return the outbound text stream.
///
/// Setup failures (connection, header timeout, non-success status) are
/// returned before any byte is produced so the caller can still answer with
/// a proper error status.
///
/// # Errors
///
/// - [`RelayError::Transport`] when the request cannot be sent, the
///   headers do not arrive in time, or a non-2xx error body cannot be read
///   within the same timeout.
/// - [`RelayError::UpstreamRejected`] on a non-2xx status.
/// - [`RelayError::Config`] when the credential is not a valid header value.
pub async fn relay_completion(
    transport: &HttpTransport,
    url: &str,
    payload: &CompletionPayload,
    ctx: RelayContext,
) -> Result<impl Stream<Item = Result<Bytes, RelayError>> + Send + 'static, RelayError> {
    let mut headers = http::HeaderMap::with_capacity(2);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(AUTHORIZATION, ctx.auth_header()?);

    let body = payload
        .to_body()
        .map_err(|e| RelayError::Internal(format!("Failed to encode completion payload: {e}")))?;

    let response = transport.send_stream(url, headers, body).await?;
    let status = response.status();
    if !status.is_success() {
        let error_body = match transport.read_error_body(response).await {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    status = status.as_u16(),
                    error = %err,
                    "upstream error body unreadable"
                );
                return Err(err);
            }
        };
        let message = sanitize_upstream_error(&error_body);
        tracing::warn!(
            request_id = %ctx.request_id,
            status = status.as_u16(),
            %message,
            "upstream rejected completion request"
        );
        return Err(RelayError::UpstreamRejected {
            status: status.as_u16(),
            message,
        });
    }

    tracing::debug!(request_id = %ctx.request_id, "upstream stream opened");
    Ok(relay_body_stream(response.bytes_stream(), ctx))
}

/// Drive an already-open upstream body through decoder and transform.
///
/// Safe to call outside a runtime; the idle timer is armed on first poll.
pub fn relay_body_stream<S, E>(
    byte_stream: S,
    ctx: RelayContext,
) -> impl Stream<Item = Result<Bytes, RelayError>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let source = Box::pin(IdleTimeout::new(byte_stream, ctx.idle_timeout));
    let state = RelayState {
        source,
        ctx,
        scratch: Vec::with_capacity(8),
        pending: PendingMessages::with_capacity(8),
        stats: RelayStats::default(),
        started: Instant::now(),
        finished: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        let item = state.next_item().await?;
        Some((item, state))
    })
}

struct PendingMessages {
    messages: SmallVec<[SseMessage; 8]>,
    head: usize,
}

impl PendingMessages {
    #[inline]
    fn with_capacity(capacity: usize) -> Self {
        let mut messages = SmallVec::new();
        messages.reserve(capacity);
        Self { messages, head: 0 }
    }

    #[inline]
    fn pop_front(&mut self) -> Option<SseMessage> {
        if self.head >= self.messages.len() {
            return None;
        }
        let message = std::mem::take(&mut self.messages[self.head]);
        self.head += 1;
        if self.head == self.messages.len() {
            self.messages.clear();
            self.head = 0;
        }
        Some(message)
    }

    #[inline]
    fn extend_from_vec(&mut self, decoded: &mut Vec<SseMessage>) {
        if decoded.is_empty() {
            return;
        }
        self.messages.reserve(decoded.len());
        self.messages.extend(decoded.drain(..));
    }
}

struct RelayState<S> {
    source: Pin<Box<IdleTimeout<S>>>,
    ctx: RelayContext,
    scratch: Vec<SseMessage>,
    pending: PendingMessages,
    stats: RelayStats,
    started: Instant,
    finished: bool,
}

impl<S> RelayState<S> {
    fn finish(&mut self, end: RelayEnd) {
        self.finished = true;
        self.stats.suppressed = self.ctx.transform.suppressed();
        log_relay_complete(
            &self.ctx.request_id,
            &self.stats,
            end,
            self.started.elapsed(),
        );
    }

    fn fail(&mut self, err: &RelayError) {
        tracing::warn!(
            request_id = %self.ctx.request_id,
            error = %err,
            "relay aborted mid-stream"
        );
        self.finish(RelayEnd::Failed);
    }
}

impl<S, E> RelayState<S>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    async fn next_item(&mut self) -> Option<Result<Bytes, RelayError>> {
        loop {
            if self.finished {
                return None;
            }

            while let Some(message) = self.pending.pop_front() {
                match self.ctx.transform.apply(message) {
                    Ok(TransformOutcome::Emit(bytes)) => {
                        if bytes.is_empty() {
                            continue;
                        }
                        self.stats.fragments += 1;
                        self.stats.bytes += bytes.len();
                        return Some(Ok(bytes));
                    }
                    Ok(TransformOutcome::Close) => {
                        self.finish(RelayEnd::Sentinel);
                        return None;
                    }
                    Ok(TransformOutcome::Suppressed | TransformOutcome::Ignored) => {}
                    Err(err) => {
                        self.fail(&err);
                        return Some(Err(err));
                    }
                }
            }

            match self.source.next().await {
                Some(Ok(chunk)) => {
                    self.ctx.parser.feed_bytes_into(&chunk, &mut self.scratch);
                    self.stats.events += self
                        .scratch
                        .iter()
                        .filter(|message| message.as_event().is_some())
                        .count();
                    self.pending.extend_from_vec(&mut self.scratch);
                }
                Some(Err(err)) => {
                    self.fail(&err);
                    return Some(Err(err));
                }
                None => {
                    self.finish(RelayEnd::Exhausted);
                    return None;
                }
            }
        }
    }
}

impl<S> Drop for RelayState<S> {
    fn drop(&mut self) {
        if !self.finished {
            self.finish(RelayEnd::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::NoopFilter;

    fn sse_delta(text: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({ "choices": [{ "text": text }] })
        )
    }

    fn ctx() -> RelayContext {
        RelayContext::new(uuid::Uuid::nil(), "sk-test", StreamTransform::default())
    }

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
        let owned: Vec<_> = parts
            .iter()
            .map(|part| Ok(Bytes::copy_from_slice(part.as_bytes())))
            .collect();
        futures_util::stream::iter(owned)
    }

    async fn collect_ok(stream: impl Stream<Item = Result<Bytes, RelayError>>) -> String {
        let items: Vec<_> = stream.collect().await;
        let mut out = Vec::new();
        for item in items {
            out.extend_from_slice(&item.unwrap());
        }
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_leading_artifact_then_text_then_done() {
        let body = format!("{}{}data: [DONE]\n\n", sse_delta("\n\n"), sse_delta("Hello"));
        let out = collect_ok(relay_body_stream(chunks(&[body.as_str()]), ctx())).await;
        assert_eq!(out, "Hello");
    }

    #[tokio::test]
    async fn test_every_split_point_gives_same_output() {
        let body = format!(
            "{}{}{}data: [DONE]\n\n",
            sse_delta("\n"),
            sse_delta("民事"),
            sse_delta("起诉状")
        );
        let bytes = body.as_bytes();
        for cut in 0..=bytes.len() {
            let parts = vec![
                Ok::<_, std::io::Error>(Bytes::copy_from_slice(&bytes[..cut])),
                Ok(Bytes::copy_from_slice(&bytes[cut..])),
            ];
            let out = collect_ok(relay_body_stream(futures_util::stream::iter(parts), ctx())).await;
            assert_eq!(out, "民事起诉状", "cut at {cut}");
        }
    }

    #[tokio::test]
    async fn test_events_after_done_are_not_relayed() {
        let body = format!("{}data: [DONE]\n\n{}", sse_delta("A"), sse_delta("late"));
        let out = collect_ok(relay_body_stream(chunks(&[body.as_str()]), ctx())).await;
        assert_eq!(out, "A");
    }

    #[tokio::test]
    async fn test_exhaustion_without_done_ends_cleanly() {
        let first = sse_delta("A");
        let second = sse_delta("B");
        let out = collect_ok(relay_body_stream(chunks(&[first.as_str(), second.as_str()]), ctx())).await;
        assert_eq!(out, "AB");
    }

    #[tokio::test]
    async fn test_incomplete_trailing_frame_is_discarded() {
        let first = sse_delta("A");
        let out = collect_ok(relay_body_stream(
            chunks(&[first.as_str(), "data: {\"choices\":[{\"text\":\"B\"}]}"]),
            ctx(),
        ))
        .await;
        assert_eq!(out, "A");
    }

    #[tokio::test]
    async fn test_malformed_delta_errors_after_prior_output() {
        let body = format!("{}data: {{\"oops\":1}}\n\n{}", sse_delta("A"), sse_delta("B"));
        let items: Vec<_> = relay_body_stream(chunks(&[body.as_str()]), ctx()).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), &Bytes::from_static(b"A"));
        assert!(matches!(items[1], Err(RelayError::MalformedDelta(_))));
    }

    #[tokio::test]
    async fn test_empty_text_produces_no_bytes() {
        let body = format!("{}{}data: [DONE]\n\n", sse_delta(""), sse_delta("x"));
        let items: Vec<_> = relay_body_stream(chunks(&[body.as_str()]), ctx()).collect().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap(), &Bytes::from_static(b"x"));
    }

    #[tokio::test]
    async fn test_comments_and_data_less_frames_are_skipped() {
        let body = format!(
            ": keep-alive\n\nevent: ping\n\n{}data: [DONE]\n\n",
            sse_delta("ok")
        );
        let out = collect_ok(relay_body_stream(chunks(&[body.as_str()]), ctx())).await;
        assert_eq!(out, "ok");
    }

    #[tokio::test]
    async fn test_noop_filter_relays_newlines() {
        let context = RelayContext::new(
            uuid::Uuid::nil(),
            "sk-test",
            StreamTransform::new(Box::new(NoopFilter)),
        );
        let body = format!("{}data: [DONE]\n\n", sse_delta("\n\n"));
        let out = collect_ok(relay_body_stream(chunks(&[body.as_str()]), context)).await;
        assert_eq!(out, "\n\n");
    }

    #[tokio::test]
    async fn test_idle_timeout_ends_stream_in_error() {
        let first = sse_delta("A");
        let source = chunks(&[first.as_str()]).chain(futures_util::stream::pending());
        let context = ctx().with_idle_timeout(Some(Duration::from_millis(50)));
        let items: Vec<_> = relay_body_stream(source, context).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(RelayError::IdleTimeout { .. })));
    }

    #[tokio::test]
    async fn test_body_error_ends_stream_in_error() {
        let first = sse_delta("A");
        let source = chunks(&[first.as_str()]).chain(futures_util::stream::iter(vec![Err(
            std::io::Error::other("connection reset"),
        )]));
        let items: Vec<_> = relay_body_stream(source, ctx()).collect().await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(RelayError::Transport(_))));
    }

    #[test]
    fn test_body_stream_with_idle_deadline_built_outside_runtime() {
        let first = sse_delta("A");
        let source = chunks(&[first.as_str()]).chain(futures_util::stream::pending());
        let context = ctx().with_idle_timeout(Some(Duration::from_millis(50)));
        let stream = relay_body_stream(source, context);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let items: Vec<_> = runtime.block_on(stream.collect());
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(RelayError::IdleTimeout { .. })));
    }

    #[test]
    fn test_credential_with_newline_is_rejected() {
        let context = RelayContext::new(uuid::Uuid::nil(), "sk\nbad", StreamTransform::default());
        assert!(matches!(context.auth_header(), Err(RelayError::Config(_))));
    }
}
