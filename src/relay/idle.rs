use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::Stream;
use pin_project_lite::pin_project;
use tokio::time::{Instant, Sleep};

use crate::error::RelayError;

pin_project! {
    /// Upstream body stream with an inactivity deadline.
    ///
    /// The timer is created on the first poll that finds the body idle and is
    /// pushed forward on every chunk. When it fires, a single
    /// [`RelayError::IdleTimeout`] is yielded and the stream ends. Body errors
    /// are mapped to [`RelayError::Transport`].
    pub struct IdleTimeout<S> {
        #[pin]
        inner: S,
        sleep: Option<Pin<Box<Sleep>>>,
        idle: Option<Duration>,
        expired: bool,
    }
}

impl<S> IdleTimeout<S> {
    /// `None` disables the deadline. Construction needs no runtime; polling
    /// with a deadline set needs a tokio runtime with the time driver.
    pub fn new(inner: S, idle: Option<Duration>) -> Self {
        Self {
            inner,
            sleep: None,
            idle,
            expired: false,
        }
    }
}

impl<S, E> Stream for IdleTimeout<S>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    type Item = Result<Bytes, RelayError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if *this.expired {
            return Poll::Ready(None);
        }

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(item)) => {
                if let (Some(sleep), Some(idle)) = (this.sleep.as_mut(), *this.idle) {
                    sleep.as_mut().reset(Instant::now() + idle);
                }
                Poll::Ready(Some(item.map_err(|err| {
                    RelayError::Transport(format!("Upstream body read failed: {err}"))
                })))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => {
                if let Some(idle) = *this.idle {
                    let sleep = this
                        .sleep
                        .get_or_insert_with(|| Box::pin(tokio::time::sleep(idle)));
                    if sleep.as_mut().poll(cx).is_ready() {
                        *this.expired = true;
                        return Poll::Ready(Some(Err(RelayError::IdleTimeout { idle })));
                    }
                }
                Poll::Pending
            }
        }
    }
}
