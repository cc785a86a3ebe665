//! Latest-wins stream coalescing

use futures::{Stream, ready};
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior, interval};

/// Extension trait to add coalescing to any Stream
pub trait CoalesceExt: Stream {
    /// Emit at most one item per `duration`.
    ///
    /// Items arriving within one interval replace each other; only the latest
    /// is emitted. The final item before the stream ends is always emitted.
    fn coalesce(self, duration: Duration) -> Coalesce<Self>
    where
        Self: Sized,
    {
        Coalesce::new(self, duration)
    }
}

impl<T: Stream> CoalesceExt for T {}

pin_project! {
    /// A stream combinator that limits emission rate with latest-wins semantics
    pub struct Coalesce<S: Stream> {
        #[pin]
        stream: S,
        interval: Interval,
        pending: Option<S::Item>,
        finished: bool,
    }
}

impl<S: Stream> Coalesce<S> {
    pub fn new(stream: S, duration: Duration) -> Self {
        let mut interval = interval(duration);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { stream, interval, pending: None, finished: false }
    }
}

impl<S: Stream> Stream for Coalesce<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        // Drain everything available, keeping only the latest
        while !*this.finished {
            match this.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(item)) => *this.pending = Some(item),
                Poll::Ready(None) => *this.finished = true,
                Poll::Pending => break,
            }
        }

        if this.pending.is_none() {
            return if *this.finished { Poll::Ready(None) } else { Poll::Pending };
        }
        if !*this.finished {
            ready!(this.interval.poll_tick(cx));
        }
        Poll::Ready(this.pending.take())
    }
}
