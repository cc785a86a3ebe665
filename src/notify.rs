//! Non-fatal event reporting.
//!
//! Checksum failures and malformed CSV lines are recovered locally by the
//! decoder and reported here instead of failing the connection. A noisy link
//! can produce thousands of them per second, so sinks are usually wrapped in a
//! [`RateLimitedSink`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

/// Events the decode pipeline reports without stopping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A binary packet's checksum did not match its payload
    ChecksumFailure,
    /// A CSV line could not be parsed
    MalformedLine { line: String },
    /// The connection ended
    Disconnected { reason: Option<String> },
}

/// Discriminant of a [`Notification`], used as the rate limiting key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    ChecksumFailure,
    MalformedLine,
    Disconnected,
}

impl Notification {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Notification::ChecksumFailure => NotificationKind::ChecksumFailure,
            Notification::MalformedLine { .. } => NotificationKind::MalformedLine,
            Notification::Disconnected { .. } => NotificationKind::Disconnected,
        }
    }
}

/// Receiver of pipeline notifications.
///
/// Called from the decode thread, so implementations must not block.
pub trait NotificationSink: Send + Sync {
    /// Deliver one notification. `suppressed` counts same-kind notifications
    /// dropped by rate limiting since the previous delivery.
    fn notify(&self, notification: Notification, suppressed: u64);
}

impl<S: NotificationSink + ?Sized> NotificationSink for Arc<S> {
    fn notify(&self, notification: Notification, suppressed: u64) {
        (**self).notify(notification, suppressed)
    }
}

/// Logs notifications through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, notification: Notification, suppressed: u64) {
        match notification {
            Notification::ChecksumFailure => {
                warn!(suppressed, "Packet dropped: checksum mismatch");
            }
            Notification::MalformedLine { line } => {
                warn!(suppressed, line = %line, "Line dropped: could not parse");
            }
            Notification::Disconnected { reason: Some(reason) } => {
                warn!(reason = %reason, "Disconnected");
            }
            Notification::Disconnected { reason: None } => {
                info!("Disconnected");
            }
        }
    }
}

#[derive(Debug)]
struct KindState {
    last_sent: Instant,
    suppressed: u64,
}

/// Forwards at most one notification per kind per interval.
///
/// Dropped notifications are counted and the count is reported with the next
/// notification of the same kind that gets through. [`Notification::Disconnected`]
/// is never suppressed.
pub struct RateLimitedSink<S> {
    inner: S,
    interval: Duration,
    state: Mutex<HashMap<NotificationKind, KindState>>,
}

impl<S: NotificationSink> RateLimitedSink<S> {
    pub fn new(inner: S, interval: Duration) -> Self {
        Self { inner, interval, state: Mutex::new(HashMap::new()) }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn admit(&self, kind: NotificationKind, now: Instant) -> Option<u64> {
        if kind == NotificationKind::Disconnected || self.interval.is_zero() {
            return Some(0);
        }

        let mut state = self.state.lock();
        match state.get_mut(&kind) {
            Some(entry) if now.duration_since(entry.last_sent) < self.interval => {
                entry.suppressed += 1;
                None
            }
            Some(entry) => {
                entry.last_sent = now;
                Some(std::mem::take(&mut entry.suppressed))
            }
            None => {
                state.insert(kind, KindState { last_sent: now, suppressed: 0 });
                Some(0)
            }
        }
    }
}

impl<S: NotificationSink> NotificationSink for RateLimitedSink<S> {
    fn notify(&self, notification: Notification, suppressed: u64) {
        if let Some(dropped) = self.admit(notification.kind(), Instant::now()) {
            self.inner.notify(notification, suppressed + dropped);
        }
    }
}

/// Collects every notification; for tests.
#[cfg(any(test, feature = "benchmark"))]
#[derive(Debug, Default)]
pub struct RecordingSink {
    received: Mutex<Vec<(Notification, u64)>>,
}

#[cfg(any(test, feature = "benchmark"))]
impl RecordingSink {
    pub fn received(&self) -> Vec<(Notification, u64)> {
        self.received.lock().clone()
    }
}

#[cfg(any(test, feature = "benchmark"))]
impl NotificationSink for RecordingSink {
    fn notify(&self, notification: Notification, suppressed: u64) {
        self.received.lock().push((notification, suppressed));
    }
}
