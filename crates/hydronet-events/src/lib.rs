//! Error channel for the Hydronet simulation.
//!
//! Any component may push an [`ErrorRecord`] onto the [`ErrorChannel`].
//! Every subscriber receives every record emitted after it subscribed;
//! nothing is replayed to late subscribers. A short ring of recent records
//! is kept for status views, and each record is mirrored to `tracing`.
//!
//! The channel is constructed explicitly and handed to each component, so
//! its lifetime is tied to the system that owns it rather than the process.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use hydronet_types::ErrorRecord;
use tokio::sync::broadcast;
use tracing::warn;

/// Capacity of the broadcast channel.
///
/// A subscriber that falls further behind receives
/// [`broadcast::error::RecvError::Lagged`] and skips to the newest record.
const BROADCAST_CAPACITY: usize = 256;

/// Default number of records kept by [`ErrorChannel::recent`].
pub const DEFAULT_RECENT_CAPACITY: usize = 100;

/// Broadcast point for structured errors.
///
/// Cloning is cheap and every clone feeds the same subscribers.
#[derive(Debug, Clone)]
pub struct ErrorChannel {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    tx: broadcast::Sender<ErrorRecord>,
    recent: Mutex<VecDeque<ErrorRecord>>,
    recent_capacity: usize,
}

impl ErrorChannel {
    /// Create a channel that remembers up to `recent_capacity` records.
    pub fn new(recent_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                tx,
                recent: Mutex::new(VecDeque::with_capacity(recent_capacity)),
                recent_capacity,
            }),
        }
    }

    /// Push a record to every current subscriber.
    ///
    /// Returns the number of subscribers that received it; 0 is not an error.
    pub fn emit(&self, record: ErrorRecord) -> usize {
        warn!(
            code = %record.code,
            context = %record.context,
            data = record.data.as_ref().map(serde_json::Value::to_string),
            "{}",
            record.message
        );

        if self.inner.recent_capacity > 0 {
            let mut recent = self
                .inner
                .recent
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if recent.len() >= self.inner.recent_capacity {
                recent.pop_front();
            }
            recent.push_back(record.clone());
        }

        self.inner.tx.send(record).unwrap_or(0)
    }

    /// Subscribe to records emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ErrorRecord> {
        self.inner.tx.subscribe()
    }

    /// Most recent records, oldest first.
    pub fn recent(&self) -> Vec<ErrorRecord> {
        self.inner
            .recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.tx.receiver_count()
    }
}

impl Default for ErrorChannel {
    fn default() -> Self {
        Self::new(DEFAULT_RECENT_CAPACITY)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use hydronet_types::ErrorCode;
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;

    fn record(context: &str) -> ErrorRecord {
        ErrorRecord::new(ErrorCode::SimulationStepError, context, "step produced NaN")
    }

    #[test]
    fn emit_without_subscribers_is_not_an_error() {
        let channel = ErrorChannel::default();
        assert_eq!(channel.emit(record("dam.tick")), 0);
        assert_eq!(channel.recent().len(), 1);
    }

    #[test]
    fn subscribers_see_only_later_records() {
        let channel = ErrorChannel::default();
        channel.emit(record("before"));

        let mut rx = channel.subscribe();
        let clone = channel.clone();
        assert_eq!(clone.emit(record("after")), 1);

        assert_eq!(rx.try_recv().unwrap().context, "after");
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn every_subscriber_receives_every_record() {
        let channel = ErrorChannel::default();
        let mut a = channel.subscribe();
        let mut b = channel.subscribe();
        assert_eq!(channel.subscriber_count(), 2);

        channel.emit(record("one"));
        channel.emit(record("two"));

        for rx in [&mut a, &mut b] {
            assert_eq!(rx.try_recv().unwrap().context, "one");
            assert_eq!(rx.try_recv().unwrap().context, "two");
        }
    }

    #[test]
    fn recent_buffer_is_bounded() {
        let channel = ErrorChannel::new(2);
        channel.emit(record("a"));
        channel.emit(record("b"));
        channel.emit(record("c"));

        let contexts: Vec<String> = channel.recent().into_iter().map(|r| r.context).collect();
        assert_eq!(contexts, vec![String::from("b"), String::from("c")]);
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let channel = ErrorChannel::new(0);
        channel.emit(record("a"));
        assert!(channel.recent().is_empty());
    }
}
