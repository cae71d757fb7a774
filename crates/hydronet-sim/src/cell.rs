//! Observable state container.
//!
//! A [`StateCell`] owns one current value and publishes every replacement on
//! two views:
//!
//! - [`watch`](StateCell::watch): last-value semantics. Slow readers skip
//!   intermediate values and always see the newest one.
//! - [`subscribe`](StateCell::subscribe): every emission, in order, so two
//!   writes landing before the next tick are both observed.
//!
//! Replacements are read-modify-write under a single lock, so a timer tick
//! and an explicit update can never overwrite each other's result.
//! [`close`](StateCell::close) ends both views; the last value stays readable.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, watch};

/// Capacity of the every-emission channel.
const EMISSION_CAPACITY: usize = 64;

/// A single-owner, multi-reader state container.
#[derive(Debug)]
pub struct StateCell<T> {
    senders: Mutex<Option<Senders<T>>>,
    last: watch::Receiver<T>,
}

#[derive(Debug)]
struct Senders<T> {
    latest: watch::Sender<T>,
    emissions: broadcast::Sender<T>,
}

impl<T: Clone + Send + Sync + 'static> StateCell<T> {
    /// Create an open cell holding `initial`.
    pub fn new(initial: T) -> Self {
        let (latest, last) = watch::channel(initial);
        let (emissions, _) = broadcast::channel(EMISSION_CAPACITY);
        Self {
            senders: Mutex::new(Some(Senders { latest, emissions })),
            last,
        }
    }

    /// Clone of the current value.
    pub fn get(&self) -> T {
        self.last.borrow().clone()
    }

    /// Last-value view. After close the receiver still reads the final value
    /// but `changed()` reports the channel as closed.
    pub fn watch(&self) -> watch::Receiver<T> {
        match self.lock().as_ref() {
            Some(senders) => senders.latest.subscribe(),
            None => self.last.clone(),
        }
    }

    /// Every-emission view, or `None` once the cell is closed.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<T>> {
        self.lock().as_ref().map(|s| s.emissions.subscribe())
    }

    /// Derive the next value from the current one and publish it.
    ///
    /// `f` returning `Ok(None)` leaves the cell untouched and publishes
    /// nothing. An `Err` from `f` is returned as-is with the value unchanged.
    /// On a closed cell `f` is not called and `Ok(None)` is returned.
    pub fn modify<E, F>(&self, f: F) -> Result<Option<T>, E>
    where
        F: FnOnce(&T) -> Result<Option<T>, E>,
    {
        let guard = self.lock();
        let Some(senders) = guard.as_ref() else {
            return Ok(None);
        };

        let current = self.last.borrow().clone();
        let Some(next) = f(&current)? else {
            return Ok(None);
        };

        senders.latest.send_replace(next.clone());
        // No subscribers is fine; the watch view still carries the value.
        senders.emissions.send(next.clone()).ok();
        Ok(Some(next))
    }

    /// Replace the value unconditionally. Returns `false` if the cell is closed.
    pub fn set(&self, value: T) -> bool {
        matches!(
            self.modify(|_| Ok::<_, core::convert::Infallible>(Some(value))),
            Ok(Some(_))
        )
    }

    /// End both views. Returns `true` only for the call that actually closed it.
    pub fn close(&self) -> bool {
        self.lock().take().is_some()
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Senders<T>>> {
        self.senders.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
