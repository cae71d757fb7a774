//! Inflow aggregation over a changing set of named rate sources.
//!
//! The [`InflowAggregator`] keeps the live sum of every registered source's
//! latest rate and republishes `{total_inflow, sources}` whenever a source
//! emits a new rate or the source set changes.
//!
//! Each source is a [`RateStream`] drained by its own task. Rules:
//!
//! - A source that has not emitted yet is left out of the sum.
//! - Registering a name that already exists replaces the old source; values
//!   still in flight from the replaced stream are discarded.
//! - A stream error drops only that source and is reported on the
//!   [`ErrorChannel`]; the aggregate keeps going.
//! - A stream that simply ends keeps contributing its last rate until the
//!   source is removed.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::StreamExt;
use futures::stream::BoxStream;
use hydronet_events::ErrorChannel;
use hydronet_sim::StateCell;
use hydronet_types::{AggregatedInflow, ErrorCode, ErrorRecord};
use serde_json::json;
use tokio::sync::{broadcast, watch};
use tokio::task::AbortHandle;
use tracing::{debug, info};

/// A stream of rates from one source.
pub type RateStream = BoxStream<'static, Result<f64, SourceError>>;

/// Errors a rate source can yield.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    /// The source produced a rate that is negative or not finite.
    #[error("rate {value} is not a finite non-negative number")]
    InvalidRate {
        /// The rejected rate.
        value: f64,
    },

    /// The source failed for another reason.
    #[error("source failed: {0}")]
    Failed(String),
}

/// Check that `value` is usable as a flow rate.
///
/// # Errors
///
/// Returns [`SourceError::InvalidRate`] for negative or non-finite values.
pub fn checked_rate(value: f64) -> Result<f64, SourceError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(SourceError::InvalidRate { value })
    }
}

/// Adapt a state view into a rate source.
///
/// The stream yields the projected rate of the current value first, then one
/// rate per change. It ends when the state's sender closes.
pub fn rate_stream<T, F>(rx: watch::Receiver<T>, project: F) -> RateStream
where
    T: Send + Sync + 'static,
    F: Fn(&T) -> f64 + Send + Sync + 'static,
{
    futures::stream::unfold((rx, project, true), |(mut rx, project, first)| async move {
        if !first && rx.changed().await.is_err() {
            return None;
        }
        let rate = {
            let value = rx.borrow_and_update();
            project(&value)
        };
        Some((checked_rate(rate), (rx, project, false)))
    })
    .boxed()
}

/// Live sum of a dynamic set of named rate sources.
#[derive(Debug)]
pub struct InflowAggregator {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    registry: Mutex<Registry>,
    output: StateCell<AggregatedInflow>,
    errors: ErrorChannel,
}

#[derive(Debug, Default)]
struct Registry {
    sources: BTreeMap<String, SourceEntry>,
    next_generation: u64,
    closed: bool,
}

#[derive(Debug)]
struct SourceEntry {
    generation: u64,
    last: Option<f64>,
    task: AbortHandle,
}

/// What a source task should do after handing over one item.
enum Flow {
    Continue,
    Stop,
}

impl Registry {
    fn aggregate(&self) -> AggregatedInflow {
        AggregatedInflow::from_sources(
            self.sources
                .iter()
                .filter_map(|(name, entry)| entry.last.map(|rate| (name.clone(), rate)))
                .collect(),
        )
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Republish the aggregate if it differs from the current one.
    fn publish(&self, registry: &Registry) {
        let next = registry.aggregate();
        let published = self.output.modify(|current| {
            Ok::<_, core::convert::Infallible>((*current != next).then_some(next))
        });
        if let Ok(Some(aggregate)) = published {
            debug!(
                total_inflow = aggregate.total_inflow,
                sources = aggregate.sources.len(),
                "Inflow aggregate recomputed"
            );
        }
    }

    fn record(&self, name: &str, generation: u64, item: Result<f64, SourceError>) -> Flow {
        let mut registry = self.lock();
        let Some(entry) = registry.sources.get_mut(name) else {
            return Flow::Stop;
        };
        if entry.generation != generation {
            return Flow::Stop;
        }

        match item {
            Ok(rate) => {
                entry.last = Some(rate);
                self.publish(&registry);
                Flow::Continue
            }
            Err(error) => {
                registry.sources.remove(name);
                self.publish(&registry);
                drop(registry);
                self.errors.emit(
                    ErrorRecord::new(
                        ErrorCode::SourceStreamError,
                        "inflow.source",
                        format!("Inflow source {name} dropped: {error}"),
                    )
                    .with_data(json!({ "source": name })),
                );
                Flow::Stop
            }
        }
    }
}

async fn drain(inner: Weak<Inner>, name: String, generation: u64, mut stream: RateStream) {
    while let Some(item) = stream.next().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if matches!(inner.record(&name, generation, item), Flow::Stop) {
            return;
        }
    }
    debug!(source = %name, "Inflow source completed; keeping its last rate");
}

impl InflowAggregator {
    /// Create an aggregator with no sources and a zero total.
    pub fn new(errors: ErrorChannel) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry::default()),
                output: StateCell::new(AggregatedInflow::default()),
                errors,
            }),
        }
    }

    /// Register `stream` under `name`, replacing any source with that name.
    ///
    /// Must be called from within a Tokio runtime. Returns `false` without
    /// registering after [`cleanup`](Self::cleanup).
    pub fn add_source(&self, name: impl Into<String>, stream: RateStream) -> bool {
        let name = name.into();
        let mut registry = self.inner.lock();
        if registry.closed {
            return false;
        }

        let generation = registry.next_generation;
        registry.next_generation = generation.wrapping_add(1);

        let task = tokio::spawn(drain(
            Arc::downgrade(&self.inner),
            name.clone(),
            generation,
            stream,
        ))
        .abort_handle();

        let replaced = registry.sources.insert(
            name.clone(),
            SourceEntry {
                generation,
                last: None,
                task,
            },
        );
        if let Some(old) = replaced {
            old.task.abort();
            self.inner.publish(&registry);
            info!(source = %name, "Inflow source replaced");
        } else {
            info!(source = %name, "Inflow source added");
        }
        true
    }

    /// Unregister `name`. Returns whether it was registered.
    pub fn remove_source(&self, name: &str) -> bool {
        let mut registry = self.inner.lock();
        let Some(entry) = registry.sources.remove(name) else {
            return false;
        };
        entry.task.abort();
        self.inner.publish(&registry);
        info!(source = %name, "Inflow source removed");
        true
    }

    /// Names of every registered source, sorted.
    pub fn source_names(&self) -> Vec<String> {
        self.inner.lock().sources.keys().cloned().collect()
    }

    /// Current aggregate.
    pub fn latest(&self) -> AggregatedInflow {
        self.inner.output.get()
    }

    /// Last-value view of the aggregate.
    pub fn watch(&self) -> watch::Receiver<AggregatedInflow> {
        self.inner.output.watch()
    }

    /// Every-emission view of the aggregate, or `None` after cleanup.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<AggregatedInflow>> {
        self.inner.output.subscribe()
    }

    /// Cancel every source subscription and close the output. Idempotent.
    pub fn cleanup(&self) {
        let mut registry = self.inner.lock();
        if registry.closed {
            return;
        }
        registry.closed = true;
        for entry in registry.sources.values() {
            entry.task.abort();
        }
        registry.sources.clear();
        self.inner.output.close();
        info!("Inflow aggregator cleaned up");
    }
}

impl Drop for InflowAggregator {
    fn drop(&mut self) {
        self.cleanup();
    }
}
