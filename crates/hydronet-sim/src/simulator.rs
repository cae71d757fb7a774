//! Periodic simulator owning one entity's canonical state.
//!
//! A [`Simulator`] is the only writer of its [`StateCell`]. State changes
//! come from two places:
//!
//! - the periodic tick started by [`start_simulation`](Simulator::start_simulation),
//!   which runs the entity's step function against the latest input, and
//! - explicit partial updates through [`update`](Simulator::update).
//!
//! Both are validated before they are published. A rejected update or an
//! invalid step leaves the state untouched and pushes one record onto the
//! [`ErrorChannel`].
//!
//! [`cleanup`](Simulator::cleanup) stops the tick and closes the state
//! streams. It is idempotent.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use hydronet_events::ErrorChannel;
use hydronet_types::{EntityKind, ErrorCode, ErrorRecord};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::{broadcast, watch};
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::cell::StateCell;
use crate::entity::{Entity, StepContext};
use crate::error::SimulatorError;

/// Shortest accepted tick interval.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Timing and randomness settings for one simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatorSettings {
    /// Wall-clock time between ticks; also the simulated `dt` of each step.
    pub interval: Duration,
    /// Seed of the simulator's random walk.
    pub seed: u64,
}

/// Stops the periodic tick it was returned for.
///
/// Stopping does not touch the current state.
#[derive(Debug, Clone)]
pub struct TickHandle {
    abort: AbortHandle,
}

impl TickHandle {
    /// Stop the tick. Safe to call more than once.
    pub fn stop(&self) {
        self.abort.abort();
    }

    /// Whether the tick task has ended.
    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

/// Owner and periodic driver of one entity's state.
pub struct Simulator<E: Entity> {
    core: Arc<Core<E>>,
    interval: Duration,
    ticker: Mutex<Option<AbortHandle>>,
}

struct Core<E: Entity> {
    cell: StateCell<E>,
    input: watch::Receiver<E::Input>,
    params: Mutex<E::Params>,
    rng: Mutex<StdRng>,
    errors: ErrorChannel,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<E: Entity> Core<E> {
    fn tick(&self, dt: f64) -> Result<E, SimulatorError> {
        let input = self.input.borrow().clone();
        let result = self.cell.modify(|current| {
            let params = lock(&self.params);
            let mut rng = lock(&self.rng);
            let next = current.step(StepContext {
                input: &input,
                params: &*params,
                dt,
                now: Utc::now(),
                rng: &mut *rng,
            });
            next.validate().map(|()| Some(next))
        });

        match result {
            Ok(Some(next)) => {
                debug!(entity = %E::KIND, "tick applied");
                Ok(next)
            }
            Ok(None) => Err(SimulatorError::Closed { entity: E::KIND }),
            Err(source) => {
                self.errors.emit(ErrorRecord::new(
                    ErrorCode::SimulationStepError,
                    format!("{}.tick", E::KIND),
                    format!("Skipped {} simulation step: {source}", E::KIND),
                ));
                Err(SimulatorError::InvalidStep {
                    entity: E::KIND,
                    source,
                })
            }
        }
    }

    fn update(&self, update: &E::Update) -> Result<E, SimulatorError> {
        let result = self.cell.modify(|current| {
            E::validate_update(update)?;
            let next = current.merge(update, Utc::now());
            next.validate()?;
            E::rebase(&mut lock(&self.params), update);
            Ok(Some(next))
        });

        match result {
            Ok(Some(next)) => {
                debug!(entity = %E::KIND, "update applied");
                Ok(next)
            }
            Ok(None) => Err(SimulatorError::Closed { entity: E::KIND }),
            Err(source) => {
                let mut record = ErrorRecord::new(
                    E::UPDATE_ERROR,
                    format!("{}.update", E::KIND),
                    format!("Invalid {} update: {source}", E::KIND),
                );
                if let Ok(data) = serde_json::to_value(update) {
                    record = record.with_data(data);
                }
                self.errors.emit(record);
                Err(SimulatorError::InvalidUpdate {
                    entity: E::KIND,
                    source,
                })
            }
        }
    }
}

impl<E: Entity> Simulator<E> {
    /// Create a simulator seeded with `initial`.
    ///
    /// `input` is read on every tick; `params` are owned by the simulator
    /// from here on. The tick is not started.
    ///
    /// # Errors
    ///
    /// Returns [`SimulatorError::InvalidInitialState`] if `initial` violates
    /// the entity's invariants.
    pub fn initialize(
        initial: E,
        input: watch::Receiver<E::Input>,
        params: E::Params,
        settings: SimulatorSettings,
        errors: ErrorChannel,
    ) -> Result<Self, SimulatorError> {
        initial
            .validate()
            .map_err(|source| SimulatorError::InvalidInitialState {
                entity: E::KIND,
                source,
            })?;

        let interval = settings.interval.max(MIN_INTERVAL);
        info!(
            entity = %E::KIND,
            interval_ms = interval.as_millis(),
            seed = settings.seed,
            "Simulator initialized"
        );

        Ok(Self {
            core: Arc::new(Core {
                cell: StateCell::new(initial),
                input,
                params: Mutex::new(params),
                rng: Mutex::new(StdRng::seed_from_u64(settings.seed)),
                errors,
            }),
            interval,
            ticker: Mutex::new(None),
        })
    }

    /// Which entity this simulator drives.
    pub const fn kind(&self) -> EntityKind {
        E::KIND
    }

    /// Current state.
    pub fn state(&self) -> E {
        self.core.cell.get()
    }

    /// Last-value view of the state.
    pub fn watch(&self) -> watch::Receiver<E> {
        self.core.cell.watch()
    }

    /// Every-emission view of the state, or `None` after cleanup.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<E>> {
        self.core.cell.subscribe()
    }

    /// Validate and merge a partial update.
    ///
    /// # Errors
    ///
    /// Returns [`SimulatorError::InvalidUpdate`] (after emitting the entity's
    /// update error code) if the update or the merged state is invalid, or
    /// [`SimulatorError::Closed`] after cleanup.
    pub fn update(&self, update: E::Update) -> Result<E, SimulatorError> {
        self.core.update(&update)
    }

    /// Run one step immediately, outside the periodic schedule.
    ///
    /// # Errors
    ///
    /// Returns [`SimulatorError::InvalidStep`] (after emitting
    /// `SIMULATION_STEP_ERROR`) if the step produced an invalid state, or
    /// [`SimulatorError::Closed`] after cleanup.
    pub fn tick(&self) -> Result<E, SimulatorError> {
        self.core.tick(self.interval.as_secs_f64())
    }

    /// Start the periodic tick. Must be called from within a Tokio runtime.
    ///
    /// The first step runs one interval from now. Calling this while the
    /// tick is already running returns a handle to the running tick.
    ///
    /// # Errors
    ///
    /// Returns [`SimulatorError::Closed`] after cleanup.
    pub fn start_simulation(&self) -> Result<TickHandle, SimulatorError> {
        if self.core.cell.is_closed() {
            return Err(SimulatorError::Closed { entity: E::KIND });
        }

        let mut ticker = lock(&self.ticker);
        if let Some(abort) = ticker.as_ref().filter(|abort| !abort.is_finished()) {
            return Ok(TickHandle {
                abort: abort.clone(),
            });
        }

        let core = Arc::clone(&self.core);
        let period = self.interval;
        let dt = period.as_secs_f64();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if let Err(SimulatorError::Closed { .. }) = core.tick(dt) {
                    break;
                }
            }
        });

        let abort = task.abort_handle();
        *ticker = Some(abort.clone());
        info!(entity = %E::KIND, "Simulation started");
        Ok(TickHandle { abort })
    }

    /// Stop the periodic tick, keeping the current state.
    pub fn stop_simulation(&self) {
        if let Some(abort) = lock(&self.ticker).take() {
            abort.abort();
            info!(entity = %E::KIND, "Simulation stopped");
        }
    }

    /// Whether the periodic tick is running.
    pub fn is_running(&self) -> bool {
        lock(&self.ticker)
            .as_ref()
            .is_some_and(|abort| !abort.is_finished())
    }

    /// Stop the tick and close the state streams. Idempotent.
    pub fn cleanup(&self) {
        self.stop_simulation();
        if self.core.cell.close() {
            info!(entity = %E::KIND, "Simulator cleaned up");
        }
    }

    /// Whether [`cleanup`](Self::cleanup) has run.
    pub fn is_closed(&self) -> bool {
        self.core.cell.is_closed()
    }
}

impl<E: Entity> Drop for Simulator<E> {
    fn drop(&mut self) {
        self.stop_simulation();
    }
}
