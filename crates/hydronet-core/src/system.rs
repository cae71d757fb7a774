//! The system orchestrator.
//!
//! [`HydroSystem`] wires the entity graph together and owns its lifecycle:
//!
//! ```text
//! weather sub-stations -> main weather -> glacier --\
//!                                    \-> river ----+-> inflow aggregator -> dam
//! ```
//!
//! Every emission of every entity is forwarded, in order, into one
//! [`SystemSnapshot`], republished only when it actually changes, and into
//! the derived total water volume.
//!
//! Every refused call is also reported on the error channel, with a
//! `system.initialize_<entity>` or `system.update_<entity>` context.
//!
//! Lifecycle: `Uninitialized -> Initializing -> Running -> CleanedUp`. The
//! system is `Running` once all four slots are filled. [`cleanup`] is the
//! only way into `CleanedUp`, and nothing leaves it.
//!
//! [`cleanup`]: HydroSystem::cleanup

use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hydronet_events::ErrorChannel;
use hydronet_sim::{Entity, GlacierParams, RiverParams, Simulator, SimulatorError, StateCell};
use hydronet_types::{
    AggregatedInflow, DamState, DamUpdate, EntityKind, ErrorCode, ErrorRecord, GlacierState,
    GlacierUpdate, Lifecycle, MainWeatherState, RiverState, RiverUpdate, StationId,
    SystemSnapshot, WeatherState, WeatherUpdate,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::config::HydronetConfig;
use crate::error::SystemError;
use crate::inflow::{InflowAggregator, rate_stream};
use crate::scope::TaskScope;
use crate::weather_station::MainWeatherStation;

/// Seed offsets so each simulator walks its own random sequence.
const DAM_STREAM: u64 = 0;
const GLACIER_STREAM: u64 = 1;
const RIVER_STREAM: u64 = 2;
const WEATHER_STREAM: u64 = 16;

/// Anything a slot can tear down.
trait Teardown {
    fn teardown(&self);
}

impl<E: Entity> Teardown for Simulator<E> {
    fn teardown(&self) {
        self.cleanup();
    }
}

impl Teardown for MainWeatherStation {
    fn teardown(&self) {
        self.cleanup();
    }
}

/// One initialized entity plus the tasks forwarding its state.
struct Slot<T: Teardown> {
    entity: T,
    forwards: Vec<AbortHandle>,
}

impl<T: Teardown> Slot<T> {
    fn retire(self) {
        for forward in &self.forwards {
            forward.abort();
        }
        self.entity.teardown();
    }
}

struct Slots {
    weather: Option<Slot<MainWeatherStation>>,
    /// Main weather as seen by the glacier and river. Survives weather
    /// replacement so downstream simulators follow the new station.
    weather_relay: Option<Arc<watch::Sender<MainWeatherState>>>,
    glacier: Option<Slot<Simulator<GlacierState>>>,
    river: Option<Slot<Simulator<RiverState>>>,
    dam: Option<Slot<Simulator<DamState>>>,
    lifecycle: Lifecycle,
}

impl Slots {
    const fn is_complete(&self) -> bool {
        self.weather.is_some()
            && self.glacier.is_some()
            && self.river.is_some()
            && self.dam.is_some()
    }
}

/// Apply `change` to the snapshot and republish it, plus the derived total
/// volume, if anything changed.
fn publish(
    snapshot: &StateCell<SystemSnapshot>,
    volume: &StateCell<f64>,
    change: impl FnOnce(&mut SystemSnapshot),
) -> bool {
    let published = snapshot.modify(|current| {
        let mut next = current.clone();
        change(&mut next);
        Ok::<_, Infallible>((next != *current).then_some(next))
    });
    let Ok(Some(next)) = published else {
        return false;
    };

    let total = next.total_water_volume();
    let updated = volume.modify(|current| {
        Ok::<_, Infallible>(((current - total).abs() > f64::EPSILON).then_some(total))
    });
    if let Ok(Some(total)) = updated {
        debug!(total_water_volume = total, "Total water volume changed");
    }
    true
}

/// Orchestrator of the dam, glacier, river, and weather simulators.
pub struct HydroSystem {
    config: HydronetConfig,
    errors: ErrorChannel,
    aggregator: InflowAggregator,
    slots: Mutex<Slots>,
    snapshot: Arc<StateCell<SystemSnapshot>>,
    total_volume: Arc<StateCell<f64>>,
    scope: TaskScope,
    dam_generation: AtomicU64,
}

impl HydroSystem {
    /// Create an empty system. Its error channel keeps
    /// `simulation.error_buffer_size` recent records.
    pub fn new(config: HydronetConfig) -> Self {
        let errors = ErrorChannel::new(config.simulation.error_buffer_size);
        Self::with_error_channel(config, errors)
    }

    /// Create an empty system reporting to an existing error channel.
    pub fn with_error_channel(config: HydronetConfig, errors: ErrorChannel) -> Self {
        info!(
            update_interval_ms = config.simulation.update_interval_ms,
            seed = config.simulation.seed,
            "Hydro system created"
        );
        Self {
            aggregator: InflowAggregator::new(errors.clone()),
            config,
            errors,
            slots: Mutex::new(Slots {
                weather: None,
                weather_relay: None,
                glacier: None,
                river: None,
                dam: None,
                lifecycle: Lifecycle::Uninitialized,
            }),
            snapshot: Arc::new(StateCell::new(SystemSnapshot::default())),
            total_volume: Arc::new(StateCell::new(0.0)),
            scope: TaskScope::new(),
            dam_generation: AtomicU64::new(0),
        }
    }

    // -----------------------------------------------------------------------
    // Initialization
    // -----------------------------------------------------------------------

    /// Create the main weather station from sub-station readings and start it.
    ///
    /// Replaces any existing station; a glacier or river already running
    /// follows the new station.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::Initialization`] if a reading is invalid, or
    /// [`SystemError::CleanedUp`].
    pub fn initialize_main_weather_station(
        &self,
        id: StationId,
        name: impl Into<String>,
        stations: Vec<WeatherState>,
    ) -> Result<MainWeatherState, SystemError> {
        let mut slots = self.lock();
        Self::ensure_open(&slots)
            .map_err(|error| self.initialize_refused(EntityKind::Weather, error))?;

        let station = MainWeatherStation::initialize(
            id,
            name,
            stations,
            &self.config.weather_params(),
            self.config.simulator_settings(WEATHER_STREAM),
            &self.errors,
        )
        .map_err(|source| self.initialization_failed(EntityKind::Weather, source))?;

        if let Some(old) = slots.weather.take() {
            info!(station_id = %old.entity.id(), "Replacing main weather station");
            old.retire();
        }
        station
            .start()
            .map_err(|source| self.initialization_failed(EntityKind::Weather, source))?;

        let state = station.state();
        let relay = match &slots.weather_relay {
            Some(relay) => {
                relay.send_replace(state.clone());
                Arc::clone(relay)
            }
            None => {
                let (relay, _) = watch::channel(state.clone());
                let relay = Arc::new(relay);
                slots.weather_relay = Some(Arc::clone(&relay));
                relay
            }
        };

        let mut forwards = Vec::with_capacity(2);
        forwards.extend(self.track(station.subscribe(), station.state(), |s, weather| {
            s.main_weather = Some(weather);
        }));
        forwards.extend(self.relay(station.watch(), relay));
        slots.weather = Some(Slot {
            entity: station,
            forwards,
        });
        Self::advance(&mut slots);

        info!(
            station_id = %id,
            sub_stations = state.stations.len(),
            average_temperature = state.average_temperature,
            total_precipitation = state.total_precipitation,
            "Main weather station running"
        );
        Ok(state)
    }

    /// Create the glacier, register its outflow as an inflow source, and start it.
    ///
    /// If a dam exists and `reinitialize_dam_on_topology_change` is set, the
    /// dam is recreated from its current state.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::DependencyNotReady`] if no weather station exists,
    /// [`SystemError::Initialization`] if `initial` is invalid, or
    /// [`SystemError::CleanedUp`].
    pub fn initialize_glacier(&self, initial: GlacierState) -> Result<GlacierState, SystemError> {
        let mut slots = self.lock();
        Self::ensure_open(&slots)
            .map_err(|error| self.initialize_refused(EntityKind::Glacier, error))?;
        let weather = self.require_weather(&slots, EntityKind::Glacier)?;

        let params =
            GlacierParams::from_state(&initial, self.config.glacier.temperature_impact_factor);
        let sim = Simulator::initialize(
            initial,
            weather,
            params,
            self.config.simulator_settings(GLACIER_STREAM),
            self.errors.clone(),
        )
        .map_err(|source| self.initialization_failed(EntityKind::Glacier, source))?;

        if let Some(old) = slots.glacier.take() {
            old.retire();
        }
        let source_name = EntityKind::Glacier.source_name();
        self.aggregator.add_source(
            source_name,
            rate_stream(sim.watch(), |glacier: &GlacierState| glacier.outflow_rate),
        );
        let slot = self
            .activate(sim, |s, glacier| s.glacier = Some(glacier))
            .inspect_err(|_| {
                self.aggregator.remove_source(source_name);
            })?;

        let state = slot.entity.state();
        slots.glacier = Some(slot);
        self.on_topology_change(&mut slots);
        Self::advance(&mut slots);

        info!(
            glacier_id = %state.id,
            volume = state.volume,
            melt_rate = state.melt_rate,
            "Glacier initialized"
        );
        Ok(state)
    }

    /// Create the river, register its flow as an inflow source, and start it.
    ///
    /// If a dam exists and `reinitialize_dam_on_topology_change` is set, the
    /// dam is recreated from its current state.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::DependencyNotReady`] if no weather station exists,
    /// [`SystemError::Initialization`] if `initial` is invalid, or
    /// [`SystemError::CleanedUp`].
    pub fn initialize_river(&self, initial: RiverState) -> Result<RiverState, SystemError> {
        let mut slots = self.lock();
        Self::ensure_open(&slots)
            .map_err(|error| self.initialize_refused(EntityKind::River, error))?;
        let weather = self.require_weather(&slots, EntityKind::River)?;

        let params =
            RiverParams::from_state(&initial, self.config.river.precipitation_impact_factor);
        let sim = Simulator::initialize(
            initial,
            weather,
            params,
            self.config.simulator_settings(RIVER_STREAM),
            self.errors.clone(),
        )
        .map_err(|source| self.initialization_failed(EntityKind::River, source))?;

        if let Some(old) = slots.river.take() {
            old.retire();
        }
        let source_name = EntityKind::River.source_name();
        self.aggregator.add_source(
            source_name,
            rate_stream(sim.watch(), |river: &RiverState| river.flow_rate),
        );
        let slot = self
            .activate(sim, |s, river| s.river = Some(river))
            .inspect_err(|_| {
                self.aggregator.remove_source(source_name);
            })?;

        let state = slot.entity.state();
        slots.river = Some(slot);
        self.on_topology_change(&mut slots);
        Self::advance(&mut slots);

        info!(
            river_id = %state.id,
            flow_rate = state.flow_rate,
            water_volume = state.water_volume,
            "River initialized"
        );
        Ok(state)
    }

    /// Create the dam, fed by the aggregated inflow, and start it.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::Initialization`] if `initial` is invalid, or
    /// [`SystemError::CleanedUp`].
    pub fn initialize_dam(&self, initial: DamState) -> Result<DamState, SystemError> {
        let mut slots = self.lock();
        Self::ensure_open(&slots)
            .map_err(|error| self.initialize_refused(EntityKind::Dam, error))?;
        let state = self.install_dam(&mut slots, initial)?;
        Self::advance(&mut slots);

        info!(
            dam_id = %state.id,
            water_level = state.current_water_level,
            generation = self.dam_generation(),
            "Dam initialized"
        );
        Ok(state)
    }

    // -----------------------------------------------------------------------
    // Updates
    // -----------------------------------------------------------------------

    /// Apply a partial update to the dam.
    ///
    /// Rejections are silent to the caller: an invalid update, a missing
    /// dam, or a cleaned-up system is reported on the error channel only.
    pub fn update_dam(&self, update: DamUpdate) {
        let slots = self.lock();
        if let Err(error) = Self::ensure_open(&slots) {
            debug!("Dam update ignored after cleanup");
            self.update_refused::<DamState>(error);
            return;
        }
        let Some(dam) = slots.dam.as_ref() else {
            debug!("Dam update ignored: dam is not initialized");
            self.update_refused::<DamState>(SystemError::NotInitialized {
                entity: EntityKind::Dam,
            });
            return;
        };
        if let Err(error) = dam.entity.update(update) {
            debug!(%error, "Dam update rejected");
        }
    }

    /// Apply a partial update to the glacier.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::Update`] if the update is rejected,
    /// [`SystemError::NotInitialized`], or [`SystemError::CleanedUp`]. Each is
    /// reported on the error channel exactly once.
    pub fn update_glacier(&self, update: GlacierUpdate) -> Result<GlacierState, SystemError> {
        let slots = self.lock();
        Self::ensure_open(&slots).map_err(|error| self.update_refused::<GlacierState>(error))?;
        let glacier = slots.glacier.as_ref().ok_or_else(|| {
            self.update_refused::<GlacierState>(SystemError::NotInitialized {
                entity: EntityKind::Glacier,
            })
        })?;
        Ok(glacier.entity.update(update)?)
    }

    /// Apply a partial update to the river.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::Update`] if the update is rejected,
    /// [`SystemError::NotInitialized`], or [`SystemError::CleanedUp`].
    pub fn update_river(&self, update: RiverUpdate) -> Result<RiverState, SystemError> {
        let slots = self.lock();
        Self::ensure_open(&slots).map_err(|error| self.update_refused::<RiverState>(error))?;
        let river = slots.river.as_ref().ok_or_else(|| {
            self.update_refused::<RiverState>(SystemError::NotInitialized {
                entity: EntityKind::River,
            })
        })?;
        Ok(river.entity.update(update)?)
    }

    /// Apply a partial update to one weather sub-station.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::UnknownStation`], [`SystemError::Update`],
    /// [`SystemError::NotInitialized`], or [`SystemError::CleanedUp`].
    pub fn update_weather_station(
        &self,
        station_id: StationId,
        update: WeatherUpdate,
    ) -> Result<WeatherState, SystemError> {
        let slots = self.lock();
        Self::ensure_open(&slots).map_err(|error| self.update_refused::<WeatherState>(error))?;
        let weather = slots.weather.as_ref().ok_or_else(|| {
            self.update_refused::<WeatherState>(SystemError::NotInitialized {
                entity: EntityKind::Weather,
            })
        })?;
        // A rejected update was already reported by the sub-station simulator.
        match weather.entity.update_station(station_id, update) {
            Err(error @ SystemError::UnknownStation { .. }) => {
                Err(self.update_refused::<WeatherState>(error))
            }
            result => result,
        }
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    /// Current snapshot.
    pub fn snapshot(&self) -> SystemSnapshot {
        self.snapshot.get()
    }

    /// Last-value view of the snapshot. Identical snapshots are not re-emitted.
    pub fn subscribe_system_state(&self) -> watch::Receiver<SystemSnapshot> {
        self.snapshot.watch()
    }

    /// Every-emission view of the snapshot, or `None` after cleanup.
    pub fn subscribe_system_updates(&self) -> Option<broadcast::Receiver<SystemSnapshot>> {
        self.snapshot.subscribe()
    }

    /// Current total stored water.
    pub fn total_water_volume(&self) -> f64 {
        self.total_volume.get()
    }

    /// Last-value view of the total stored water.
    pub fn subscribe_total_water_volume(&self) -> watch::Receiver<f64> {
        self.total_volume.watch()
    }

    /// Current aggregated inflow feeding the dam.
    pub fn inflow(&self) -> AggregatedInflow {
        self.aggregator.latest()
    }

    /// The inflow aggregator, for registering extra sources.
    pub const fn aggregator(&self) -> &InflowAggregator {
        &self.aggregator
    }

    /// The error channel every component reports to.
    pub const fn errors(&self) -> &ErrorChannel {
        &self.errors
    }

    /// Subscribe to errors emitted from now on.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<ErrorRecord> {
        self.errors.subscribe()
    }

    /// Current lifecycle stage.
    pub fn lifecycle(&self) -> Lifecycle {
        self.lock().lifecycle
    }

    /// How many dam simulators have been created, including re-creations.
    pub fn dam_generation(&self) -> u64 {
        self.dam_generation.load(Ordering::Acquire)
    }

    /// Whether the dam's periodic tick is running.
    pub fn is_dam_running(&self) -> bool {
        self.lock()
            .dam
            .as_ref()
            .is_some_and(|dam| dam.entity.is_running())
    }

    /// Identifiers of the weather sub-stations, in configuration order.
    pub fn weather_station_ids(&self) -> Vec<StationId> {
        self.lock()
            .weather
            .as_ref()
            .map_or_else(Vec::new, |w| w.entity.station_ids())
    }

    /// Configuration the system was built with.
    pub const fn config(&self) -> &HydronetConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Cancel every subscription, stop every simulator, and close every
    /// output stream.
    ///
    /// Safe to call more than once and with any subset of entities
    /// initialized.
    pub fn cleanup(&self) {
        let mut slots = self.lock();
        if slots.lifecycle == Lifecycle::CleanedUp {
            return;
        }
        slots.lifecycle = Lifecycle::CleanedUp;

        self.scope.shutdown();
        if let Some(dam) = slots.dam.take() {
            dam.retire();
        }
        if let Some(glacier) = slots.glacier.take() {
            glacier.retire();
        }
        if let Some(river) = slots.river.take() {
            river.retire();
        }
        if let Some(weather) = slots.weather.take() {
            weather.retire();
        }
        slots.weather_relay = None;

        self.aggregator.cleanup();
        self.snapshot.close();
        self.total_volume.close();
        info!("Hydro system cleaned up");
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    const fn ensure_open(slots: &Slots) -> Result<(), SystemError> {
        if matches!(slots.lifecycle, Lifecycle::CleanedUp) {
            Err(SystemError::CleanedUp)
        } else {
            Ok(())
        }
    }

    fn advance(slots: &mut Slots) {
        let next = if slots.is_complete() {
            Lifecycle::Running
        } else {
            Lifecycle::Initializing
        };
        if slots.lifecycle != next {
            info!(from = ?slots.lifecycle, to = ?next, "Lifecycle changed");
            slots.lifecycle = next;
        }
    }

    fn require_weather(
        &self,
        slots: &Slots,
        entity: EntityKind,
    ) -> Result<watch::Receiver<MainWeatherState>, SystemError> {
        if let Some(relay) = slots.weather_relay.as_ref().filter(|_| slots.weather.is_some()) {
            return Ok(relay.subscribe());
        }

        self.errors.emit(ErrorRecord::new(
            ErrorCode::DependencyNotReady,
            format!("system.initialize_{}", entity.label()),
            format!("Cannot initialize {entity} before the main weather station"),
        ));
        Err(SystemError::DependencyNotReady {
            entity,
            requires: EntityKind::Weather,
        })
    }

    fn initialization_failed(&self, entity: EntityKind, source: SimulatorError) -> SystemError {
        self.initialize_refused(entity, SystemError::Initialization { entity, source })
    }

    /// Report a refused initialization and hand the error back.
    fn initialize_refused(&self, entity: EntityKind, error: SystemError) -> SystemError {
        self.errors.emit(ErrorRecord::new(
            ErrorCode::InitializationFailure,
            format!("system.initialize_{}", entity.label()),
            error.to_string(),
        ));
        error
    }

    /// Report a refused update under the entity's update error code.
    fn update_refused<E: Entity>(&self, error: SystemError) -> SystemError {
        self.errors.emit(ErrorRecord::new(
            E::UPDATE_ERROR,
            format!("system.update_{}", E::KIND.label()),
            error.to_string(),
        ));
        error
    }

    /// Start a freshly built simulator and forward its state into the snapshot.
    fn activate<E: Entity>(
        &self,
        sim: Simulator<E>,
        apply: fn(&mut SystemSnapshot, E),
    ) -> Result<Slot<Simulator<E>>, SystemError> {
        sim.start_simulation()
            .map_err(|source| self.initialization_failed(E::KIND, source))?;
        let forwards = self
            .track(sim.subscribe(), sim.state(), apply)
            .into_iter()
            .collect();
        Ok(Slot {
            entity: sim,
            forwards,
        })
    }

    /// Build, start, and install a dam, retiring any previous one.
    fn install_dam(&self, slots: &mut Slots, initial: DamState) -> Result<DamState, SystemError> {
        let sim = Simulator::initialize(
            initial,
            self.aggregator.watch(),
            self.config.dam_params(),
            self.config.simulator_settings(DAM_STREAM),
            self.errors.clone(),
        )
        .map_err(|source| self.initialization_failed(EntityKind::Dam, source))?;

        if let Some(old) = slots.dam.take() {
            old.retire();
        }
        let slot = self.activate(sim, |s, dam| s.dam = Some(dam))?;
        let state = slot.entity.state();
        slots.dam = Some(slot);
        self.dam_generation.fetch_add(1, Ordering::AcqRel);
        Ok(state)
    }

    /// Recreate the dam from its current state after the inflow set changed.
    fn on_topology_change(&self, slots: &mut Slots) {
        if !self.config.simulation.reinitialize_dam_on_topology_change {
            return;
        }
        let Some(current) = slots.dam.as_ref().map(|dam| dam.entity.state()) else {
            return;
        };

        info!(dam_id = %current.id, "Re-initializing dam after inflow topology change");
        if let Err(error) = self.install_dam(slots, current) {
            warn!(%error, "Dam re-initialization failed");
        }
    }

    /// Publish `current` into the snapshot now, then every emission in order.
    ///
    /// `emissions` must be subscribed before `current` is read so nothing
    /// falls between the two.
    fn track<T>(
        &self,
        emissions: Option<broadcast::Receiver<T>>,
        current: T,
        apply: fn(&mut SystemSnapshot, T),
    ) -> Option<AbortHandle>
    where
        T: Clone + Send + Sync + 'static,
    {
        publish(&self.snapshot, &self.total_volume, |s| apply(s, current));
        let mut emissions = emissions?;

        let snapshot = Arc::clone(&self.snapshot);
        let volume = Arc::clone(&self.total_volume);
        self.scope.spawn_cancellable(async move {
            loop {
                match emissions.recv().await {
                    Ok(value) => {
                        publish(&snapshot, &volume, |s| apply(s, value));
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Snapshot forwarding fell behind");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Mirror the weather station's combined view into the downstream relay.
    fn relay(
        &self,
        mut rx: watch::Receiver<MainWeatherState>,
        relay: Arc<watch::Sender<MainWeatherState>>,
    ) -> Option<AbortHandle> {
        self.scope.spawn_cancellable(async move {
            while rx.changed().await.is_ok() {
                let value = rx.borrow_and_update().clone();
                relay.send_replace(value);
            }
        })
    }
}

impl Drop for HydroSystem {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use hydronet_types::{RiverId, StationId};

    use super::*;

    fn river(volume: f64) -> RiverState {
        RiverState {
            id: RiverId::new(),
            name: String::from("Rhone"),
            flow_rate: 10.0,
            water_volume: volume,
            catchment_area: 200.0,
            last_updated: Utc::now(),
        }
    }

    #[test]
    fn identical_snapshot_is_published_once() {
        let snapshot = StateCell::new(SystemSnapshot::default());
        let volume = StateCell::new(0.0);
        let mut rx = snapshot.subscribe().unwrap();
        let state = river(5_000.0);

        assert!(publish(&snapshot, &volume, |s| s.river = Some(state.clone())));
        assert!(!publish(&snapshot, &volume, |s| s.river = Some(state.clone())));

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn volume_stays_zero_without_a_dam() {
        let snapshot = StateCell::new(SystemSnapshot::default());
        let volume = StateCell::new(0.0);
        let mut rx = volume.subscribe().unwrap();

        publish(&snapshot, &volume, |s| s.river = Some(river(5_000.0)));
        assert!(volume.get().abs() < f64::EPSILON);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn new_system_is_uninitialized_and_empty() {
        let system = HydroSystem::new(HydronetConfig::default());
        assert_eq!(system.lifecycle(), Lifecycle::Uninitialized);
        assert_eq!(system.snapshot(), SystemSnapshot::default());
        assert_eq!(system.dam_generation(), 0);
        assert!(system.weather_station_ids().is_empty());
    }

    #[test]
    fn glacier_before_weather_is_refused_and_reported() {
        let system = HydroSystem::new(HydronetConfig::default());
        let mut errors = system.subscribe_errors();

        let result = system.initialize_glacier(GlacierState {
            id: hydronet_types::GlacierId::new(),
            name: String::from("Aletsch"),
            volume: 1_000.0,
            melt_rate: 0.5,
            outflow_rate: 0.5,
            last_updated: Utc::now(),
        });

        assert!(matches!(
            result,
            Err(SystemError::DependencyNotReady {
                entity: EntityKind::Glacier,
                requires: EntityKind::Weather,
            })
        ));
        assert!(system.snapshot().glacier.is_none());
        let record = errors.try_recv().unwrap();
        assert_eq!(record.code, ErrorCode::DependencyNotReady);
        assert_eq!(record.context, "system.initialize_glacier");
    }

    #[test]
    fn updates_without_entities() {
        let system = HydroSystem::new(HydronetConfig::default());
        let mut errors = system.subscribe_errors();
        system.update_dam(DamUpdate::default());
        let record = errors.try_recv().unwrap();
        assert_eq!(record.code, ErrorCode::WaterLevelError);
        assert_eq!(record.context, "system.update_dam");

        assert!(matches!(
            system.update_river(RiverUpdate::default()),
            Err(SystemError::NotInitialized {
                entity: EntityKind::River
            })
        ));
        assert!(matches!(
            system.update_weather_station(StationId::new(), WeatherUpdate::default()),
            Err(SystemError::NotInitialized {
                entity: EntityKind::Weather
            })
        ));
        assert_eq!(errors.try_recv().unwrap().code, ErrorCode::RiverUpdateError);
        assert_eq!(errors.try_recv().unwrap().code, ErrorCode::WeatherUpdateError);
        assert!(errors.try_recv().is_err());
    }

    #[test]
    fn update_of_missing_glacier_is_reported_once() {
        let system = HydroSystem::new(HydronetConfig::default());
        let mut errors = system.subscribe_errors();

        let result = system.update_glacier(GlacierUpdate::default());

        assert!(matches!(
            result,
            Err(SystemError::NotInitialized {
                entity: EntityKind::Glacier
            })
        ));
        let record = errors.try_recv().unwrap();
        assert_eq!(record.code, ErrorCode::GlacierUpdateError);
        assert_eq!(record.context, "system.update_glacier");
        assert!(errors.try_recv().is_err());
    }

    #[test]
    fn cleanup_without_any_entity_is_safe() {
        let system = HydroSystem::new(HydronetConfig::default());
        let mut errors = system.subscribe_errors();
        system.cleanup();
        system.cleanup();
        assert_eq!(system.lifecycle(), Lifecycle::CleanedUp);
        assert!(matches!(
            system.update_glacier(GlacierUpdate::default()),
            Err(SystemError::CleanedUp)
        ));
        assert!(matches!(
            system.initialize_dam(DamState {
                id: hydronet_types::DamId::new(),
                name: String::from("Hoover"),
                current_water_level: 50.0,
                min_water_level: 0.0,
                max_water_level: 100.0,
                max_capacity: 1_000.0,
                inflow_rate: 0.0,
                outflow_rate: 0.0,
                last_updated: Utc::now(),
            }),
            Err(SystemError::CleanedUp)
        ));

        let refused_update = errors.try_recv().unwrap();
        assert_eq!(refused_update.context, "system.update_glacier");
        let refused_init = errors.try_recv().unwrap();
        assert_eq!(refused_init.code, ErrorCode::InitializationFailure);
        assert_eq!(refused_init.context, "system.initialize_dam");
        assert!(errors.try_recv().is_err());
    }
}
