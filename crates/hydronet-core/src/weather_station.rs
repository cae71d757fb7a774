//! Main weather station: N sub-station simulators combined into one view.
//!
//! Each sub-station is an independent [`Simulator<WeatherState>`]. A
//! forwarding task per sub-station recombines every reading into a
//! [`MainWeatherState`] (average temperature, total precipitation) whenever
//! that sub-station changes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use hydronet_events::ErrorChannel;
use hydronet_sim::{Simulator, SimulatorError, SimulatorSettings, StateCell, WeatherParams};
use hydronet_types::{EntityKind, MainWeatherState, StationId, WeatherState, WeatherUpdate};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use crate::error::SystemError;
use crate::scope::TaskScope;

/// The main weather station and its sub-stations.
pub struct MainWeatherStation {
    id: StationId,
    name: String,
    stations: Vec<Simulator<WeatherState>>,
    combined: Arc<StateCell<MainWeatherState>>,
    scope: TaskScope,
    started: AtomicBool,
}

fn combine(
    id: StationId,
    name: &str,
    readers: &[watch::Receiver<WeatherState>],
) -> MainWeatherState {
    let stations = readers.iter().map(|r| r.borrow().clone()).collect();
    MainWeatherState::combine(id, name.to_owned(), stations, Utc::now())
}

impl MainWeatherStation {
    /// Build one simulator per sub-station. Nothing ticks until
    /// [`start`](Self::start).
    ///
    /// Sub-station `i` is seeded with `settings.seed + i`.
    ///
    /// # Errors
    ///
    /// Returns the first sub-station's [`SimulatorError::InvalidInitialState`].
    pub fn initialize(
        id: StationId,
        name: impl Into<String>,
        stations: Vec<WeatherState>,
        params: &WeatherParams,
        settings: SimulatorSettings,
        errors: &ErrorChannel,
    ) -> Result<Self, SimulatorError> {
        let name = name.into();
        let mut seed = settings.seed;
        let mut simulators = Vec::with_capacity(stations.len());
        for station in stations {
            // Sub-stations have no upstream input.
            let (_input_tx, input) = watch::channel(());
            simulators.push(Simulator::initialize(
                station,
                input,
                params.clone(),
                SimulatorSettings { seed, ..settings },
                errors.clone(),
            )?);
            seed = seed.wrapping_add(1);
        }

        let readers: Vec<_> = simulators.iter().map(Simulator::watch).collect();
        let combined = Arc::new(StateCell::new(combine(id, &name, &readers)));
        info!(
            station_id = %id,
            station_name = %name,
            sub_stations = simulators.len(),
            "Main weather station initialized"
        );

        Ok(Self {
            id,
            name,
            stations: simulators,
            combined,
            scope: TaskScope::new(),
            started: AtomicBool::new(false),
        })
    }

    /// Start every sub-station and the recombination tasks.
    ///
    /// Must be called from within a Tokio runtime. Later calls do nothing.
    ///
    /// # Errors
    ///
    /// Returns [`SimulatorError::Closed`] after cleanup.
    pub fn start(&self) -> Result<(), SimulatorError> {
        if self.combined.is_closed() {
            return Err(SimulatorError::Closed {
                entity: EntityKind::Weather,
            });
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let readers: Arc<[watch::Receiver<WeatherState>]> =
            self.stations.iter().map(Simulator::watch).collect();

        for station in &self.stations {
            station.start_simulation()?;

            let mut changes = station.watch();
            let readers = Arc::clone(&readers);
            let combined = Arc::clone(&self.combined);
            let (id, name) = (self.id, self.name.clone());
            self.scope.spawn_cancellable(async move {
                while changes.changed().await.is_ok() {
                    if !combined.set(combine(id, &name, &readers)) {
                        break;
                    }
                    debug!(station_id = %id, "Main weather recombined");
                }
            });
        }
        Ok(())
    }

    /// Main station identifier.
    pub const fn id(&self) -> StationId {
        self.id
    }

    /// Current combined view.
    pub fn state(&self) -> MainWeatherState {
        self.combined.get()
    }

    /// Last-value view of the combined state.
    pub fn watch(&self) -> watch::Receiver<MainWeatherState> {
        self.combined.watch()
    }

    /// Every-emission view of the combined state, or `None` after cleanup.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<MainWeatherState>> {
        self.combined.subscribe()
    }

    /// Identifiers of every sub-station, in configuration order.
    pub fn station_ids(&self) -> Vec<StationId> {
        self.stations.iter().map(|s| s.state().id).collect()
    }

    /// Apply a partial update to one sub-station.
    ///
    /// The combined view follows on the next recombination.
    ///
    /// # Errors
    ///
    /// Returns [`SystemError::UnknownStation`] if no sub-station has that id,
    /// or [`SystemError::Update`] if the sub-station rejects the update.
    pub fn update_station(
        &self,
        station_id: StationId,
        update: WeatherUpdate,
    ) -> Result<WeatherState, SystemError> {
        let station = self
            .stations
            .iter()
            .find(|s| s.state().id == station_id)
            .ok_or(SystemError::UnknownStation {
                station: station_id,
            })?;
        Ok(station.update(update)?)
    }

    /// Stop every sub-station and close the combined view. Idempotent.
    pub fn cleanup(&self) {
        self.scope.shutdown();
        for station in &self.stations {
            station.cleanup();
        }
        if self.combined.close() {
            info!(station_id = %self.id, "Main weather station cleaned up");
        }
    }
}

impl Drop for MainWeatherStation {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    const INTERVAL: Duration = Duration::from_secs(1);

    fn reading(name: &str, temperature: f64, precipitation: f64) -> WeatherState {
        WeatherState {
            id: StationId::new(),
            name: name.to_owned(),
            temperature,
            precipitation,
            humidity: 50.0,
            wind_speed: 1.0,
            last_updated: Utc::now(),
        }
    }

    fn still() -> WeatherParams {
        WeatherParams {
            max_temperature_change: 0.0,
            max_precipitation_change: 0.0,
            max_humidity_change: 0.0,
            max_wind_change: 0.0,
        }
    }

    fn station(params: &WeatherParams) -> MainWeatherStation {
        MainWeatherStation::initialize(
            StationId::new(),
            "Main",
            vec![reading("Valley", 10.0, 1.0), reading("Summit", 0.0, 3.0)],
            params,
            SimulatorSettings {
                interval: INTERVAL,
                seed: 5,
            },
            &ErrorChannel::default(),
        )
        .unwrap()
    }

    #[test]
    fn combines_average_temperature_and_total_precipitation() {
        let main = station(&still());
        let state = main.state();
        assert!((state.average_temperature - 5.0).abs() < f64::EPSILON);
        assert!((state.total_precipitation - 4.0).abs() < f64::EPSILON);
        assert_eq!(state.stations.len(), 2);
        assert_eq!(main.station_ids().len(), 2);
    }

    #[test]
    fn invalid_sub_station_fails_initialization() {
        let result = MainWeatherStation::initialize(
            StationId::new(),
            "Main",
            vec![reading("Broken", 1.0, -1.0)],
            &still(),
            SimulatorSettings {
                interval: INTERVAL,
                seed: 0,
            },
            &ErrorChannel::default(),
        );
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn recombines_on_every_sub_station_tick() {
        let params = WeatherParams {
            max_temperature_change: 2.0,
            ..still()
        };
        let main = station(&params);
        let mut rx = main.subscribe().unwrap();
        main.start().unwrap();

        tokio::time::sleep(INTERVAL + INTERVAL / 2).await;
        let mut emissions = 0;
        while rx.try_recv().is_ok() {
            emissions += 1;
        }
        // One tick per sub-station.
        assert_eq!(emissions, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sub_station_update_reaches_the_combined_view() {
        let main = station(&still());
        let mut rx = main.watch();
        main.start().unwrap();

        let summit = main.station_ids()[1];
        main.update_station(
            summit,
            WeatherUpdate {
                precipitation: Some(7.0),
                ..WeatherUpdate::default()
            },
        )
        .unwrap();

        let state = rx
            .wait_for(|s| (s.total_precipitation - 8.0).abs() < f64::EPSILON)
            .await
            .unwrap()
            .clone();
        assert!((state.average_temperature - 5.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_station_and_invalid_update_are_errors() {
        let main = station(&still());
        assert!(matches!(
            main.update_station(StationId::new(), WeatherUpdate::default()),
            Err(SystemError::UnknownStation { .. })
        ));

        let valley = main.station_ids()[0];
        let result = main.update_station(
            valley,
            WeatherUpdate {
                humidity: Some(140.0),
                ..WeatherUpdate::default()
            },
        );
        assert!(matches!(result, Err(SystemError::Update { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_stops_everything() {
        let main = station(&still());
        let mut rx = main.watch();
        main.start().unwrap();

        main.cleanup();
        main.cleanup();

        assert!(rx.changed().await.is_err());
        assert!(main.subscribe().is_none());
        assert!(main.start().is_err());
    }
}
