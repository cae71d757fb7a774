//! Integration tests for the system orchestrator.
//!
//! Tests run on Tokio's paused clock so every simulator tick lands on a
//! known virtual instant. Random walks are disabled in the test config, so
//! every step is exact.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use hydronet_core::config::WeatherConfig;
use hydronet_core::{HydroSystem, HydronetConfig, SystemError};
use hydronet_types::{
    DamId, DamState, DamUpdate, EntityKind, ErrorCode, GlacierId, GlacierState, GlacierUpdate,
    Lifecycle, RiverId, RiverState, StationId, SystemSnapshot, WeatherState, WeatherUpdate,
};
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::watch;

const INTERVAL: Duration = Duration::from_secs(1);
const EPS: f64 = 1e-9;

fn config() -> HydronetConfig {
    let mut config = HydronetConfig::default();
    config.simulation.update_interval_ms = 1_000;
    config.dam.surface_area = 1_000.0;
    config.dam.max_flow_change = 0.0;
    config.weather = WeatherConfig {
        max_temperature_change: 0.0,
        max_precipitation_change: 0.0,
        max_humidity_change: 0.0,
        max_wind_change: 0.0,
    };
    config
}

fn dam() -> DamState {
    DamState {
        id: DamId::new(),
        name: String::from("Grande Dixence"),
        current_water_level: 50.0,
        min_water_level: 0.0,
        max_water_level: 100.0,
        max_capacity: 1_000.0,
        inflow_rate: 30.0,
        outflow_rate: 25.0,
        last_updated: Utc::now(),
    }
}

fn glacier() -> GlacierState {
    GlacierState {
        id: GlacierId::new(),
        name: String::from("Aletsch"),
        volume: 1.0e12,
        melt_rate: 0.5,
        outflow_rate: 0.5,
        last_updated: Utc::now(),
    }
}

fn river() -> RiverState {
    RiverState {
        id: RiverId::new(),
        name: String::from("Rhone"),
        flow_rate: 10.0,
        water_volume: 5_000.0,
        catchment_area: 200.0,
        last_updated: Utc::now(),
    }
}

fn station(name: &str, temperature: f64, precipitation: f64) -> WeatherState {
    WeatherState {
        id: StationId::new(),
        name: name.to_owned(),
        temperature,
        precipitation,
        humidity: 60.0,
        wind_speed: 2.0,
        last_updated: Utc::now(),
    }
}

fn with_weather(config: HydronetConfig) -> HydroSystem {
    let system = HydroSystem::new(config);
    system
        .initialize_main_weather_station(
            StationId::new(),
            "Main",
            vec![station("Valley", 0.0, 0.0), station("Summit", 0.0, 0.0)],
        )
        .unwrap();
    system
}

async fn wait_for_state(
    rx: &mut watch::Receiver<SystemSnapshot>,
    done: impl FnMut(&SystemSnapshot) -> bool,
) -> SystemSnapshot {
    rx.wait_for(done).await.unwrap().clone()
}

#[tokio::test(start_paused = true)]
async fn dam_level_follows_aggregated_inflow() {
    let system = HydroSystem::new(config());
    system.initialize_dam(dam()).unwrap();

    system
        .aggregator()
        .add_source("Override", futures::stream::iter([Ok(40.0)]).boxed());
    let mut inflow = system.aggregator().watch();
    inflow
        .wait_for(|a| (a.total_inflow - 40.0).abs() < EPS)
        .await
        .unwrap();

    tokio::time::sleep(INTERVAL + INTERVAL / 2).await;

    let dam = system.snapshot().dam.unwrap();
    // 50 + (40 - 25) * 1 s / 1000 m²
    assert!((dam.current_water_level - 50.015).abs() < EPS);
    assert!((dam.inflow_rate - 40.0).abs() < EPS);
}

#[tokio::test(start_paused = true)]
async fn nan_dam_update_is_silently_rejected() {
    let system = HydroSystem::new(config());
    system.initialize_dam(dam()).unwrap();
    let mut errors = system.subscribe_errors();

    system.update_dam(DamUpdate {
        current_water_level: Some(f64::NAN),
        ..DamUpdate::default()
    });

    let dam = system.snapshot().dam.unwrap();
    assert!((dam.current_water_level - 50.0).abs() < f64::EPSILON);

    let record = errors.try_recv().unwrap();
    assert_eq!(record.code, ErrorCode::WaterLevelError);
    assert_eq!(record.context, "dam.update");
    assert!(matches!(errors.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn rapid_dam_updates_reach_subscribers_in_order() {
    let system = HydroSystem::new(config());
    system.initialize_dam(dam()).unwrap();
    let mut updates = system.subscribe_system_updates().unwrap();

    for level in [60.0, 70.0] {
        system.update_dam(DamUpdate {
            current_water_level: Some(level),
            ..DamUpdate::default()
        });
    }

    let mut levels = Vec::new();
    for _ in 0..2 {
        let snapshot = updates.recv().await.unwrap();
        levels.push(snapshot.dam.unwrap().current_water_level);
    }
    assert!((levels[0] - 60.0).abs() < EPS);
    assert!((levels[1] - 70.0).abs() < EPS);
}

#[tokio::test(start_paused = true)]
async fn unknown_weather_station_is_reported_once() {
    let system = with_weather(config());
    let mut errors = system.subscribe_errors();

    let result = system.update_weather_station(StationId::new(), WeatherUpdate::default());

    assert!(matches!(result, Err(SystemError::UnknownStation { .. })));
    let record = errors.try_recv().unwrap();
    assert_eq!(record.code, ErrorCode::WeatherUpdateError);
    assert_eq!(record.context, "system.update_weather");
    assert!(matches!(errors.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn glacier_and_river_outflows_are_summed_and_removable() {
    let system = with_weather(config());
    system.initialize_glacier(glacier()).unwrap();
    system.initialize_river(river()).unwrap();

    let mut inflow = system.aggregator().watch();
    let aggregate = inflow
        .wait_for(|a| a.sources.len() == 2)
        .await
        .unwrap()
        .clone();
    assert!((aggregate.total_inflow - 10.5).abs() < 1e-6);
    assert!((aggregate.sources["Glacier"] - 0.5).abs() < 1e-6);
    assert!((aggregate.sources["River"] - 10.0).abs() < 1e-6);

    assert!(system.aggregator().remove_source("Glacier"));
    let aggregate = system.inflow();
    assert!((aggregate.total_inflow - 10.0).abs() < 1e-6);
    assert_eq!(
        aggregate.sources.keys().collect::<Vec<_>>(),
        vec![&String::from("River")]
    );
}

#[tokio::test(start_paused = true)]
async fn adding_a_glacier_recreates_the_dam_once() {
    let system = with_weather(config());
    let original = system.initialize_dam(dam()).unwrap();
    assert_eq!(system.dam_generation(), 1);

    system.initialize_glacier(glacier()).unwrap();
    assert_eq!(system.dam_generation(), 2);
    assert!(system.is_dam_running());

    let recreated = system.snapshot().dam.unwrap();
    assert_eq!(recreated.id, original.id);

    let mut updates = system.subscribe_system_updates().unwrap();
    tokio::time::sleep(INTERVAL * 2 + INTERVAL / 2).await;
    let mut dam_ticks = 0;
    let mut last_dam = recreated;
    while let Ok(snapshot) = updates.try_recv() {
        let dam = snapshot.dam.unwrap();
        if dam != last_dam {
            dam_ticks += 1;
            last_dam = dam;
        }
    }
    assert_eq!(dam_ticks, 2);
    assert_eq!(system.dam_generation(), 2);
}

#[tokio::test(start_paused = true)]
async fn dam_is_kept_when_reinitialization_is_disabled() {
    let mut config = config();
    config.simulation.reinitialize_dam_on_topology_change = false;
    let system = with_weather(config);
    system.initialize_dam(dam()).unwrap();

    system.initialize_glacier(glacier()).unwrap();
    system.initialize_river(river()).unwrap();

    assert_eq!(system.dam_generation(), 1);
    assert!(system.is_dam_running());
}

#[tokio::test(start_paused = true)]
async fn glacier_before_weather_is_a_dependency_error() {
    let system = HydroSystem::new(config());
    let result = system.initialize_glacier(glacier());

    assert!(matches!(
        result,
        Err(SystemError::DependencyNotReady {
            entity: EntityKind::Glacier,
            ..
        })
    ));
    assert!(system.snapshot().glacier.is_none());
    assert!(system.aggregator().source_names().is_empty());
    assert_eq!(system.lifecycle(), Lifecycle::Uninitialized);
}

#[tokio::test(start_paused = true)]
async fn invalid_initial_state_leaves_slot_empty() {
    let system = with_weather(config());
    let mut errors = system.subscribe_errors();
    let mut bad = river();
    bad.water_volume = -1.0;

    let result = system.initialize_river(bad);

    assert!(matches!(
        result,
        Err(SystemError::Initialization {
            entity: EntityKind::River,
            ..
        })
    ));
    assert!(system.snapshot().river.is_none());
    assert_eq!(
        errors.try_recv().unwrap().code,
        ErrorCode::InitializationFailure
    );
}

#[tokio::test(start_paused = true)]
async fn lifecycle_reaches_running_with_all_entities() {
    let system = HydroSystem::new(config());
    assert_eq!(system.lifecycle(), Lifecycle::Uninitialized);

    system
        .initialize_main_weather_station(StationId::new(), "Main", vec![station("A", 1.0, 0.0)])
        .unwrap();
    assert_eq!(system.lifecycle(), Lifecycle::Initializing);

    system.initialize_glacier(glacier()).unwrap();
    system.initialize_river(river()).unwrap();
    system.initialize_dam(dam()).unwrap();
    assert_eq!(system.lifecycle(), Lifecycle::Running);

    let snapshot = system.snapshot();
    assert!(snapshot.dam.is_some());
    assert!(snapshot.glacier.is_some());
    assert!(snapshot.river.is_some());
    assert!(snapshot.main_weather.is_some());
}

#[tokio::test(start_paused = true)]
async fn total_water_volume_needs_dam_and_river() {
    let system = with_weather(config());
    system.initialize_dam(dam()).unwrap();
    assert!(system.total_water_volume().abs() < f64::EPSILON);

    system.initialize_river(river()).unwrap();
    // 50 * 1000 + 5000, read before any tick.
    assert!((system.total_water_volume() - 55_000.0).abs() < EPS);
    assert!((*system.subscribe_total_water_volume().borrow() - 55_000.0).abs() < EPS);
}

#[tokio::test(start_paused = true)]
async fn glacier_and_river_updates_raise_on_rejection() {
    let system = with_weather(config());
    system.initialize_glacier(glacier()).unwrap();
    system.initialize_river(river()).unwrap();
    let mut errors = system.subscribe_errors();

    let result = system.update_glacier(GlacierUpdate {
        volume: Some(-5.0),
        ..GlacierUpdate::default()
    });
    assert!(matches!(result, Err(SystemError::Update { .. })));
    let record = errors.try_recv().unwrap();
    assert_eq!(record.code, ErrorCode::GlacierUpdateError);
    assert_eq!(record.context, "glacier.update");

    let result = system.update_river(hydronet_types::RiverUpdate {
        flow_rate: Some(f64::NAN),
        ..hydronet_types::RiverUpdate::default()
    });
    assert!(matches!(result, Err(SystemError::Update { .. })));
    assert_eq!(
        errors.try_recv().unwrap().code,
        ErrorCode::RiverUpdateError
    );

    let accepted = system
        .update_glacier(GlacierUpdate {
            melt_rate: Some(1.5),
            ..GlacierUpdate::default()
        })
        .unwrap();
    assert!((accepted.melt_rate - 1.5).abs() < f64::EPSILON);
}

#[tokio::test(start_paused = true)]
async fn weather_update_reaches_the_river() {
    let system = with_weather(config());
    system.initialize_river(river()).unwrap();
    let mut state = system.subscribe_system_state();

    let summit = system.weather_station_ids()[1];
    system
        .update_weather_station(
            summit,
            WeatherUpdate {
                precipitation: Some(4.0),
                ..WeatherUpdate::default()
            },
        )
        .unwrap();

    // base 10 + 4 mm/h * 0.5
    let snapshot = wait_for_state(&mut state, |s| {
        s.river
            .as_ref()
            .is_some_and(|r| (r.flow_rate - 12.0).abs() < EPS)
    })
    .await;
    let main = snapshot.main_weather.unwrap();
    assert!((main.total_precipitation - 4.0).abs() < EPS);
}

#[tokio::test(start_paused = true)]
async fn replacing_the_weather_station_rewires_the_glacier() {
    let system = with_weather(config());
    system.initialize_glacier(glacier()).unwrap();
    let mut state = system.subscribe_system_state();

    system
        .initialize_main_weather_station(StationId::new(), "Warm", vec![station("Low", 10.0, 0.0)])
        .unwrap();

    // base 0.5 + 10 °C * 0.01
    let snapshot = wait_for_state(&mut state, |s| {
        s.glacier
            .as_ref()
            .is_some_and(|g| (g.melt_rate - 0.6).abs() < EPS)
    })
    .await;
    assert_eq!(snapshot.main_weather.unwrap().name, "Warm");
}

#[tokio::test(start_paused = true)]
async fn cleanup_is_final() {
    let system = with_weather(config());
    system.initialize_glacier(glacier()).unwrap();
    system.initialize_river(river()).unwrap();
    system.initialize_dam(dam()).unwrap();

    let mut state = system.subscribe_system_state();
    let mut volume = system.subscribe_total_water_volume();
    let mut updates = system.subscribe_system_updates().unwrap();

    system.cleanup();
    system.cleanup();
    assert_eq!(system.lifecycle(), Lifecycle::CleanedUp);

    tokio::time::sleep(INTERVAL * 5).await;
    assert!(state.changed().await.is_err());
    assert!(volume.changed().await.is_err());
    while updates.try_recv().is_ok() {}
    assert!(matches!(updates.try_recv(), Err(TryRecvError::Closed)));
    assert!(system.subscribe_system_updates().is_none());
    assert!(!system.is_dam_running());

    assert!(matches!(
        system.initialize_dam(dam()),
        Err(SystemError::CleanedUp)
    ));
    assert!(matches!(
        system.update_river(hydronet_types::RiverUpdate::default()),
        Err(SystemError::CleanedUp)
    ));
    system.update_dam(DamUpdate::default());
}
