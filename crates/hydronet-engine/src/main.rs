//! Hydronet engine binary.
//!
//! Loads `hydronet-config.yaml`, bootstraps the water system from the
//! configured scenario (weather, glacier, river, then dam), logs every
//! system snapshot and error record, and runs until Ctrl-C or until
//! `simulation.max_run_seconds` elapses.

mod error;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use hydronet_core::{HydroSystem, HydronetConfig};
use hydronet_types::{StationId, SystemSnapshot};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "hydronet-config.yaml";

/// Environment variable naming an alternative configuration file.
const CONFIG_PATH_ENV: &str = "HYDRONET_CONFIG";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config_path = config_path();
    let (config, from_file) = load_config(&config_path)?;

    // 2. Initialize tracing. RUST_LOG wins over the configured level.
    init_logging(&config)?;
    if from_file {
        info!(path = %config_path.display(), "Configuration loaded");
    } else {
        info!(path = %config_path.display(), "Config file not found, using defaults");
    }

    info!(
        update_interval_ms = config.simulation.update_interval_ms,
        seed = config.simulation.seed,
        max_run_seconds = config.simulation.max_run_seconds,
        reinitialize_dam = config.simulation.reinitialize_dam_on_topology_change,
        "hydronet-engine starting"
    );

    // 3. Build the system and attach observers before anything ticks.
    let run_for = config.simulation.max_run_seconds;
    let system = HydroSystem::new(config);
    let observers = [spawn_snapshot_logger(&system), spawn_error_logger(&system)];

    // 4. Bootstrap the scenario in dependency order.
    bootstrap(&system)?;
    info!(
        lifecycle = ?system.lifecycle(),
        total_water_volume = system.total_water_volume(),
        "Scenario running"
    );

    // 5. Run until shutdown.
    wait_for_shutdown(run_for).await?;

    // 6. Tear down.
    let final_snapshot = system.snapshot();
    system.cleanup();
    for observer in observers {
        observer.abort();
    }
    log_snapshot(&final_snapshot);
    info!(
        total_water_volume = final_snapshot.total_water_volume(),
        dam_generation = system.dam_generation(),
        recent_errors = system.errors().recent().len(),
        "hydronet-engine shutdown complete"
    );

    Ok(())
}

/// Configuration path from `HYDRONET_CONFIG`, or the default.
fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV).map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

/// Load the configuration file, falling back to defaults when it is absent.
///
/// The boolean is `true` when the file was read.
fn load_config(path: &Path) -> Result<(HydronetConfig, bool), EngineError> {
    if path.exists() {
        Ok((HydronetConfig::from_file(path)?, true))
    } else {
        let mut config = HydronetConfig::default();
        config.apply_env_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok((config, false))
    }
}

fn init_logging(config: &HydronetConfig) -> Result<(), EngineError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.logging.level).map_err(|e| EngineError::Logging {
            message: format!("invalid log level {:?}: {e}", config.logging.level),
        })?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    let installed = if config.logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| EngineError::Logging {
        message: e.to_string(),
    })
}

/// Initialize weather, glacier, river, and dam from `config.scenario`.
fn bootstrap(system: &HydroSystem) -> Result<(), EngineError> {
    let scenario = system.config().scenario.clone();
    let now = Utc::now();

    let stations = scenario
        .weather
        .stations
        .iter()
        .map(|seed| seed.to_state(now))
        .collect();
    system.initialize_main_weather_station(StationId::new(), scenario.weather.name, stations)?;
    system.initialize_glacier(scenario.glacier.to_state(now))?;
    system.initialize_river(scenario.river.to_state(now))?;
    system.initialize_dam(scenario.dam.to_state(now))?;
    Ok(())
}

async fn wait_for_shutdown(run_for: u64) -> Result<(), EngineError> {
    if run_for == 0 {
        tokio::signal::ctrl_c().await?;
        info!("Ctrl-C received, shutting down");
        return Ok(());
    }

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Ctrl-C received, shutting down");
        }
        () = tokio::time::sleep(Duration::from_secs(run_for)) => {
            info!(max_run_seconds = run_for, "Run time elapsed, shutting down");
        }
    }
    Ok(())
}

fn spawn_snapshot_logger(system: &HydroSystem) -> JoinHandle<()> {
    let mut snapshots = system.subscribe_system_state();
    tokio::spawn(async move {
        while snapshots.changed().await.is_ok() {
            let snapshot = snapshots.borrow_and_update().clone();
            log_snapshot(&snapshot);
        }
        debug!("Snapshot stream closed");
    })
}

fn spawn_error_logger(system: &HydroSystem) -> JoinHandle<()> {
    let mut errors = system.subscribe_errors();
    tokio::spawn(async move {
        loop {
            match errors.recv().await {
                // The error channel already logs each record at warn level.
                Ok(record) => debug!(
                    code = %record.code,
                    context = %record.context,
                    data = ?record.data,
                    "Error record observed"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Error log fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn log_snapshot(snapshot: &SystemSnapshot) {
    info!(
        dam_level = snapshot.dam.as_ref().map(|d| d.current_water_level),
        dam_inflow = snapshot.dam.as_ref().map(|d| d.inflow_rate),
        dam_outflow = snapshot.dam.as_ref().map(|d| d.outflow_rate),
        glacier_volume = snapshot.glacier.as_ref().map(|g| g.volume),
        glacier_melt = snapshot.glacier.as_ref().map(|g| g.melt_rate),
        river_flow = snapshot.river.as_ref().map(|r| r.flow_rate),
        average_temperature = snapshot.main_weather.as_ref().map(|w| w.average_temperature),
        total_precipitation = snapshot.main_weather.as_ref().map(|w| w.total_precipitation),
        total_water_volume = snapshot.total_water_volume(),
        "System snapshot"
    );
}
