//! Configuration loading and typed config structures for the Hydronet simulation.
//!
//! The canonical configuration lives in `hydronet-config.yaml` at the project
//! root. This module defines strongly-typed structs that mirror the YAML
//! structure, and provides a loader that reads and validates the file.
//! Every field has a default, so an empty file is a valid configuration.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hydronet_sim::{DamParams, SimulatorSettings, WeatherParams};
use hydronet_types::{
    DamId, DamState, GlacierId, GlacierState, RiverId, RiverState, StationId, WeatherState,
};
use serde::Deserialize;

/// Environment variable overriding `simulation.update_interval_ms`.
pub const UPDATE_INTERVAL_ENV: &str = "HYDRONET_UPDATE_INTERVAL_MS";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// An environment override could not be parsed.
    #[error("environment variable {var} has invalid value {value:?}")]
    Env {
        /// Variable name.
        var: &'static str,
        /// The rejected value.
        value: String,
    },

    /// A value parsed but is outside its allowed range.
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level simulation configuration.
///
/// Mirrors the structure of `hydronet-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HydronetConfig {
    /// Timing, seeding, and lifecycle settings.
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Dam physics.
    #[serde(default)]
    pub dam: DamConfig,

    /// Glacier physics.
    #[serde(default)]
    pub glacier: GlacierConfig,

    /// River physics.
    #[serde(default)]
    pub river: RiverConfig,

    /// Weather sub-station random walks.
    #[serde(default)]
    pub weather: WeatherConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Initial states bootstrapped by the engine.
    #[serde(default)]
    pub scenario: ScenarioConfig,
}

impl HydronetConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// `HYDRONET_UPDATE_INTERVAL_MS` overrides `simulation.update_interval_ms`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML,
    /// [`ConfigError::Env`] if the override is not a number, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Self = serde_yml::from_str(&contents)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a YAML string.
    ///
    /// No environment overrides are applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Env`] if an override is present but unparsable.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(UPDATE_INTERVAL_ENV) {
            match value.trim().parse() {
                Ok(ms) => self.simulation.update_interval_ms = ms,
                Err(_) => {
                    return Err(ConfigError::Env {
                        var: UPDATE_INTERVAL_ENV,
                        value,
                    });
                }
            }
        }
        Ok(())
    }

    /// Reject values the simulators cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.simulation.update_interval_ms == 0 {
            return Err(invalid("simulation.update_interval_ms", "must be positive"));
        }
        positive("dam.surface_area", self.dam.surface_area)?;
        non_negative("dam.max_flow_change", self.dam.max_flow_change)?;
        finite(
            "glacier.temperature_impact_factor",
            self.glacier.temperature_impact_factor,
        )?;
        finite(
            "river.precipitation_impact_factor",
            self.river.precipitation_impact_factor,
        )?;
        non_negative(
            "weather.max_temperature_change",
            self.weather.max_temperature_change,
        )?;
        non_negative(
            "weather.max_precipitation_change",
            self.weather.max_precipitation_change,
        )?;
        non_negative(
            "weather.max_humidity_change",
            self.weather.max_humidity_change,
        )?;
        non_negative("weather.max_wind_change", self.weather.max_wind_change)
    }

    /// Tick interval shared by every simulator.
    pub const fn update_interval(&self) -> Duration {
        Duration::from_millis(self.simulation.update_interval_ms)
    }

    /// Settings for one simulator. `stream` offsets the seed so entities do
    /// not share a random sequence.
    pub const fn simulator_settings(&self, stream: u64) -> SimulatorSettings {
        SimulatorSettings {
            interval: self.update_interval(),
            seed: self.simulation.seed.wrapping_add(stream),
        }
    }

    /// Dam step parameters.
    pub const fn dam_params(&self) -> DamParams {
        DamParams {
            surface_area: self.dam.surface_area,
            max_flow_change: self.dam.max_flow_change,
        }
    }

    /// Weather sub-station step parameters.
    pub const fn weather_params(&self) -> WeatherParams {
        WeatherParams {
            max_temperature_change: self.weather.max_temperature_change,
            max_precipitation_change: self.weather.max_precipitation_change,
            max_humidity_change: self.weather.max_humidity_change,
            max_wind_change: self.weather.max_wind_change,
        }
    }
}

const fn invalid(field: &'static str, reason: &'static str) -> ConfigError {
    ConfigError::Invalid { field, reason }
}

fn finite(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(invalid(field, "must be finite"))
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    finite(field, value)?;
    if value < 0.0 {
        return Err(invalid(field, "must not be negative"));
    }
    Ok(())
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    finite(field, value)?;
    if value <= 0.0 {
        return Err(invalid(field, "must be positive"));
    }
    Ok(())
}

/// Timing, seeding, and lifecycle settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SimulationConfig {
    /// Milliseconds between simulator ticks. Also the simulated `dt`.
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,

    /// Base random seed for reproducibility.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Wall-clock seconds the engine runs before shutting down (0 = until Ctrl-C).
    #[serde(default)]
    pub max_run_seconds: u64,

    /// Recreate the dam when a glacier or river joins its inflow.
    #[serde(default = "default_true")]
    pub reinitialize_dam_on_topology_change: bool,

    /// Recent error records kept by the error channel.
    #[serde(default = "default_error_buffer_size")]
    pub error_buffer_size: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: default_update_interval_ms(),
            seed: default_seed(),
            max_run_seconds: 0,
            reinitialize_dam_on_topology_change: true,
            error_buffer_size: default_error_buffer_size(),
        }
    }
}

/// Dam physics.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DamConfig {
    /// Reservoir surface area in m².
    #[serde(default = "default_surface_area")]
    pub surface_area: f64,

    /// Full width of the per-tick random walk on inflow and outflow rates.
    #[serde(default = "default_max_flow_change")]
    pub max_flow_change: f64,
}

impl Default for DamConfig {
    fn default() -> Self {
        Self {
            surface_area: default_surface_area(),
            max_flow_change: default_max_flow_change(),
        }
    }
}

/// Glacier physics.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GlacierConfig {
    /// Melt rate added per degree of average temperature.
    #[serde(default = "default_temperature_impact_factor")]
    pub temperature_impact_factor: f64,
}

impl Default for GlacierConfig {
    fn default() -> Self {
        Self {
            temperature_impact_factor: default_temperature_impact_factor(),
        }
    }
}

/// River physics.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RiverConfig {
    /// Flow added per mm/h of total precipitation.
    #[serde(default = "default_precipitation_impact_factor")]
    pub precipitation_impact_factor: f64,
}

impl Default for RiverConfig {
    fn default() -> Self {
        Self {
            precipitation_impact_factor: default_precipitation_impact_factor(),
        }
    }
}

/// Weather sub-station random walks.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WeatherConfig {
    /// Full width of the temperature walk, °C per tick.
    #[serde(default = "default_max_temperature_change")]
    pub max_temperature_change: f64,

    /// Full width of the precipitation walk, mm/h per tick.
    #[serde(default = "default_max_precipitation_change")]
    pub max_precipitation_change: f64,

    /// Full width of the humidity walk, percentage points per tick.
    #[serde(default = "default_max_humidity_change")]
    pub max_humidity_change: f64,

    /// Full width of the wind walk, m/s per tick.
    #[serde(default = "default_max_wind_change")]
    pub max_wind_change: f64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            max_temperature_change: default_max_temperature_change(),
            max_precipitation_change: default_max_precipitation_change(),
            max_humidity_change: default_max_humidity_change(),
            max_wind_change: default_max_wind_change(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Scenario
// ---------------------------------------------------------------------------

/// Initial states the engine bootstraps at startup.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Main weather station and its sub-stations.
    pub weather: MainWeatherSeed,
    /// Initial glacier.
    pub glacier: GlacierSeed,
    /// Initial river.
    pub river: RiverSeed,
    /// Initial dam.
    pub dam: DamSeed,
}

/// Initial main weather station.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MainWeatherSeed {
    /// Main station name.
    pub name: String,
    /// Sub-station initial readings.
    pub stations: Vec<WeatherSeed>,
}

impl Default for MainWeatherSeed {
    fn default() -> Self {
        Self {
            name: "Main Station".to_owned(),
            stations: vec![
                WeatherSeed {
                    name: "Valley".to_owned(),
                    temperature: 8.0,
                    precipitation: 1.0,
                    humidity: 65.0,
                    wind_speed: 3.0,
                },
                WeatherSeed {
                    name: "Summit".to_owned(),
                    temperature: -2.0,
                    precipitation: 2.0,
                    humidity: 80.0,
                    wind_speed: 9.0,
                },
            ],
        }
    }
}

/// Initial reading of one weather sub-station.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WeatherSeed {
    /// Sub-station name.
    pub name: String,
    /// Air temperature, °C.
    pub temperature: f64,
    /// Precipitation, mm/h.
    pub precipitation: f64,
    /// Relative humidity, %.
    pub humidity: f64,
    /// Wind speed, m/s.
    pub wind_speed: f64,
}

impl Default for WeatherSeed {
    fn default() -> Self {
        Self {
            name: "Station".to_owned(),
            temperature: 5.0,
            precipitation: 0.0,
            humidity: 60.0,
            wind_speed: 2.0,
        }
    }
}

impl WeatherSeed {
    /// Build a sub-station state with a fresh id.
    pub fn to_state(&self, now: DateTime<Utc>) -> WeatherState {
        WeatherState {
            id: StationId::new(),
            name: self.name.clone(),
            temperature: self.temperature,
            precipitation: self.precipitation,
            humidity: self.humidity,
            wind_speed: self.wind_speed,
            last_updated: now,
        }
    }
}

/// Initial glacier.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GlacierSeed {
    /// Glacier name.
    pub name: String,
    /// Ice volume, m³.
    pub volume: f64,
    /// Melt rate, m³/s.
    pub melt_rate: f64,
    /// Meltwater outflow, m³/s.
    pub outflow_rate: f64,
}

impl Default for GlacierSeed {
    fn default() -> Self {
        Self {
            name: "Glacier".to_owned(),
            volume: 1_000_000.0,
            melt_rate: 0.5,
            outflow_rate: 0.5,
        }
    }
}

impl GlacierSeed {
    /// Build a glacier state with a fresh id.
    pub fn to_state(&self, now: DateTime<Utc>) -> GlacierState {
        GlacierState {
            id: GlacierId::new(),
            name: self.name.clone(),
            volume: self.volume,
            melt_rate: self.melt_rate,
            outflow_rate: self.outflow_rate,
            last_updated: now,
        }
    }
}

/// Initial river.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RiverSeed {
    /// River name.
    pub name: String,
    /// Flow rate, m³/s.
    pub flow_rate: f64,
    /// Water held in the channel, m³.
    pub water_volume: f64,
    /// Catchment area, m².
    pub catchment_area: f64,
}

impl Default for RiverSeed {
    fn default() -> Self {
        Self {
            name: "River".to_owned(),
            flow_rate: 10.0,
            water_volume: 5_000.0,
            catchment_area: 200.0,
        }
    }
}

impl RiverSeed {
    /// Build a river state with a fresh id.
    pub fn to_state(&self, now: DateTime<Utc>) -> RiverState {
        RiverState {
            id: RiverId::new(),
            name: self.name.clone(),
            flow_rate: self.flow_rate,
            water_volume: self.water_volume,
            catchment_area: self.catchment_area,
            last_updated: now,
        }
    }
}

/// Initial dam.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DamSeed {
    /// Dam name.
    pub name: String,
    /// Current water level, m.
    pub current_water_level: f64,
    /// Lowest operating level, m.
    pub min_water_level: f64,
    /// Highest operating level, m.
    pub max_water_level: f64,
    /// Storage per metre of level, m³/m.
    pub max_capacity: f64,
    /// Inflow rate, m³/s.
    pub inflow_rate: f64,
    /// Outflow rate, m³/s.
    pub outflow_rate: f64,
}

impl Default for DamSeed {
    fn default() -> Self {
        Self {
            name: "Dam".to_owned(),
            current_water_level: 50.0,
            min_water_level: 0.0,
            max_water_level: 100.0,
            max_capacity: 1_000.0,
            inflow_rate: 30.0,
            outflow_rate: 25.0,
        }
    }
}

impl DamSeed {
    /// Build a dam state with a fresh id.
    pub fn to_state(&self, now: DateTime<Utc>) -> DamState {
        DamState {
            id: DamId::new(),
            name: self.name.clone(),
            current_water_level: self.current_water_level,
            min_water_level: self.min_water_level,
            max_water_level: self.max_water_level,
            max_capacity: self.max_capacity,
            inflow_rate: self.inflow_rate,
            outflow_rate: self.outflow_rate,
            last_updated: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

const fn default_update_interval_ms() -> u64 {
    1_000
}

const fn default_seed() -> u64 {
    42
}

const fn default_error_buffer_size() -> usize {
    100
}

const fn default_surface_area() -> f64 {
    1_000_000.0
}

const fn default_max_flow_change() -> f64 {
    5.0
}

const fn default_temperature_impact_factor() -> f64 {
    0.01
}

const fn default_precipitation_impact_factor() -> f64 {
    0.5
}

const fn default_max_temperature_change() -> f64 {
    1.0
}

const fn default_max_precipitation_change() -> f64 {
    0.5
}

const fn default_max_humidity_change() -> f64 {
    5.0
}

const fn default_max_wind_change() -> f64 {
    1.0
}

fn default_log_level() -> String {
    "info".to_owned()
}

const fn default_true() -> bool {
    true
}
