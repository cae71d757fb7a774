//! Entity states, partial updates, and derived views.
//!
//! Entity states are immutable snapshots: a simulator replaces the whole
//! value on every tick or accepted update, it never patches a field in place.
//! Units follow the dashboard conventions: levels in metres, rates in m³/s,
//! volumes in m³, temperatures in °C and precipitation in mm/h.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::ErrorCode;
use crate::ids::{DamId, GlacierId, RiverId, StationId};

// ---------------------------------------------------------------------------
// Dam
// ---------------------------------------------------------------------------

/// Current state of a dam.
///
/// Invariants: `min_water_level <= current_water_level <= max_water_level`,
/// and both rates are non-negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct DamState {
    /// Dam identifier.
    pub id: DamId,
    /// Display name.
    pub name: String,
    /// Current water level in metres.
    pub current_water_level: f64,
    /// Lowest permitted water level.
    pub min_water_level: f64,
    /// Highest permitted water level.
    pub max_water_level: f64,
    /// Storage per metre of level, used for volume estimates.
    pub max_capacity: f64,
    /// Inflow rate observed on the last tick.
    pub inflow_rate: f64,
    /// Release rate.
    pub outflow_rate: f64,
    /// When this state was produced.
    pub last_updated: DateTime<Utc>,
}

/// Partial update for a [`DamState`]. Absent fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(default)]
#[ts(export, export_to = "bindings/")]
pub struct DamUpdate {
    /// New display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New water level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_water_level: Option<f64>,
    /// New lower bound.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_water_level: Option<f64>,
    /// New upper bound.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_water_level: Option<f64>,
    /// New capacity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_capacity: Option<f64>,
    /// New inflow rate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inflow_rate: Option<f64>,
    /// New outflow rate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outflow_rate: Option<f64>,
}

// ---------------------------------------------------------------------------
// Glacier
// ---------------------------------------------------------------------------

/// Current state of a glacier.
///
/// Invariants: `volume >= 0`, `melt_rate >= 0`, `outflow_rate >= 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct GlacierState {
    /// Glacier identifier.
    pub id: GlacierId,
    /// Display name.
    pub name: String,
    /// Remaining ice volume in m³.
    pub volume: f64,
    /// Temperature-adjusted melt rate.
    pub melt_rate: f64,
    /// Meltwater discharged into the inflow.
    pub outflow_rate: f64,
    /// When this state was produced.
    pub last_updated: DateTime<Utc>,
}

/// Partial update for a [`GlacierState`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(default)]
#[ts(export, export_to = "bindings/")]
pub struct GlacierUpdate {
    /// New display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New volume.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    /// New base melt rate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub melt_rate: Option<f64>,
    /// New outflow rate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outflow_rate: Option<f64>,
}

// ---------------------------------------------------------------------------
// River
// ---------------------------------------------------------------------------

/// Current state of a river.
///
/// Invariants: `flow_rate >= 0`, `water_volume >= 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RiverState {
    /// River identifier.
    pub id: RiverId,
    /// Display name.
    pub name: String,
    /// Discharge into the inflow.
    pub flow_rate: f64,
    /// Water held in the channel, in m³.
    pub water_volume: f64,
    /// Catchment area in km².
    pub catchment_area: f64,
    /// When this state was produced.
    pub last_updated: DateTime<Utc>,
}

/// Partial update for a [`RiverState`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(default)]
#[ts(export, export_to = "bindings/")]
pub struct RiverUpdate {
    /// New display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New base flow rate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_rate: Option<f64>,
    /// New channel volume.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub water_volume: Option<f64>,
    /// New catchment area.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catchment_area: Option<f64>,
}

// ---------------------------------------------------------------------------
// Weather
// ---------------------------------------------------------------------------

/// Reading of a single weather sub-station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct WeatherState {
    /// Station identifier.
    pub id: StationId,
    /// Display name.
    pub name: String,
    /// Air temperature in °C.
    pub temperature: f64,
    /// Precipitation in mm/h, never negative.
    pub precipitation: f64,
    /// Relative humidity, 0 to 100.
    pub humidity: f64,
    /// Wind speed in m/s, never negative.
    pub wind_speed: f64,
    /// When this reading was produced.
    pub last_updated: DateTime<Utc>,
}

/// Partial update for a [`WeatherState`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(default)]
#[ts(export, export_to = "bindings/")]
pub struct WeatherUpdate {
    /// New display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// New precipitation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precipitation: Option<f64>,
    /// New humidity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    /// New wind speed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind_speed: Option<f64>,
}

/// Combined view over every sub-station of the main weather station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct MainWeatherState {
    /// Main station identifier.
    pub id: StationId,
    /// Display name.
    pub name: String,
    /// Mean temperature across sub-stations (0 when there are none).
    pub average_temperature: f64,
    /// Summed precipitation across sub-stations.
    pub total_precipitation: f64,
    /// Latest reading of every sub-station, in configuration order.
    pub stations: Vec<WeatherState>,
    /// When this combination was produced.
    pub last_updated: DateTime<Utc>,
}

impl MainWeatherState {
    /// Combine sub-station readings into one main-station view.
    #[allow(clippy::cast_precision_loss)]
    pub fn combine(
        id: StationId,
        name: String,
        stations: Vec<WeatherState>,
        now: DateTime<Utc>,
    ) -> Self {
        let total_precipitation: f64 = stations.iter().map(|s| s.precipitation).sum();
        let average_temperature = if stations.is_empty() {
            0.0
        } else {
            stations.iter().map(|s| s.temperature).sum::<f64>() / stations.len() as f64
        };
        Self {
            id,
            name,
            average_temperature,
            total_precipitation,
            stations,
            last_updated: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregation and snapshot
// ---------------------------------------------------------------------------

/// Live total of every active inflow source.
///
/// Only [`from_sources`](Self::from_sources) builds non-empty values, so
/// `total_inflow` is always the sum of `sources`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct AggregatedInflow {
    /// Sum of the latest rate of every source that has emitted.
    pub total_inflow: f64,
    /// Latest rate per source name.
    pub sources: BTreeMap<String, f64>,
}

impl AggregatedInflow {
    /// Build an aggregate from per-source rates.
    pub fn from_sources(sources: BTreeMap<String, f64>) -> Self {
        let total_inflow = sources.values().sum();
        Self {
            total_inflow,
            sources,
        }
    }
}

/// Point-in-time view of every initialized entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SystemSnapshot {
    /// Latest dam state.
    pub dam: Option<DamState>,
    /// Latest glacier state.
    pub glacier: Option<GlacierState>,
    /// Latest river state.
    pub river: Option<RiverState>,
    /// Latest main weather station view.
    pub main_weather: Option<MainWeatherState>,
}

impl SystemSnapshot {
    /// Stored water: dam level times capacity plus river channel volume.
    ///
    /// Returns 0 unless both the dam and the river are present.
    pub fn total_water_volume(&self) -> f64 {
        match (&self.dam, &self.river) {
            (Some(dam), Some(river)) => {
                dam.current_water_level.mul_add(dam.max_capacity, river.water_volume)
            }
            _ => 0.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A structured error pushed onto the error channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ErrorRecord {
    /// Human-readable description.
    pub message: String,
    /// Machine-readable code.
    pub code: ErrorCode,
    /// When the error was raised.
    pub timestamp: DateTime<Utc>,
    /// Origin as a dotted `component.operation` string.
    ///
    /// Simulators report `<entity>.update` (a rejected update, e.g.
    /// `dam.update`) and `<entity>.tick` (a skipped step). The orchestrator
    /// reports `system.initialize_<entity>` and `system.update_<entity>`, and
    /// the inflow aggregator reports `inflow.source`.
    pub context: String,
    /// Offending payload or values, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ErrorRecord {
    /// Create a record stamped with the current time.
    pub fn new(code: ErrorCode, context: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code,
            timestamp: Utc::now(),
            context: context.into(),
            data: None,
        }
    }

    /// Attach a JSON payload.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}
