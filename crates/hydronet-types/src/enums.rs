//! Enumeration types shared by the engine and its consumers.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ---------------------------------------------------------------------------
// Entity kinds
// ---------------------------------------------------------------------------

/// The kind of simulated subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum EntityKind {
    /// A reservoir fed by the aggregated inflow.
    Dam,
    /// A glacier whose melt feeds the inflow.
    Glacier,
    /// A river whose flow feeds the inflow.
    River,
    /// A weather station (sub-station or main station).
    Weather,
}

impl EntityKind {
    /// Lower-case label used in error contexts and log fields.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Dam => "dam",
            Self::Glacier => "glacier",
            Self::River => "river",
            Self::Weather => "weather",
        }
    }

    /// Name under which the entity's outflow is registered as an inflow source.
    pub const fn source_name(self) -> &'static str {
        match self {
            Self::Dam => "Dam",
            Self::Glacier => "Glacier",
            Self::River => "River",
            Self::Weather => "Weather",
        }
    }
}

impl core::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Error codes
// ---------------------------------------------------------------------------

/// Machine-readable code attached to every [`ErrorRecord`](crate::ErrorRecord).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum ErrorCode {
    /// A dam update was rejected.
    WaterLevelError,
    /// A glacier update was rejected.
    GlacierUpdateError,
    /// A river update was rejected.
    RiverUpdateError,
    /// A weather sub-station update was rejected.
    WeatherUpdateError,
    /// A simulation tick produced an invalid state and was skipped.
    SimulationStepError,
    /// An inflow source stream failed and was dropped from the aggregate.
    SourceStreamError,
    /// An entity was initialized before the entity it depends on.
    DependencyNotReady,
    /// Simulator construction failed at the orchestrator boundary.
    InitializationFailure,
}

impl ErrorCode {
    /// The wire representation, e.g. `WATER_LEVEL_ERROR`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WaterLevelError => "WATER_LEVEL_ERROR",
            Self::GlacierUpdateError => "GLACIER_UPDATE_ERROR",
            Self::RiverUpdateError => "RIVER_UPDATE_ERROR",
            Self::WeatherUpdateError => "WEATHER_UPDATE_ERROR",
            Self::SimulationStepError => "SIMULATION_STEP_ERROR",
            Self::SourceStreamError => "SOURCE_STREAM_ERROR",
            Self::DependencyNotReady => "DEPENDENCY_NOT_READY",
            Self::InitializationFailure => "INITIALIZATION_FAILURE",
        }
    }
}

impl core::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Orchestrator lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle of a system orchestrator.
///
/// Transitions only move forward: `Uninitialized -> Initializing -> Running`,
/// and any state may move to the terminal `CleanedUp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum Lifecycle {
    /// No entity has been initialized yet.
    Uninitialized,
    /// Some, but not all, entity slots are present.
    Initializing,
    /// Weather, glacier, river and dam are all present.
    Running,
    /// Torn down; no further initialization is possible.
    CleanedUp,
}
