//! Entity state containers, step functions, and periodic simulators for the
//! Hydronet simulation.
//!
//! Each physical entity (dam, glacier, river, weather sub-station) is a plain
//! state record from `hydronet_types`. This crate gives those records
//! behaviour: invariants, partial-update merging, a per-tick step function,
//! and a [`Simulator`] that owns the canonical value and publishes every
//! change.
//!
//! # Modules
//!
//! - [`cell`] -- [`StateCell`], a closable value with a last-value view and
//!   an every-emission view.
//! - [`dam`] -- Mass balance on the reservoir level, driven by inflow.
//! - [`entity`] -- The [`Entity`] trait and random-walk helpers.
//! - [`environment`] -- Weather sub-station random walks.
//! - [`error`] -- [`SimulatorError`].
//! - [`glacier`] -- Temperature-driven melt.
//! - [`river`] -- Precipitation-driven flow and volume.
//! - [`simulator`] -- The generic periodic [`Simulator`].
//! - [`validation`] -- Finite, non-negative, and range checks.

pub mod cell;
pub mod dam;
pub mod entity;
pub mod environment;
pub mod error;
pub mod glacier;
pub mod river;
pub mod simulator;
pub mod validation;

// Re-export primary types at crate root.
pub use cell::StateCell;
pub use dam::{DamParams, step_dam};
pub use entity::{Entity, StepContext};
pub use environment::{MAX_HUMIDITY, WeatherParams, step_weather};
pub use error::SimulatorError;
pub use glacier::{GlacierParams, step_glacier};
pub use river::{RiverParams, step_river};
pub use simulator::{Simulator, SimulatorSettings, TickHandle};
pub use validation::ValidationError;
