//! Shared type definitions for the Hydronet simulation.
//!
//! Every state record that leaves the engine is defined here: the entity
//! states the simulators own, their partial updates, the aggregated inflow,
//! the system snapshot, and the error record. Types derive `ts-rs` so the
//! dashboard consumes the same shapes as TypeScript bindings.
//!
//! # Modules
//!
//! - [`ids`] -- Typed UUID identifiers per entity kind
//! - [`enums`] -- Entity kinds, error codes, orchestrator lifecycle
//! - [`structs`] -- Entity states, partial updates, aggregate and snapshot views

pub mod enums;
pub mod ids;
pub mod structs;

pub use enums::{EntityKind, ErrorCode, Lifecycle};
pub use ids::{DamId, GlacierId, RiverId, StationId};
pub use structs::{
    AggregatedInflow, DamState, DamUpdate, ErrorRecord, GlacierState, GlacierUpdate,
    MainWeatherState, RiverState, RiverUpdate, SystemSnapshot, WeatherState, WeatherUpdate,
};
