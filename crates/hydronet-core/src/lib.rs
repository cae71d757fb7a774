//! Configuration, inflow aggregation, and system orchestration for the
//! Hydronet simulation.
//!
//! This crate wires the per-entity simulators from `hydronet_sim` into one
//! reactive graph: weather drives the glacier and river, their outflows are
//! summed into the dam's inflow, and every entity feeds one system snapshot.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `hydronet-config.yaml` into
//!   strongly-typed structs.
//! - [`error`] -- [`SystemError`] returned by the orchestrator.
//! - [`inflow`] -- [`InflowAggregator`], the live sum over a changing set of
//!   named rate sources.
//! - [`scope`] -- [`TaskScope`], the cancellation signal shared by every
//!   forwarding task a component spawns.
//! - [`system`] -- [`HydroSystem`], the orchestrator and lifecycle owner.
//! - [`weather_station`] -- [`MainWeatherStation`], sub-station simulators
//!   combined into one reading.
//!
//! [`SystemError`]: error::SystemError
//! [`InflowAggregator`]: inflow::InflowAggregator
//! [`TaskScope`]: scope::TaskScope
//! [`HydroSystem`]: system::HydroSystem
//! [`MainWeatherStation`]: weather_station::MainWeatherStation

pub mod config;
pub mod error;
pub mod inflow;
pub mod scope;
pub mod system;
pub mod weather_station;

pub use config::{ConfigError, HydronetConfig};
pub use error::SystemError;
pub use inflow::{InflowAggregator, RateStream, SourceError, rate_stream};
pub use scope::TaskScope;
pub use system::HydroSystem;
pub use weather_station::MainWeatherStation;
