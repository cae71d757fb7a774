//! Dam mass balance.
//!
//! Each step moves the water level by the net flow over the reservoir
//! surface, clamps it to the dam's operating band, and lets both rates drift
//! by a bounded random walk:
//!
//! ```text
//! net_flow     = total_inflow - outflow_rate
//! level_change = net_flow * dt / surface_area
//! new_level    = clamp(level + level_change, min_level, max_level)
//! rate'        = max(0, rate + U(-max_change/2, max_change/2))
//! ```
//!
//! The level uses the outflow rate *before* its perturbation; the new inflow
//! rate records the aggregate the step consumed, perturbed.

use chrono::{DateTime, Utc};
use hydronet_types::{AggregatedInflow, DamState, DamUpdate, EntityKind, ErrorCode};
use rand::rngs::StdRng;

use crate::entity::{Entity, StepContext, at_least_zero, clamp_between, random_walk};
use crate::validation::{self, ValidationError, non_negative, optional};

/// Step parameters for a dam.
#[derive(Debug, Clone, PartialEq)]
pub struct DamParams {
    /// Reservoir surface area in m².
    pub surface_area: f64,
    /// Full width of the per-tick random walk applied to both rates.
    pub max_flow_change: f64,
}

/// Advance a dam by `dt` seconds with `total_inflow` arriving.
pub fn step_dam(
    state: &DamState,
    total_inflow: f64,
    params: &DamParams,
    dt: f64,
    rng: &mut StdRng,
    now: DateTime<Utc>,
) -> DamState {
    let net_flow = total_inflow - state.outflow_rate;
    let level_change = net_flow * dt / params.surface_area;
    let current_water_level = clamp_between(
        state.current_water_level + level_change,
        state.min_water_level,
        state.max_water_level,
    );

    let half = params.max_flow_change / 2.0;
    let outflow_rate = at_least_zero(state.outflow_rate + random_walk(rng, half));
    let inflow_rate = at_least_zero(total_inflow + random_walk(rng, half));

    DamState {
        current_water_level,
        inflow_rate,
        outflow_rate,
        last_updated: now,
        ..state.clone()
    }
}

impl Entity for DamState {
    type Update = DamUpdate;
    type Input = AggregatedInflow;
    type Params = DamParams;

    const KIND: EntityKind = EntityKind::Dam;
    const UPDATE_ERROR: ErrorCode = ErrorCode::WaterLevelError;

    fn validate(&self) -> Result<(), ValidationError> {
        validation::finite("min_water_level", self.min_water_level)?;
        validation::finite("max_water_level", self.max_water_level)?;
        validation::within(
            "current_water_level",
            self.current_water_level,
            self.min_water_level,
            self.max_water_level,
        )?;
        non_negative("max_capacity", self.max_capacity)?;
        non_negative("inflow_rate", self.inflow_rate)?;
        non_negative("outflow_rate", self.outflow_rate)
    }

    fn validate_update(update: &DamUpdate) -> Result<(), ValidationError> {
        optional("current_water_level", update.current_water_level, non_negative)?;
        optional("min_water_level", update.min_water_level, non_negative)?;
        optional("max_water_level", update.max_water_level, non_negative)?;
        optional("max_capacity", update.max_capacity, non_negative)?;
        optional("inflow_rate", update.inflow_rate, non_negative)?;
        optional("outflow_rate", update.outflow_rate, non_negative)
    }

    fn merge(&self, update: &DamUpdate, now: DateTime<Utc>) -> Self {
        Self {
            id: self.id,
            name: update.name.clone().unwrap_or_else(|| self.name.clone()),
            current_water_level: update
                .current_water_level
                .unwrap_or(self.current_water_level),
            min_water_level: update.min_water_level.unwrap_or(self.min_water_level),
            max_water_level: update.max_water_level.unwrap_or(self.max_water_level),
            max_capacity: update.max_capacity.unwrap_or(self.max_capacity),
            inflow_rate: update.inflow_rate.unwrap_or(self.inflow_rate),
            outflow_rate: update.outflow_rate.unwrap_or(self.outflow_rate),
            last_updated: now,
        }
    }

    fn step(&self, ctx: StepContext<'_, Self>) -> Self {
        step_dam(
            self,
            ctx.input.total_inflow,
            ctx.params,
            ctx.dt,
            ctx.rng,
            ctx.now,
        )
    }
}
