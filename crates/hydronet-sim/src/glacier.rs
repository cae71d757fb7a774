//! Glacier melt driven by the main station's average temperature.
//!
//! ```text
//! adjusted_melt = max(0, base_melt + temperature * impact_factor)
//! new_volume    = max(0, volume - adjusted_melt * dt)
//! new_outflow   = adjusted_melt * new_volume / volume   (0 when volume is 0)
//! ```

use chrono::{DateTime, Utc};
use hydronet_types::{EntityKind, ErrorCode, GlacierState, GlacierUpdate, MainWeatherState};

use crate::entity::{Entity, StepContext, at_least_zero};
use crate::validation::{ValidationError, non_negative, optional};

/// Step parameters for a glacier.
#[derive(Debug, Clone, PartialEq)]
pub struct GlacierParams {
    /// Melt rate at 0 °C. Captured from the initial state.
    pub base_melt_rate: f64,
    /// Melt rate added per degree of temperature.
    pub temperature_impact_factor: f64,
}

impl GlacierParams {
    /// Parameters whose base melt rate is the state's current melt rate.
    pub const fn from_state(state: &GlacierState, temperature_impact_factor: f64) -> Self {
        Self {
            base_melt_rate: state.melt_rate,
            temperature_impact_factor,
        }
    }
}

/// Advance a glacier by `dt` seconds at `temperature` °C.
pub fn step_glacier(
    state: &GlacierState,
    temperature: f64,
    params: &GlacierParams,
    dt: f64,
    now: DateTime<Utc>,
) -> GlacierState {
    let melt_rate =
        at_least_zero(temperature.mul_add(params.temperature_impact_factor, params.base_melt_rate));
    let volume = at_least_zero(melt_rate.mul_add(-dt, state.volume));
    let outflow_rate = if state.volume > 0.0 {
        melt_rate * (volume / state.volume)
    } else {
        0.0
    };

    GlacierState {
        volume,
        melt_rate,
        outflow_rate,
        last_updated: now,
        ..state.clone()
    }
}

impl Entity for GlacierState {
    type Update = GlacierUpdate;
    type Input = MainWeatherState;
    type Params = GlacierParams;

    const KIND: EntityKind = EntityKind::Glacier;
    const UPDATE_ERROR: ErrorCode = ErrorCode::GlacierUpdateError;

    fn validate(&self) -> Result<(), ValidationError> {
        non_negative("volume", self.volume)?;
        non_negative("melt_rate", self.melt_rate)?;
        non_negative("outflow_rate", self.outflow_rate)
    }

    fn validate_update(update: &GlacierUpdate) -> Result<(), ValidationError> {
        optional("volume", update.volume, non_negative)?;
        optional("melt_rate", update.melt_rate, non_negative)?;
        optional("outflow_rate", update.outflow_rate, non_negative)
    }

    fn merge(&self, update: &GlacierUpdate, now: DateTime<Utc>) -> Self {
        Self {
            id: self.id,
            name: update.name.clone().unwrap_or_else(|| self.name.clone()),
            volume: update.volume.unwrap_or(self.volume),
            melt_rate: update.melt_rate.unwrap_or(self.melt_rate),
            outflow_rate: update.outflow_rate.unwrap_or(self.outflow_rate),
            last_updated: now,
        }
    }

    fn rebase(params: &mut GlacierParams, update: &GlacierUpdate) {
        if let Some(melt_rate) = update.melt_rate {
            params.base_melt_rate = melt_rate;
        }
    }

    fn step(&self, ctx: StepContext<'_, Self>) -> Self {
        step_glacier(
            self,
            ctx.input.average_temperature,
            ctx.params,
            ctx.dt,
            ctx.now,
        )
    }
}
