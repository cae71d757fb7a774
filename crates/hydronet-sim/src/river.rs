//! River response to precipitation over its catchment.
//!
//! ```text
//! adjusted_flow = max(0, base_flow + precipitation * impact_factor)
//! new_volume    = volume + precipitation * catchment_area / 1000
//! ```

use chrono::{DateTime, Utc};
use hydronet_types::{EntityKind, ErrorCode, MainWeatherState, RiverState, RiverUpdate};

use crate::entity::{Entity, StepContext, at_least_zero};
use crate::validation::{ValidationError, non_negative, optional};

/// Step parameters for a river.
#[derive(Debug, Clone, PartialEq)]
pub struct RiverParams {
    /// Flow rate with no precipitation. Captured from the initial state.
    pub base_flow_rate: f64,
    /// Flow added per mm/h of precipitation.
    pub precipitation_impact_factor: f64,
}

impl RiverParams {
    /// Parameters whose base flow rate is the state's current flow rate.
    pub const fn from_state(state: &RiverState, precipitation_impact_factor: f64) -> Self {
        Self {
            base_flow_rate: state.flow_rate,
            precipitation_impact_factor,
        }
    }
}

/// Advance a river under `precipitation` mm/h.
pub fn step_river(
    state: &RiverState,
    precipitation: f64,
    params: &RiverParams,
    now: DateTime<Utc>,
) -> RiverState {
    let flow_rate = at_least_zero(
        precipitation.mul_add(params.precipitation_impact_factor, params.base_flow_rate),
    );
    let water_volume = (precipitation * state.catchment_area).mul_add(0.001, state.water_volume);

    RiverState {
        flow_rate,
        water_volume,
        last_updated: now,
        ..state.clone()
    }
}

impl Entity for RiverState {
    type Update = RiverUpdate;
    type Input = MainWeatherState;
    type Params = RiverParams;

    const KIND: EntityKind = EntityKind::River;
    const UPDATE_ERROR: ErrorCode = ErrorCode::RiverUpdateError;

    fn validate(&self) -> Result<(), ValidationError> {
        non_negative("flow_rate", self.flow_rate)?;
        non_negative("water_volume", self.water_volume)?;
        non_negative("catchment_area", self.catchment_area)
    }

    fn validate_update(update: &RiverUpdate) -> Result<(), ValidationError> {
        optional("flow_rate", update.flow_rate, non_negative)?;
        optional("water_volume", update.water_volume, non_negative)?;
        optional("catchment_area", update.catchment_area, non_negative)
    }

    fn merge(&self, update: &RiverUpdate, now: DateTime<Utc>) -> Self {
        Self {
            id: self.id,
            name: update.name.clone().unwrap_or_else(|| self.name.clone()),
            flow_rate: update.flow_rate.unwrap_or(self.flow_rate),
            water_volume: update.water_volume.unwrap_or(self.water_volume),
            catchment_area: update.catchment_area.unwrap_or(self.catchment_area),
            last_updated: now,
        }
    }

    fn rebase(params: &mut RiverParams, update: &RiverUpdate) {
        if let Some(flow_rate) = update.flow_rate {
            params.base_flow_rate = flow_rate;
        }
    }

    fn step(&self, ctx: StepContext<'_, Self>) -> Self {
        step_river(self, ctx.input.total_precipitation, ctx.params, ctx.now)
    }
}

#[cfg(test)]
mod tests {
    use hydronet_types::RiverId;

    use super::*;

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

    fn params() -> RiverParams {
        RiverParams::from_state(&river(), 0.5)
    }

    #[test]
    fn rain_raises_flow_and_volume() {
        let next = step_river(&river(), 4.0, &params(), Utc::now());
        assert!((next.flow_rate - 12.0).abs() < 1e-12);
        // 5000 + 4 * 200 / 1000
        assert!((next.water_volume - 5_000.8).abs() < 1e-9);
    }

    #[test]
    fn dry_weather_returns_to_base_flow() {
        let wet = step_river(&river(), 10.0, &params(), Utc::now());
        let dry = step_river(&wet, 0.0, &params(), Utc::now());
        assert!((dry.flow_rate - 10.0).abs() < 1e-12);
        assert!((dry.water_volume - wet.water_volume).abs() < f64::EPSILON);
    }

    #[test]
    fn base_flow_follows_explicit_updates_only() {
        let mut p = params();
        RiverState::rebase(
            &mut p,
            &RiverUpdate {
                water_volume: Some(1.0),
                ..RiverUpdate::default()
            },
        );
        assert!((p.base_flow_rate - 10.0).abs() < f64::EPSILON);

        RiverState::rebase(
            &mut p,
            &RiverUpdate {
                flow_rate: Some(3.0),
                ..RiverUpdate::default()
            },
        );
        assert!((p.base_flow_rate - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn negative_flow_update_is_rejected() {
        let update = RiverUpdate {
            flow_rate: Some(-1.0),
            ..RiverUpdate::default()
        };
        assert!(RiverState::validate_update(&update).is_err());
    }
}
