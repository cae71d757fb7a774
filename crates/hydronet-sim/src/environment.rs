//! Weather sub-station readings.
//!
//! A sub-station has no upstream input; every field drifts by an independent
//! bounded random walk each tick:
//!
//! | Field         | Walk half-range              | Bounds     |
//! |---------------|------------------------------|------------|
//! | temperature   | `max_temperature_change / 2` | none       |
//! | precipitation | `max_precipitation_change/2` | `>= 0`     |
//! | humidity      | `max_humidity_change / 2`    | `[0, 100]` |
//! | wind speed    | `max_wind_change / 2`        | `>= 0`     |
//!
//! Seeded generators make a station's sequence reproducible.

use chrono::{DateTime, Utc};
use hydronet_types::{EntityKind, ErrorCode, WeatherState, WeatherUpdate};
use rand::rngs::StdRng;

use crate::entity::{Entity, StepContext, at_least_zero, clamp_between, random_walk};
use crate::validation::{ValidationError, finite, non_negative, optional, within};

/// Upper bound of relative humidity.
pub const MAX_HUMIDITY: f64 = 100.0;

/// Step parameters for a weather sub-station.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherParams {
    /// Full width of the temperature walk, °C per tick.
    pub max_temperature_change: f64,
    /// Full width of the precipitation walk, mm/h per tick.
    pub max_precipitation_change: f64,
    /// Full width of the humidity walk, percentage points per tick.
    pub max_humidity_change: f64,
    /// Full width of the wind walk, m/s per tick.
    pub max_wind_change: f64,
}

/// Advance a sub-station reading by one tick.
pub fn step_weather(
    state: &WeatherState,
    params: &WeatherParams,
    rng: &mut StdRng,
    now: DateTime<Utc>,
) -> WeatherState {
    let temperature = state.temperature + random_walk(rng, params.max_temperature_change / 2.0);
    let precipitation =
        at_least_zero(state.precipitation + random_walk(rng, params.max_precipitation_change / 2.0));
    let humidity = clamp_between(
        state.humidity + random_walk(rng, params.max_humidity_change / 2.0),
        0.0,
        MAX_HUMIDITY,
    );
    let wind_speed = at_least_zero(state.wind_speed + random_walk(rng, params.max_wind_change / 2.0));

    WeatherState {
        temperature,
        precipitation,
        humidity,
        wind_speed,
        last_updated: now,
        ..state.clone()
    }
}

fn humidity(field: &'static str, value: f64) -> Result<(), ValidationError> {
    within(field, value, 0.0, MAX_HUMIDITY)
}

impl Entity for WeatherState {
    type Update = WeatherUpdate;
    type Input = ();
    type Params = WeatherParams;

    const KIND: EntityKind = EntityKind::Weather;
    const UPDATE_ERROR: ErrorCode = ErrorCode::WeatherUpdateError;

    fn validate(&self) -> Result<(), ValidationError> {
        finite("temperature", self.temperature)?;
        non_negative("precipitation", self.precipitation)?;
        humidity("humidity", self.humidity)?;
        non_negative("wind_speed", self.wind_speed)
    }

    fn validate_update(update: &WeatherUpdate) -> Result<(), ValidationError> {
        optional("temperature", update.temperature, finite)?;
        optional("precipitation", update.precipitation, non_negative)?;
        optional("humidity", update.humidity, humidity)?;
        optional("wind_speed", update.wind_speed, non_negative)
    }

    fn merge(&self, update: &WeatherUpdate, now: DateTime<Utc>) -> Self {
        Self {
            id: self.id,
            name: update.name.clone().unwrap_or_else(|| self.name.clone()),
            temperature: update.temperature.unwrap_or(self.temperature),
            precipitation: update.precipitation.unwrap_or(self.precipitation),
            humidity: update.humidity.unwrap_or(self.humidity),
            wind_speed: update.wind_speed.unwrap_or(self.wind_speed),
            last_updated: now,
        }
    }

    fn step(&self, ctx: StepContext<'_, Self>) -> Self {
        step_weather(self, ctx.params, ctx.rng, ctx.now)
    }
}

#[cfg(test)]
mod tests {
    use hydronet_types::StationId;
    use rand::SeedableRng;

    use super::*;

    fn station() -> WeatherState {
        WeatherState {
            id: StationId::new(),
            name: String::from("Jungfraujoch"),
            temperature: -2.0,
            precipitation: 0.2,
            humidity: 99.0,
            wind_speed: 0.1,
            last_updated: Utc::now(),
        }
    }

    fn params() -> WeatherParams {
        WeatherParams {
            max_temperature_change: 1.0,
            max_precipitation_change: 0.5,
            max_humidity_change: 5.0,
            max_wind_change: 1.0,
        }
    }

    #[test]
    fn readings_stay_physical_over_many_ticks() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut state = station();
        for _ in 0..2_000 {
            let next = step_weather(&state, &params(), &mut rng, Utc::now());
            assert!(next.validate().is_ok(), "{next:?}");
            assert!((next.temperature - state.temperature).abs() <= 0.5 + 1e-12);
            state = next;
        }
    }

    #[test]
    fn same_seed_same_sequence() {
        let mut a = StdRng::seed_from_u64(11);
        let mut b = StdRng::seed_from_u64(11);
        let start = station();
        let now = Utc::now();
        let x = step_weather(&start, &params(), &mut a, now);
        let y = step_weather(&start, &params(), &mut b, now);
        assert_eq!(x, y);
    }

    #[test]
    fn temperature_may_be_negative_but_humidity_is_bounded() {
        let ok = WeatherUpdate {
            temperature: Some(-30.0),
            ..WeatherUpdate::default()
        };
        assert!(WeatherState::validate_update(&ok).is_ok());

        let bad = WeatherUpdate {
            humidity: Some(120.0),
            ..WeatherUpdate::default()
        };
        assert!(WeatherState::validate_update(&bad).is_err());
    }
}
