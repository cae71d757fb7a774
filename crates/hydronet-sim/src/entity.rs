//! The [`Entity`] trait: what a [`Simulator`](crate::Simulator) needs to know
//! about a state type to validate, update, and advance it.

use chrono::{DateTime, Utc};
use hydronet_types::{EntityKind, ErrorCode};
use rand::Rng;
use rand::rngs::StdRng;
use serde::Serialize;

use crate::validation::ValidationError;

/// Everything a step function may read besides the current state.
pub struct StepContext<'a, E: Entity> {
    /// Latest value of the entity's external input.
    pub input: &'a E::Input,
    /// Step parameters, including any base rates.
    pub params: &'a E::Params,
    /// Simulated seconds covered by this step.
    pub dt: f64,
    /// Timestamp to stamp on the new state.
    pub now: DateTime<Utc>,
    /// Source of the bounded random walk.
    pub rng: &'a mut StdRng,
}

/// A simulated state record.
///
/// Implementors are immutable snapshots: `merge` and `step` build a new
/// value and leave `self` alone.
pub trait Entity: Clone + PartialEq + Send + Sync + 'static {
    /// Partial update accepted by `update`.
    type Update: Serialize + Send + 'static;
    /// External value read on every tick (inflow total, weather, ...).
    type Input: Clone + Send + Sync + 'static;
    /// Step parameters owned by the simulator.
    type Params: Send + 'static;

    /// Which subsystem this is.
    const KIND: EntityKind;
    /// Error code emitted when an update is rejected.
    const UPDATE_ERROR: ErrorCode;

    /// Check the full-state invariants.
    fn validate(&self) -> Result<(), ValidationError>;

    /// Check each provided field of a partial update in isolation.
    fn validate_update(update: &Self::Update) -> Result<(), ValidationError>;

    /// Apply a partial update, stamping `now`.
    fn merge(&self, update: &Self::Update, now: DateTime<Utc>) -> Self;

    /// Adjust step parameters after an accepted update.
    ///
    /// Used to move base rates when an update sets them explicitly.
    fn rebase(_params: &mut Self::Params, _update: &Self::Update) {}

    /// Advance the state by `ctx.dt` seconds.
    fn step(&self, ctx: StepContext<'_, Self>) -> Self;
}

/// Draw a perturbation in `[-half_range, half_range]`.
///
/// A zero, negative, or non-finite range yields no perturbation.
pub fn random_walk(rng: &mut StdRng, half_range: f64) -> f64 {
    if half_range.is_finite() && half_range > 0.0 {
        rng.random_range(-half_range..=half_range)
    } else {
        0.0
    }
}

/// Raise negative values to zero. NaN passes through so validation sees it.
pub fn at_least_zero(value: f64) -> f64 {
    if value < 0.0 { 0.0 } else { value }
}

/// Clamp into `[min, max]`. NaN passes through so validation sees it.
pub fn clamp_between(value: f64, min: f64, max: f64) -> f64 {
    if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    }
}
