//! Field and invariant checks shared by every entity.
//!
//! Checks are applied in two places: to partial updates before they are
//! merged (each provided number must be finite, and non-negative unless the
//! field is signed, like a temperature), and to whole states after a merge or
//! a simulation step (the entity's bounds invariants).

/// A value or state that violates an entity invariant.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// The value is NaN or infinite.
    #[error("{field} must be a finite number")]
    NotFinite {
        /// Offending field.
        field: &'static str,
    },

    /// The value is below zero.
    #[error("{field} must be non-negative, got {value}")]
    Negative {
        /// Offending field.
        field: &'static str,
        /// The rejected value.
        value: f64,
    },

    /// The value lies outside its permitted range.
    #[error("{field} = {value} lies outside [{min}, {max}]")]
    OutOfRange {
        /// Offending field.
        field: &'static str,
        /// The rejected value.
        value: f64,
        /// Inclusive lower bound.
        min: f64,
        /// Inclusive upper bound.
        max: f64,
    },
}

/// Require `value` to be finite.
pub const fn finite(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::NotFinite { field })
    }
}

/// Require `value` to be finite and `>= 0`.
pub fn non_negative(field: &'static str, value: f64) -> Result<(), ValidationError> {
    finite(field, value)?;
    if value < 0.0 {
        return Err(ValidationError::Negative { field, value });
    }
    Ok(())
}

/// Require `value` to be finite and within `[min, max]`.
pub fn within(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ValidationError> {
    finite(field, value)?;
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// Apply `check` to an optional update field.
pub fn optional(
    field: &'static str,
    value: Option<f64>,
    check: fn(&'static str, f64) -> Result<(), ValidationError>,
) -> Result<(), ValidationError> {
    value.map_or(Ok(()), |v| check(field, v))
}
