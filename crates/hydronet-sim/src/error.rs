//! Error types for the `hydronet-sim` crate.

use hydronet_types::EntityKind;

use crate::validation::ValidationError;

/// Errors raised by a [`Simulator`](crate::Simulator).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimulatorError {
    /// The initial state handed to `initialize` violates an invariant.
    #[error("invalid initial {entity} state: {source}")]
    InvalidInitialState {
        /// Entity being initialized.
        entity: EntityKind,
        /// The violated invariant.
        source: ValidationError,
    },

    /// A partial update was rejected; the state is unchanged.
    #[error("rejected {entity} update: {source}")]
    InvalidUpdate {
        /// Entity being updated.
        entity: EntityKind,
        /// The violated invariant.
        source: ValidationError,
    },

    /// A simulation step produced an invalid state and was skipped.
    #[error("{entity} simulation step skipped: {source}")]
    InvalidStep {
        /// Entity being stepped.
        entity: EntityKind,
        /// The violated invariant.
        source: ValidationError,
    },

    /// The simulator has been cleaned up.
    #[error("{entity} simulator has been cleaned up")]
    Closed {
        /// Entity whose simulator is closed.
        entity: EntityKind,
    },
}

impl SimulatorError {
    /// The entity the error concerns.
    pub const fn entity(&self) -> EntityKind {
        match self {
            Self::InvalidInitialState { entity, .. }
            | Self::InvalidUpdate { entity, .. }
            | Self::InvalidStep { entity, .. }
            | Self::Closed { entity } => *entity,
        }
    }
}
