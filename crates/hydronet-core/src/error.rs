//! Error types for the `hydronet-core` crate.

use hydronet_sim::SimulatorError;
use hydronet_types::{EntityKind, StationId};

/// Errors raised by the system orchestrator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SystemError {
    /// An entity was initialized before the entity it reads from.
    #[error("cannot initialize {entity}: {requires} is not initialized")]
    DependencyNotReady {
        /// Entity being initialized.
        entity: EntityKind,
        /// The missing upstream entity.
        requires: EntityKind,
    },

    /// Building or starting an entity's simulator failed; the slot stays empty.
    #[error("failed to initialize {entity}: {source}")]
    Initialization {
        /// Entity being initialized.
        entity: EntityKind,
        /// Underlying simulator error.
        source: SimulatorError,
    },

    /// The entity has not been initialized yet.
    #[error("{entity} is not initialized")]
    NotInitialized {
        /// The absent entity.
        entity: EntityKind,
    },

    /// No weather sub-station has the given id.
    #[error("unknown weather station {station}")]
    UnknownStation {
        /// The id that was looked up.
        station: StationId,
    },

    /// The system has been cleaned up; nothing can be initialized or updated.
    #[error("system has been cleaned up")]
    CleanedUp,

    /// The entity's simulator rejected an update.
    #[error(transparent)]
    Update {
        /// Underlying simulator error.
        #[from]
        source: SimulatorError,
    },
}
