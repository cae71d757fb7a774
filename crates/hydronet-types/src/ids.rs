//! Typed identifiers for simulated entities.
//!
//! Each entity kind carries its own UUID newtype so a dam identifier can
//! never be handed to a glacier lookup. Identifiers are normally supplied by
//! the bootstrap scenario; [`new`](DamId::new) generates a UUID v7 for tests
//! and ad-hoc setups.

use core::str::FromStr;

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Declares a `Uuid` newtype identifier with the shared derives and conversions.
macro_rules! entity_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh time-ordered identifier.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Borrow the underlying [`Uuid`].
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

entity_id! {
    /// Identifier of a dam (reservoir) entity.
    DamId
}

entity_id! {
    /// Identifier of a glacier entity.
    GlacierId
}

entity_id! {
    /// Identifier of a river entity.
    RiverId
}

entity_id! {
    /// Identifier of a weather station, either a sub-station or the main station.
    StationId
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn ids_parse_from_uuid_strings() {
        let raw = "0190f1a2-7b3c-7def-8123-456789abcdef";
        let id: DamId = raw.parse().unwrap();
        assert_eq!(id.to_string(), raw);
    }

    #[test]
    fn rejects_malformed_id() {
        assert!("not-a-uuid".parse::<GlacierId>().is_err());
    }

    #[test]
    fn serializes_as_bare_uuid() {
        let id = RiverId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: RiverId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
