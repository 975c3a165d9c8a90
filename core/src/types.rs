//! Identifier types shared across the simulation.
//!
//! Identifiers are plain strings on the wire so that seed data can use
//! readable ids (`home-inkjet`) while generated ids stay unique.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps an existing identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generates a fresh random identifier.
            #[must_use]
            pub fn generate() -> Self {
                let uuid = Uuid::new_v4().simple().to_string();
                Self(format!(concat!($prefix, "-{}"), &uuid[..12]))
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self::new(id)
            }
        }
    };
}

string_id!(
    /// Unique identifier of a printer instance
    PrinterId,
    "printer"
);

string_id!(
    /// Unique identifier of a location (room, office, floor)
    LocationId,
    "location"
);

string_id!(
    /// Unique identifier of a print job
    JobId,
    "job"
);

string_id!(
    /// Identifier of a printer type template
    PrinterTypeId,
    "type"
);
