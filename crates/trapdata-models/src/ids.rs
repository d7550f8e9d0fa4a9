//! Record identifiers.
//!
//! Store-assigned identifiers are monotonically increasing integers, so
//! ordering by id is ordering by creation.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
            JsonSchema,
        )]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Get the raw row id.
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

record_id!(
    /// Identifier of a monitoring session.
    SessionId
);

record_id!(
    /// Identifier of a source image.
    ImageId
);

record_id!(
    /// Identifier of a detected object.
    DetectionId
);

/// Unique identifier for one orchestrator run (used in logs only).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new random run ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_order_by_creation() {
        let mut ids = vec![ImageId(3), ImageId(1), ImageId(2)];
        ids.sort();
        assert_eq!(ids, vec![ImageId(1), ImageId(2), ImageId(3)]);
    }

    #[test]
    fn test_id_serializes_transparently() {
        let json = serde_json::to_string(&DetectionId(42)).unwrap();
        assert_eq!(json, "42");
    }
}
