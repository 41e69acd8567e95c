//! Shared identifier wrappers for the compute marketplace.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Error returned when parsing a UUID-backed identifier fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdParseError {
    message: String,
}

impl IdParseError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for IdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for IdParseError {}

macro_rules! define_uuid_id {
    ($name:ident, $label:expr) => {
        /// Opaque, `Copy`-able identifier backed by a UUIDv4. Every entity
        /// id in the workspace is one of these rather than a raw `String`,
        /// so passing an id by value through a match arm or a filter
        /// closure never forces a clone.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing UUID, e.g. one recovered from a bearer
            /// token at the HTTP boundary.
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            pub fn parse(value: &str) -> Result<Self, IdParseError> {
                let uuid = Uuid::parse_str(value)
                    .map_err(|e| IdParseError::new(format!("Invalid {}: {}", $label, e)))?;
                Ok(Self(uuid))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }
    };
}

define_uuid_id!(JobId, "job ID");
define_uuid_id!(AgentId, "agent ID");
define_uuid_id!(ResourceId, "resource ID");
define_uuid_id!(AllocationId, "allocation ID");
define_uuid_id!(ConsumerId, "consumer ID");
define_uuid_id!(ProviderId, "provider ID");
define_uuid_id!(OfferId, "offer ID");
define_uuid_id!(BidId, "bid ID");
define_uuid_id!(MatchId, "match ID");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_parse() {
        let id = JobId::new();
        let parsed = JobId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn rejects_non_uuid_input() {
        assert!(AgentId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn serializes_as_a_bare_string() {
        let id = OfferId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }
}
