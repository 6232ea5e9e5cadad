//! Typed identifier wrappers for Veranda entities.
//!
//! Ids are opaque strings of the form `<prefix>_<unix_nanos>_<hex12>`:
//! collision resistant through the random suffix, roughly sortable through
//! the timestamp component.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Error returned when parsing an identifier fails.
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

fn generate(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let entropy = Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", prefix, nanos, &entropy[..12])
}

macro_rules! define_entity_id {
    ($name:ident, $prefix:expr, $label:expr) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh identifier.
            pub fn new() -> Self {
                Self(generate($prefix))
            }

            /// Accept an externally supplied identifier. Ids are opaque, so
            /// the only requirement is a non-empty token without whitespace.
            pub fn parse(value: &str) -> Result<Self, IdParseError> {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    return Err(IdParseError::new(format!("empty {}", $label)));
                }
                if trimmed.chars().any(char::is_whitespace) {
                    return Err(IdParseError::new(format!(
                        "invalid {}: {:?}",
                        $label, value
                    )));
                }
                Ok(Self(trimmed.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
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

define_entity_id!(UserId, "usr", "user ID");
define_entity_id!(SiteId, "site", "site ID");
define_entity_id!(JobId, "job", "job ID");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_carry_prefix() {
        assert!(SiteId::new().as_str().starts_with("site_"));
        assert!(JobId::new().as_str().starts_with("job_"));
        assert!(UserId::new().as_str().starts_with("usr_"));
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = JobId::new();
        let b = JobId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_parse_accepts_opaque_tokens() {
        let id = SiteId::parse("site-1").unwrap();
        assert_eq!(id.as_str(), "site-1");
    }

    #[test]
    fn test_parse_rejects_empty_and_whitespace() {
        assert!(SiteId::parse("").is_err());
        assert!(SiteId::parse("   ").is_err());
        assert!(SiteId::parse("site 1").is_err());
    }

    #[test]
    fn test_serde_round_trip_is_transparent() {
        let id = SiteId::parse("site-1").unwrap();
        let encoded = serde_json::to_string(&id).unwrap();
        assert_eq!(encoded, "\"site-1\"");
        let decoded: SiteId = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, id);
    }
}
