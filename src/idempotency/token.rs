//! Idempotency token validation.

use std::fmt;
use std::str::FromStr;
use uuid::{Uuid, Variant};

use crate::dispatch::types::DispatchError;

/// A validated, client-supplied idempotency token.
///
/// Only hyphenated UUID-v4 strings are accepted, so malformed input can
/// never become a cache key. Stored in lowercase canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdempotencyToken(String);

impl IdempotencyToken {
    /// Validate a raw token.
    pub fn parse(raw: &str) -> Result<Self, DispatchError> {
        // Uuid::try_parse also accepts simple, braced and URN forms.
        if raw.len() != 36 {
            return Err(DispatchError::InvalidIdempotencyToken);
        }
        let uuid = Uuid::try_parse(raw).map_err(|_| DispatchError::InvalidIdempotencyToken)?;
        if uuid.get_version_num() != 4 || uuid.get_variant() != Variant::RFC4122 {
            return Err(DispatchError::InvalidIdempotencyToken);
        }
        Ok(Self(uuid.hyphenated().to_string()))
    }

    /// A fresh random token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().hyphenated().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for IdempotencyToken {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for IdempotencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
