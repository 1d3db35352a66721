//! Session identifier and bearer credential

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;

/// Prefix of the bearer credential value (`Bearer sid-<n>`)
const SID_PREFIX: &str = "sid-";

/// Unique identifier for an authenticated session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u32);

impl SessionId {
    /// Create a new session ID
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Render the value of an `Authorization` header for this session
    pub fn to_bearer(&self) -> String {
        format!("Bearer {}{}", SID_PREFIX, self.0)
    }

    /// Parse the value of an `Authorization` header
    pub fn from_bearer(header: &str) -> Result<Self, ProtocolError> {
        let credential = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ProtocolError::InvalidBearer(header.to_string()))?;
        credential.trim().parse()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", SID_PREFIX, self.0)
    }
}

impl FromStr for SessionId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix(SID_PREFIX)
            .ok_or_else(|| ProtocolError::InvalidBearer(s.to_string()))?;
        match digits.parse::<u32>() {
            Ok(0) | Err(_) => Err(ProtocolError::InvalidBearer(s.to_string())),
            Ok(id) => Ok(Self(id)),
        }
    }
}

impl From<u32> for SessionId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}
