use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Maximum length of a session token.
pub const MAX_SESSION_LEN: usize = 16;

/// Opaque per-session token embedded in every generated name.
///
/// Format: 1 to 16 lowercase ASCII alphanumerics (e.g. `3f9a2c1b`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
#[non_exhaustive]
pub struct SessionId(String);

impl SessionId {
    /// Generates a fresh session token from a random v4 UUID.
    #[must_use]
    pub fn generate() -> Self {
        let simple = Uuid::new_v4().simple().to_string();
        Self(simple[..8].to_owned())
    }

    /// Validates an externally supplied session token.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidSessionId`] if the token is empty, longer
    /// than [`MAX_SESSION_LEN`], or contains anything but `[a-z0-9]`.
    pub fn new(value: impl Into<String>) -> Result<Self, CoreError> {
        let value = value.into();
        let reason = if value.is_empty() {
            Some("must not be empty".to_owned())
        } else if value.len() > MAX_SESSION_LEN {
            Some(format!("longer than {MAX_SESSION_LEN} characters"))
        } else if !value.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()) {
            Some("only lowercase ASCII letters and digits are allowed".to_owned())
        } else {
            None
        };
        match reason {
            Some(reason) => Err(CoreError::InvalidSessionId { value, reason }),
            None => Ok(Self(value)),
        }
    }

    /// Returns the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

/// Unique identifier for a single migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub struct RunId(pub Uuid);

impl RunId {
    /// Creates a new random `RunId`.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
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

impl From<Uuid> for RunId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}
