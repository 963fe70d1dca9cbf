//! Session identity.
//!
//! A session is addressed by a shareable code. The creator generates it, the
//! joiner types it in. Together with the local role it is everything needed to
//! resume a game after a reload.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::board::Role;

/// Prefix of session records in the remote store.
pub const SESSION_PATH_PREFIX: &str = "sessions";

/// Shareable session code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionCode(String);

impl SessionCode {
    /// Wrap a user-supplied code. Surrounding whitespace is dropped; returns
    /// `None` if nothing is left.
    pub fn parse(code: &str) -> Option<Self> {
        let code = code.trim();
        if code.is_empty() {
            None
        } else {
            Some(Self(code.to_string()))
        }
    }

    /// Generate a fresh time-ordered code from the current time.
    pub fn generate() -> Self {
        Self::from_timestamp(chrono::Utc::now())
    }

    /// Millisecond timestamp code, e.g. "1700000000000".
    pub fn from_timestamp(at: chrono::DateTime<chrono::Utc>) -> Self {
        Self(at.timestamp_millis().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Address of the shared record in the remote store.
    pub fn store_path(&self) -> String {
        format!("{}/{}", SESSION_PATH_PREFIX, self.0)
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who we are in which session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdentity {
    pub session_code: SessionCode,

    /// Fixed for the lifetime of the session
    pub role: Role,

    /// When this identity was established
    pub since: chrono::DateTime<chrono::Utc>,
}

impl SessionIdentity {
    pub fn new(session_code: SessionCode, role: Role) -> Self {
        Self {
            session_code,
            role,
            since: chrono::Utc::now(),
        }
    }

    /// Identity of a session creator.
    pub fn creator(session_code: SessionCode) -> Self {
        Self::new(session_code, Role::First)
    }

    /// Identity of a participant joining an existing session.
    pub fn joiner(session_code: SessionCode) -> Self {
        Self::new(session_code, Role::Second)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "session_code": self.session_code.as_str(),
            "role": self.role.as_str(),
            "color": self.role.color().as_str(),
            "since": self.since.to_rfc3339(),
        })
    }
}
