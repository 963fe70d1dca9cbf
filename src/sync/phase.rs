//! Session sync phase.
//!
//! Tracks whether the local view is known to match the remote record.
//!
//! # State Diagram
//!
//! ```text
//! ┌──────────┐  create / join / resume   ┌──────────┐
//! │   Idle   │──────────────────────────▶│ Pending  │◀─────────────┐
//! └──────────┘                           └────┬─────┘              │
//!      ▲                                      │ confirmed          │ local_write
//!      │                                      ▼                    │
//!      │ leave                           ┌──────────┐              │
//!      ├─────────────────────────────────│  Synced  │──────────────┤
//!      │                                 └────┬─────┘              │
//!      │                                      │ sync_failed        │
//!      │                                      ▼                    │
//!      │                                 ┌──────────┐              │
//!      └─────────────────────────────────│ Desynced │──────────────┘
//!                                        └──────────┘
//! ```
//!
//! `sync_failed` is accepted from any active phase and `confirmed` moves any
//! active phase to `Synced`. `subscribed` takes `Desynced` back to `Pending`
//! and leaves other active phases alone.

use std::fmt;

/// Sync status of the local session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// No session
    #[default]
    Idle,

    /// Local state not yet confirmed by the store
    Pending,

    /// Local state matches the last remote notification
    Synced,

    /// A publish or subscription failed; local state may differ from remote
    Desynced,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Desynced => "desynced",
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle)
    }

    pub fn is_synced(&self) -> bool {
        matches!(self, Self::Synced)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase transition events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    Create,
    Join,
    Resume,
    LocalWrite,
    /// A subscription to the remote record is (again) in place
    Subscribed,
    Confirmed,
    SyncFailed,
    Leave,
}

/// Error when a phase transition is invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: SessionPhase,
    pub event: PhaseEvent,
    pub reason: &'static str,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid transition from {} via {:?}: {}",
            self.from, self.event, self.reason
        )
    }
}

impl std::error::Error for InvalidTransition {}

impl SessionPhase {
    /// Apply an event, returning the new phase or an error.
    pub fn apply(&self, event: PhaseEvent) -> Result<Self, InvalidTransition> {
        use PhaseEvent::*;
        use SessionPhase::*;

        let invalid = |reason: &'static str| InvalidTransition {
            from: *self,
            event,
            reason,
        };

        match (self, event) {
            (Idle, Create | Join | Resume) => Ok(Pending),
            (_, Create | Join | Resume) => Err(invalid("Session already active")),

            (Idle, _) => Err(invalid("No active session")),

            (_, LocalWrite) => Ok(Pending),
            (Desynced, Subscribed) => Ok(Pending),
            (phase, Subscribed) => Ok(*phase),
            (_, Confirmed) => Ok(Synced),
            (_, SyncFailed) => Ok(Desynced),
            (_, Leave) => Ok(Idle),
        }
    }

    /// Apply an event in place, returning error if invalid.
    pub fn apply_mut(&mut self, event: PhaseEvent) -> Result<(), InvalidTransition> {
        *self = self.apply(event)?;
        Ok(())
    }
}
