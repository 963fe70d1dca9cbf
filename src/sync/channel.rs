//! Bridge to the remote shared store.
//!
//! The store is a key-addressed mutable record per session with change
//! notification. It offers no ordering between writers; arbitration happens
//! above it.

use std::sync::Arc;

use async_trait::async_trait;

use super::board::BoardRecord;
use super::identity::SessionCode;

/// Called with the record each time the remote value changes.
pub type ChangeCallback = Arc<dyn Fn(BoardRecord) + Send + Sync>;

/// Remote store errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Store cannot be reached
    Unavailable(String),
    /// Store refused the operation
    Rejected(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(msg) => write!(f, "Remote store unavailable: {}", msg),
            Self::Rejected(msg) => write!(f, "Remote store rejected the write: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

/// Identifies one subscription so it can be cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub session_code: SessionCode,
    pub id: u64,
}

#[async_trait]
pub trait SyncChannel: Send + Sync {
    /// Start watching a session record.
    ///
    /// `on_change` runs immediately with the current record if there is one,
    /// then once per write in store order, including our own writes. It may run
    /// on any thread and must not call back into the channel.
    fn subscribe(
        &self,
        session_code: &SessionCode,
        on_change: ChangeCallback,
    ) -> Result<SubscriptionHandle, StoreError>;

    /// Write the session record.
    async fn publish(&self, session_code: &SessionCode, record: BoardRecord)
        -> Result<(), StoreError>;

    /// Stop notifications. No callback runs for this handle once it returns.
    fn unsubscribe(&self, handle: SubscriptionHandle);
}
