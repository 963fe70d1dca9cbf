//! Session synchronization module.
//!
//! This module provides the types that keep two players' boards in step:
//!
//! - `board` - Board state, moves and the shared record
//! - `identity` - Session codes and the local player's role
//! - `arbiter` - Turn decisions for local moves
//! - `channel` - The remote store interface
//! - `outbox` - Ordered background publishing with retry
//! - `phase` - Sync phase state machine
//! - `persistence` - Saving the identity across restarts
//! - `manager` - Session lifecycle tying it all together
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          SessionManager                               │
//! │                                                                       │
//! │  local move ──▶ arbiter::decide ──▶ BoardState ──▶ Outbox ──┐         │
//! │                                        ▲                    │         │
//! │                                        │                    ▼         │
//! │                                  inbound queue ◀──── SyncChannel      │
//! │                                  (remote + publish       (remote      │
//! │                                   outcomes)               store)      │
//! │                                                                       │
//! │  SessionIdentity ◀──▶ IdentityStore          SessionPhase             │
//! │                                                                       │
//! │  Idle ──▶ Pending ──▶ Synced ◀──▶ Desynced                            │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use duel_sync::sync::{MemoryIdentityStore, MemoryStore, SessionConfig, SessionManager};
//!
//! let store = MemoryStore::new();
//! let mut manager = SessionManager::new(
//!     Arc::new(store),
//!     Box::new(MemoryIdentityStore::new()),
//!     SessionConfig::default(),
//! );
//!
//! let identity = manager.create_session()?;
//! println!("Share this code: {}", identity.session_code);
//!
//! for event in manager.pump() {
//!     // update the UI
//! }
//! ```

pub mod arbiter;
pub mod board;
pub mod channel;
pub mod config;
pub mod identity;
pub mod manager;
pub mod memory_store;
pub mod outbox;
pub mod persistence;
pub mod phase;

// Re-export commonly used types
pub use arbiter::{decide, Decision, RejectReason};
pub use board::{BoardRecord, BoardState, Color, MoveEvent, Position, Role, STARTING_POSITION};
pub use channel::{ChangeCallback, StoreError, SubscriptionHandle, SyncChannel};
pub use config::{RetryPolicy, SessionConfig, DEFAULT_PUBLISH_ATTEMPTS, DEFAULT_RETRY_BACKOFF};
pub use identity::{SessionCode, SessionIdentity, SESSION_PATH_PREFIX};
pub use manager::{SessionError, SessionEvent, SessionManager};
pub use memory_store::MemoryStore;
pub use persistence::{FileIdentityStore, IdentityStore, MemoryIdentityStore, PersistenceError};
pub use phase::{InvalidTransition, PhaseEvent, SessionPhase};
