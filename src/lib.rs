//! Duel Sync Library
//!
//! This crate keeps a two-player, turn-based board game in step between two
//! clients that only share an eventually consistent remote store.
//!
//! # Overview
//!
//! The sync module provides:
//!
//! - **Session Lifecycle** - Create a session and share its code, join with a
//!   code, resume after a restart, reset the board, leave.
//!
//! - **Turn Arbitration** - Local moves are accepted only on the local
//!   player's turn and for their own color.
//!
//! - **Remote Sync** - Accepted moves are applied optimistically and published
//!   in order; remote notifications overwrite the local board.
//!
//! - **Sync Phase** - Tracks whether the local board is confirmed by the store.
//!
//! # Design Principles
//!
//! 1. **The store is the source of truth** - Remote notifications always win,
//!    except ones that predate our own pending write.
//!
//! 2. **One writer** - Callbacks only enqueue; the manager applies everything
//!    under `&mut self`.
//!
//! 3. **No UI** - Callers feed moves in and read events out.
//!
//! 4. **Serialization-ready** - Records and identities are serde types.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use duel_sync::sync::{
//!     MemoryIdentityStore, MemoryStore, MoveEvent, Position, RejectReason, Role,
//!     SessionConfig, SessionManager,
//! };
//!
//! let store = MemoryStore::new();
//! let mut creator = SessionManager::new(
//!     Arc::new(store.clone()),
//!     Box::new(MemoryIdentityStore::new()),
//!     SessionConfig::default(),
//! );
//!
//! let identity = creator.create_session().unwrap();
//! assert_eq!(identity.role, Role::First);
//!
//! // Creator moves first
//! let e4 = Position::new("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR");
//! creator.apply_local_move(&MoveEvent::new("e2", "e4", e4.clone())).unwrap();
//!
//! // ...and cannot move twice
//! assert_eq!(
//!     creator.apply_local_move(&MoveEvent::new("d2", "d4", e4)),
//!     Err(RejectReason::NotMyTurn)
//! );
//! ```

pub mod sync;

// Re-export everything from sync module at crate root
pub use sync::*;
