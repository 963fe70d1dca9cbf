//! Turn arbitration.
//!
//! Decides whether a move may be made by the local participant. Only turn
//! ownership is checked; chess legality is the board widget's business.

use super::board::{BoardState, MoveEvent, Role};
use super::identity::SessionIdentity;

/// Why a move was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NoActiveSession,
    NotMyTurn,
    WrongColor,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoActiveSession => "no_active_session",
            Self::NotMyTurn => "not_my_turn",
            Self::WrongColor => "wrong_color",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoActiveSession => write!(f, "No active session"),
            Self::NotMyTurn => write!(f, "It's not your turn"),
            Self::WrongColor => write!(f, "That piece belongs to the other player"),
        }
    }
}

impl std::error::Error for RejectReason {}

/// Outcome of arbitration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Move may be applied; `next_turn` moves next.
    Accept { next_turn: Role },
    Reject(RejectReason),
}

/// Decide on a candidate move. Rules apply in order: active session, turn
/// ownership, color tag.
pub fn decide(
    board: Option<&BoardState>,
    identity: Option<&SessionIdentity>,
    mv: &MoveEvent,
) -> Decision {
    let (board, identity) = match (board, identity) {
        (Some(board), Some(identity)) => (board, identity),
        _ => return Decision::Reject(RejectReason::NoActiveSession),
    };

    if !board.is_turn_of(identity.role) {
        return Decision::Reject(RejectReason::NotMyTurn);
    }

    // An untagged move gets no color check
    if let Some(color) = mv.color {
        if color.role() != identity.role {
            return Decision::Reject(RejectReason::WrongColor);
        }
    }

    Decision::Accept {
        next_turn: identity.role.opposite(),
    }
}
