//! Board state.
//!
//! Holds the canonical serialized position and whose turn it is. The position
//! string is opaque here: it comes from the board widget and goes to the remote
//! store untouched.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Initial board position.
pub const STARTING_POSITION: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR";

/// A participant's role in a session. Determines turn order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Session creator, moves first
    First,
    /// Session joiner
    Second,
}

impl Default for Role {
    fn default() -> Self {
        Self::First
    }
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::First => "first",
            Self::Second => "second",
        }
    }

    /// The role that moves after this one.
    pub fn opposite(&self) -> Self {
        match self {
            Self::First => Self::Second,
            Self::Second => Self::First,
        }
    }

    /// Piece color played by this role.
    pub fn color(&self) -> Color {
        match self {
            Self::First => Color::White,
            Self::Second => Color::Black,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Piece color as reported by the board widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
}

impl Color {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::White => "white",
            Self::Black => "black",
        }
    }

    /// Role that plays this color.
    pub fn role(&self) -> Role {
        match self {
            Self::White => Role::First,
            Self::Black => Role::Second,
        }
    }
}

/// Serialized board position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Position(String);

impl Position {
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    pub fn starting() -> Self {
        Self::new(STARTING_POSITION)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::starting()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A move made on the board widget.
///
/// The widget has already applied the move to its own board, so the event
/// carries the resulting position along with the squares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveEvent {
    /// Origin square
    pub from: String,

    /// Destination square
    pub to: String,

    /// Color of the moved piece, when the widget reports it
    pub color: Option<Color>,

    /// Widget-supplied notation, e.g. "e2e4" or "Nf3"
    pub notation: Option<String>,

    /// Position after the move, as read back from the widget
    pub position_after: Position,
}

impl MoveEvent {
    pub fn new(from: impl Into<String>, to: impl Into<String>, position_after: Position) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            color: None,
            notation: None,
            position_after,
        }
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = Some(color);
        self
    }

    pub fn with_notation(mut self, notation: impl Into<String>) -> Self {
        self.notation = Some(notation.into());
        self
    }

    /// Notation for display and logs. Falls back to origin + destination.
    pub fn notation(&self) -> String {
        match &self.notation {
            Some(notation) => notation.clone(),
            None => format!("{}{}", self.from, self.to),
        }
    }
}

/// The shared `{position, turnOwner}` record kept in the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardRecord {
    pub position: Position,
    pub turn_owner: Role,
}

impl BoardRecord {
    pub fn new(position: Position, turn_owner: Role) -> Self {
        Self {
            position,
            turn_owner,
        }
    }

    /// Fresh game: starting position, first mover to play.
    pub fn initial(position: Position) -> Self {
        Self::new(position, Role::First)
    }
}

/// Local view of the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardState {
    position: Position,

    /// Role expected to move next
    turn_owner: Role,

    /// Notation of the last locally accepted move
    last_move: Option<String>,

    /// Moves accepted locally since this board was created
    local_moves: u32,
}

impl Default for BoardState {
    fn default() -> Self {
        Self::new(Position::starting())
    }
}

impl BoardState {
    /// Create a board at the given starting position with `first` to move.
    pub fn new(starting_position: Position) -> Self {
        Self {
            position: starting_position,
            turn_owner: Role::First,
            last_move: None,
            local_moves: 0,
        }
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn turn_owner(&self) -> Role {
        self.turn_owner
    }

    pub fn last_move(&self) -> Option<&str> {
        self.last_move.as_deref()
    }

    pub fn local_moves(&self) -> u32 {
        self.local_moves
    }

    pub fn is_turn_of(&self, role: Role) -> bool {
        self.turn_owner == role
    }

    /// Overwrite with the remote value. Returns whether anything changed, so
    /// an echo of our own write is a no-op.
    pub fn apply_remote(&mut self, position: Position, turn_owner: Role) -> bool {
        if self.position == position && self.turn_owner == turn_owner {
            return false;
        }
        self.position = position;
        self.turn_owner = turn_owner;
        true
    }

    /// Record a move the arbiter accepted, ahead of remote confirmation.
    ///
    /// `new_turn_owner` must be the opponent of the current turn owner;
    /// debug builds panic otherwise.
    pub(crate) fn apply_local_accepted(
        &mut self,
        mv: &MoveEvent,
        new_position: Position,
        new_turn_owner: Role,
    ) {
        debug_assert_eq!(new_turn_owner, self.turn_owner.opposite());
        self.position = new_position;
        self.turn_owner = new_turn_owner;
        self.last_move = Some(mv.notation());
        self.local_moves += 1;
    }

    /// Back to a fresh game with `first` to move. Returns whether anything
    /// changed.
    pub fn reset(&mut self, starting_position: Position) -> bool {
        self.last_move = None;
        self.apply_remote(starting_position, Role::First)
    }

    /// The record to publish for this board.
    pub fn snapshot(&self) -> BoardRecord {
        BoardRecord::new(self.position.clone(), self.turn_owner)
    }

    /// Convert to JSON for the UI.
    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::json!({
            "position": self.position.as_str(),
            "turn_owner": self.turn_owner.as_str(),
            "turn_color": self.turn_owner.color().as_str(),
        });
        if let Some(last_move) = &self.last_move {
            obj["last_move"] = serde_json::json!(last_move);
        }
        obj
    }
}
