//! The `GameEngine` trait each game implements, and the status/error
//! vocabulary shared across Matatu and pool (spec.md §4.4 "Per session,
//! a mutex-guarded authoritative state object").

use duelstake_core::prelude::{PlayerId, WinType};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    WaitingForPlayers,
    InProgress,
    Completed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("game is not in progress")]
    NotInProgress,

    #[error("it is not this player's turn")]
    NotYourTurn,

    #[error("player does not hold that card")]
    CardNotHeld,

    #[error("that move is not legal right now")]
    IllegalMove(String),

    #[error("malformed move payload: {0}")]
    BadPayload(String),

    #[error("a shot is already in progress")]
    ShotInProgress,

    #[error("cue ball placement is invalid")]
    InvalidCuePlacement,
}

/// Result of a terminal move: who won, and why, for settlement to key
/// off without re-deriving it from raw state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conclusion {
    pub winner: Option<PlayerId>,
    pub win_type: WinType,
}

/// A single game's authoritative rule engine. Implementors hold the
/// two players fixed at construction; everything else is interior
/// state mutated by `apply_move`.
pub trait GameEngine: Send {
    fn status(&self) -> EngineStatus;

    /// Set once `apply_move` or `forfeit`/`concede` ends the game.
    fn conclusion(&self) -> Option<Conclusion>;

    /// Sanitized view of the state for `player` — hides the opponent's
    /// hand, the undrawn deck, etc.
    fn state_for(&self, player: PlayerId) -> Value;

    /// The full state, persisted verbatim to `game_states` for replay
    /// and crash recovery (spec.md §4.4.3 "audit blob").
    fn full_state(&self) -> Value;

    /// Apply one player-submitted move. `move_type` and `payload`
    /// mirror the hub's typed message envelope (spec.md §4.5).
    fn apply_move(&mut self, player: PlayerId, move_type: &str, payload: &Value) -> Result<(), EngineError>;

    /// spec.md §4.4.4: the other player wins by forfeit.
    fn forfeit_by_disconnect(&mut self, disconnected: PlayerId);

    /// spec.md §4.4.4: the conceding player loses immediately.
    fn concede(&mut self, conceding: PlayerId);
}

impl GameEngine for Box<dyn GameEngine> {
    fn status(&self) -> EngineStatus {
        (**self).status()
    }

    fn conclusion(&self) -> Option<Conclusion> {
        (**self).conclusion()
    }

    fn state_for(&self, player: PlayerId) -> Value {
        (**self).state_for(player)
    }

    fn full_state(&self) -> Value {
        (**self).full_state()
    }

    fn apply_move(&mut self, player: PlayerId, move_type: &str, payload: &Value) -> Result<(), EngineError> {
        (**self).apply_move(player, move_type, payload)
    }

    fn forfeit_by_disconnect(&mut self, disconnected: PlayerId) {
        (**self).forfeit_by_disconnect(disconnected)
    }

    fn concede(&mut self, conceding: PlayerId) {
        (**self).concede(conceding)
    }
}
