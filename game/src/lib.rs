//! Matatu and 8-ball pool rule engines, and the session runtime that
//! wires either one to storage and the ledger for settlement
//! (spec.md §4.4).

pub mod cards;
pub mod engine;
pub mod matatu;
pub mod pool;
pub mod runtime;

use duelstake_core::prelude::{GameKind, PlayerId};

pub use cards::{shuffled_deck, Card, Rank, Suit};
pub use engine::{Conclusion, EngineError, EngineStatus, GameEngine};
pub use matatu::MatatuEngine;
pub use pool::PoolEngine;
pub use runtime::{cancel_expired_awaiting, RuntimeError, SessionRuntime};

/// Builds the engine for a matched session's `GameKind` (spec.md §4.4):
/// `Matatu` needs a fresh shuffle seed, `Pool` racks deterministically.
pub fn new_engine(kind: GameKind, player1: PlayerId, player2: PlayerId, seed: u64) -> Box<dyn GameEngine> {
    match kind {
        GameKind::Matatu => Box::new(MatatuEngine::new(player1, player2, seed)),
        GameKind::Pool => Box::new(PoolEngine::new(player1, player2)),
    }
}
