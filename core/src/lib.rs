//! Shared domain types for the duelstake engine.
//!
//! This crate holds nothing that talks to a database, a socket or a
//! payment provider — just the data model and the error taxonomy that the
//! rest of the workspace (`duelstake-store`, `duelstake-ledger`,
//! `duelstake-payments`, `duelstake-matchmaker`, `duelstake-game`,
//! `duelstake-hub`) is built against.

pub mod account;
pub mod error;
pub mod escrow;
pub mod game_move;
pub mod ids;
pub mod money;
pub mod payment;
pub mod player;
pub mod prelude;
pub mod queue;
pub mod session;
pub mod withdraw;

pub use error::{CoreError, Result};
