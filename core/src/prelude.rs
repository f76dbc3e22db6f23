//! Convenience re-export, mirroring the teacher workspace's `prelude`
//! modules used throughout its game crates.

pub use crate::account::{Account, AccountTransaction, AccountType, ReferenceType};
pub use crate::error::{CoreError, ErrorClass, Result};
pub use crate::escrow::{EscrowEntryKind, EscrowLedgerEntry};
pub use crate::game_move::GameMove;
pub use crate::ids::{AccountId, PaymentId, PlayerId, QueueEntryId, SessionId, WithdrawId};
pub use crate::money::Money;
pub use crate::payment::{PaymentStatus, PaymentTransaction, PaymentType};
pub use crate::player::{BlockState, PinState, Player, PlayerStats};
pub use crate::queue::{QueueEntry, QueueStatus};
pub use crate::session::{GameKind, GameSession, SessionStatus, WinType};
pub use crate::withdraw::WithdrawRequest;
