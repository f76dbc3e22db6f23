use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::SessionId;
use crate::money::Money;

/// spec.md §3 "EscrowLedger": per-session subledger of stake ins/outs,
/// kept alongside `AccountTransaction` rows for audit overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscrowEntryKind {
    /// Both players' stakes moved `player_winnings -> escrow` at match time.
    StakeIn,
    /// Settlement moved the pot out of escrow to platform/tax/winner.
    Settlement,
    /// Waiting-phase cancellation refunded both stakes.
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscrowLedgerEntry {
    pub id: i64,
    pub session_id: SessionId,
    pub kind: EscrowEntryKind,
    pub amount: Money,
    pub created_at: DateTime<Utc>,
}
