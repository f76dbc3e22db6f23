use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{PaymentId, PlayerId};
use crate::money::Money;
use crate::session::GameKind;

/// spec.md §3 "PaymentTransaction". A terminal status is final; ledger
/// postings for a pending payment do not exist until the terminal
/// transition (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentType {
    Stake,
    StakeWinnings,
    Payout,
    Withdraw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Completed | PaymentStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub id: PaymentId,
    pub player_id: PlayerId,
    pub payment_type: PaymentType,
    pub amount: Money,
    pub status: PaymentStatus,
    pub game_kind: GameKind,
    pub provider_transaction_id: Option<String>,
    pub provider_status_code: Option<String>,
    pub provider_status_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PaymentTransaction {
    pub fn new_pending(
        id: PaymentId,
        player_id: PlayerId,
        payment_type: PaymentType,
        amount: Money,
        game_kind: GameKind,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            player_id,
            payment_type,
            amount,
            status: PaymentStatus::Pending,
            game_kind,
            provider_transaction_id: None,
            provider_status_code: None,
            provider_status_message: None,
            created_at,
            completed_at: None,
        }
    }
}
