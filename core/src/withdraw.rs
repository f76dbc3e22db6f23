use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{PlayerId, WithdrawId};
use crate::money::Money;
use crate::payment::PaymentStatus;

/// spec.md §3 "WithdrawRequest". Symmetrical to a stake: the reserve
/// happens in the same DB transaction that inserts this row
/// (spec.md §4.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub id: WithdrawId,
    pub player_id: PlayerId,
    pub amount: Money,
    pub fee: Money,
    pub net_amount: Money,
    pub method: String,
    pub destination: String,
    pub status: PaymentStatus,
    pub provider_transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
}
