use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{PlayerId, QueueEntryId, SessionId};
use crate::money::Money;
use crate::session::GameKind;

/// spec.md §3 "QueueEntry". A player has at most one entry whose status
/// is in `{Queued, Processing, Matching}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueStatus {
    Queued,
    Processing,
    Matching,
    Matched,
    Expired,
    Declined,
    Cancelled,
}

impl QueueStatus {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            QueueStatus::Queued | QueueStatus::Processing | QueueStatus::Matching
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Queued => "queued",
            QueueStatus::Processing => "processing",
            QueueStatus::Matching => "matching",
            QueueStatus::Matched => "matched",
            QueueStatus::Expired => "expired",
            QueueStatus::Declined => "declined",
            QueueStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: QueueEntryId,
    pub player_id: PlayerId,
    pub phone: String,
    pub stake_amount: Money,
    pub game_kind: GameKind,
    pub transaction_id: Option<crate::ids::PaymentId>,
    pub queue_token: String,
    pub status: QueueStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub matched_at: Option<DateTime<Utc>>,
    pub session_id: Option<SessionId>,
    pub match_code: Option<String>,
    pub is_private: bool,
}
