use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::PlayerId;
use crate::money::Money;

/// A durable player identity (spec.md §3 "Player"). Phone is the unique
/// natural key; `id` is the stable surrogate everything else references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub phone: String,
    pub display_name: String,
    pub player_token: String,
    pub stats: PlayerStats,
    pub block: BlockState,
    pub disconnect_count: u32,
    pub no_show_count: u32,
    pub pin: PinState,
    pub last_active: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub games_played: u32,
    pub games_won: u32,
    pub games_drawn: u32,
    pub total_winnings: Money,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockState {
    pub blocked: bool,
    pub reason: Option<String>,
    pub until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PinState {
    pub pin_hash: Option<String>,
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

impl Player {
    pub fn is_blocked_at(&self, now: DateTime<Utc>) -> bool {
        self.block.blocked && match self.block.until {
            Some(until) => now < until,
            None => true,
        }
    }
}
