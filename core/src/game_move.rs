use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{PlayerId, SessionId};

/// spec.md §3 "GameMove": an append-only audit record. `move_number` is
/// monotonic per session with no gaps (spec.md §8).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameMove {
    pub id: i64,
    pub session_id: SessionId,
    pub player_id: PlayerId,
    pub move_number: u32,
    pub move_type: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}
