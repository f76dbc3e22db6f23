use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{PlayerId, SessionId};
use crate::money::Money;

/// spec.md §3 "GameSession" status machine: `AwaitingPlayers -> InProgress
/// -> Completed`, with either state able to move to `Cancelled` if an
/// opponent never connects. Forfeit and concede still land on `Completed`
/// — which player won and why is carried separately by `WinType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    AwaitingPlayers,
    InProgress,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::AwaitingPlayers => "awaiting_players",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameKind {
    Matatu,
    Pool,
}

impl GameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameKind::Matatu => "matatu",
            GameKind::Pool => "pool",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSession {
    pub id: SessionId,
    pub game_token: String,
    pub kind: GameKind,
    pub player1_id: PlayerId,
    pub player2_id: PlayerId,
    pub stake_amount: Money,
    pub status: SessionStatus,
    pub winner_id: Option<PlayerId>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expiry_time: DateTime<Utc>,
}

impl GameSession {
    pub fn involves(&self, player_id: PlayerId) -> bool {
        self.player1_id == player_id || self.player2_id == player_id
    }

    pub fn opponent_of(&self, player_id: PlayerId) -> Option<PlayerId> {
        if self.player1_id == player_id {
            Some(self.player2_id)
        } else if self.player2_id == player_id {
            Some(self.player1_id)
        } else {
            None
        }
    }
}

/// The reason a session moved to `Completed`, carried through settlement
/// so the ledger description and the client snapshot agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WinType {
    Chop,
    Classic,
    PoolWin,
    Forfeit,
    Concede,
}
