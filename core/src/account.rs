use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AccountId, PlayerId};
use crate::money::Money;

/// spec.md §3 "Account". `(account_type, owner_player_id)` is unique;
/// owner is mandatory for `PlayerWinnings` and forbidden otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountType {
    Settlement,
    Platform,
    Tax,
    Escrow,
    PlayerWinnings,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Settlement => "settlement",
            AccountType::Platform => "platform",
            AccountType::Tax => "tax",
            AccountType::Escrow => "escrow",
            AccountType::PlayerWinnings => "player_winnings",
        }
    }

    pub fn requires_owner(&self) -> bool {
        matches!(self, AccountType::PlayerWinnings)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub account_type: AccountType,
    pub owner_player_id: Option<PlayerId>,
    pub balance: Money,
    pub created_at: DateTime<Utc>,
}

/// spec.md §3 "AccountTransaction (posting)". Appended-only; at least
/// one side is non-null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceType {
    Payment,
    Session,
    Queue,
    Withdrawal,
}

impl ReferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceType::Payment => "PAYMENT",
            ReferenceType::Session => "SESSION",
            ReferenceType::Queue => "QUEUE",
            ReferenceType::Withdrawal => "WITHDRAWAL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountTransaction {
    pub id: i64,
    pub debit_account_id: Option<AccountId>,
    pub credit_account_id: Option<AccountId>,
    pub amount: Money,
    pub reference_type: ReferenceType,
    pub reference_id: i64,
    pub description: String,
    pub created_at: DateTime<Utc>,
}
