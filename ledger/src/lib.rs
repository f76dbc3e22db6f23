//! Double-entry bookkeeping over `duelstake_store`'s accounts tables.
//! Every posting here goes through `Store::transfer`'s guarded
//! `UPDATE ... WHERE balance >= amount RETURNING ...`, which stands in
//! for row-level locking under SQLite's single-writer model.

use duelstake_core::prelude::*;
use duelstake_store::{Store, StoreError};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("insufficient funds in debit account")]
    InsufficientFunds,

    #[error("account not found")]
    AccountNotFound,

    #[error("amount overflowed a Money computation")]
    Overflow,

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl From<LedgerError> for CoreError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientFunds => CoreError::Precondition(e.to_string()),
            LedgerError::AccountNotFound => CoreError::Precondition(e.to_string()),
            LedgerError::Overflow => CoreError::Validation(e.to_string()),
            LedgerError::Storage(inner) => inner.into(),
        }
    }
}

fn classify(e: StoreError) -> LedgerError {
    match e {
        StoreError::InsufficientFunds => LedgerError::InsufficientFunds,
        StoreError::NotFound => LedgerError::AccountNotFound,
        other => LedgerError::Storage(other),
    }
}

/// Result of splitting a gross pot into commission, tax and net shares
/// (spec.md §4.4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub commission: Money,
    pub tax: Money,
    pub net: Money,
}

/// Thin facade over `Store` adding ledger-specific vocabulary
/// (spec.md §4.1 "Ledger (L)").
#[derive(Clone)]
pub struct Ledger {
    store: Store,
}

impl Ledger {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub async fn get_or_create_account(
        &self,
        account_type: AccountType,
        owner: Option<PlayerId>,
    ) -> Result<Account, LedgerError> {
        self.store
            .get_or_create_account(account_type, owner)
            .await
            .map_err(classify)
    }

    /// spec.md §4.1 `transfer`: asserts the debit balance, decrements it,
    /// increments the credit balance, appends a posting — all inside one
    /// DB transaction.
    pub async fn transfer(
        &self,
        debit: AccountId,
        credit: AccountId,
        amount: Money,
        reference_type: ReferenceType,
        reference_id: i64,
        description: &str,
    ) -> Result<(), LedgerError> {
        self.store
            .transfer(debit, credit, amount, reference_type, reference_id, description)
            .await
            .map_err(classify)?;
        info!(amount = amount.0, ?reference_type, reference_id, "ledger posting applied");
        Ok(())
    }

    /// Splits a gross pot into commission, optional tax, and the winner's
    /// net share, rounding down at each step (spec.md §4.4.3).
    pub fn split_pot(gross: Money, commission_pct: u32, tax_pct: u32) -> Settlement {
        let commission = gross.percent(commission_pct);
        let after_commission = gross - commission;
        let tax = after_commission.percent(tax_pct);
        let net = after_commission - tax;
        Settlement { commission, tax, net }
    }

    /// Moves both players' stakes `player_winnings -> escrow` at match
    /// time (spec.md §4.4.3 "Stakes are moved into escrow at match
    /// time"), and records the matching escrow-ledger audit rows.
    pub async fn stake_into_escrow(
        &self,
        session_id: SessionId,
        player1: PlayerId,
        player2: PlayerId,
        stake_amount: Money,
    ) -> Result<(), LedgerError> {
        let escrow = self.get_or_create_account(AccountType::Escrow, None).await?;
        for player in [player1, player2] {
            let winnings = self.get_or_create_account(AccountType::PlayerWinnings, Some(player)).await?;
            self.transfer(
                winnings.id,
                escrow.id,
                stake_amount,
                ReferenceType::Session,
                session_id.0,
                "stake moved into escrow at match time",
            )
            .await?;
        }
        self.store
            .record_escrow_entry(session_id, EscrowEntryKind::StakeIn, stake_amount + stake_amount)
            .await
            .map_err(classify)?;
        Ok(())
    }

    /// Settles a completed session with a single winner: commission to
    /// `platform`, optional tax to `tax`, the remainder to the winner's
    /// `player_winnings` (spec.md §4.4.3).
    pub async fn settle_session_win(
        &self,
        session_id: SessionId,
        winner: PlayerId,
        gross_pot: Money,
        commission_pct: u32,
        tax_pct: u32,
    ) -> Result<Settlement, LedgerError> {
        let settlement = Self::split_pot(gross_pot, commission_pct, tax_pct);
        let escrow = self.get_or_create_account(AccountType::Escrow, None).await?;
        let platform = self.get_or_create_account(AccountType::Platform, None).await?;

        if settlement.commission != Money::ZERO {
            self.transfer(
                escrow.id,
                platform.id,
                settlement.commission,
                ReferenceType::Session,
                session_id.0,
                "commission",
            )
            .await?;
        }

        if settlement.tax != Money::ZERO {
            let tax_account = self.get_or_create_account(AccountType::Tax, None).await?;
            self.transfer(
                escrow.id,
                tax_account.id,
                settlement.tax,
                ReferenceType::Session,
                session_id.0,
                "payout tax",
            )
            .await?;
        }

        if settlement.net != Money::ZERO {
            let winnings = self.get_or_create_account(AccountType::PlayerWinnings, Some(winner)).await?;
            self.transfer(
                escrow.id,
                winnings.id,
                settlement.net,
                ReferenceType::Session,
                session_id.0,
                "net settlement to winner",
            )
            .await?;
        }

        self.store
            .record_escrow_entry(session_id, EscrowEntryKind::Settlement, gross_pot)
            .await
            .map_err(classify)?;

        Ok(settlement)
    }

    /// Refunds both stakes from `escrow -> player_winnings`, guarded by
    /// presence of a prior `Cancel` escrow row so a retried cancellation
    /// ticker tick never double-refunds (spec.md §4.4.4).
    pub async fn refund_cancelled_session(
        &self,
        session_id: SessionId,
        player1: PlayerId,
        player2: PlayerId,
        stake_amount: Money,
    ) -> Result<bool, LedgerError> {
        let already_refunded = self
            .store
            .list_escrow_entries(session_id)
            .await
            .map_err(classify)?
            .iter()
            .any(|e| e.kind == EscrowEntryKind::Cancel);
        if already_refunded {
            return Ok(false);
        }

        let escrow = self.get_or_create_account(AccountType::Escrow, None).await?;
        for player in [player1, player2] {
            let winnings = self.get_or_create_account(AccountType::PlayerWinnings, Some(player)).await?;
            self.transfer(
                escrow.id,
                winnings.id,
                stake_amount,
                ReferenceType::Session,
                session_id.0,
                "refund on cancelled session",
            )
            .await?;
        }
        self.store
            .record_escrow_entry(session_id, EscrowEntryKind::Cancel, stake_amount + stake_amount)
            .await
            .map_err(classify)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn split_pot_rounds_down_at_each_step() {
        let s = Ledger::split_pot(Money(1001), 10, 5);
        assert_eq!(s.commission, Money(100));
        assert_eq!(s.tax, Money(45));
        assert_eq!(s.net, Money(856));
    }

    #[tokio::test]
    async fn stake_into_escrow_then_settle_conserves_the_pot() {
        let store = Store::try_new_mem().unwrap();
        let ledger = Ledger::new(store.clone());
        let p1 = store.get_or_create_player("256700111111", "A").await.unwrap();
        let p2 = store.get_or_create_player("256700222222", "B").await.unwrap();

        // seed both players' winnings accounts, as a completed stake payment would.
        for p in [p1.id, p2.id] {
            let acc = ledger.get_or_create_account(AccountType::PlayerWinnings, Some(p)).await.unwrap();
            store
                .credit_account(acc.id, Money(1000), ReferenceType::Payment, 1, "seed")
                .await
                .unwrap();
        }

        let session_id = SessionId(1);
        ledger.stake_into_escrow(session_id, p1.id, p2.id, Money(500)).await.unwrap();

        let settlement = ledger
            .settle_session_win(session_id, p1.id, Money(1000), 10, 5)
            .await
            .unwrap();
        assert_eq!(settlement.commission, Money(100));
        assert_eq!(settlement.tax, Money(45));
        assert_eq!(settlement.net, Money(855));

        let winner_account = ledger.get_or_create_account(AccountType::PlayerWinnings, Some(p1.id)).await.unwrap();
        assert_eq!(winner_account.balance, Money(500 + 855));
    }
}
