//! Wires a `GameEngine` to storage and the ledger: move persistence,
//! settlement on terminal transition, and the disconnect/expiry/forfeit
//! rules of spec.md §4.4.3-4.4.4.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use duelstake_core::prelude::*;
use duelstake_ledger::{Ledger, LedgerError};
use duelstake_store::{Store, StoreError};
use thiserror::Error;
use tracing::{info, warn};

use crate::engine::{EngineError, GameEngine};

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl From<RuntimeError> for CoreError {
    fn from(e: RuntimeError) -> Self {
        match e {
            RuntimeError::Engine(inner) => CoreError::Precondition(inner.to_string()),
            RuntimeError::Ledger(inner) => inner.into(),
            RuntimeError::Storage(inner) => inner.into(),
        }
    }
}

/// One live session: the authoritative engine plus the bookkeeping the
/// hub needs to drive disconnects and the tickers need to drive expiry.
pub struct SessionRuntime<E: GameEngine> {
    pub session: GameSession,
    engine: E,
    store: Store,
    ledger: Ledger,
    commission_pct: u32,
    tax_pct: u32,
    disconnect_grace: Duration,
    connected: HashSet<PlayerId>,
    disconnected_since: HashMap<PlayerId, DateTime<Utc>>,
    next_move_number: u32,
}

impl<E: GameEngine> SessionRuntime<E> {
    pub fn new(
        session: GameSession,
        engine: E,
        store: Store,
        ledger: Ledger,
        commission_pct: u32,
        tax_pct: u32,
        disconnect_grace: Duration,
    ) -> Self {
        Self {
            session,
            engine,
            store,
            ledger,
            commission_pct,
            tax_pct,
            disconnect_grace,
            connected: HashSet::new(),
            disconnected_since: HashMap::new(),
            next_move_number: 1,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Returns true once both players have connected at least once,
    /// which flips the session `AwaitingPlayers -> InProgress`.
    pub async fn mark_connected(&mut self, player: PlayerId) -> Result<bool, RuntimeError> {
        self.connected.insert(player);
        self.disconnected_since.remove(&player);
        if self.connected.contains(&self.session.player1_id) && self.connected.contains(&self.session.player2_id) {
            if self.store.mark_in_progress(self.session.id).await? {
                self.session.status = SessionStatus::InProgress;
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn mark_disconnected(&mut self, player: PlayerId, now: DateTime<Utc>) {
        self.connected.remove(&player);
        self.disconnected_since.insert(player, now);
    }

    /// Applies one player-submitted move, persists it, snapshots the
    /// resulting state, and settles if the move ended the game.
    pub async fn submit_move(
        &mut self,
        player: PlayerId,
        move_type: &str,
        payload: &serde_json::Value,
    ) -> Result<(), RuntimeError> {
        self.engine.apply_move(player, move_type, payload)?;
        self.store
            .append_move(self.session.id, player, self.next_move_number, move_type, payload)
            .await?;
        self.next_move_number += 1;
        self.store.save_game_state(self.session.id, &self.engine.full_state()).await?;

        if self.engine.conclusion().is_some() {
            self.settle().await?;
        }
        Ok(())
    }

    /// spec.md §4.4.4 "forfeit by disconnect": call on a tick once a
    /// disconnected player has been gone longer than the grace period.
    pub async fn check_disconnect_forfeit(&mut self, now: DateTime<Utc>) -> Result<bool, RuntimeError> {
        let stale = self
            .disconnected_since
            .iter()
            .find(|&(_, &since)| now - since >= self.disconnect_grace)
            .map(|(&player, _)| player);

        let Some(player) = stale else { return Ok(false) };
        self.engine.forfeit_by_disconnect(player);
        self.store.save_game_state(self.session.id, &self.engine.full_state()).await?;
        self.settle().await?;
        Ok(true)
    }

    pub async fn concede(&mut self, player: PlayerId) -> Result<(), RuntimeError> {
        self.engine.concede(player);
        self.store.save_game_state(self.session.id, &self.engine.full_state()).await?;
        self.settle().await
    }

    async fn settle(&mut self) -> Result<(), RuntimeError> {
        let conclusion = self.engine.conclusion().expect("settle is only called once conclusion is set");

        match conclusion.winner {
            Some(winner) => {
                let gross_pot = self.session.stake_amount + self.session.stake_amount;
                let settlement = self
                    .ledger
                    .settle_session_win(self.session.id, winner, gross_pot, self.commission_pct, self.tax_pct)
                    .await?;
                let payout = self
                    .store
                    .create_pending_payment(winner, PaymentType::Payout, settlement.net, self.session.kind)
                    .await?;
                self.store
                    .finalize_payment(payout.id, PaymentStatus::Completed, Some("00"), Some("session settlement"))
                    .await?;

                for player in [self.session.player1_id, self.session.player2_id] {
                    let won = player == winner;
                    let winnings = if won { settlement.net } else { Money::ZERO };
                    self.store.record_result(player, won, false, winnings).await?;
                }
                info!(session_id = self.session.id.0, ?winner, ?conclusion.win_type, "session settled");
            }
            None => {
                warn!(session_id = self.session.id.0, "session concluded with no winner; stakes remain in escrow");
                for player in [self.session.player1_id, self.session.player2_id] {
                    self.store.record_result(player, false, true, Money::ZERO).await?;
                }
            }
        }

        let final_status = SessionStatus::Completed;
        self.store.mark_completed(self.session.id, conclusion.winner, final_status).await?;
        self.session.status = final_status;
        self.session.winner_id = conclusion.winner;
        Ok(())
    }
}

/// spec.md §4.4.4 "WAITING -> CANCELLED": sessions nobody ever
/// connected to by `expiry_time`. Idempotent via the escrow `Cancel`
/// row guard inside `refund_cancelled_session`.
pub async fn cancel_expired_awaiting(
    store: &Store,
    ledger: &Ledger,
    now: DateTime<Utc>,
) -> Result<Vec<SessionId>, RuntimeError> {
    let expired = store.list_expired_awaiting_players(now).await?;
    let mut cancelled = Vec::new();
    for session in expired {
        ledger
            .refund_cancelled_session(session.id, session.player1_id, session.player2_id, session.stake_amount)
            .await?;
        store.mark_completed(session.id, None, SessionStatus::Cancelled).await?;
        cancelled.push(session.id);
    }
    Ok(cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matatu::MatatuEngine;
    use duelstake_core::prelude::AccountType;

    async fn setup() -> (Store, Ledger, PlayerId, PlayerId, GameSession) {
        let store = Store::try_new_mem().unwrap();
        let ledger = Ledger::new(store.clone());
        let p1 = store.get_or_create_player("256700111111", "A").await.unwrap();
        let p2 = store.get_or_create_player("256700222222", "B").await.unwrap();
        for p in [p1.id, p2.id] {
            let acc = ledger.get_or_create_account(AccountType::PlayerWinnings, Some(p)).await.unwrap();
            store.credit_account(acc.id, Money(5000), ReferenceType::Payment, 1, "seed").await.unwrap();
        }
        let session = store
            .create_session(GameKind::Matatu, p1.id, p2.id, Money(1000), Utc::now() + Duration::minutes(10))
            .await
            .unwrap();
        ledger.stake_into_escrow(session.id, p1.id, p2.id, Money(1000)).await.unwrap();
        (store, ledger, p1.id, p2.id, session)
    }

    #[tokio::test]
    async fn concede_settles_the_pot_to_the_opponent() {
        let (store, ledger, p1, p2, session) = setup().await;
        let engine = MatatuEngine::new(p1, p2, 7);
        let mut runtime = SessionRuntime::new(session.clone(), engine, store.clone(), ledger.clone(), 10, 0, Duration::seconds(30));

        runtime.concede(p1).await.unwrap();

        let updated = store.get_session(session.id).await.unwrap();
        assert_eq!(updated.status, SessionStatus::Completed);
        assert_eq!(updated.winner_id, Some(p2));

        let winner = store.get_player(p2).await.unwrap();
        assert_eq!(winner.stats.games_won, 1);
    }

    #[tokio::test]
    async fn disconnect_past_grace_forfeits() {
        let (store, ledger, p1, p2, session) = setup().await;
        let engine = MatatuEngine::new(p1, p2, 7);
        let mut runtime =
            SessionRuntime::new(session.clone(), engine, store.clone(), ledger.clone(), 10, 0, Duration::seconds(30));

        let t0 = Utc::now();
        runtime.mark_disconnected(p1, t0);
        assert!(!runtime.check_disconnect_forfeit(t0 + Duration::seconds(10)).await.unwrap());
        assert!(runtime.check_disconnect_forfeit(t0 + Duration::seconds(31)).await.unwrap());

        let updated = store.get_session(session.id).await.unwrap();
        assert_eq!(updated.status, SessionStatus::Completed);
        assert_eq!(updated.winner_id, Some(p2));
    }

    #[tokio::test]
    async fn cancellation_refunds_both_stakes_exactly_once() {
        let store = Store::try_new_mem().unwrap();
        let ledger = Ledger::new(store.clone());
        let p1 = store.get_or_create_player("256700111111", "A").await.unwrap();
        let p2 = store.get_or_create_player("256700222222", "B").await.unwrap();
        for p in [p1.id, p2.id] {
            let acc = ledger.get_or_create_account(AccountType::PlayerWinnings, Some(p)).await.unwrap();
            store.credit_account(acc.id, Money(5000), ReferenceType::Payment, 1, "seed").await.unwrap();
        }
        let session = store
            .create_session(GameKind::Matatu, p1.id, p2.id, Money(1000), Utc::now() - Duration::seconds(1))
            .await
            .unwrap();
        ledger.stake_into_escrow(session.id, p1.id, p2.id, Money(1000)).await.unwrap();

        let now = Utc::now();
        let cancelled = cancel_expired_awaiting(&store, &ledger, now).await.unwrap();
        assert_eq!(cancelled, vec![session.id]);
        let again = cancel_expired_awaiting(&store, &ledger, now).await.unwrap();
        assert!(again.is_empty());

        let p1_account = ledger.get_or_create_account(AccountType::PlayerWinnings, Some(p1)).await.unwrap();
        assert_eq!(p1_account.balance, Money(5000));
    }
}
