//! In-memory test harness: builders for players, accounts and sessions,
//! mirroring `race-test`'s `TestGameAccountBuilder` (a `Default` struct
//! consuming itself through `with_*` calls, finished by `build`), but
//! hitting a real in-memory `Store`/`Ledger` instead of constructing a
//! plain value, since every fixture here needs a row to reference.

use chrono::{DateTime, Duration, Utc};
use duelstake_core::prelude::*;
use duelstake_ledger::Ledger;
use duelstake_store::Store;

/// A ready-to-use in-memory `Store` + `Ledger` pair, as almost every
/// integration test needs both.
pub fn new_store_and_ledger() -> (Store, Ledger) {
    let store = Store::try_new_mem().expect("in-memory store");
    let ledger = Ledger::new(store.clone());
    (store, ledger)
}

/// Creates a player and credits their `player_winnings` account,
/// mirroring the seed step most crate-level tests repeat by hand.
pub async fn seeded_player(store: &Store, ledger: &Ledger, phone: &str, display_name: &str, winnings: Money) -> Player {
    let player = store.get_or_create_player(phone, display_name).await.expect("create player");
    if winnings != Money::ZERO {
        let account = ledger
            .get_or_create_account(AccountType::PlayerWinnings, Some(player.id))
            .await
            .expect("create winnings account");
        store
            .credit_account(account.id, winnings, ReferenceType::Payment, player.id.0, "test seed")
            .await
            .expect("seed winnings");
    }
    player
}

/// A matched, staked `GameSession` with its two players, ready to hand
/// to a `SessionRuntime` or `Hub`.
pub struct TestSession {
    pub session: GameSession,
    pub player1: Player,
    pub player2: Player,
}

/// Builds a `TestSession`: two seeded players, a session row, and the
/// stake moved into escrow, following spec.md §4.1's normal stake path.
pub struct TestSessionBuilder {
    game_kind: GameKind,
    stake_amount: Money,
    seed_winnings: Money,
    player1_phone: String,
    player2_phone: String,
    expiry_time: DateTime<Utc>,
}

impl Default for TestSessionBuilder {
    fn default() -> Self {
        Self {
            game_kind: GameKind::Matatu,
            stake_amount: Money(1000),
            seed_winnings: Money(5000),
            player1_phone: "256700111111".to_string(),
            player2_phone: "256700222222".to_string(),
            expiry_time: Utc::now() + Duration::minutes(10),
        }
    }
}

impl TestSessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn game_kind(mut self, kind: GameKind) -> Self {
        self.game_kind = kind;
        self
    }

    pub fn stake_amount(mut self, amount: Money) -> Self {
        self.stake_amount = amount;
        self
    }

    pub fn seed_winnings(mut self, amount: Money) -> Self {
        self.seed_winnings = amount;
        self
    }

    pub fn expiry_time(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry_time = expiry;
        self
    }

    pub async fn build(self, store: &Store, ledger: &Ledger) -> TestSession {
        let player1 = seeded_player(store, ledger, &self.player1_phone, "Player One", self.seed_winnings).await;
        let player2 = seeded_player(store, ledger, &self.player2_phone, "Player Two", self.seed_winnings).await;

        let session = store
            .create_session(self.game_kind, player1.id, player2.id, self.stake_amount, self.expiry_time)
            .await
            .expect("create session");

        ledger
            .stake_into_escrow(session.id, player1.id, player2.id, self.stake_amount)
            .await
            .expect("stake into escrow");

        TestSession { session, player1, player2 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builder_produces_a_staked_awaiting_session() {
        let (store, ledger) = new_store_and_ledger();
        let fixture = TestSessionBuilder::new().stake_amount(Money(2000)).build(&store, &ledger).await;

        assert_eq!(fixture.session.status, SessionStatus::AwaitingPlayers);
        assert_eq!(fixture.session.stake_amount, Money(2000));

        let p1_winnings = ledger
            .get_or_create_account(AccountType::PlayerWinnings, Some(fixture.player1.id))
            .await
            .unwrap();
        assert_eq!(p1_winnings.balance, Money(5000) - Money(2000));
    }
}
