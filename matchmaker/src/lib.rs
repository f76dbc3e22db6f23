//! The matchmaker: enqueue, the claim critical section, private invites,
//! expiry and visibility recovery (spec.md §4.3). Durable state lives in
//! `duelstake_store`; the fast-path pairing lists live behind a
//! `duelstake_coord::CoordinationStore`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use duelstake_coord::{ClaimOutcome, CoordinationStore};
use duelstake_core::prelude::*;
use duelstake_ledger::{Ledger, LedgerError};
use duelstake_store::{Store, StoreError};
use rand::Rng;
use thiserror::Error;
use tracing::{info, warn};

const MAX_CLAIM_RETRIES: u32 = 5;
const MAX_MATCH_CODE_RETRIES: u32 = 5;
const MATCH_CODE_ALPHABET: &[u8] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";
const MATCH_CODE_LEN: usize = 6;

#[derive(Error, Debug)]
pub enum MatchmakerError {
    #[error("player already has an active queue entry {0:?}")]
    AlreadyQueued(QueueEntryId),

    #[error("no queue entry found for that match code")]
    InvalidMatchCode,

    #[error("exhausted retries generating a unique match code")]
    MatchCodeCollision,

    #[error("exhausted retries claiming an opponent")]
    ClaimRetriesExhausted,

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl From<MatchmakerError> for CoreError {
    fn from(e: MatchmakerError) -> Self {
        match e {
            MatchmakerError::AlreadyQueued(_) => CoreError::Precondition(e.to_string()),
            MatchmakerError::InvalidMatchCode => CoreError::Precondition(e.to_string()),
            MatchmakerError::MatchCodeCollision => CoreError::Infrastructure(e.to_string()),
            MatchmakerError::ClaimRetriesExhausted => CoreError::Infrastructure(e.to_string()),
            MatchmakerError::Ledger(inner) => inner.into(),
            MatchmakerError::Storage(inner) => inner.into(),
        }
    }
}

pub type MatchmakerResult<T> = Result<T, MatchmakerError>;

/// What `claim_or_create` produced for the arriving player.
#[derive(Debug, Clone)]
pub enum MatchOutcome {
    /// No opponent was waiting; the arriving entry is now queued.
    Enqueued(QueueEntry),
    /// An opponent was found and a session was created. Per spec.md's
    /// determinism rule, `opponent` (the entry that was already waiting)
    /// is always `player1`.
    Matched { session: GameSession, opponent: QueueEntry, arriving: QueueEntry },
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(ffi_err, _) if ffi_err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn generate_match_code() -> String {
    let mut rng = rand::thread_rng();
    (0..MATCH_CODE_LEN)
        .map(|_| MATCH_CODE_ALPHABET[rng.gen_range(0..MATCH_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Ties the durable queue/session rows to the coordination store's fast
/// path and the ledger's stake-to-escrow move.
#[derive(Clone)]
pub struct Matchmaker<C: CoordinationStore> {
    store: Store,
    ledger: Ledger,
    coord: Arc<C>,
    match_duration: Duration,
}

impl<C: CoordinationStore> Matchmaker<C> {
    pub fn new(store: Store, ledger: Ledger, coord: Arc<C>, match_duration: Duration) -> Self {
        Self { store, ledger, coord, match_duration }
    }

    /// spec.md §4.3 "Enqueue": rejects a player with any active entry,
    /// otherwise inserts a `queued` row with `deadline = now +
    /// queue_expiry`.
    #[allow(clippy::too_many_arguments)]
    pub async fn enqueue(
        &self,
        player_id: PlayerId,
        phone: &str,
        stake_amount: Money,
        transaction_id: Option<PaymentId>,
        queue_ttl: Duration,
        game_kind: GameKind,
    ) -> MatchmakerResult<QueueEntry> {
        if let Some(existing) = self.store.find_active_queue_entry(player_id).await? {
            return Err(MatchmakerError::AlreadyQueued(existing.id));
        }
        let expires_at = Utc::now() + queue_ttl;
        Ok(self
            .store
            .enqueue(player_id, phone, stake_amount, game_kind, transaction_id, false, None, expires_at)
            .await?)
    }

    /// spec.md §4.3 "Private matches" create step: a `queued` row with
    /// `is_private=TRUE` and a generated 6-character Crockford-style
    /// code, retried up to 5 times on a unique-constraint collision,
    /// never pushed onto the public list.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_private_invite(
        &self,
        player_id: PlayerId,
        phone: &str,
        stake_amount: Money,
        transaction_id: Option<PaymentId>,
        queue_ttl: Duration,
        game_kind: GameKind,
    ) -> MatchmakerResult<QueueEntry> {
        if let Some(existing) = self.store.find_active_queue_entry(player_id).await? {
            return Err(MatchmakerError::AlreadyQueued(existing.id));
        }
        let expires_at = Utc::now() + queue_ttl;
        for _ in 0..MAX_MATCH_CODE_RETRIES {
            let code = generate_match_code();
            match self
                .store
                .enqueue(player_id, phone, stake_amount, game_kind, transaction_id, true, Some(code), expires_at)
                .await
            {
                Ok(entry) => return Ok(entry),
                Err(StoreError::Sqlite(e)) if is_unique_violation(&e) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(MatchmakerError::MatchCodeCollision)
    }

    /// spec.md §4.3 "On join-by-code": the joiner atomically flips the
    /// private row `queued -> matching`; on any failure the joiner's own
    /// row is deleted so it never leaks into the public queue.
    #[allow(clippy::too_many_arguments)]
    pub async fn join_private(
        &self,
        code: &str,
        joiner_id: PlayerId,
        joiner_phone: &str,
        stake_amount: Money,
        transaction_id: Option<PaymentId>,
        game_kind: GameKind,
    ) -> MatchmakerResult<MatchOutcome> {
        let invite = self.store.get_waiting_entry_by_match_code(code).await.map_err(|e| match e {
            StoreError::NotFound => MatchmakerError::InvalidMatchCode,
            other => other.into(),
        })?;

        if invite.stake_amount != stake_amount || invite.game_kind != game_kind {
            return Err(MatchmakerError::InvalidMatchCode);
        }

        let joiner = self
            .store
            .enqueue(joiner_id, joiner_phone, stake_amount, game_kind, transaction_id, true, None, invite.expires_at)
            .await?;

        if !self.store.try_claim(invite.id).await? {
            self.store.delete_queue_entry(joiner.id).await.ok();
            return Err(MatchmakerError::InvalidMatchCode);
        }

        if invite.phone == joiner.phone {
            self.store.release_claim(invite.id).await.ok();
            self.store.delete_queue_entry(joiner.id).await.ok();
            return Err(MatchmakerError::InvalidMatchCode);
        }

        match self.finish_match(&invite, &joiner).await {
            Ok(session) => Ok(MatchOutcome::Matched { session, opponent: invite, arriving: joiner }),
            Err(e) => {
                self.store.release_claim(invite.id).await.ok();
                self.store.delete_queue_entry(joiner.id).await.ok();
                Err(e)
            }
        }
    }

    /// spec.md §8 scenario 4 "Private invite decline": flips the invite
    /// row to `declined` so a subsequent status query for the inviter
    /// observes the rejection instead of waiting out the TTL.
    pub async fn decline_private_invite(&self, match_code: &str) -> MatchmakerResult<bool> {
        Ok(self.store.decline_queue_entry(match_code).await?)
    }

    /// Looks up a player's currently active (queued/processing/matching)
    /// entry, for callers that enqueue out-of-band (e.g. the payments
    /// webhook handler, after `PaymentService::on_success` enqueues a
    /// stake) and then need to drive `claim_or_create` themselves.
    pub async fn find_active_entry(&self, player_id: PlayerId) -> MatchmakerResult<Option<QueueEntry>> {
        Ok(self.store.find_active_queue_entry(player_id).await?)
    }

    /// spec.md §4.3 "Match claim", the critical section. `arriving` has
    /// already been durably enqueued by the caller with a phone/stake
    /// that isn't private; this attempts to pair it with whoever is
    /// waiting in the coordination store, retrying up to
    /// `MAX_CLAIM_RETRIES` times when the DB claim loses a race.
    pub async fn claim_or_create(&self, arriving: QueueEntry) -> MatchmakerResult<MatchOutcome> {
        let stake = arriving.stake_amount;
        let kind = arriving.game_kind;

        for attempt in 0..MAX_CLAIM_RETRIES {
            match self.coord.claim_or_enqueue(stake, kind, arriving.id).await {
                ClaimOutcome::NoMatch => return Ok(MatchOutcome::Enqueued(arriving)),
                ClaimOutcome::Matched(opp_id) => {
                    if !self.store.try_claim(opp_id).await? {
                        warn!(opp_id = opp_id.0, attempt, "claimed entry already left status=queued, retrying");
                        self.coord.requeue_front(stake, kind, opp_id).await;
                        continue;
                    }

                    let opponent = self.store.get_queue_entry(opp_id).await?;
                    if opponent.phone == arriving.phone {
                        self.store.release_claim(opp_id).await.ok();
                        self.coord.requeue_front(stake, kind, opp_id).await;
                        continue;
                    }

                    match self.finish_match(&opponent, &arriving).await {
                        Ok(session) => {
                            self.coord.complete_processing(stake, kind, opp_id).await;
                            return Ok(MatchOutcome::Matched { session, opponent, arriving });
                        }
                        Err(e) => {
                            self.store.release_claim(opp_id).await.ok();
                            self.coord.requeue_front(stake, kind, opp_id).await;
                            return Err(e);
                        }
                    }
                }
            }
        }
        Err(MatchmakerError::ClaimRetriesExhausted)
    }

    /// spec.md §4.3 step 4: creates the `GameSession` (`opponent` is
    /// always `player1`), flips both queue rows to `matched`, and moves
    /// both stakes into escrow.
    async fn finish_match(&self, opponent: &QueueEntry, arriving: &QueueEntry) -> MatchmakerResult<GameSession> {
        let expiry_time = Utc::now() + self.match_duration;
        let session = self
            .store
            .create_session(opponent.game_kind, opponent.player_id, arriving.player_id, opponent.stake_amount, expiry_time)
            .await?;

        self.store.mark_matched(opponent.id, session.id).await?;
        self.store.mark_matched(arriving.id, session.id).await?;
        self.ledger
            .stake_into_escrow(session.id, opponent.player_id, arriving.player_id, opponent.stake_amount)
            .await?;

        info!(
            session_id = session.id.0,
            player1 = opponent.player_id.0,
            player2 = arriving.player_id.0,
            "matched"
        );
        Ok(session)
    }

    /// spec.md §4.3 "Expiry": flips every timed-out `queued` row to
    /// `expired` and drops it from the coordination store's main list. No
    /// ledger action is needed — a stake only leaves `player_winnings`
    /// once a match is found.
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> MatchmakerResult<Vec<QueueEntryId>> {
        let expired = self.store.expire_stale_entries(now).await?;
        for &id in &expired {
            if let Ok(entry) = self.store.get_queue_entry(id).await {
                self.coord.remove_from_queue(entry.stake_amount, entry.game_kind, id).await;
            }
        }
        Ok(expired)
    }

    /// spec.md §4.3 "Visibility recovery": entries the coordination store
    /// has held in processing past the visibility timeout are pulled back
    /// onto their main list, and the matching DB row is flipped back to
    /// `queued`.
    pub async fn recover_visibility(&self, older_than: DateTime<Utc>) -> MatchmakerResult<usize> {
        let recovered = self.coord.recover_stuck(older_than).await;
        for (_, _, id) in &recovered {
            self.store.release_claim(*id).await?;
        }
        Ok(recovered.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duelstake_coord::LocalCoordinationStore;

    fn matchmaker() -> (Matchmaker<LocalCoordinationStore>, Store) {
        let store = Store::try_new_mem().unwrap();
        let ledger = Ledger::new(store.clone());
        let coord = Arc::new(LocalCoordinationStore::new());
        (Matchmaker::new(store.clone(), ledger, coord, Duration::minutes(15)), store)
    }

    #[tokio::test]
    async fn two_arrivals_at_the_same_stake_are_paired() {
        let (mm, store) = matchmaker();
        let alice = store.get_or_create_player("256700111111", "Alice").await.unwrap();
        let bob = store.get_or_create_player("256700222222", "Bob").await.unwrap();

        let alice_entry = mm
            .enqueue(alice.id, "256700111111", Money(1000), None, Duration::minutes(5), GameKind::Matatu)
            .await
            .unwrap();
        let outcome = mm.claim_or_create(alice_entry).await.unwrap();
        assert!(matches!(outcome, MatchOutcome::Enqueued(_)));

        let bob_entry = mm
            .enqueue(bob.id, "256700222222", Money(1000), None, Duration::minutes(5), GameKind::Matatu)
            .await
            .unwrap();
        let outcome = mm.claim_or_create(bob_entry).await.unwrap();
        match outcome {
            MatchOutcome::Matched { session, opponent, arriving } => {
                assert_eq!(session.player1_id, alice.id);
                assert_eq!(session.player2_id, bob.id);
                assert_eq!(opponent.player_id, alice.id);
                assert_eq!(arriving.player_id, bob.id);
            }
            other => panic!("expected a match, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_enqueue_is_rejected() {
        let (mm, store) = matchmaker();
        let alice = store.get_or_create_player("256700111111", "Alice").await.unwrap();
        mm.enqueue(alice.id, "256700111111", Money(1000), None, Duration::minutes(5), GameKind::Matatu)
            .await
            .unwrap();
        let err = mm
            .enqueue(alice.id, "256700111111", Money(1000), None, Duration::minutes(5), GameKind::Matatu)
            .await
            .unwrap_err();
        assert!(matches!(err, MatchmakerError::AlreadyQueued(_)));
    }

    #[tokio::test]
    async fn same_phone_cannot_match_itself() {
        let (mm, store) = matchmaker();
        let alice = store.get_or_create_player("256700111111", "Alice").await.unwrap();
        let alt_account = store.get_or_create_player("256700333333", "Alice2").await.unwrap();

        let first = mm
            .enqueue(alice.id, "256700111111", Money(1000), None, Duration::minutes(5), GameKind::Matatu)
            .await
            .unwrap();
        mm.claim_or_create(first).await.unwrap();

        // second entry shares alice's phone number but a different player id.
        let second = mm
            .enqueue(alt_account.id, "256700111111", Money(1000), None, Duration::minutes(5), GameKind::Matatu)
            .await
            .unwrap();
        let err = mm.claim_or_create(second).await.unwrap_err();
        assert!(matches!(err, MatchmakerError::ClaimRetriesExhausted));
    }

    #[tokio::test]
    async fn private_invite_pairs_by_code() {
        let (mm, store) = matchmaker();
        let alice = store.get_or_create_player("256700111111", "Alice").await.unwrap();
        let bob = store.get_or_create_player("256700222222", "Bob").await.unwrap();

        let invite = mm
            .create_private_invite(alice.id, "256700111111", Money(1000), None, Duration::minutes(5), GameKind::Matatu)
            .await
            .unwrap();
        assert!(invite.is_private);
        let code = invite.match_code.clone().unwrap();

        let outcome = mm
            .join_private(&code, bob.id, "256700222222", Money(1000), None, GameKind::Matatu)
            .await
            .unwrap();
        match outcome {
            MatchOutcome::Matched { opponent, arriving, .. } => {
                assert_eq!(opponent.player_id, alice.id);
                assert_eq!(arriving.player_id, bob.id);
            }
            other => panic!("expected a match, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn declining_a_private_invite_flips_it_and_blocks_a_stale_decline() {
        let (mm, store) = matchmaker();
        let alice = store.get_or_create_player("256700111111", "Alice").await.unwrap();
        let invite = mm
            .create_private_invite(alice.id, "256700111111", Money(1000), None, Duration::minutes(5), GameKind::Matatu)
            .await
            .unwrap();
        let code = invite.match_code.clone().unwrap();

        assert!(mm.decline_private_invite(&code).await.unwrap());
        let row = store.get_queue_entry(invite.id).await.unwrap();
        assert_eq!(row.status, QueueStatus::Declined);

        assert!(!mm.decline_private_invite(&code).await.unwrap());
    }

    #[tokio::test]
    async fn expiry_drops_the_entry_from_both_stores() {
        let (mm, store) = matchmaker();
        let alice = store.get_or_create_player("256700111111", "Alice").await.unwrap();
        let entry = mm
            .enqueue(alice.id, "256700111111", Money(1000), None, Duration::seconds(-1), GameKind::Matatu)
            .await
            .unwrap();
        mm.claim_or_create(entry.clone()).await.unwrap();

        let expired = mm.expire_stale(Utc::now()).await.unwrap();
        assert_eq!(expired, vec![entry.id]);
    }

    #[tokio::test]
    async fn visibility_recovery_requeues_a_stuck_claim() {
        let store = Store::try_new_mem().unwrap();
        let ledger = Ledger::new(store.clone());
        let coord = Arc::new(LocalCoordinationStore::new());
        let mm = Matchmaker::new(store.clone(), ledger, coord.clone(), Duration::minutes(15));

        let alice = store.get_or_create_player("256700111111", "Alice").await.unwrap();
        let entry = mm
            .enqueue(alice.id, "256700111111", Money(1000), None, Duration::minutes(5), GameKind::Matatu)
            .await
            .unwrap();

        // simulate the coordination store claiming this entry into
        // processing (as a second arrival's claim_or_enqueue would)
        // without the matchmaker ever completing the DB-side claim --
        // the crash window visibility recovery exists to repair.
        store.try_claim(entry.id).await.unwrap();
        coord.claim_or_enqueue(Money(1000), GameKind::Matatu, entry.id).await;
        coord.claim_or_enqueue(Money(1000), GameKind::Matatu, QueueEntryId(9999)).await;

        let recovered = mm.recover_visibility(Utc::now() + Duration::seconds(1)).await.unwrap();
        assert_eq!(recovered, 1);

        let row = store.get_queue_entry(entry.id).await.unwrap();
        assert_eq!(row.status, QueueStatus::Queued);
    }
}
