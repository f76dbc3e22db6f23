//! Coordination-store abstraction for the matchmaker's claim critical
//! section (spec.md §4.3). The durable queue rows in `duelstake-store`
//! remain the source of truth; this crate mirrors the fast-path lists a
//! production deployment would keep in Redis — `queue:stake:{N}:{kind}`,
//! `processing:stake:{N}:{kind}` and `processing_ts:stake:{N}:{kind}` —
//! behind one lock per call, the way `Broadcaster` guards its event
//! backups with a single `tokio::sync::Mutex`.
//!
//! `LocalCoordinationStore` plays the role the spec's Lua script plays
//! against Redis: one critical section makes the pop and the
//! processing-insert indivisible. A Redis-backed implementation would
//! satisfy the same trait with an actual `EVAL` call.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duelstake_core::prelude::{GameKind, Money, QueueEntryId};
use tokio::sync::Mutex;
use tracing::debug;

/// Outcome of the atomic claim-or-enqueue step (spec.md §4.3 step 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// No one was waiting; `my_id` was pushed onto the main list.
    NoMatch,
    /// `opp_id` was popped off the main list and moved into processing.
    Matched(QueueEntryId),
}

/// The fast-path structures the matchmaker consults before touching the
/// database. Implementors must make `claim_or_enqueue` atomic: a
/// Redis-backed store would do this with one `EVAL`; the in-memory store
/// does it by holding its mutex across the whole call.
///
/// Every bucket is keyed on `(stake, kind)` — a Matatu player and a Pool
/// player waiting at the same stake must never match each other.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// spec.md §4.3 step 1. Pops the oldest waiting entry for `(stake,
    /// kind)` and moves it into processing, or enqueues `my_id` if
    /// nothing was waiting.
    async fn claim_or_enqueue(&self, stake: Money, kind: GameKind, my_id: QueueEntryId) -> ClaimOutcome;

    /// Removes `id` from the processing list and timestamp index without
    /// returning it to the main queue — used once a claimed opponent has
    /// been durably matched (spec.md §4.3 step 4).
    async fn complete_processing(&self, stake: Money, kind: GameKind, id: QueueEntryId);

    /// Removes `id` from processing and restores it to the front of the
    /// main list — used when the DB claim in step 2 loses the race, or
    /// when a later step of the match rolls back (spec.md §4.3 steps 2, 5).
    async fn requeue_front(&self, stake: Money, kind: GameKind, id: QueueEntryId);

    /// Removes `id` from the main list outright — used when a queue row
    /// expires (spec.md §4.3 "Expiry").
    async fn remove_from_queue(&self, stake: Money, kind: GameKind, id: QueueEntryId);

    /// Scans every bucket's processing timestamps for entries older than
    /// `older_than`, moves them out of processing and back onto the front
    /// of their main list, and returns what was recovered so the caller
    /// can flip the matching DB rows back to `queued` (spec.md §4.3
    /// "Visibility recovery").
    async fn recover_stuck(&self, older_than: DateTime<Utc>) -> Vec<(Money, GameKind, QueueEntryId)>;
}

#[derive(Default)]
struct Bucket {
    queue: VecDeque<QueueEntryId>,
    processing: Vec<QueueEntryId>,
    processing_ts: Vec<(DateTime<Utc>, QueueEntryId)>,
}

/// In-process stand-in for a Redis coordination layer, keyed by stake
/// and game kind the way the spec's list names are (`queue:stake:{N}` etc,
/// namespaced per game).
#[derive(Default)]
pub struct LocalCoordinationStore {
    buckets: Mutex<HashMap<(i64, GameKind), Bucket>>,
}

impl LocalCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CoordinationStore for LocalCoordinationStore {
    async fn claim_or_enqueue(&self, stake: Money, kind: GameKind, my_id: QueueEntryId) -> ClaimOutcome {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry((stake.0, kind)).or_default();

        match bucket.queue.pop_back() {
            Some(opp_id) => {
                bucket.processing.push(opp_id);
                bucket.processing_ts.push((Utc::now(), opp_id));
                debug!(stake = stake.0, kind = kind.as_str(), opp_id = opp_id.0, "claimed waiting entry");
                ClaimOutcome::Matched(opp_id)
            }
            None => {
                bucket.queue.push_front(my_id);
                debug!(stake = stake.0, kind = kind.as_str(), my_id = my_id.0, "no match, enqueued");
                ClaimOutcome::NoMatch
            }
        }
    }

    async fn complete_processing(&self, stake: Money, kind: GameKind, id: QueueEntryId) {
        let mut buckets = self.buckets.lock().await;
        if let Some(bucket) = buckets.get_mut(&(stake.0, kind)) {
            bucket.processing.retain(|&x| x != id);
            bucket.processing_ts.retain(|&(_, x)| x != id);
        }
    }

    async fn requeue_front(&self, stake: Money, kind: GameKind, id: QueueEntryId) {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry((stake.0, kind)).or_default();
        bucket.processing.retain(|&x| x != id);
        bucket.processing_ts.retain(|&(_, x)| x != id);
        bucket.queue.push_back(id);
    }

    async fn remove_from_queue(&self, stake: Money, kind: GameKind, id: QueueEntryId) {
        let mut buckets = self.buckets.lock().await;
        if let Some(bucket) = buckets.get_mut(&(stake.0, kind)) {
            bucket.queue.retain(|&x| x != id);
        }
    }

    async fn recover_stuck(&self, older_than: DateTime<Utc>) -> Vec<(Money, GameKind, QueueEntryId)> {
        let mut buckets = self.buckets.lock().await;
        let mut recovered = Vec::new();
        for (&(stake, kind), bucket) in buckets.iter_mut() {
            let stuck: Vec<QueueEntryId> = bucket
                .processing_ts
                .iter()
                .filter(|&&(ts, _)| ts <= older_than)
                .map(|&(_, id)| id)
                .collect();
            for id in stuck {
                bucket.processing.retain(|&x| x != id);
                bucket.processing_ts.retain(|&(_, x)| x != id);
                bucket.queue.push_back(id);
                recovered.push((Money(stake), kind, id));
            }
        }
        recovered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MATATU: GameKind = GameKind::Matatu;

    #[tokio::test]
    async fn first_arrival_enqueues_second_arrival_matches() {
        let coord = LocalCoordinationStore::new();
        let stake = Money(1000);

        let outcome = coord.claim_or_enqueue(stake, MATATU, QueueEntryId(1)).await;
        assert_eq!(outcome, ClaimOutcome::NoMatch);

        let outcome = coord.claim_or_enqueue(stake, MATATU, QueueEntryId(2)).await;
        assert_eq!(outcome, ClaimOutcome::Matched(QueueEntryId(1)));
    }

    #[tokio::test]
    async fn requeue_front_restores_priority_over_a_fresh_arrival() {
        let coord = LocalCoordinationStore::new();
        let stake = Money(1000);

        coord.claim_or_enqueue(stake, MATATU, QueueEntryId(1)).await;
        let outcome = coord.claim_or_enqueue(stake, MATATU, QueueEntryId(2)).await;
        assert_eq!(outcome, ClaimOutcome::Matched(QueueEntryId(1)));

        // the DB claim lost the race; roll id 1 back to the front.
        coord.requeue_front(stake, MATATU, QueueEntryId(1)).await;

        let outcome = coord.claim_or_enqueue(stake, MATATU, QueueEntryId(3)).await;
        assert_eq!(outcome, ClaimOutcome::Matched(QueueEntryId(1)));
    }

    #[tokio::test]
    async fn recover_stuck_moves_processing_entries_back_to_the_queue() {
        let coord = LocalCoordinationStore::new();
        let stake = Money(1000);

        coord.claim_or_enqueue(stake, MATATU, QueueEntryId(1)).await;
        coord.claim_or_enqueue(stake, MATATU, QueueEntryId(2)).await;

        let recovered = coord.recover_stuck(Utc::now() + chrono::Duration::seconds(1)).await;
        assert_eq!(recovered, vec![(stake, MATATU, QueueEntryId(1))]);

        // id 1 is back in the queue and matchable again.
        let outcome = coord.claim_or_enqueue(stake, MATATU, QueueEntryId(3)).await;
        assert_eq!(outcome, ClaimOutcome::Matched(QueueEntryId(1)));
    }

    #[tokio::test]
    async fn remove_from_queue_drops_an_expired_entry() {
        let coord = LocalCoordinationStore::new();
        let stake = Money(1000);
        coord.claim_or_enqueue(stake, MATATU, QueueEntryId(1)).await;
        coord.remove_from_queue(stake, MATATU, QueueEntryId(1)).await;

        let outcome = coord.claim_or_enqueue(stake, MATATU, QueueEntryId(2)).await;
        assert_eq!(outcome, ClaimOutcome::NoMatch);
    }

    #[tokio::test]
    async fn different_kinds_at_the_same_stake_never_match() {
        let coord = LocalCoordinationStore::new();
        let stake = Money(1000);

        let outcome = coord.claim_or_enqueue(stake, MATATU, QueueEntryId(1)).await;
        assert_eq!(outcome, ClaimOutcome::NoMatch);

        let outcome = coord.claim_or_enqueue(stake, GameKind::Pool, QueueEntryId(2)).await;
        assert_eq!(outcome, ClaimOutcome::NoMatch);
    }
}
