//! Background expiry and recovery tickers (spec.md §4.6): each one
//! runs a `tokio::time::interval` loop guarded by a shared
//! `CancellationToken`, grounded in the watch-loop-plus-cancellation
//! pattern used for periodic reconciliation elsewhere in the corpus.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration as ChronoDuration, Utc};
use duelstake_coord::CoordinationStore;
use duelstake_hub::Hub;
use duelstake_ledger::Ledger;
use duelstake_matchmaker::Matchmaker;
use duelstake_payments::{PaymentProvider, PaymentService};
use duelstake_store::Store;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Intervals for each ticker, read from configuration (spec.md §4.6).
#[derive(Debug, Clone, Copy)]
pub struct TickerIntervals {
    pub payment_poll: StdDuration,
    pub payment_poll_staleness: ChronoDuration,
    pub queue_expiry: StdDuration,
    pub visibility: StdDuration,
    pub visibility_threshold: ChronoDuration,
    pub session_expiry: StdDuration,
    pub disconnect_forfeit: StdDuration,
}

impl Default for TickerIntervals {
    fn default() -> Self {
        Self {
            payment_poll: StdDuration::from_secs(60),
            payment_poll_staleness: ChronoDuration::seconds(30),
            queue_expiry: StdDuration::from_secs(60),
            visibility: StdDuration::from_secs(15),
            visibility_threshold: ChronoDuration::seconds(30),
            session_expiry: StdDuration::from_secs(30),
            disconnect_forfeit: StdDuration::from_secs(10),
        }
    }
}

async fn run_loop<F, Fut>(name: &'static str, period: StdDuration, shutdown: CancellationToken, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = tick().await {
                    error!(ticker = name, error = %e, "ticker iteration failed");
                }
            }
            _ = shutdown.cancelled() => {
                info!(ticker = name, "ticker shutting down");
                break;
            }
        }
    }
}

/// spec.md §4.6 "payment status poller": scan `PENDING` payments,
/// call provider status, funnel through `on_success`/`on_failure`.
pub fn spawn_payment_poller<P: PaymentProvider + 'static, C: CoordinationStore + 'static>(
    service: Arc<PaymentService<P, C>>,
    intervals: TickerIntervals,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        run_loop("payment_poller", intervals.payment_poll, shutdown, || async {
            let older_than = Utc::now() - intervals.payment_poll_staleness;
            let resolved = service.poll_pending(older_than).await?;
            if resolved > 0 {
                info!(count = resolved, "payment poller resolved pending payments");
            }
            Ok(())
        })
        .await;
    })
}

/// spec.md §4.6 "queue expiry" + "processing visibility", run as two
/// independent loops sharing one `Matchmaker`.
pub fn spawn_queue_expiry<C: CoordinationStore + 'static>(
    matchmaker: Arc<Matchmaker<C>>,
    intervals: TickerIntervals,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        run_loop("queue_expiry", intervals.queue_expiry, shutdown, || async {
            let expired = matchmaker.expire_stale(Utc::now()).await?;
            if !expired.is_empty() {
                info!(count = expired.len(), "queue expiry removed stale entries");
            }
            Ok(())
        })
        .await;
    })
}

pub fn spawn_visibility_recovery<C: CoordinationStore + 'static>(
    matchmaker: Arc<Matchmaker<C>>,
    intervals: TickerIntervals,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        run_loop("visibility_recovery", intervals.visibility, shutdown, || async {
            let recovered = matchmaker.recover_visibility(Utc::now() - intervals.visibility_threshold).await?;
            if recovered > 0 {
                info!(recovered, "visibility recovery requeued stuck claims");
            }
            Ok(())
        })
        .await;
    })
}

/// spec.md §4.6 "session expiry": cancel `AwaitingPlayers` sessions
/// past their deadline and refund.
pub fn spawn_session_expiry(
    store: Store,
    ledger: Ledger,
    intervals: TickerIntervals,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        run_loop("session_expiry", intervals.session_expiry, shutdown, || async {
            let cancelled = duelstake_game::cancel_expired_awaiting(&store, &ledger, Utc::now()).await?;
            if !cancelled.is_empty() {
                info!(count = cancelled.len(), "session expiry cancelled and refunded sessions");
            }
            Ok(())
        })
        .await;
    })
}

/// spec.md §4.6 "disconnect forfeit": sweep every `InProgress`
/// session's hub runtime for a disconnect past the grace period.
pub fn spawn_disconnect_forfeit(hub: Hub, intervals: TickerIntervals, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        run_loop("disconnect_forfeit", intervals.disconnect_forfeit, shutdown, || async {
            let forfeited = hub.tick_disconnect_forfeits(Utc::now()).await?;
            hub.retire_completed().await;
            if forfeited > 0 {
                info!(forfeited, "disconnect forfeit ticker settled stale sessions");
            }
            Ok(())
        })
        .await;
    })
}
