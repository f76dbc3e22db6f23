//! Payment-provider abstraction and the exactly-once settlement routines
//! described in spec.md §4.2: stake initiation, webhook ingestion, the
//! payment poller and withdrawals all funnel into `on_success`/
//! `on_failure`, gated on a `pending`-only status read so a retried
//! webhook or a racing poller tick is a safe no-op.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use duelstake_coord::CoordinationStore;
use duelstake_core::prelude::*;
use duelstake_ledger::{Ledger, LedgerError};
use duelstake_matchmaker::{Matchmaker, MatchmakerError};
use duelstake_store::{Store, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("payment not found")]
    NotFound,

    #[error("payment provider error: {0}")]
    Provider(String),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("matchmaker error: {0}")]
    Matchmaker(#[from] MatchmakerError),
}

impl From<PaymentError> for CoreError {
    fn from(e: PaymentError) -> Self {
        match e {
            PaymentError::NotFound => CoreError::Precondition(e.to_string()),
            PaymentError::Provider(m) => CoreError::Infrastructure(m),
            PaymentError::Ledger(inner) => inner.into(),
            PaymentError::Storage(inner) => inner.into(),
            PaymentError::Matchmaker(inner) => inner.into(),
        }
    }
}

pub type PaymentResult<T> = Result<T, PaymentError>;

/// Conclusion a provider reaches about a previously-initiated transfer,
/// whether delivered by webhook or by the poller's direct status check
/// (spec.md §4.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProviderOutcome {
    Successful,
    Pending,
    Failed { code: String, message: String },
}

/// A mobile-money rail capable of collecting (payin) and disbursing
/// (payout) funds against a phone number, and of reporting on the
/// current state of a prior request.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Request an inbound collection from `phone`, idempotent on
    /// `payment_id` so a retried stake-initiation call never
    /// double-charges the player.
    ///
    /// # Arguments
    /// * `payment_id` - the internal payment id, forwarded as the provider's idempotency key.
    /// * `phone` - the payer's mobile money number.
    /// * `amount` - amount to collect, in minor units.
    ///
    /// # Returns
    /// * `Ok(provider_transaction_id)` once the provider has accepted the request.
    /// * [`PaymentError::Provider`] if the provider rejects the request outright.
    async fn initiate_payin(&self, payment_id: PaymentId, phone: &str, amount: Money) -> PaymentResult<String>;

    /// Request an outbound disbursement to `phone`, idempotent on
    /// `payment_id`.
    ///
    /// # Arguments
    /// * `payment_id` - the internal payment id, forwarded as the provider's idempotency key.
    /// * `phone` - the payee's mobile money number.
    /// * `amount` - amount to disburse, in minor units.
    ///
    /// # Returns
    /// * `Ok(provider_transaction_id)` once the provider has accepted the request.
    /// * [`PaymentError::Provider`] if the provider rejects the request outright.
    async fn initiate_payout(&self, payment_id: PaymentId, phone: &str, amount: Money) -> PaymentResult<String>;

    /// Poll the provider for the current state of a previously-initiated
    /// transfer. Used by the payment poller ticker (spec.md §4.2 step 3)
    /// to reach the same conclusion a webhook would have delivered.
    ///
    /// # Returns
    /// * [`PaymentError::Provider`] if `provider_transaction_id` is unknown to the provider.
    async fn check_status(&self, provider_transaction_id: &str) -> PaymentResult<ProviderOutcome>;
}

/// Deterministic in-process provider for tests and local development.
/// Every call succeeds immediately; `check_status` always reports
/// `Successful` for an id it minted. Mirrors the teacher's `MockTransport`
/// pattern of a `Default`-constructed fake with internally tracked state.
#[derive(Default)]
pub struct MockProvider {
    next_id: AtomicI64,
    ledger_of_record: Mutex<Vec<(String, Money)>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// What this mock has been asked to move, in call order. Exposed for
    /// assertions in integration tests.
    pub async fn movements(&self) -> Vec<(String, Money)> {
        self.ledger_of_record.lock().await.clone()
    }

    fn mint_id(&self, prefix: &str) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        format!("{prefix}-{n}")
    }
}

#[async_trait]
impl PaymentProvider for MockProvider {
    async fn initiate_payin(&self, payment_id: PaymentId, _phone: &str, amount: Money) -> PaymentResult<String> {
        let id = self.mint_id(&format!("payin-{}", payment_id.0));
        self.ledger_of_record.lock().await.push((id.clone(), amount));
        Ok(id)
    }

    async fn initiate_payout(&self, payment_id: PaymentId, _phone: &str, amount: Money) -> PaymentResult<String> {
        let id = self.mint_id(&format!("payout-{}", payment_id.0));
        self.ledger_of_record.lock().await.push((id.clone(), amount));
        Ok(id)
    }

    async fn check_status(&self, provider_transaction_id: &str) -> PaymentResult<ProviderOutcome> {
        let seen = self
            .ledger_of_record
            .lock()
            .await
            .iter()
            .any(|(id, _)| id == provider_transaction_id);
        if seen {
            Ok(ProviderOutcome::Successful)
        } else {
            Err(PaymentError::Provider(format!("unknown provider id {provider_transaction_id}")))
        }
    }
}

/// Gross-to-net payment processing over a `Store`/`Ledger` pair: stake
/// initiation, webhook ingestion, and the two idempotent terminal
/// routines spec.md §4.2 names `on_success`/`on_failure`.
#[derive(Clone)]
pub struct PaymentService<P: PaymentProvider, C: CoordinationStore> {
    store: Store,
    ledger: Ledger,
    provider: Arc<P>,
    commission_pct: u32,
    matchmaker: Arc<Matchmaker<C>>,
    queue_ttl: Duration,
}

impl<P: PaymentProvider, C: CoordinationStore> PaymentService<P, C> {
    pub fn new(
        store: Store,
        ledger: Ledger,
        provider: Arc<P>,
        commission_pct: u32,
        matchmaker: Arc<Matchmaker<C>>,
        queue_ttl: Duration,
    ) -> Self {
        Self { store, ledger, provider, commission_pct, matchmaker, queue_ttl }
    }

    /// spec.md §4.2 step 1: creates a `PENDING` payment, calls the
    /// provider's idempotent payin, attaches the provider id, and
    /// returns. Does not wait for settlement.
    pub async fn initiate_stake(
        &self,
        player_id: PlayerId,
        phone: &str,
        amount: Money,
        game_kind: GameKind,
    ) -> PaymentResult<PaymentTransaction> {
        let payment = self.store.create_pending_payment(player_id, PaymentType::Stake, amount, game_kind).await?;
        let provider_id = self.provider.initiate_payin(payment.id, phone, amount).await?;
        self.store.attach_provider_id(payment.id, &provider_id).await?;
        info!(payment_id = payment.id.0, provider_id = %provider_id, "stake payin initiated");
        self.store.get_payment(payment.id).await.map_err(PaymentError::from)
    }

    /// spec.md §4.2 "Withdrawals are symmetrical": reserves
    /// `player_winnings -> settlement` in the same DB transaction that
    /// inserts the withdraw row, then calls the provider's payout.
    pub async fn initiate_withdrawal(
        &self,
        player_id: PlayerId,
        phone: &str,
        amount: Money,
        fee: Money,
    ) -> PaymentResult<WithdrawRequest> {
        let net_amount = amount - fee;
        let winnings = self.ledger.get_or_create_account(AccountType::PlayerWinnings, Some(player_id)).await?;
        let settlement = self.ledger.get_or_create_account(AccountType::Settlement, None).await?;

        let request = self
            .store
            .create_withdraw_request(player_id, amount, fee, net_amount, "momo", phone)
            .await?;
        self.ledger
            .transfer(
                winnings.id,
                settlement.id,
                amount,
                ReferenceType::Withdrawal,
                request.id.0,
                "withdrawal reserved pending payout",
            )
            .await?;

        match self.provider.initiate_payout(PaymentId(request.id.0), phone, net_amount).await {
            Ok(provider_id) => {
                self.store.attach_withdraw_provider_id(request.id, &provider_id).await?;
                self.store.get_withdraw_request(request.id).await.map_err(PaymentError::from)
            }
            Err(e) => {
                warn!(withdraw_id = request.id.0, error = %e, "payout initiation failed, refunding reserve");
                self.ledger
                    .transfer(
                        settlement.id,
                        winnings.id,
                        amount,
                        ReferenceType::Withdrawal,
                        request.id.0,
                        "withdrawal reserve refunded after payout failure",
                    )
                    .await?;
                self.store
                    .finalize_withdraw_request(request.id, PaymentStatus::Failed, None, Some(&e.to_string()))
                    .await?;
                Err(e)
            }
        }
    }

    /// spec.md §4.2 `on_success`: guarded by a status read; if already
    /// terminal, returns `false`. Otherwise credits `settlement` with
    /// gross, splits commission to `platform`, and credits the player's
    /// `player_winnings` with the net, then flips the payment to
    /// `COMPLETED`. All postings precede the flip, so a crash between
    /// them leaves the payment `pending` and safely retryable. A
    /// completed stake payment is then enqueued into matchmaking
    /// (spec.md §4.2 "Then enqueue a durable `QueueEntry`").
    pub async fn on_success(&self, payment_id: PaymentId) -> PaymentResult<bool> {
        let payment = self.store.get_payment(payment_id).await?;
        if payment.status.is_terminal() {
            return Ok(false);
        }

        let settlement = self.ledger.get_or_create_account(AccountType::Settlement, None).await?;
        self.store
            .credit_account(settlement.id, payment.amount, ReferenceType::Payment, payment_id.0, "gross payin")
            .await?;

        let platform = self.ledger.get_or_create_account(AccountType::Platform, None).await?;
        let commission = payment.amount.percent(self.commission_pct);
        if commission != Money::ZERO {
            self.ledger
                .transfer(settlement.id, platform.id, commission, ReferenceType::Payment, payment_id.0, "commission")
                .await?;
        }

        let net = payment.amount - commission;
        if net != Money::ZERO {
            let winnings = self.ledger.get_or_create_account(AccountType::PlayerWinnings, Some(payment.player_id)).await?;
            self.ledger
                .transfer(settlement.id, winnings.id, net, ReferenceType::Payment, payment_id.0, "net stake credited")
                .await?;
        }

        let flipped = self
            .store
            .finalize_payment(payment_id, PaymentStatus::Completed, Some("00"), Some("success"))
            .await?;
        info!(payment_id = payment_id.0, "payment completed");

        if flipped && payment.payment_type == PaymentType::Stake {
            let player = self.store.get_player(payment.player_id).await?;
            let entry = self
                .matchmaker
                .enqueue(payment.player_id, &player.phone, payment.amount, Some(payment_id), self.queue_ttl, payment.game_kind)
                .await?;
            info!(payment_id = payment_id.0, queue_entry_id = entry.id.0, "stake enqueued for matchmaking");
        }

        Ok(flipped)
    }

    /// spec.md §4.2 `on_failure`: guarded by a status read; flips
    /// `PENDING -> FAILED` atomically with the provider status fields. No
    /// ledger postings exist for a payment that never completed, so there
    /// is nothing to unwind.
    pub async fn on_failure(&self, payment_id: PaymentId, code: &str, message: &str) -> PaymentResult<bool> {
        let payment = self.store.get_payment(payment_id).await?;
        if payment.status.is_terminal() {
            return Ok(false);
        }
        let flipped = self.store.finalize_payment(payment_id, PaymentStatus::Failed, Some(code), Some(message)).await?;
        warn!(payment_id = payment_id.0, code, message, "payment failed");
        Ok(flipped)
    }

    /// Looks up the player a provider transaction id belongs to, so a
    /// caller that just ran `handle_webhook` can find the `QueueEntry`
    /// `on_success` enqueued for them. `None` for an id with no matching
    /// payment (mirrors `handle_webhook`'s own tolerant handling of that case).
    pub async fn player_for_webhook(&self, provider_transaction_id: &str) -> PaymentResult<Option<PlayerId>> {
        match self.store.get_payment_by_provider_id(provider_transaction_id).await {
            Ok(p) => Ok(Some(p.player_id)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// spec.md §4.2 step 2: persists the raw webhook envelope, locates
    /// the payment by provider id, and resolves it via `on_success`/
    /// `on_failure`. A webhook for an id with no matching payment is
    /// kept for audit but otherwise ignored.
    pub async fn handle_webhook(
        &self,
        provider_transaction_id: &str,
        outcome: ProviderOutcome,
        raw_payload: &str,
    ) -> PaymentResult<()> {
        self.store.record_webhook(Some(provider_transaction_id), raw_payload).await?;
        let payment = match self.store.get_payment_by_provider_id(provider_transaction_id).await {
            Ok(p) => p,
            Err(StoreError::NotFound) => {
                warn!(provider_id = provider_transaction_id, "webhook for unknown payment, envelope retained");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        match outcome {
            ProviderOutcome::Successful => {
                self.on_success(payment.id).await?;
            }
            ProviderOutcome::Failed { code, message } => {
                self.on_failure(payment.id, &code, &message).await?;
            }
            ProviderOutcome::Pending => {}
        }
        Ok(())
    }

    /// spec.md §4.2 step 3: polls every `PENDING` payment older than the
    /// ticker's threshold and resolves it against the provider's current
    /// view.
    pub async fn poll_pending(&self, older_than: chrono::DateTime<chrono::Utc>) -> PaymentResult<usize> {
        let pending = self.store.list_pending_payments(older_than).await?;
        let mut resolved = 0;
        for payment in pending {
            let Some(provider_id) = payment.provider_transaction_id.as_deref() else {
                continue;
            };
            match self.provider.check_status(provider_id).await {
                Ok(ProviderOutcome::Successful) => {
                    self.on_success(payment.id).await?;
                    resolved += 1;
                }
                Ok(ProviderOutcome::Failed { code, message }) => {
                    self.on_failure(payment.id, &code, &message).await?;
                    resolved += 1;
                }
                Ok(ProviderOutcome::Pending) => {}
                Err(e) => warn!(payment_id = payment.id.0, error = %e, "poller status check failed"),
            }
        }
        Ok(resolved)
    }

    /// Resolve a withdrawal the same way a stake resolves: on success,
    /// `settlement` has already absorbed the reserve, so only the
    /// terminal flip remains; on failure, refund `settlement ->
    /// player_winnings`.
    pub async fn resolve_withdrawal(&self, withdraw_id: WithdrawId, outcome: ProviderOutcome) -> PaymentResult<bool> {
        let request = self.store.get_withdraw_request(withdraw_id).await?;
        if request.status.is_terminal() {
            return Ok(false);
        }
        match outcome {
            ProviderOutcome::Successful => {
                let settlement = self.ledger.get_or_create_account(AccountType::Settlement, None).await?;
                self.store
                    .debit_account(settlement.id, request.net_amount, ReferenceType::Withdrawal, withdraw_id.0, "payout debited")
                    .await?;
                Ok(self.store.finalize_withdraw_request(withdraw_id, PaymentStatus::Completed, None, None).await?)
            }
            ProviderOutcome::Failed { message, .. } => {
                let settlement = self.ledger.get_or_create_account(AccountType::Settlement, None).await?;
                let winnings = self.ledger.get_or_create_account(AccountType::PlayerWinnings, Some(request.player_id)).await?;
                self.ledger
                    .transfer(
                        settlement.id,
                        winnings.id,
                        request.amount,
                        ReferenceType::Withdrawal,
                        withdraw_id.0,
                        "withdrawal reserve refunded after payout failure",
                    )
                    .await?;
                Ok(self
                    .store
                    .finalize_withdraw_request(withdraw_id, PaymentStatus::Failed, None, Some(&message))
                    .await?)
            }
            ProviderOutcome::Pending => Ok(false),
        }
    }
}
