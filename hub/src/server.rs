//! jsonrpsee wiring for the hub: `connect`/`submit_move` unary calls,
//! `subscribe_updates` pub/sub, and the `payment_webhook` entry point
//! that drives a completed stake from `PaymentService::on_success`
//! through `Matchmaker::claim_or_create` into a live `Hub` session.
//! Grounded in the teacher's `transactor::server` (CORS layer,
//! `ServerBuilder`, subscription piped from a `broadcast::Receiver`).

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::anyhow;
use duelstake_coord::CoordinationStore;
use duelstake_matchmaker::{MatchOutcome, Matchmaker};
use duelstake_payments::{PaymentProvider, PaymentService, ProviderOutcome};
use hyper::Method;
use jsonrpsee::core::error::Error as RpcError;
use jsonrpsee::core::error::SubscriptionClosed;
use jsonrpsee::server::AllowHosts;
use jsonrpsee::types::error::CallError;
use jsonrpsee::types::SubscriptionEmptyError;
use jsonrpsee::SubscriptionSink;
use jsonrpsee::{server::ServerBuilder, types::Params, RpcModule};
use serde_json::Value;
use tokio_stream::wrappers::BroadcastStream;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::{ClientMessage, ErrorMessage, Hub};

/// RPC context: the live-session registry plus the payments/matchmaking
/// handles the webhook route needs to carry a completed stake all the
/// way into a spawned session. One instance per `run_server` call.
pub struct HubContext<P: PaymentProvider, C: CoordinationStore> {
    pub hub: Hub,
    pub payments: Arc<PaymentService<P, C>>,
    pub matchmaker: Arc<Matchmaker<C>>,
}

fn call_failed(e: impl std::fmt::Display) -> RpcError {
    RpcError::Call(CallError::Failed(anyhow!("{e}").into()))
}

async fn connect<P: PaymentProvider, C: CoordinationStore>(
    params: Params<'_>,
    ctx: Arc<HubContext<P, C>>,
) -> Result<Value, RpcError> {
    let (game_token, player_token): (String, String) = params.parse()?;
    ctx.hub.connect(&game_token, &player_token).await.map_err(call_failed)
}

async fn submit_move<P: PaymentProvider, C: CoordinationStore>(
    params: Params<'_>,
    ctx: Arc<HubContext<P, C>>,
) -> Result<Value, RpcError> {
    let (game_token, player_token, message): (String, String, ClientMessage) = params.parse()?;
    match ctx.hub.handle_message(&game_token, &player_token, message).await {
        Ok(()) => Ok(serde_json::json!({"ok": true})),
        Err(e) => Ok(serde_json::to_value(ErrorMessage::from_hub_error(&e)).expect("serializable")),
    }
}

fn subscribe_updates<P: PaymentProvider, C: CoordinationStore>(
    params: Params<'_>,
    mut sink: SubscriptionSink,
    ctx: Arc<HubContext<P, C>>,
) -> Result<(), SubscriptionEmptyError> {
    let (game_token,): (String,) = params.parse().or(Err(SubscriptionEmptyError))?;

    tokio::spawn(async move {
        let rx = match ctx.hub.subscribe(&game_token).await {
            Ok(rx) => rx,
            Err(e) => {
                let _ = sink.close(call_failed(e));
                return;
            }
        };

        info!(game_token, "subscribed to session updates");
        let stream = BroadcastStream::new(rx);
        match sink.pipe_from_try_stream(stream).await {
            SubscriptionClosed::Success => {
                info!("subscription closed normally");
                sink.close(SubscriptionClosed::Success);
            }
            SubscriptionClosed::RemotePeerAborted => {
                warn!("remote peer aborted the subscription");
            }
            SubscriptionClosed::Failed(err) => {
                warn!(?err, "subscription closed with an error");
                sink.close(err);
            }
        }
    });
    Ok(())
}

/// spec.md §4.2 step 2 plus §4.3's "the CORE": a provider webhook
/// resolves a payment via `PaymentService::handle_webhook` (which, for
/// a completed stake, enqueues a durable `QueueEntry`), then this
/// handler re-fetches that player's active entry and drives it through
/// `Matchmaker::claim_or_create`. A match spawns a live session via
/// `Hub::spawn_session`; no match just leaves the entry queued for the
/// next arrival to claim.
async fn payment_webhook<P: PaymentProvider, C: CoordinationStore>(
    params: Params<'_>,
    ctx: Arc<HubContext<P, C>>,
) -> Result<Value, RpcError> {
    let (provider_transaction_id, outcome, raw_payload): (String, ProviderOutcome, String) = params.parse()?;

    ctx.payments
        .handle_webhook(&provider_transaction_id, outcome, &raw_payload)
        .await
        .map_err(call_failed)?;

    let player_id = ctx.payments.player_for_webhook(&provider_transaction_id).await.map_err(call_failed)?;
    let Some(player_id) = player_id else {
        return Ok(serde_json::json!({"ok": true}));
    };
    let Some(entry) = ctx.matchmaker.find_active_entry(player_id).await.map_err(call_failed)? else {
        return Ok(serde_json::json!({"ok": true}));
    };

    match ctx.matchmaker.claim_or_create(entry).await.map_err(call_failed)? {
        MatchOutcome::Matched { session, opponent, arriving } => {
            let seed = rand::random();
            let engine = duelstake_game::new_engine(session.kind, session.player1_id, session.player2_id, seed);
            info!(session_id = session.id.0, player1 = opponent.player_id.0, player2 = arriving.player_id.0, "webhook matched a session");
            ctx.hub.spawn_session(session, engine).await;
        }
        MatchOutcome::Enqueued(_) => {}
    }

    Ok(serde_json::json!({"ok": true}))
}

/// Starts the jsonrpsee server; `host` is `host:port`, e.g. the value
/// built from `Config::hub_port`.
pub async fn run_server<P: PaymentProvider + 'static, C: CoordinationStore + 'static>(
    ctx: HubContext<P, C>,
    host: &str,
) -> anyhow::Result<()> {
    let cors = CorsLayer::new()
        .allow_methods([Method::POST, Method::GET])
        .allow_origin(Any)
        .allow_headers([hyper::header::CONTENT_TYPE]);
    let middleware = ServiceBuilder::new().layer(cors);

    let server = ServerBuilder::default()
        .set_host_filtering(AllowHosts::Any)
        .set_middleware(middleware)
        .max_request_body_size(1_000_000)
        .build(host.parse::<SocketAddr>()?)
        .await?;

    let mut module = RpcModule::new(ctx);
    module.register_async_method("connect", connect)?;
    module.register_async_method("submit_move", submit_move)?;
    module.register_async_method("payment_webhook", payment_webhook)?;
    module.register_subscription("subscribe_updates", "s_update", "unsubscribe_updates", subscribe_updates)?;

    let handle = server.start(module)?;
    info!(host, "hub server started");
    handle.stopped().await;
    Ok(())
}
