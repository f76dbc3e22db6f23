//! Bootstraps the realtime hub and background tickers from a TOML
//! config file, mirroring `transactor::main`'s clap-driven `run`
//! subcommand over a `#[tokio::main]` entry point.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{arg, Command};
use duelstake_config::Config;
use duelstake_coord::LocalCoordinationStore;
use duelstake_hub::server::HubContext;
use duelstake_hub::Hub;
use duelstake_ledger::Ledger;
use duelstake_matchmaker::Matchmaker;
use duelstake_payments::{MockProvider, PaymentService};
use duelstake_store::Store;
use tokio_util::sync::CancellationToken;
use tracing::info;

fn cli() -> Command {
    Command::new("duelstake")
        .about("Matchmaking, payments and realtime game hub for staked two-player sessions.")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(Command::new("run").arg(arg!([config] "Path to the TOML config file")))
}

async fn run(path: &PathBuf) -> anyhow::Result<()> {
    let config = Config::from_path(path).await;

    let store = Store::try_new(&config.db_path)?;
    let ledger = Ledger::new(store.clone());
    let coord = Arc::new(LocalCoordinationStore::new());
    let matchmaker = Arc::new(Matchmaker::new(
        store.clone(),
        ledger.clone(),
        coord,
        config.game_expiry(),
    ));
    let payments = Arc::new(PaymentService::new(
        store.clone(),
        ledger.clone(),
        Arc::new(MockProvider::new()),
        config.commission_pct,
        matchmaker.clone(),
        config.queue_expiry(),
    ));
    let hub = Hub::new(
        store.clone(),
        ledger.clone(),
        config.commission_pct,
        config.payout_tax_percent,
        config.disconnect_grace(),
    );

    let shutdown = CancellationToken::new();
    let intervals = config.ticker_intervals();
    let mut tickers = vec![
        duelstake_tickers::spawn_payment_poller(payments.clone(), intervals, shutdown.clone()),
        duelstake_tickers::spawn_queue_expiry(matchmaker.clone(), intervals, shutdown.clone()),
        duelstake_tickers::spawn_visibility_recovery(matchmaker.clone(), intervals, shutdown.clone()),
        duelstake_tickers::spawn_session_expiry(store, ledger, intervals, shutdown.clone()),
        duelstake_tickers::spawn_disconnect_forfeit(hub.clone(), intervals, shutdown.clone()),
    ];

    info!(host = %config.hub_host, "starting duelstake hub");
    let ctx = HubContext { hub, payments, matchmaker };
    let server = duelstake_hub::server::run_server(ctx, &config.hub_host);
    tokio::select! {
        result = server => result?,
        _ = tokio::signal::ctrl_c() => info!("received ctrl-c, shutting down"),
    }

    shutdown.cancel();
    for ticker in tickers.drain(..) {
        let _ = ticker.await;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let matches = cli().get_matches();
    match matches.subcommand() {
        Some(("run", subcommand_matches)) => {
            let path = subcommand_matches.get_one::<PathBuf>("config");
            run(&path.cloned().unwrap_or_else(|| "config.toml".into())).await
        }
        _ => unreachable!(),
    }
}
