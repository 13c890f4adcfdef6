//! Dealer-gamma engine service
//!
//! Wires the shared session state, the ingest supervisor, the engine task
//! and the snapshot task, then runs until interrupted. Shutdown drains in
//! order: ingest stops, the trade channel closes, the engine finishes its
//! backlog, and the snapshotter emits one final row before sinks flush.

use anyhow::{Context, Result, bail};
use gamma_engine::{EngineConfig, EngineContext, chain, engine, ingest};
use storage::WalGammaStore;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("gamma_engine=info,storage=info,info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = EngineConfig::from_env();
    info!("dealer-gamma engine starting (live={})", config.live);

    if config.live && config.api_key.is_empty() {
        bail!("GAMMA_API_KEY is required in live mode");
    }

    // Seed the symbol universe and fallback spot from the latest chain
    // snapshot. In live mode a missing snapshot is unrecoverable.
    let symbols = match &config.snapshot_path {
        Some(path) => match chain::load_chain(path) {
            Ok(snapshot) => Some(snapshot),
            Err(err) if config.live => {
                return Err(err).context("chain snapshot required in live mode");
            }
            Err(err) => {
                warn!("chain snapshot unavailable ({err}), starting unseeded");
                None
            }
        },
        None if config.live => bail!("GAMMA_SNAPSHOT_PATH is required in live mode"),
        None => None,
    };

    let sink = WalGammaStore::open(&config.data_dir)
        .with_context(|| format!("opening gamma store at {}", config.data_dir.display()))?;

    let ctx = EngineContext::new(config);
    let universe = match symbols {
        Some(snapshot) => {
            if snapshot.under_px > 0.0 {
                ctx.set_seed_spot(snapshot.under_px);
            }
            snapshot.symbols
        }
        None => Vec::new(),
    };

    // Channels live inside the supervisor scope, never in global state.
    let (trade_tx, trade_rx) = mpsc::channel(ctx.config.channel_capacity.max(1));
    let (stream_shutdown_tx, stream_shutdown_rx) = watch::channel(false);
    let (snap_shutdown_tx, snap_shutdown_rx) = watch::channel(false);

    let ingest_task = tokio::spawn(ingest::run_supervisor(
        ctx.clone(),
        universe,
        trade_tx,
        stream_shutdown_rx,
    ));
    let engine_task = tokio::spawn(engine::run_engine(ctx.clone(), trade_rx));
    let snapshot_task = tokio::spawn(engine::run_snapshotter(
        ctx.clone(),
        Box::new(sink),
        snap_shutdown_rx,
    ));

    tokio::signal::ctrl_c()
        .await
        .context("listening for shutdown signal")?;
    info!("shutdown signal received");

    let phase_budget = ctx.config.shutdown_phase_timeout();

    // Phase 1: stop the ingest side; dropping its sender closes the channel
    let _ = stream_shutdown_tx.send(true);
    join_phase("ingest", ingest_task, phase_budget).await;

    // Phase 2: the engine drains whatever is left on the channel
    join_phase("engine", engine_task, phase_budget).await;

    // Phase 3: final snapshot and sink flush
    let _ = snap_shutdown_tx.send(true);
    join_phase("snapshot", snapshot_task, phase_budget).await;

    info!("session: {}", ctx.metrics.summary());
    info!("clean shutdown");
    Ok(())
}

async fn join_phase(name: &str, task: JoinHandle<()>, budget: std::time::Duration) {
    match timeout(budget, task).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!("{name} task panicked: {err}"),
        Err(_) => warn!("{name} task did not stop within {budget:?}, abandoning"),
    }
}
