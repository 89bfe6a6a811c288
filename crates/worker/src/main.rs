use std::sync::Arc;

use shared::config::WorkerConfig;
use shared::evaluation::RiskEvaluationScheduler;
use shared::repos::Store;
use shared::scoring::SubprocessScorer;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info};

mod evaluation_tick;

use evaluation_tick::run_evaluation_tick;

#[tokio::main]
async fn main() {
    shared::load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "worker=debug,shared=info".to_string()),
        )
        .init();

    let run_once = std::env::args().skip(1).any(|arg| arg == "--once");

    let config = match WorkerConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("failed to read worker config: {err}");
            std::process::exit(1);
        }
    };

    let store = match Store::connect(&config.database_url, config.database_max_connections).await {
        Ok(store) => store,
        Err(err) => {
            error!("failed to connect to postgres: {err}");
            std::process::exit(1);
        }
    };

    let scheduler = RiskEvaluationScheduler::new(
        Arc::new(store),
        Arc::new(SubprocessScorer::new(&config.risk_scorer)),
    );

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    if run_once {
        info!("worker running a single evaluation");
        run_evaluation_tick(&scheduler, &shutdown_rx).await;
        return;
    }

    info!(
        "worker starting (evaluation every {} minutes)",
        config.processing_interval_minutes
    );

    // The first tick fires immediately, which gives the startup run.
    let mut ticker = time::interval(config.processing_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let run_shutdown = shutdown_rx.clone();

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                run_evaluation_tick(&scheduler, &run_shutdown).await;
                if *run_shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("worker stopped");
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            error!("failed to install SIGTERM handler: {err}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
