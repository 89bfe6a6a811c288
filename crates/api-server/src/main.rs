use std::net::SocketAddr;
use std::sync::Arc;

use api_server::http::{self, AppState};
use shared::chat_log_service::ChatLogService;
use shared::config::ApiConfig;
use shared::context_store::SessionContextStore;
use shared::evaluation::RiskEvaluationScheduler;
use shared::repos::{ChatLogStore, Store};
use shared::scoring::{
    HeuristicEvaluator, HttpHeuristicEvaluator, KeywordHeuristicEvaluator, SubprocessScorer,
};
use tokio::sync::watch;
use tracing::{error, info, warn};

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

#[tokio::main]
async fn main() {
    shared::load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "api_server=debug,shared=info,axum=info".to_string()),
        )
        .init();

    let config = match ApiConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("failed to read config: {err}");
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

    let migrator = match sqlx::migrate::Migrator::new(config.migrations_dir.clone()).await {
        Ok(migrator) => migrator,
        Err(err) => {
            error!("failed to load migrations: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = migrator.run(store.pool()).await {
        error!("failed to run migrations: {err}");
        std::process::exit(1);
    }

    let evaluator: Arc<dyn HeuristicEvaluator> = match config.heuristic_evaluator_url.as_deref() {
        Some(url) => match HttpHeuristicEvaluator::new(url, config.heuristic_evaluator_timeout()) {
            Ok(evaluator) => {
                info!("using http risk evaluator at {url}");
                Arc::new(evaluator)
            }
            Err(err) => {
                error!("failed to build risk evaluator: {err}");
                std::process::exit(1);
            }
        },
        None => {
            warn!("HEURISTIC_EVALUATOR_URL not set; using local keyword evaluator");
            Arc::new(KeywordHeuristicEvaluator)
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let contexts = SessionContextStore::new(config.context_ttl(), config.context_expiry_policy);
    let sweeper = contexts.spawn_sweeper(config.context_sweep_interval(), shutdown_rx.clone());

    let store: Arc<dyn ChatLogStore> = Arc::new(store);
    let scheduler = RiskEvaluationScheduler::new(
        Arc::clone(&store),
        Arc::new(SubprocessScorer::new(&config.risk_scorer)),
    );
    let app = http::build_router(AppState {
        store: Arc::clone(&store),
        chat_logs: Arc::new(ChatLogService::new(
            Arc::clone(&store),
            evaluator,
            contexts,
        )),
        scheduler: scheduler.clone(),
        shutdown: shutdown_rx.clone(),
    });

    let addr: SocketAddr = match config.bind_addr.parse() {
        Ok(addr) => addr,
        Err(err) => {
            warn!(
                "invalid API_BIND_ADDR '{}': {err}; falling back to {DEFAULT_BIND_ADDR}",
                config.bind_addr
            );
            match DEFAULT_BIND_ADDR.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    error!("invalid default bind address: {err}");
                    std::process::exit(1);
                }
            }
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind {addr}: {err}");
            std::process::exit(1);
        }
    };

    info!(
        "api server listening on {}",
        listener.local_addr().unwrap_or(addr)
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_shutdown_signal().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await;

    if let Err(err) = served {
        error!("server terminated with error: {err}");
    }

    if scheduler.is_running() {
        info!("waiting for the in-flight evaluation run to stop");
        scheduler.wait_idle().await;
    }

    if let Err(err) = sweeper.await {
        warn!("context sweeper did not stop cleanly: {err}");
    }
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
