use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use renderbox::api::{build_router, state::AppState};
use renderbox::archive::HttpFetcher;
use renderbox::batch::BatchStore;
use renderbox::browser::{BrowserPool, BrowserSettings};
use renderbox::config::{Config, QueueBackend};
use renderbox::observability::Metrics;
use renderbox::queue::{DirQueue, FjallJobQueue, JobQueue};
use renderbox::render::RenderExecutor;
use renderbox::storage::ArtifactPublisher;
use renderbox::usage::UsageLedger;
use renderbox::worker::{RenderPipeline, WorkerPool, WorkerSettings};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub async fn run(address: Option<SocketAddr>) -> Result<(), AnyError> {
    info!("Loading configuration");
    let config = Arc::new(Config::load().map_err(|e| format!("Failed to load config: {}", e))?);
    let bind_addr = address.unwrap_or(config.server.bind_addr);

    std::fs::create_dir_all(&config.server.data_path)?;

    let queue: Arc<dyn JobQueue> = match config.queue.backend {
        QueueBackend::Fjall => Arc::new(
            FjallJobQueue::open(
                config.server.data_path.join("queue"),
                config.queue.max_attempts,
            )
            .map_err(|e| format!("Failed to open queue: {}", e))?,
        ),
        QueueBackend::Dir => Arc::new(
            DirQueue::open(config.queue.dir_path.clone(), config.queue.max_attempts)
                .await
                .map_err(|e| format!("Failed to open queue: {}", e))?,
        ),
    };

    let batches = Arc::new(
        BatchStore::open(config.server.data_path.join("batches"))
            .map_err(|e| format!("Failed to open batch store: {}", e))?,
    );
    let usage = Arc::new(
        UsageLedger::open(config.server.data_path.join("usage"))
            .map_err(|e| format!("Failed to open usage ledger: {}", e))?,
    );

    let publisher = ArtifactPublisher::from_config(&config.storage)
        .map_err(|e| format!("Failed to build artifact publisher: {}", e))?;

    let browser = Arc::new(BrowserPool::new(BrowserSettings {
        executable: config.browser.executable.clone(),
    }));
    let executor = Arc::new(RenderExecutor::new(
        Arc::clone(&browser),
        config.worker.wait_timeout(),
    ));
    let processor = Arc::new(RenderPipeline::new(executor, publisher));

    let metrics = Arc::new(Metrics::new());
    let shutdown = CancellationToken::new();

    let pool = WorkerPool::new(
        Arc::clone(&queue),
        Arc::clone(&batches),
        Arc::clone(&usage),
        processor,
        Arc::clone(&metrics),
        WorkerSettings {
            concurrency: config.worker.concurrency,
            poll_interval: config.worker.poll_interval(),
            rate_limit: config.worker.rate_limit,
            rate_window: config.worker.rate_window(),
        },
    );
    let worker_handles = pool.spawn(shutdown.clone());

    spawn_pruner(
        Arc::clone(&queue),
        config.retention.job_ttl(),
        config.retention.prune_interval(),
        shutdown.clone(),
    );

    let state = AppState::new(
        Arc::clone(&config),
        queue,
        batches,
        usage,
        Arc::new(HttpFetcher::new(reqwest::Client::new())),
        Arc::clone(&browser),
        metrics,
    );
    let app = build_router(state);

    let listener = TcpListener::bind(bind_addr).await?;
    info!(address = %bind_addr, "Renderbox API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Draining workers");
    shutdown.cancel();
    for handle in worker_handles {
        if let Err(err) = handle.await {
            warn!(error = %err, "worker task panicked");
        }
    }
    browser.shutdown().await;

    Ok(())
}

fn spawn_pruner(
    queue: Arc<dyn JobQueue>,
    ttl: std::time::Duration,
    interval: std::time::Duration,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick fires immediately, skip it
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match queue.prune_expired(ttl).await {
                        Ok(0) => {}
                        Ok(removed) => info!(removed, "Retention pass pruned records"),
                        Err(err) => error!(error = %err, "retention pass failed"),
                    }
                }
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())
            .expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
