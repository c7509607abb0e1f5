mod intake;

use arbiter_engine::{DockerSandbox, EngineConfig, Judge, JudgePool};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if std::env::var("ARBITER_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_line_number(true)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    info!("Arbiter worker booting...");

    let mut config = EngineConfig::load_default().map_err(|e| {
        error!("Failed to load engine configuration: {:#}", e);
        error!("Set ARBITER_CONFIG or make sure config/arbiter.json exists");
        e
    })?;
    config.apply_env_overrides()?;
    info!(
        pool_size = config.pool_size,
        partial_factor = config.partial_factor,
        languages = ?config.list_languages(),
        "Engine configuration loaded"
    );

    let sandbox = DockerSandbox::connect()?;
    let judge = Arc::new(Judge::from_config(&config, Arc::new(sandbox))?);
    let pool = JudgePool::new(judge, config.pool_size);

    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let queue = std::env::var("ARBITER_QUEUE")
        .unwrap_or_else(|_| arbiter_common::redis::QUEUE_KEY.to_string());

    let client = redis::Client::open(redis_url.as_str())?;
    let conn = redis::aio::ConnectionManager::new(client).await?;
    info!(redis = %redis_url, queue = %queue, "Connected to Redis");

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                warn!("Received shutdown signal, draining in-flight submissions...");
                on_signal.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    intake::run(pool, conn, &queue, shutdown).await?;

    info!("Worker shutdown complete");
    Ok(())
}
