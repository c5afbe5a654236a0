//! Document-to-video worker binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use docvid_worker::{Orchestrator, ServiceContext, WorkerConfig};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("docvid=info".parse().unwrap())
        .add_directive("hyper=warn".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting docvid-worker");

    let config = WorkerConfig::from_env();
    info!(?config, "Worker config loaded");

    let ctx = match ServiceContext::new(config) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("Failed to build service context: {}", e);
            std::process::exit(1);
        }
    };

    let orchestrator = Arc::new(Orchestrator::new(ctx.clone()));

    // Background sweeper: periodic snapshots + retention, final snapshot
    // on shutdown
    let sweeper = tokio::spawn(
        Arc::clone(&ctx.store).run_sweeper(orchestrator.shutdown_token()),
    );

    // Ctrl-C triggers graceful shutdown
    {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Received shutdown signal");
            orchestrator.shutdown();
        });
    }

    if let Err(e) = Arc::clone(&orchestrator).run().await {
        error!("Orchestrator error: {}", e);
        std::process::exit(1);
    }

    sweeper.await.ok();
    info!("Worker shutdown complete");
}
