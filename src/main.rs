use std::process::ExitCode;
use std::sync::Arc;

use sandbox_worker::config::Config;
use sandbox_worker::engine::HttpTaskQueue;
use sandbox_worker::routing::HttpRouteAuthority;
use sandbox_worker::{SandboxAwareWorker, demo};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> sandbox_worker::Result<()> {
    let config = Config::from_env()?;
    let identity = config.worker.identity();

    let authority = HttpRouteAuthority::new(&config.routes, config.worker.sandbox_name.as_deref())?;
    let queue = HttpTaskQueue::new(config.worker.engine_url.clone(), &identity)?;

    tracing::info!(
        worker = %identity,
        routing_rules = %authority.url(),
        engine = %config.worker.engine_url,
        "Starting sandbox-aware worker"
    );

    let handlers = demo::registry(&identity.to_string());
    SandboxAwareWorker::new(config, Arc::new(authority), Arc::new(queue), handlers)
        .with_identity(identity)
        .run()
        .await?;

    Ok(())
}
