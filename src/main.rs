use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};

use bookhound::config::CoreConfig;
use bookhound::db::Database;
use bookhound::jobs::{JobDispatcher, JobQueue, JobRunner};

#[tokio::main]
async fn main() -> ExitCode {
    // Use RUST_LOG env var if set, otherwise default to info level
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    let config = CoreConfig::load();
    info!(
        "bookhound starting (database {}, library {})",
        config.database_path.display(),
        config.library_root.display()
    );

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("bookhound exited with error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: CoreConfig) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::create_dir_all(&config.library_root)?;

    let database = Database::new(&config.database_path.to_string_lossy()).await?;
    let queue = JobQueue::new(database.clone(), config.retry);
    let dispatcher = Arc::new(JobDispatcher::new(database.clone(), &config));
    let handle = JobRunner::new(queue, dispatcher, &config).start().await?;

    tokio::signal::ctrl_c().await?;
    info!("bookhound shutting down");
    handle.shutdown().await;

    Ok(())
}
