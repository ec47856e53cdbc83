use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use whiteflag_server::{
    run_startup_sweep, Config, Engine, LogNotifier, SqliteStore, SystemClock,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("failed to load configuration")?;
    std::fs::create_dir_all(&config.state_dir).with_context(|| {
        format!(
            "failed to create state directory {}",
            config.state_dir.display()
        )
    })?;

    let db_path = config.database_path();
    let store = SqliteStore::new(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    info!("record database at {}", db_path.display());

    let engine = Engine::new(
        Arc::new(store),
        Arc::new(LogNotifier),
        Arc::new(SystemClock),
    );

    // Repair the timer table before accepting any work.
    run_startup_sweep(&engine)
        .await
        .context("startup sweep failed")?;

    info!("whiteflag engine running; press ctrl-c to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("shutting down");
    engine.timers().clear();
    Ok(())
}
