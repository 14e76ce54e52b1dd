use std::{sync::Arc, time::Duration};

use tokio::signal;
use tracing_subscriber::EnvFilter;

use helpdesk::{
    config::AppConfig, db, default_handlers, state::AppState, storage::LocalDiskStorage, Worker,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "worker",
        database_url = %config.redacted_database_url(),
        pool_size = 1,
        mail_relay_configured = config.mail_relay_url.is_some(),
        "loaded helpdesk configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let storage = Arc::new(LocalDiskStorage::new(&config.upload_dir)?);

    let state = Arc::new(AppState::new(pool, config, storage));
    let worker = Worker::new(state, default_handlers(), Duration::from_secs(2));

    tokio::select! {
        _ = worker.run() => {}
        _ = signal::ctrl_c() => {
            tracing::info!("worker received shutdown signal");
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
