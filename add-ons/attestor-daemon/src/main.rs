//! Attestor daemon
//!
//! Loads the service configuration, performs the initial load of the
//! configuration directory, then keeps it live: a file-system watcher feeds
//! reload messages to the reload controller until Ctrl-C.

mod watcher;

use attestor_core::{
    AttestationService, ConfigStore, ReloadController, ServiceConfig, TeeHealthMonitor,
};
use std::sync::{mpsc, Arc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[attestor-daemon] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServiceConfig::load()?;
    let store = Arc::new(ConfigStore::new(&config.config_dir));
    store.load_all();

    // No hardware keystore binding in this host, so no probe is passed.
    let health = Arc::new(TeeHealthMonitor::from_config(&config, None));
    let service = AttestationService::from_config(&config, Arc::clone(&store), Arc::clone(&health));

    let (tx, rx) = mpsc::channel();
    let controller = ReloadController::spawn(Arc::clone(&store), rx)?;
    let watcher = watcher::watch_config_dir(&config.config_dir, tx)?;

    tracing::info!(
        config_dir = %config.config_dir.display(),
        packages_list = %config.packages_list.display(),
        health = %service.engine().health().current(),
        version = store.version(),
        "attestor daemon started"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("CTRL-C received; shutting down daemon");

    // Dropping the watcher drops the last sender, which stops the controller.
    drop(watcher);
    if controller.join().is_err() {
        tracing::error!("reload controller panicked");
    }
    Ok(())
}
