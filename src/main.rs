use anyhow::{Context, Result};
use helion::poller::{PollerCommand, sync_systems};
use helion::web::{self, AppState};
use helion::{Config, Poller, Store};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    helion::logging::init_logging(&config.logging)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;
    info!(
        "Helion {} starting with {} system(s)",
        env!("APP_VERSION"),
        config.systems.len()
    );

    let store = Arc::new(
        Store::open(&config.database.path)
            .with_context(|| format!("Failed to open database '{}'", config.database.path))?,
    );
    sync_systems(&config, &store).context("Failed to register systems")?;

    let config = Arc::new(config);
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<PollerCommand>();
    let (status_tx, _) = broadcast::channel::<String>(100);

    let poller = Poller::from_config(&config, Arc::clone(&store), cmd_rx, status_tx.clone())
        .context("Failed to build poller")?;
    let poller_task = tokio::spawn(async move {
        if let Err(e) = poller.run().await {
            error!("Poller failed: {}", e);
        }
    });

    let state = AppState {
        store,
        config: Arc::clone(&config),
        commands: cmd_tx.clone(),
        status_tx,
    };
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutdown requested");
    };

    let served = web::serve(state, &config.web.host, config.web.port, shutdown).await;

    let _ = cmd_tx.send(PollerCommand::Shutdown);
    if let Err(e) = poller_task.await {
        error!("Poller task ended abnormally: {}", e);
    }
    info!("Helion stopped");

    served.map_err(|e| anyhow::anyhow!("Web server error: {}", e))
}
