// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `parley serve`: run the queue worker until a shutdown signal arrives.

use std::sync::Arc;
use std::time::Duration;

use parley_agent::{CatalogCommerce, shutdown};
use parley_config::ParleyConfig;
use parley_core::ParleyError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::app::App;

const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(300);

pub async fn run_serve(config: ParleyConfig) -> Result<(), ParleyError> {
    info!(agent = %config.agent.name, "starting parley");
    let app = App::build(&config).await?;

    let requeued = app.store.requeue_stale().await?;
    if requeued > 0 {
        info!(count = requeued, "requeued jobs with expired leases");
    }

    let cancel = shutdown::install_signal_handler();
    let mut handles = app.runtime.spawn_maintenance(cancel.clone());
    handles.push(spawn_housekeeping(
        app.store.clone(),
        app.commerce.clone(),
        cancel.clone(),
    ));

    let result = app.worker.run(cancel.clone()).await;
    cancel.cancel();
    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "maintenance task ended abnormally");
        }
    }

    if let Err(e) = app.close().await {
        error!(error = %e, "failed to close storage cleanly");
    }
    info!("parley stopped");
    result
}

/// Purges expired rate counters and idle carts.
fn spawn_housekeeping(
    store: parley_storage::SqliteStore,
    commerce: Arc<CatalogCommerce>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(HOUSEKEEPING_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match store.purge_expired_counters().await {
                        Ok(0) => {}
                        Ok(n) => info!(purged = n, "expired rate counters removed"),
                        Err(e) => warn!(error = %e, "counter purge failed"),
                    }
                    let carts = commerce.sweep_carts();
                    if carts > 0 {
                        debug!(removed = carts, "idle carts dropped");
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
    })
}

pub fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "parley={log_level},parley_agent={log_level},parley_provider={log_level},parley_storage={log_level},warn"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
