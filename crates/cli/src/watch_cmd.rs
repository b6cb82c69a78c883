use anyhow::Result;
use sessionhub_backend::{BackendService, ChangeKind};
use sessionhub_runtime_config::RuntimeConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

/// Follow the local root and print each debounced change until Ctrl-C.
pub async fn run(config: RuntimeConfig) -> Result<()> {
    let (service, changes) = BackendService::from_config(&config, None);
    let service = Arc::new(service);
    service.warm_caches().await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut events = service.subscribe_changes();
    let pump_service = Arc::clone(&service);
    let debounce = Duration::from_millis(config.watch.debounce_ms);
    let pump = tokio::spawn(async move {
        pump_service
            .pump_changes(changes, debounce, shutdown_rx)
            .await;
    });

    info!("Watching {}", config.local_root().path.display());
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(change) => println!(
                    "{} [{}] {}",
                    label(change.kind),
                    change.context_id,
                    change.path.display()
                ),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Dropped {} change event(s)", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = pump.await {
        warn!("Change pump ended abnormally: {}", e);
    }
    Ok(())
}

fn label(kind: ChangeKind) -> &'static str {
    match kind {
        ChangeKind::Created => "created ",
        ChangeKind::Modified => "modified",
        ChangeKind::Removed => "removed ",
    }
}
