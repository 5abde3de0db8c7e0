//! Long-running mode: watch connectivity and replay the queue until Ctrl-C.

use clap::Args;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use fieldsync::sync::HttpDispatcherError;
use fieldsync::{
    Config, DeferredTrigger, HttpDispatcher, IntervalTrigger, OfflineSync, PollingConnectivity,
    SyncEvent,
};

/// Run the sync service in the foreground
#[derive(Args)]
pub struct RunCommand {}

impl RunCommand {
    pub async fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        if !config.api.is_configured() {
            return Err(HttpDispatcherError::NotConfigured.into());
        }
        let dispatcher = HttpDispatcher::from_config(&config.api)?;
        let connectivity = PollingConnectivity::spawn(
            dispatcher.client().clone(),
            PollingConnectivity::health_url(dispatcher.base_url()),
            config.sync.poll_interval(),
        );

        let trigger: Arc<dyn DeferredTrigger> =
            Arc::new(IntervalTrigger::new(config.sync.sync_interval()));
        let service = OfflineSync::try_init(
            config,
            Arc::new(dispatcher),
            Arc::new(connectivity),
            vec![trigger],
        )
        .await?;

        let mut events = service.subscribe();
        info!("Watching for connectivity changes, press Ctrl-C to stop");

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                event = events.recv() => match event {
                    Ok(event) => log_event(&event),
                    Err(RecvError::Lagged(n)) => warn!("Missed {} sync event(s)", n),
                    Err(RecvError::Closed) => break,
                },
            }
        }

        info!("Shutting down");
        service.shutdown().await;
        Ok(())
    }
}

fn log_event(event: &SyncEvent) {
    match event {
        SyncEvent::CycleCompleted { report, .. } if report.attempted() > 0 => info!(
            dispatched = report.dispatched,
            failed = report.failed,
            dropped = report.dropped,
            "Sync cycle completed"
        ),
        SyncEvent::Online => info!("API reachable"),
        SyncEvent::Offline => info!("Connectivity lost, operations will be queued locally"),
        _ => {}
    }
}
