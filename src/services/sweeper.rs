//! Background eviction of abandoned upload sessions.

use crate::services::upload_service::UploadService;
use std::time::Duration;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Run `UploadService::sweep_expired` every `interval` until `shutdown` fires.
pub fn spawn_session_sweeper(
    service: UploadService,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("session sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(err) = service.sweep_expired().await {
                        error!(error = %err, "session sweep failed");
                    }
                }
            }
        }
    })
}
