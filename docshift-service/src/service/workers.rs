//! Background workers.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::service::ConversionService;

impl ConversionService {
    /// Start the retention sweep. Runs every `jobs.cleanup_interval_secs`
    /// until `shutdown` is cancelled.
    pub fn start_cleanup_worker(
        service: Arc<ConversionService>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = service.config.jobs.cleanup_interval();
            info!(interval_secs = period.as_secs(), "Cleanup worker started");

            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        service.cleanup_expired().await;
                    }
                }
            }
            info!("Cleanup worker stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::jobs::JobStore;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_worker_sweeps_and_stops() {
        let dir = TempDir::new().unwrap();
        let mut config = ServiceConfig::default();
        config.storage.data_dir = dir.path().to_path_buf();
        config.jobs.retention_secs = 0;
        config.jobs.cleanup_interval_secs = 1;
        let service =
            Arc::new(ConversionService::new(Arc::new(config), Arc::new(JobStore::new())).unwrap());

        let orphan = service.upload_dir().join("orphan.pdf");
        std::fs::write(&orphan, b"x").unwrap();

        let shutdown = CancellationToken::new();
        let handle = ConversionService::start_cleanup_worker(Arc::clone(&service), shutdown.clone());

        for _ in 0..50 {
            if !orphan.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(!orphan.exists());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
