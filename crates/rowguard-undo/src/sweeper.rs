//! Background eviction of expired snapshots

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::snapshot::SnapshotStore;

/// Shortest interval the sweeper runs at
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Periodic TTL sweep over a [`SnapshotStore`]
pub struct SnapshotSweeper {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SnapshotSweeper {
    /// Start sweeping every `interval`
    ///
    /// A zero interval is raised to [`MIN_SWEEP_INTERVAL`].
    pub fn spawn(store: Arc<SnapshotStore>, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            warn!(
                interval_ms = MIN_SWEEP_INTERVAL.as_millis() as u64,
                "Zero sweep interval, using the minimum"
            );
            MIN_SWEEP_INTERVAL
        } else {
            interval
        };
        let token = CancellationToken::new();
        let child = token.clone();

        let task = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = store.sweep_expired().await;
                        debug!(removed, "snapshot sweep finished");
                    }
                    _ = child.cancelled() => {
                        info!("Snapshot sweeper shutting down");
                        break;
                    }
                }
            }
        });

        info!(interval_ms = interval.as_millis() as u64, "Snapshot sweeper started");
        Self {
            token,
            task: Some(task),
        }
    }

    /// Token that stops the sweeper when cancelled
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Whether the sweep task has exited
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop the sweeper and wait for it to exit
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SnapshotSweeper {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
