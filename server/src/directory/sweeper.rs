//! Periodic lease expiry sweep

use super::manager::DeviceDirectory;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::info;

/// Removes expired registrations on a fixed interval
///
/// Lookups already hide expired records, so the sweep only reclaims memory
/// and drives the `Expired` transition.
pub struct ExpirySweeper {
    directory: Arc<DeviceDirectory>,
    check_interval: Duration,
}

impl ExpirySweeper {
    pub fn new(directory: Arc<DeviceDirectory>, check_interval: Duration) -> Self {
        Self {
            directory,
            check_interval,
        }
    }

    /// Start the sweep loop; runs until the task is aborted
    pub async fn run(&self) {
        let mut ticker = interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let expired = self.directory.expire_sweep(Instant::now()).await;
            if !expired.is_empty() {
                info!("Swept {} expired registrations", expired.len());
            }
        }
    }
}
