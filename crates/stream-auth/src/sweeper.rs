//! Background removal of expired credentials.

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::store::Store;

/// How often expired credentials are swept unless configured otherwise.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Periodic task calling [`Store::expire`].
///
/// The first sweep runs one interval after spawning. Failed sweeps are
/// logged and the next tick is awaited as usual.
pub struct ExpirySweeper {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ExpirySweeper {
    /// Start sweeping `store` every `period` on the current runtime.
    pub fn spawn(store: Store, period: Duration) -> Self {
        let (stop, mut stopped) = oneshot::channel();
        let task = tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticks.tick() => match store.expire().await {
                        Ok(removed) if !removed.is_empty() => {
                            log::info!("Expired {} stream(s)", removed.len());
                        }
                        Ok(_) => {}
                        Err(e) => log::warn!("Expiry sweep failed: {e}"),
                    },
                }
            }
            log::debug!("Expiry sweeper stopped");
        });
        Self { stop, task }
    }

    /// Stop the sweeper and wait for an in-flight sweep to finish.
    pub async fn shutdown(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.task.await {
            log::warn!("Expiry sweeper task ended abnormally: {e}");
        }
    }
}
