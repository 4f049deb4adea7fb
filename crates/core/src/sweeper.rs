//! Background cleanup task: periodic session eviction and idle-page sweeps.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use crate::manager::SessionPool;

/// Spawns the sweep loop. It runs until the shutdown channel flips to true.
pub(crate) fn spawn(pool: SessionPool, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
	let period = pool.config().cleanup_interval();
	tokio::spawn(async move {
		// First tick lands one full period out; a sweep at startup would
		// never find anything to evict.
		let mut ticker = time::interval_at(time::Instant::now() + period, period);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
		loop {
			tokio::select! {
				_ = ticker.tick() => {
					let evicted = pool.cleanup_timed_out_sessions().await;
					if evicted > 0 {
						info!(evicted, "sweep evicted timed-out sessions");
					} else {
						debug!("sweep found nothing to evict");
					}
				}
				changed = shutdown_rx.changed() => {
					if changed.is_err() || *shutdown_rx.borrow() {
						break;
					}
				}
			}
		}
		debug!("cleanup sweeper stopped");
	})
}
