//! Per-session serialization for worker-state mutations.

use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tokio::time::timeout;

use crate::error::{Result, SwarmError};

/// A per-session critical section with a bounded entry wait.
///
/// Worker-state mutations for one session are strictly serialized through
/// this lock; chains for different sessions are independent. The entry wait
/// is bounded because a chain that never frees indicates a stuck critical
/// section, which surfaces as [`SwarmError::LockTimeout`] rather than
/// queueing forever behind it.
pub(crate) struct LockChain<T> {
	inner: Mutex<T>,
}

impl<T> LockChain<T> {
	pub(crate) fn new(value: T) -> Self {
		Self { inner: Mutex::new(value) }
	}

	pub(crate) async fn acquire(&self, session_id: &str, budget: Duration) -> Result<MutexGuard<'_, T>> {
		match timeout(budget, self.inner.lock()).await {
			Ok(guard) => Ok(guard),
			Err(_) => Err(SwarmError::LockTimeout {
				session_id: session_id.to_string(),
				waited_ms: budget.as_millis() as u64,
			}),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test(start_paused = true)]
	async fn acquire_is_immediate_when_free() {
		let chain = LockChain::new(0u32);
		let mut guard = chain.acquire("s1", Duration::from_millis(10)).await.unwrap();
		*guard += 1;
		drop(guard);
		assert_eq!(*chain.acquire("s1", Duration::from_millis(10)).await.unwrap(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn acquire_times_out_behind_stuck_holder() {
		let chain = LockChain::new(());
		let held = chain.acquire("s1", Duration::from_millis(10)).await.unwrap();

		let err = chain
			.acquire("s1", Duration::from_millis(50))
			.await
			.expect_err("second acquire should hit the lock budget");
		match err {
			SwarmError::LockTimeout { session_id, waited_ms } => {
				assert_eq!(session_id, "s1");
				assert_eq!(waited_ms, 50);
			}
			other => panic!("unexpected error: {other}"),
		}

		drop(held);
		chain.acquire("s1", Duration::from_millis(10)).await.unwrap();
	}
}
