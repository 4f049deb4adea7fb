//! Pool tuning knobs.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for the session pool.
///
/// Durations are plain milliseconds so the struct round-trips the JSON shape
/// deployments supply; typed accessors convert on the way out. Every field
/// has a default, so a partial (or absent) config file is fine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolConfig {
	/// Worker slots per session: the concurrency ceiling for one browser.
	pub workers_per_session: usize,
	/// Sessions idle longer than this are evicted by the cleanup sweep.
	pub session_timeout_ms: u64,
	/// Cadence of the background cleanup sweep.
	pub cleanup_interval_ms: u64,
	/// Budget for entering a session's lock chain. Exceeding it means a
	/// stuck critical section, not capacity pressure.
	pub lock_timeout_ms: u64,
	/// Default budget an `acquire_worker` call spends waiting for a slot.
	pub worker_wait_timeout_ms: u64,
	/// Pending acquires beyond this are refused immediately.
	pub max_waiters_per_session: usize,
	/// Parked pages per session; releases beyond this close the page.
	pub page_pool_max: usize,
	/// Parked pages idle longer than this are closed on next touch.
	pub page_idle_timeout_ms: u64,
	/// Pages probed less recently than this are re-checked on acquisition.
	pub health_check_interval_ms: u64,
	/// Budget for a single in-page health probe.
	pub health_check_timeout_ms: u64,
	/// Where session metadata snapshots are written; `None` disables
	/// persistence.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub state_path: Option<PathBuf>,
}

impl Default for PoolConfig {
	fn default() -> Self {
		Self {
			workers_per_session: 3,
			session_timeout_ms: 30 * 60 * 1000,
			cleanup_interval_ms: 60_000,
			lock_timeout_ms: 10_000,
			worker_wait_timeout_ms: 30_000,
			max_waiters_per_session: 10,
			page_pool_max: 4,
			page_idle_timeout_ms: 5 * 60 * 1000,
			health_check_interval_ms: 60_000,
			health_check_timeout_ms: 3_000,
			state_path: None,
		}
	}
}

impl PoolConfig {
	pub fn session_timeout(&self) -> Duration {
		Duration::from_millis(self.session_timeout_ms)
	}

	pub fn cleanup_interval(&self) -> Duration {
		Duration::from_millis(self.cleanup_interval_ms)
	}

	pub fn lock_timeout(&self) -> Duration {
		Duration::from_millis(self.lock_timeout_ms)
	}

	pub fn worker_wait_timeout(&self) -> Duration {
		Duration::from_millis(self.worker_wait_timeout_ms)
	}

	pub fn page_idle_timeout(&self) -> Duration {
		Duration::from_millis(self.page_idle_timeout_ms)
	}

	pub fn health_check_interval(&self) -> Duration {
		Duration::from_millis(self.health_check_interval_ms)
	}

	pub fn health_check_timeout(&self) -> Duration {
		Duration::from_millis(self.health_check_timeout_ms)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_are_sane() {
		let cfg = PoolConfig::default();
		assert_eq!(cfg.workers_per_session, 3);
		assert_eq!(cfg.page_pool_max, 4);
		assert!(cfg.state_path.is_none());
		assert_eq!(cfg.session_timeout(), Duration::from_secs(30 * 60));
	}

	#[test]
	fn partial_json_fills_defaults() {
		let cfg: PoolConfig =
			serde_json::from_str(r#"{"workersPerSession": 8, "pagePoolMax": 1}"#).unwrap();
		assert_eq!(cfg.workers_per_session, 8);
		assert_eq!(cfg.page_pool_max, 1);
		assert_eq!(cfg.lock_timeout_ms, PoolConfig::default().lock_timeout_ms);
	}

	#[test]
	fn serializes_camel_case() {
		let json = serde_json::to_string(&PoolConfig::default()).unwrap();
		assert!(json.contains("\"sessionTimeoutMs\""));
		assert!(!json.contains("statePath"));
	}
}
