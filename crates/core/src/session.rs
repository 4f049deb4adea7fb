//! Per-session state: worker slots, the waiter queue, and the page pool.
//!
//! Everything here is plain data plus synchronous transitions; the async
//! choreography (lock budgets, waiter timeouts, health probes) lives in
//! [`crate::manager`] and [`crate::pages`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};

use serde::{Deserialize, Serialize};
use swarm_handles::{BrowserHandle, BrowserInfo, PageHandle};
use tokio::sync::{Mutex, oneshot};
use tokio::time::Instant;
use tracing::debug;

use crate::lock::LockChain;

/// Worker slot status. `Busy` slots have exactly one occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
	Idle,
	Busy,
}

/// One unit of allowed concurrent activity within a session.
///
/// Status transitions (`Idle → Busy → Idle`) happen only inside the
/// session's lock chain.
#[derive(Debug)]
pub(crate) struct Worker {
	pub(crate) id: usize,
	pub(crate) status: WorkerStatus,
	pub(crate) occupied_at: Option<Instant>,
	/// Caller-supplied tag identifying who holds the slot.
	pub(crate) context: Option<String>,
}

/// Point-in-time view of a worker slot, used by diagnostics and persistence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSnapshot {
	pub id: usize,
	pub status: WorkerStatus,
	/// How long the slot has been occupied, when busy.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub busy_ms: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub context: Option<String>,
}

/// Proof of occupancy handed to a successful `acquire_worker` call.
///
/// The caller returns the slot with [`crate::SessionPool::release_worker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerLease {
	pub session_id: String,
	pub worker_id: usize,
}

/// Outcome of a worker acquisition attempt. Exhaustion is an expected
/// steady-state condition, so it is a variant rather than an error.
#[derive(Debug)]
pub enum WorkerAcquire {
	Acquired(WorkerLease),
	Unavailable,
}

impl WorkerAcquire {
	pub fn is_acquired(&self) -> bool {
		matches!(self, WorkerAcquire::Acquired(_))
	}

	pub fn lease(self) -> Option<WorkerLease> {
		match self {
			WorkerAcquire::Acquired(lease) => Some(lease),
			WorkerAcquire::Unavailable => None,
		}
	}
}

/// A queued, timeout-bounded request for a worker slot.
pub(crate) struct Waiter {
	pub(crate) id: u64,
	pub(crate) context: String,
	pub(crate) tx: oneshot::Sender<WorkerLease>,
}

/// Outcome of a release attempt, for caller-side logging.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ReleaseOutcome {
	/// Slot returned to idle.
	Released,
	/// Slot handed directly to a queued waiter and re-marked busy.
	HandedOff,
	/// No-op: the slot was not busy.
	AlreadyIdle,
	/// No-op: no such slot.
	UnknownWorker,
}

/// Worker slots plus the FIFO waiter queue, guarded by the session's
/// lock chain.
pub(crate) struct WorkerState {
	pub(crate) workers: Vec<Worker>,
	pub(crate) waiters: VecDeque<Waiter>,
	next_waiter_id: u64,
}

impl WorkerState {
	pub(crate) fn new(slots: usize) -> Self {
		let workers = (0..slots)
			.map(|id| Worker { id, status: WorkerStatus::Idle, occupied_at: None, context: None })
			.collect();
		Self { workers, waiters: VecDeque::new(), next_waiter_id: 0 }
	}

	/// Scans for the first idle slot and occupies it.
	///
	/// Deliberately does not consult the waiter queue: a fresh caller can
	/// race ahead of queued waiters. Documented fairness gap, kept as-is.
	pub(crate) fn occupy_first_idle(&mut self, session_id: &str, context: &str) -> Option<WorkerLease> {
		let worker = self.workers.iter_mut().find(|w| w.status == WorkerStatus::Idle)?;
		worker.status = WorkerStatus::Busy;
		worker.occupied_at = Some(Instant::now());
		worker.context = Some(context.to_string());
		Some(WorkerLease { session_id: session_id.to_string(), worker_id: worker.id })
	}

	pub(crate) fn enqueue_waiter(&mut self, context: &str) -> (u64, oneshot::Receiver<WorkerLease>) {
		let id = self.next_waiter_id;
		self.next_waiter_id += 1;
		let (tx, rx) = oneshot::channel();
		self.waiters.push_back(Waiter { id, context: context.to_string(), tx });
		(id, rx)
	}

	/// Removes an expired waiter. Missing ids are fine: the waiter may have
	/// been fulfilled or cleared in the meantime.
	pub(crate) fn remove_waiter(&mut self, waiter_id: u64) {
		self.waiters.retain(|w| w.id != waiter_id);
	}

	/// Drops all queued waiters; their receivers resolve as unavailable.
	pub(crate) fn clear_waiters(&mut self) -> usize {
		let dropped = self.waiters.len();
		self.waiters.clear();
		dropped
	}

	/// Returns a busy slot to idle, handing it straight to the
	/// longest-queued live waiter when one exists.
	pub(crate) fn release(&mut self, session_id: &str, worker_id: usize) -> ReleaseOutcome {
		let Some(idx) = self.workers.iter().position(|w| w.id == worker_id) else {
			return ReleaseOutcome::UnknownWorker;
		};
		if self.workers[idx].status == WorkerStatus::Idle {
			return ReleaseOutcome::AlreadyIdle;
		}
		self.workers[idx].status = WorkerStatus::Idle;
		self.workers[idx].occupied_at = None;
		self.workers[idx].context = None;

		// Direct hand-off: the slot is re-marked busy for the waiter only
		// once its receiver provably took the lease. Waiters whose receiver
		// is already gone (timed out, session torn down) fall through.
		while let Some(waiter) = self.waiters.pop_front() {
			let lease = WorkerLease { session_id: session_id.to_string(), worker_id };
			let context = waiter.context.clone();
			if waiter.tx.send(lease).is_ok() {
				self.workers[idx].status = WorkerStatus::Busy;
				self.workers[idx].occupied_at = Some(Instant::now());
				self.workers[idx].context = Some(context);
				return ReleaseOutcome::HandedOff;
			}
			debug!(session = %session_id, "skipping dead waiter");
		}
		ReleaseOutcome::Released
	}

	pub(crate) fn busy_count(&self) -> usize {
		self.workers.iter().filter(|w| w.status == WorkerStatus::Busy).count()
	}

	pub(crate) fn snapshots(&self, now: Instant) -> Vec<WorkerSnapshot> {
		self.workers
			.iter()
			.map(|w| WorkerSnapshot {
				id: w.id,
				status: w.status,
				busy_ms: w
					.occupied_at
					.map(|at| now.saturating_duration_since(at).as_millis() as u64),
				context: w.context.clone(),
			})
			.collect()
	}
}

/// A parked, reusable page plus its usage/health timestamps.
pub(crate) struct PooledPage {
	pub(crate) page: Arc<dyn PageHandle>,
	pub(crate) last_used_at: Instant,
	pub(crate) last_health_check_at: Instant,
}

/// The LIFO page pool and the managed-page set.
///
/// The managed set tracks every page ever created or registered under the
/// session, pool membership irrelevant, so teardown can guarantee closure.
/// Membership is by `Arc` identity.
pub(crate) struct PageState {
	pub(crate) pool: Vec<PooledPage>,
	pub(crate) managed: Vec<Arc<dyn PageHandle>>,
}

impl PageState {
	pub(crate) fn new() -> Self {
		Self { pool: Vec::new(), managed: Vec::new() }
	}

	pub(crate) fn register(&mut self, page: Arc<dyn PageHandle>) {
		if !self.managed.iter().any(|p| Arc::ptr_eq(p, &page)) {
			self.managed.push(page);
		}
	}

	pub(crate) fn unregister(&mut self, page: &Arc<dyn PageHandle>) -> bool {
		let before = self.managed.len();
		self.managed.retain(|p| !Arc::ptr_eq(p, page));
		self.managed.len() != before
	}
}

/// A managed unit pairing one exclusively-owned browser handle with its
/// worker slots and page pool.
pub(crate) struct SessionEntry {
	pub(crate) id: String,
	pub(crate) browser: Arc<dyn BrowserHandle>,
	pub(crate) info: Option<BrowserInfo>,
	pub(crate) created_at: Instant,
	last_activity: StdMutex<Instant>,
	pub(crate) workers: LockChain<WorkerState>,
	pub(crate) pages: Mutex<PageState>,
}

impl SessionEntry {
	pub(crate) fn new(
		id: String,
		browser: Arc<dyn BrowserHandle>,
		info: Option<BrowserInfo>,
		slots: usize,
	) -> Self {
		let now = Instant::now();
		Self {
			id,
			browser,
			info,
			created_at: now,
			last_activity: StdMutex::new(now),
			workers: LockChain::new(WorkerState::new(slots)),
			pages: Mutex::new(PageState::new()),
		}
	}

	pub(crate) fn touch(&self) {
		*self.last_activity.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
	}

	pub(crate) fn last_activity(&self) -> Instant {
		*self.last_activity.lock().unwrap_or_else(|e| e.into_inner())
	}

	pub(crate) fn idle_for(&self, now: Instant) -> std::time::Duration {
		now.saturating_duration_since(self.last_activity())
	}
}

/// Per-session diagnostics record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
	pub id: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub info: Option<BrowserInfo>,
	pub workers: Vec<WorkerSnapshot>,
	pub waiting: usize,
	pub pooled_pages: usize,
	pub managed_pages: usize,
	pub age_ms: u64,
	pub idle_ms: u64,
}

/// A worker busy longer than the caller's threshold.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StuckWorker {
	pub session_id: String,
	pub worker_id: usize,
	pub busy_ms: u64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub context: Option<String>,
}

/// Busy/idle/waiting counts for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerOccupancy {
	pub busy: usize,
	pub idle: usize,
	pub waiting: usize,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn occupy_takes_first_idle_slot() {
		let mut state = WorkerState::new(2);
		let a = state.occupy_first_idle("s1", "caller-a").unwrap();
		let b = state.occupy_first_idle("s1", "caller-b").unwrap();
		assert_eq!(a.worker_id, 0);
		assert_eq!(b.worker_id, 1);
		assert!(state.occupy_first_idle("s1", "caller-c").is_none());
		assert_eq!(state.busy_count(), 2);
	}

	#[tokio::test]
	async fn release_returns_slot_to_idle() {
		let mut state = WorkerState::new(1);
		state.occupy_first_idle("s1", "caller").unwrap();
		assert_eq!(state.release("s1", 0), ReleaseOutcome::Released);
		assert_eq!(state.busy_count(), 0);
		assert!(state.workers[0].context.is_none());
		assert!(state.workers[0].occupied_at.is_none());
	}

	#[tokio::test]
	async fn release_of_idle_or_unknown_worker_is_noop() {
		let mut state = WorkerState::new(1);
		assert_eq!(state.release("s1", 0), ReleaseOutcome::AlreadyIdle);
		assert_eq!(state.release("s1", 9), ReleaseOutcome::UnknownWorker);
	}

	#[tokio::test]
	async fn release_hands_off_to_queued_waiter() {
		let mut state = WorkerState::new(1);
		state.occupy_first_idle("s1", "first").unwrap();
		let (_, mut rx) = state.enqueue_waiter("second");

		assert_eq!(state.release("s1", 0), ReleaseOutcome::HandedOff);
		let lease = rx.try_recv().unwrap();
		assert_eq!(lease.worker_id, 0);
		// Slot stays busy for the waiter; no idle window in between.
		assert_eq!(state.busy_count(), 1);
		assert_eq!(state.workers[0].context.as_deref(), Some("second"));
	}

	#[tokio::test]
	async fn release_skips_dead_waiters() {
		let mut state = WorkerState::new(1);
		state.occupy_first_idle("s1", "first").unwrap();
		let (_, rx_dead) = state.enqueue_waiter("gone");
		let (_, mut rx_live) = state.enqueue_waiter("alive");
		drop(rx_dead);

		assert_eq!(state.release("s1", 0), ReleaseOutcome::HandedOff);
		assert_eq!(rx_live.try_recv().unwrap().worker_id, 0);
	}

	#[tokio::test]
	async fn release_with_no_live_waiters_leaves_slot_idle() {
		let mut state = WorkerState::new(1);
		state.occupy_first_idle("s1", "first").unwrap();
		let (_, rx) = state.enqueue_waiter("gone");
		drop(rx);

		assert_eq!(state.release("s1", 0), ReleaseOutcome::Released);
		assert_eq!(state.busy_count(), 0);
		assert!(state.waiters.is_empty());
	}

	#[tokio::test]
	async fn remove_waiter_tolerates_missing_ids() {
		let mut state = WorkerState::new(1);
		let (id, _rx) = state.enqueue_waiter("w");
		state.remove_waiter(id);
		state.remove_waiter(id);
		assert!(state.waiters.is_empty());
	}

	#[tokio::test]
	async fn snapshots_report_busy_age_and_context() {
		let mut state = WorkerState::new(2);
		state.occupy_first_idle("s1", "tagged").unwrap();
		let snaps = state.snapshots(Instant::now());
		assert_eq!(snaps.len(), 2);
		assert_eq!(snaps[0].status, WorkerStatus::Busy);
		assert_eq!(snaps[0].context.as_deref(), Some("tagged"));
		assert!(snaps[0].busy_ms.is_some());
		assert_eq!(snaps[1].status, WorkerStatus::Idle);
		assert!(snaps[1].busy_ms.is_none());
	}
}
