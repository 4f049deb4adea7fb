//! The session pool: registry, worker allocator, cleanup, persistence.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures::future::join_all;
use swarm_handles::{BrowserHandle, BrowserInfo, PageHandle, PageSource};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::error::{Result, SwarmError};
use crate::pages;
use crate::persist::{self, PersistedState, SessionRecord};
use crate::session::{
	SessionEntry, SessionMetadata, StuckWorker, WorkerAcquire, WorkerOccupancy, ReleaseOutcome,
};
use crate::sweeper;

struct PoolInner {
	config: PoolConfig,
	/// Coarse registry lock; never held across an await point. Per-session
	/// state has its own locks, so sessions never block each other.
	sessions: StdMutex<HashMap<String, Arc<SessionEntry>>>,
	next_id: AtomicU64,
	shutdown_tx: watch::Sender<bool>,
	sweeper: StdMutex<Option<JoinHandle<()>>>,
}

/// Orchestrates many concurrent browser-automation sessions: allocates and
/// releases worker slots, reuses and health-checks pooled pages, and evicts
/// idle or timed-out sessions.
///
/// Cheap to clone; clones share the same pool.
#[derive(Clone)]
pub struct SessionPool {
	inner: Arc<PoolInner>,
}

impl SessionPool {
	pub fn new(config: PoolConfig) -> Self {
		let (shutdown_tx, _) = watch::channel(false);
		Self {
			inner: Arc::new(PoolInner {
				config,
				sessions: StdMutex::new(HashMap::new()),
				next_id: AtomicU64::new(1),
				shutdown_tx,
				sweeper: StdMutex::new(None),
			}),
		}
	}

	pub fn config(&self) -> &PoolConfig {
		&self.inner.config
	}

	/// Registers a browser handle as a new session and returns its id.
	///
	/// The caller-supplied id in [`BrowserInfo::session_id`] is preferred;
	/// when absent (or already registered) a sequence id is generated.
	pub fn add_session(&self, browser: Arc<dyn BrowserHandle>, info: Option<BrowserInfo>) -> String {
		let preferred = info.as_ref().and_then(|i| i.session_id.clone());
		let mut sessions = self.lock_registry();

		let id = match preferred {
			Some(id) if !sessions.contains_key(&id) => id,
			Some(taken) => {
				warn!(session = %taken, "session id already registered, generating a fresh one");
				self.generate_id(&sessions)
			}
			None => self.generate_id(&sessions),
		};

		let entry = Arc::new(SessionEntry::new(
			id.clone(),
			browser,
			info,
			self.inner.config.workers_per_session,
		));
		sessions.insert(id.clone(), entry);
		info!(session = %id, workers = self.inner.config.workers_per_session, "session added");
		id
	}

	/// Removes a session and tears it down: queued waiters resolve as
	/// unavailable, managed pages are closed in parallel, then the browser.
	/// Returns whether the session existed.
	pub async fn remove_session(&self, session_id: &str) -> bool {
		let removed = self.lock_registry().remove(session_id);
		match removed {
			Some(entry) => {
				info!(session = %session_id, "session removed");
				self.teardown(&entry).await;
				true
			}
			None => {
				debug!(session = %session_id, "remove for unknown session");
				false
			}
		}
	}

	/// Tries to occupy an idle worker slot, waiting up to `wait` (default:
	/// the configured worker-wait timeout) when none is free.
	///
	/// `context` is a caller-supplied tag recorded on the slot for
	/// diagnostics. Returns [`WorkerAcquire::Unavailable`] when the session
	/// is unknown, the waiter queue is full, or the wait expires; a stuck
	/// lock chain is the only error path.
	///
	/// Known fairness gap, kept from the original behavior: the immediate
	/// occupy path does not consult the waiter queue, so a fresh caller can
	/// race ahead of longer-waiting ones.
	pub async fn acquire_worker(
		&self,
		session_id: &str,
		context: &str,
		wait: Option<Duration>,
	) -> Result<WorkerAcquire> {
		let Some(entry) = self.entry(session_id) else {
			debug!(session = %session_id, "acquire for unknown session");
			return Ok(WorkerAcquire::Unavailable);
		};
		let lock_budget = self.inner.config.lock_timeout();
		let wait = wait.unwrap_or_else(|| self.inner.config.worker_wait_timeout());

		let (waiter_id, mut rx) = {
			let mut workers = entry.workers.acquire(&entry.id, lock_budget).await?;
			if let Some(lease) = workers.occupy_first_idle(&entry.id, context) {
				debug!(session = %entry.id, worker = lease.worker_id, context, "worker acquired");
				entry.touch();
				return Ok(WorkerAcquire::Acquired(lease));
			}
			if workers.waiters.len() >= self.inner.config.max_waiters_per_session {
				debug!(session = %entry.id, waiting = workers.waiters.len(), "waiter queue full");
				return Ok(WorkerAcquire::Unavailable);
			}
			workers.enqueue_waiter(context)
		};

		let sleep = tokio::time::sleep(wait);
		tokio::pin!(sleep);
		tokio::select! {
			handed = &mut rx => match handed {
				Ok(lease) => {
					debug!(session = %entry.id, worker = lease.worker_id, context, "worker handed off to waiter");
					entry.touch();
					Ok(WorkerAcquire::Acquired(lease))
				}
				// Sender dropped: session torn down while waiting.
				Err(_) => Ok(WorkerAcquire::Unavailable),
			},
			_ = &mut sleep => {
				match entry.workers.acquire(&entry.id, lock_budget).await {
					Ok(mut workers) => workers.remove_waiter(waiter_id),
					Err(err) => warn!(session = %entry.id, error = %err, "could not clear expired waiter"),
				}
				// A hand-off can race the expiry; without this check the
				// lease would leak a busy slot.
				if let Ok(lease) = rx.try_recv() {
					debug!(session = %entry.id, worker = lease.worker_id, "hand-off raced expiry, keeping lease");
					entry.touch();
					return Ok(WorkerAcquire::Acquired(lease));
				}
				debug!(session = %entry.id, context, waited_ms = wait.as_millis() as u64, "worker wait timed out");
				Ok(WorkerAcquire::Unavailable)
			}
		}
	}

	/// Returns a worker slot. Busy slots go back to idle (or straight to the
	/// longest-queued waiter); releasing an idle or unknown slot, or one in
	/// an unknown session, is a logged no-op.
	pub async fn release_worker(&self, session_id: &str, worker_id: usize) -> Result<()> {
		let Some(entry) = self.entry(session_id) else {
			debug!(session = %session_id, worker = worker_id, "release for unknown session");
			return Ok(());
		};
		let mut workers = entry
			.workers
			.acquire(&entry.id, self.inner.config.lock_timeout())
			.await?;
		match workers.release(&entry.id, worker_id) {
			ReleaseOutcome::Released => {
				entry.touch();
				debug!(session = %entry.id, worker = worker_id, "worker released");
			}
			ReleaseOutcome::HandedOff => {
				entry.touch();
				debug!(session = %entry.id, worker = worker_id, "worker released and handed to waiter");
			}
			ReleaseOutcome::AlreadyIdle => {
				debug!(session = %entry.id, worker = worker_id, "release of idle worker ignored");
			}
			ReleaseOutcome::UnknownWorker => {
				debug!(session = %entry.id, worker = worker_id, "release of unknown worker ignored");
			}
		}
		Ok(())
	}

	/// Returns a reusable page, creating a fresh one via `source` when the
	/// pool has nothing valid. Created pages are registered as managed.
	pub async fn acquire_page(
		&self,
		session_id: &str,
		source: &dyn PageSource,
	) -> Result<Arc<dyn PageHandle>> {
		let entry = self
			.entry(session_id)
			.ok_or_else(|| SwarmError::SessionNotFound(session_id.to_string()))?;

		if let Some(page) = pages::acquire_from_pool(&entry, &self.inner.config).await {
			entry.touch();
			return Ok(page);
		}

		let page = source.create_page().await.map_err(SwarmError::PageCreate)?;
		entry.pages.lock().await.register(page.clone());
		entry.touch();
		debug!(session = %entry.id, "created fresh page");
		Ok(page)
	}

	/// Parks a page for reuse (or closes it, per pool rules). Unknown
	/// sessions are a logged no-op.
	pub async fn release_page(&self, session_id: &str, page: Arc<dyn PageHandle>) {
		let Some(entry) = self.entry(session_id) else {
			debug!(session = %session_id, "page release for unknown session");
			return;
		};
		pages::release_to_pool(&entry, &self.inner.config, page).await;
		entry.touch();
	}

	/// Tracks an externally created page for guaranteed cleanup.
	pub async fn register_page(&self, session_id: &str, page: Arc<dyn PageHandle>) {
		let Some(entry) = self.entry(session_id) else {
			debug!(session = %session_id, "register for unknown session");
			return;
		};
		entry.pages.lock().await.register(page);
	}

	/// Stops tracking a page (e.g. the caller closed it itself).
	pub async fn unregister_page(&self, session_id: &str, page: &Arc<dyn PageHandle>) {
		let Some(entry) = self.entry(session_id) else {
			debug!(session = %session_id, "unregister for unknown session");
			return;
		};
		entry.pages.lock().await.unregister(page);
	}

	/// Evicts sessions idle past the session timeout, then sweeps idle
	/// pages. Returns how many sessions were evicted.
	pub async fn cleanup_timed_out_sessions(&self) -> usize {
		let timeout = self.inner.config.session_timeout();
		let now = Instant::now();
		let stale: Vec<Arc<SessionEntry>> = self
			.lock_registry()
			.values()
			.filter(|e| e.idle_for(now) > timeout)
			.cloned()
			.collect();

		let mut evicted = 0;
		for entry in stale {
			let Some(entry) = self.lock_registry().remove(&entry.id) else {
				continue;
			};
			info!(
				session = %entry.id,
				idle_ms = entry.idle_for(now).as_millis() as u64,
				"evicting timed-out session"
			);
			self.teardown(&entry).await;
			evicted += 1;
		}

		self.cleanup_idle_pages().await;
		evicted
	}

	/// Applies the closed/idle-timeout sweep over every session's page pool.
	/// Returns how many pooled pages were evicted.
	pub async fn cleanup_idle_pages(&self) -> usize {
		let mut evicted = 0;
		for entry in self.entries() {
			evicted += pages::sweep_idle(&entry, &self.inner.config).await;
		}
		evicted
	}

	/// Ids of all registered sessions, sorted.
	pub fn session_ids(&self) -> Vec<String> {
		let mut ids: Vec<String> = self.lock_registry().keys().cloned().collect();
		ids.sort();
		ids
	}

	/// Per-session diagnostics records, sorted by id.
	pub async fn session_metadata(&self) -> Result<Vec<SessionMetadata>> {
		let lock_budget = self.inner.config.lock_timeout();
		let now = Instant::now();
		let mut out = Vec::new();
		for entry in self.entries() {
			let (workers, waiting) = {
				let guard = entry.workers.acquire(&entry.id, lock_budget).await?;
				(guard.snapshots(now), guard.waiters.len())
			};
			let (pooled_pages, managed_pages) = {
				let pages = entry.pages.lock().await;
				(pages.pool.len(), pages.managed.len())
			};
			out.push(SessionMetadata {
				id: entry.id.clone(),
				info: entry.info.clone(),
				workers,
				waiting,
				pooled_pages,
				managed_pages,
				age_ms: now.saturating_duration_since(entry.created_at).as_millis() as u64,
				idle_ms: entry.idle_for(now).as_millis() as u64,
			});
		}
		out.sort_by(|a, b| a.id.cmp(&b.id));
		Ok(out)
	}

	/// Workers busy longer than `threshold`, across all sessions.
	pub async fn stuck_workers(&self, threshold: Duration) -> Result<Vec<StuckWorker>> {
		let lock_budget = self.inner.config.lock_timeout();
		let threshold_ms = threshold.as_millis() as u64;
		let now = Instant::now();
		let mut stuck = Vec::new();
		for entry in self.entries() {
			let snapshots = entry
				.workers
				.acquire(&entry.id, lock_budget)
				.await?
				.snapshots(now);
			for snap in snapshots {
				if let Some(busy_ms) = snap.busy_ms {
					if busy_ms >= threshold_ms {
						stuck.push(StuckWorker {
							session_id: entry.id.clone(),
							worker_id: snap.id,
							busy_ms,
							context: snap.context,
						});
					}
				}
			}
		}
		stuck.sort_by(|a, b| (a.session_id.as_str(), a.worker_id).cmp(&(b.session_id.as_str(), b.worker_id)));
		Ok(stuck)
	}

	/// Busy/idle/waiting counts for one session; `None` when unknown.
	pub async fn worker_occupancy(&self, session_id: &str) -> Result<Option<WorkerOccupancy>> {
		let Some(entry) = self.entry(session_id) else {
			return Ok(None);
		};
		let guard = entry
			.workers
			.acquire(&entry.id, self.inner.config.lock_timeout())
			.await?;
		let busy = guard.busy_count();
		Ok(Some(WorkerOccupancy {
			busy,
			idle: guard.workers.len() - busy,
			waiting: guard.waiters.len(),
		}))
	}

	/// Writes the metadata snapshot to the configured state path. Failures
	/// are logged, never fatal; returns whether a snapshot was written.
	pub async fn save_state(&self) -> bool {
		let Some(path) = self.inner.config.state_path.clone() else {
			debug!("persistence disabled, skipping save");
			return false;
		};
		let state = match self.collect_state().await {
			Ok(state) => state,
			Err(err) => {
				warn!(error = %err, "state snapshot failed");
				return false;
			}
		};
		match persist::save_json(&path, &state) {
			Ok(()) => {
				info!(path = %path.display(), sessions = state.sessions.len(), "session state saved");
				true
			}
			Err(err) => {
				warn!(error = %err, path = %path.display(), "session state save failed");
				false
			}
		}
	}

	/// Restores the next-id counter from a persisted snapshot. Live handles
	/// cannot be restored, so nothing else is rebuilt. Missing or corrupt
	/// state is logged and ignored; returns whether a snapshot was applied.
	pub fn load_state(&self) -> bool {
		let Some(path) = self.inner.config.state_path.as_deref() else {
			debug!("persistence disabled, skipping load");
			return false;
		};
		let Some(state) = persist::load_json::<PersistedState>(path) else {
			debug!(path = %path.display(), "no usable persisted session state");
			return false;
		};
		self.inner.next_id.fetch_max(state.next_session_id, Ordering::SeqCst);
		info!(
			path = %path.display(),
			next_session_id = state.next_session_id,
			sessions = state.sessions.len(),
			"restored session id counter"
		);
		true
	}

	/// Starts the background cleanup sweeper. Idempotent.
	pub fn start(&self) {
		let mut guard = self.inner.sweeper.lock().unwrap_or_else(|e| e.into_inner());
		if guard.is_some() {
			debug!("cleanup sweeper already running");
			return;
		}
		let rx = self.inner.shutdown_tx.subscribe();
		*guard = Some(sweeper::spawn(self.clone(), rx));
		info!(interval_ms = self.inner.config.cleanup_interval_ms, "cleanup sweeper started");
	}

	/// Graceful drain: stops the sweeper, persists metadata, then closes all
	/// managed pages followed by all browser handles.
	pub async fn shutdown(&self) {
		let _ = self.inner.shutdown_tx.send(true);
		let handle = self
			.inner
			.sweeper
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.take();
		if let Some(handle) = handle {
			let _ = handle.await;
		}

		self.save_state().await;

		let entries: Vec<Arc<SessionEntry>> = self.lock_registry().drain().map(|(_, e)| e).collect();
		for entry in &entries {
			self.drain_waiters(entry).await;
			self.close_managed_pages(entry).await;
		}
		for entry in &entries {
			if let Err(err) = entry.browser.close().await {
				warn!(session = %entry.id, error = %err, "browser close failed during shutdown");
			}
		}
		info!(sessions = entries.len(), "session pool shut down");
	}

	/// Shared teardown for explicit removal and timeout eviction. Each
	/// resource failure is captured independently so one bad handle never
	/// blocks the rest.
	async fn teardown(&self, entry: &Arc<SessionEntry>) {
		self.drain_waiters(entry).await;
		self.close_managed_pages(entry).await;
		if let Err(err) = entry.browser.close().await {
			warn!(session = %entry.id, error = %err, "browser close failed during teardown");
		}
	}

	async fn drain_waiters(&self, entry: &Arc<SessionEntry>) {
		match entry
			.workers
			.acquire(&entry.id, self.inner.config.lock_timeout())
			.await
		{
			Ok(mut workers) => {
				let dropped = workers.clear_waiters();
				if dropped > 0 {
					debug!(session = %entry.id, dropped, "dropped pending waiters");
				}
			}
			Err(err) => {
				warn!(session = %entry.id, error = %err, "lock chain busy during teardown, skipping waiter drain");
			}
		}
	}

	async fn close_managed_pages(&self, entry: &Arc<SessionEntry>) {
		let managed: Vec<Arc<dyn PageHandle>> = {
			let mut pages = entry.pages.lock().await;
			pages.pool.clear();
			std::mem::take(&mut pages.managed)
		};
		if managed.is_empty() {
			return;
		}
		let results = join_all(managed.iter().map(|page| page.close())).await;
		let failures = results.iter().filter(|r| r.is_err()).count();
		for err in results.into_iter().filter_map(|r| r.err()) {
			warn!(session = %entry.id, error = %err, "page close failed during teardown");
		}
		debug!(session = %entry.id, closed = managed.len() - failures, failures, "managed pages closed");
	}

	async fn collect_state(&self) -> Result<PersistedState> {
		let lock_budget = self.inner.config.lock_timeout();
		let now = Instant::now();
		let now_ms = persist::epoch_ms();
		let mut sessions = Vec::new();
		for entry in self.entries() {
			let workers = entry
				.workers
				.acquire(&entry.id, lock_budget)
				.await?
				.snapshots(now);
			let age_ms = now.saturating_duration_since(entry.created_at).as_millis() as u64;
			let idle_ms = entry.idle_for(now).as_millis() as u64;
			sessions.push(SessionRecord {
				id: entry.id.clone(),
				info: entry.info.clone(),
				workers,
				created_at: now_ms.saturating_sub(age_ms),
				last_activity: now_ms.saturating_sub(idle_ms),
			});
		}
		sessions.sort_by(|a, b| a.id.cmp(&b.id));
		Ok(PersistedState {
			sessions,
			next_session_id: self.inner.next_id.load(Ordering::SeqCst),
			saved_at: now_ms,
		})
	}

	fn lock_registry(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<SessionEntry>>> {
		self.inner.sessions.lock().unwrap_or_else(|e| e.into_inner())
	}

	fn entry(&self, session_id: &str) -> Option<Arc<SessionEntry>> {
		self.lock_registry().get(session_id).cloned()
	}

	fn entries(&self) -> Vec<Arc<SessionEntry>> {
		self.lock_registry().values().cloned().collect()
	}

	fn generate_id(&self, sessions: &HashMap<String, Arc<SessionEntry>>) -> String {
		loop {
			let n = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
			let id = format!("session-{n}");
			if !sessions.contains_key(&id) {
				return id;
			}
		}
	}
}
