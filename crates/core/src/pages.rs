//! Page pool mechanics: reuse, health checks, idle eviction.
//!
//! Every failure on this path is evict-and-continue: a page that cannot be
//! validated or closed cleanly is logged and dropped, never propagated.

use std::sync::Arc;
use std::time::Duration;

use swarm_handles::PageHandle;
use tokio::time::{Instant, timeout};
use tracing::{debug, warn};

use crate::config::PoolConfig;
use crate::session::{PageState, PooledPage, SessionEntry};

/// Runs the health-check algorithm against one page.
///
/// Healthy means: not closed, and either the handle exposes no inspection
/// capability (trivially healthy) or an in-page probe, raced against
/// `budget`, reports a ready document or basic structural presence.
/// Timeout or any probe error counts as unhealthy.
pub(crate) async fn page_is_healthy(session_id: &str, page: &dyn PageHandle, budget: Duration) -> bool {
	if page.is_closed() {
		return false;
	}
	if !page.supports_probe() {
		return true;
	}
	match timeout(budget, page.probe()).await {
		Ok(Ok(probe)) => probe.is_ready(),
		Ok(Err(err)) => {
			debug!(session = %session_id, error = %err, "page probe failed");
			false
		}
		Err(_) => {
			debug!(session = %session_id, budget_ms = budget.as_millis() as u64, "page probe timed out");
			false
		}
	}
}

/// Pops pooled pages (most recently released first) until one validates.
///
/// Closed pages are dropped; pages past the idle timeout are closed and
/// dropped; pages whose last health check is stale are re-probed and closed
/// on failure. Returns `None` when the pool is exhausted.
pub(crate) async fn acquire_from_pool(entry: &SessionEntry, cfg: &PoolConfig) -> Option<Arc<dyn PageHandle>> {
	let mut pages = entry.pages.lock().await;
	let now = Instant::now();

	while let Some(pooled) = pages.pool.pop() {
		if pooled.page.is_closed() {
			pages.unregister(&pooled.page);
			debug!(session = %entry.id, "dropped closed pooled page");
			continue;
		}
		if now.saturating_duration_since(pooled.last_used_at) > cfg.page_idle_timeout() {
			close_and_unregister(&entry.id, &mut pages, pooled.page, "idle timeout").await;
			continue;
		}
		if now.saturating_duration_since(pooled.last_health_check_at) > cfg.health_check_interval() {
			if !page_is_healthy(&entry.id, &*pooled.page, cfg.health_check_timeout()).await {
				close_and_unregister(&entry.id, &mut pages, pooled.page, "failed health check").await;
				continue;
			}
		}
		debug!(session = %entry.id, pooled = pages.pool.len(), "reusing pooled page");
		return Some(pooled.page);
	}
	None
}

/// Parks a page back into the pool.
///
/// Closed pages are unregistered; a full pool closes the page instead of
/// parking it; everything else is health-checked, with healthy pages pushed
/// carrying refreshed timestamps.
pub(crate) async fn release_to_pool(entry: &SessionEntry, cfg: &PoolConfig, page: Arc<dyn PageHandle>) {
	let mut pages = entry.pages.lock().await;

	if page.is_closed() {
		pages.unregister(&page);
		debug!(session = %entry.id, "released page already closed, unregistered");
		return;
	}
	if pages.pool.len() >= cfg.page_pool_max {
		close_and_unregister(&entry.id, &mut pages, page, "pool full").await;
		return;
	}
	if !page_is_healthy(&entry.id, &*page, cfg.health_check_timeout()).await {
		close_and_unregister(&entry.id, &mut pages, page, "unhealthy on release").await;
		return;
	}

	// A page can arrive here without ever passing through `acquire_page`
	// (created directly on the context); parking it makes it managed so
	// teardown is still guaranteed to close it.
	pages.register(page.clone());
	let now = Instant::now();
	pages.pool.push(PooledPage { page, last_used_at: now, last_health_check_at: now });
	debug!(session = %entry.id, pooled = pages.pool.len(), "page parked for reuse");
}

/// Applies the closed/idle-timeout checks over one session's pool, without
/// forcing a health check. Returns how many entries were evicted.
pub(crate) async fn sweep_idle(entry: &SessionEntry, cfg: &PoolConfig) -> usize {
	let mut pages = entry.pages.lock().await;
	let now = Instant::now();
	let mut evicted = 0;

	let mut keep = Vec::with_capacity(pages.pool.len());
	for pooled in pages.pool.drain(..).collect::<Vec<_>>() {
		if pooled.page.is_closed() {
			pages.unregister(&pooled.page);
			evicted += 1;
			continue;
		}
		if now.saturating_duration_since(pooled.last_used_at) > cfg.page_idle_timeout() {
			close_and_unregister(&entry.id, &mut pages, pooled.page, "idle timeout").await;
			evicted += 1;
			continue;
		}
		keep.push(pooled);
	}
	pages.pool = keep;

	if evicted > 0 {
		debug!(session = %entry.id, evicted, "idle page sweep");
	}
	evicted
}

async fn close_and_unregister(session_id: &str, pages: &mut PageState, page: Arc<dyn PageHandle>, why: &str) {
	if let Err(err) = page.close().await {
		warn!(session = %session_id, error = %err, why, "page close failed");
	}
	pages.unregister(&page);
	debug!(session = %session_id, why, "closed pooled page");
}
