//! Session, worker-slot, and page pooling for concurrent browser automation.
//!
//! Each session pairs one exclusively-owned browser handle with a fixed
//! array of worker slots (the concurrency ceiling for that browser) and a
//! pool of reusable page handles. [`SessionPool`] atomically occupies and
//! releases slots through a per-session lock chain, queues bounded,
//! timeout-guarded waiters when a session is saturated, health-checks pooled
//! pages before reuse, and periodically evicts sessions that have gone idle.
//!
//! Callers supply browsers and pages behind the capability traits in
//! [`swarm_handles`]; the pool never launches or drives anything itself.
//!
//! ```no_run
//! use std::sync::Arc;
//! use swarm::{PoolConfig, SessionPool, WorkerAcquire};
//!
//! # async fn demo(browser: Arc<dyn swarm_handles::BrowserHandle>) -> swarm::Result<()> {
//! let pool = SessionPool::new(PoolConfig::default());
//! pool.start();
//!
//! let session = pool.add_session(browser, None);
//! if let WorkerAcquire::Acquired(lease) = pool.acquire_worker(&session, "reply-task", None).await? {
//!     // ... drive the browser ...
//!     pool.release_worker(&lease.session_id, lease.worker_id).await?;
//! }
//! pool.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
mod lock;
pub mod manager;
mod pages;
pub mod persist;
pub mod session;
mod sweeper;
pub mod testing;

pub use config::PoolConfig;
pub use error::{Result, SwarmError};
pub use manager::SessionPool;
pub use persist::{PersistedState, SessionRecord};
pub use session::{
	SessionMetadata, StuckWorker, WorkerAcquire, WorkerLease, WorkerOccupancy, WorkerSnapshot,
	WorkerStatus,
};

pub use swarm_handles::{
	BrowserHandle, BrowserInfo, DocumentState, PageHandle, PageProbe, PageSource,
};
