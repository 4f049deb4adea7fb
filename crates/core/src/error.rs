use thiserror::Error;

pub type Result<T> = std::result::Result<T, SwarmError>;

#[derive(Debug, Error)]
pub enum SwarmError {
	/// The session's lock chain did not free within budget. This signals a
	/// stuck critical section, not capacity pressure; capacity exhaustion is
	/// reported as [`crate::WorkerAcquire::Unavailable`] instead.
	#[error("lock chain busy for session {session_id}: waited {waited_ms}ms")]
	LockTimeout { session_id: String, waited_ms: u64 },

	#[error("unknown session: {0}")]
	SessionNotFound(String),

	#[error("page creation failed: {0}")]
	PageCreate(#[source] anyhow::Error),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}
