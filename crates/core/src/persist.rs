//! Metadata-only persistence for id continuity across restarts.
//!
//! Live browser and page handles cannot survive a restart, so the snapshot
//! carries only session metadata and the next-id counter. Loading restores
//! the counter; everything else exists for post-hoc diagnostics.

use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use swarm_handles::BrowserInfo;

use crate::error::Result;
use crate::session::WorkerSnapshot;

/// Persisted view of one session: id, registration info, worker snapshot,
/// timestamps. Never live handles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
	pub id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub info: Option<BrowserInfo>,
	#[serde(default)]
	pub workers: Vec<WorkerSnapshot>,
	/// Unix epoch milliseconds.
	pub created_at: u64,
	/// Unix epoch milliseconds.
	pub last_activity: u64,
}

/// On-disk snapshot shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
	#[serde(default)]
	pub sessions: Vec<SessionRecord>,
	pub next_session_id: u64,
	/// Unix epoch milliseconds.
	pub saved_at: u64,
}

/// Current wall-clock time as epoch milliseconds.
pub(crate) fn epoch_ms() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_millis() as u64)
		.unwrap_or(0)
}

/// Loads JSON state, treating a missing or unreadable file as absent.
pub(crate) fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
	fs::read_to_string(path)
		.ok()
		.and_then(|content| serde_json::from_str(&content).ok())
}

pub(crate) fn save_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent)?;
	}
	fs::write(path, serde_json::to_string_pretty(data)?)?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::session::WorkerStatus;
	use tempfile::TempDir;

	fn sample_state() -> PersistedState {
		PersistedState {
			sessions: vec![SessionRecord {
				id: "session-1".into(),
				info: Some(BrowserInfo { kind: Some("chromium".into()), ..Default::default() }),
				workers: vec![WorkerSnapshot {
					id: 0,
					status: WorkerStatus::Busy,
					busy_ms: Some(1200),
					context: Some("reply-task".into()),
				}],
				created_at: 1_700_000_000_000,
				last_activity: 1_700_000_060_000,
			}],
			next_session_id: 2,
			saved_at: 1_700_000_061_000,
		}
	}

	#[test]
	fn state_round_trips_through_disk() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("nested/state.json");

		let state = sample_state();
		save_json(&path, &state).unwrap();
		let loaded: PersistedState = load_json(&path).unwrap();
		assert_eq!(loaded, state);
	}

	#[test]
	fn missing_or_corrupt_file_loads_as_none() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("state.json");
		assert!(load_json::<PersistedState>(&path).is_none());

		fs::write(&path, "not json at all").unwrap();
		assert!(load_json::<PersistedState>(&path).is_none());
	}

	#[test]
	fn snapshot_uses_camel_case_keys() {
		let json = serde_json::to_string(&sample_state()).unwrap();
		assert!(json.contains("\"nextSessionId\""));
		assert!(json.contains("\"lastActivity\""));
		assert!(json.contains("\"busyMs\""));
	}
}
