//! Capability contract between the session pool and its browser collaborators.
//!
//! The pool never launches browsers or drives pages itself; callers hand it
//! opaque handles that satisfy these traits. A [`BrowserHandle`] only needs to
//! be closable. A [`PageHandle`] additionally reports whether it is closed and
//! may expose an in-page probe used by pool health checks. A [`PageSource`]
//! (typically a browser context) creates fresh pages when the pool runs dry.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Document readiness reported by an in-page probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
	Loading,
	Interactive,
	Complete,
}

/// Result of an in-page health probe.
#[derive(Debug, Clone, Copy)]
pub struct PageProbe {
	pub document_state: DocumentState,
	/// Whether the document has a root element attached.
	pub has_root: bool,
}

impl PageProbe {
	/// A page passes its health check when the document has finished (or is
	/// finishing) loading, or when basic structure is present.
	pub fn is_ready(&self) -> bool {
		matches!(
			self.document_state,
			DocumentState::Interactive | DocumentState::Complete
		) || self.has_root
	}
}

/// Descriptive metadata registered alongside a browser handle.
///
/// Everything here is optional; the pool persists it verbatim for diagnostics
/// and id continuity, never to reconstruct live handles.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BrowserInfo {
	/// Caller-preferred session id; the pool generates one when absent.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
	/// Browser engine name (e.g. "chromium").
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub kind: Option<String>,
	/// Remote-debugging or driver endpoint, when known.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub endpoint: Option<String>,
	/// Profile or account label the session is operating as.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub profile: Option<String>,
}

/// A browser owned exclusively by one pool session.
#[async_trait]
pub trait BrowserHandle: Send + Sync {
	async fn close(&self) -> anyhow::Result<()>;
}

/// A page the pool may park, reuse, health-check, and eventually close.
#[async_trait]
pub trait PageHandle: Send + Sync {
	async fn close(&self) -> anyhow::Result<()>;

	fn is_closed(&self) -> bool;

	/// Whether [`PageHandle::probe`] is meaningful for this handle. Handles
	/// without inspection capability are treated as trivially healthy.
	fn supports_probe(&self) -> bool {
		true
	}

	/// In-page state query used by pool health checks.
	async fn probe(&self) -> anyhow::Result<PageProbe>;
}

/// Creates new pages when the pool has nothing reusable.
///
/// Usually backed by a browser context so created pages share its cookies
/// and storage.
#[async_trait]
pub trait PageSource: Send + Sync {
	async fn create_page(&self) -> anyhow::Result<Arc<dyn PageHandle>>;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn probe_ready_on_finished_document() {
		let probe = PageProbe { document_state: DocumentState::Complete, has_root: false };
		assert!(probe.is_ready());
		let probe = PageProbe { document_state: DocumentState::Interactive, has_root: false };
		assert!(probe.is_ready());
	}

	#[test]
	fn probe_ready_on_structure_alone() {
		let probe = PageProbe { document_state: DocumentState::Loading, has_root: true };
		assert!(probe.is_ready());
	}

	#[test]
	fn probe_unready_when_loading_without_root() {
		let probe = PageProbe { document_state: DocumentState::Loading, has_root: false };
		assert!(!probe.is_ready());
	}

	#[test]
	fn browser_info_roundtrips_camel_case() {
		let info = BrowserInfo {
			session_id: Some("bot-7".into()),
			kind: Some("chromium".into()),
			..Default::default()
		};
		let json = serde_json::to_string(&info).unwrap();
		assert!(json.contains("\"sessionId\":\"bot-7\""));
		let back: BrowserInfo = serde_json::from_str(&json).unwrap();
		assert_eq!(back, info);
	}
}
