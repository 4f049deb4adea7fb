//! Mock handle implementations shared by unit and integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use swarm_handles::{BrowserHandle, DocumentState, PageHandle, PageProbe, PageSource};

/// Scripted behavior for [`MockPage::probe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeBehavior {
	/// Reports a complete document.
	Ready,
	/// Reports a loading document with no structure.
	Unready,
	/// Fails with an error.
	Fail,
	/// Never resolves; exercises the health-check timeout.
	Hang,
}

/// Browser handle counting close calls.
#[derive(Default)]
pub struct MockBrowser {
	closes: AtomicUsize,
	pub fail_close: bool,
}

impl MockBrowser {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// A browser whose close call fails, for cleanup-fault paths.
	pub fn failing() -> Arc<Self> {
		Arc::new(Self { closes: AtomicUsize::new(0), fail_close: true })
	}

	pub fn close_count(&self) -> usize {
		self.closes.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl BrowserHandle for MockBrowser {
	async fn close(&self) -> anyhow::Result<()> {
		self.closes.fetch_add(1, Ordering::SeqCst);
		if self.fail_close {
			anyhow::bail!("mock browser refused to close");
		}
		Ok(())
	}
}

/// Page handle with scriptable probe behavior and close accounting.
pub struct MockPage {
	closed: Mutex<bool>,
	closes: AtomicUsize,
	probe: Mutex<ProbeBehavior>,
	supports_probe: bool,
}

impl MockPage {
	pub fn new() -> Arc<Self> {
		Arc::new(Self {
			closed: Mutex::new(false),
			closes: AtomicUsize::new(0),
			probe: Mutex::new(ProbeBehavior::Ready),
			supports_probe: true,
		})
	}

	/// A page without inspection capability (trivially healthy).
	pub fn without_probe() -> Arc<Self> {
		Arc::new(Self {
			closed: Mutex::new(false),
			closes: AtomicUsize::new(0),
			probe: Mutex::new(ProbeBehavior::Ready),
			supports_probe: false,
		})
	}

	pub fn set_probe(&self, behavior: ProbeBehavior) {
		*self.probe.lock().unwrap_or_else(|e| e.into_inner()) = behavior;
	}

	pub fn mark_closed(&self) {
		*self.closed.lock().unwrap_or_else(|e| e.into_inner()) = true;
	}

	pub fn close_count(&self) -> usize {
		self.closes.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl PageHandle for MockPage {
	async fn close(&self) -> anyhow::Result<()> {
		self.closes.fetch_add(1, Ordering::SeqCst);
		self.mark_closed();
		Ok(())
	}

	fn is_closed(&self) -> bool {
		*self.closed.lock().unwrap_or_else(|e| e.into_inner())
	}

	fn supports_probe(&self) -> bool {
		self.supports_probe
	}

	async fn probe(&self) -> anyhow::Result<PageProbe> {
		let behavior = *self.probe.lock().unwrap_or_else(|e| e.into_inner());
		match behavior {
			ProbeBehavior::Ready => Ok(PageProbe {
				document_state: DocumentState::Complete,
				has_root: true,
			}),
			ProbeBehavior::Unready => Ok(PageProbe {
				document_state: DocumentState::Loading,
				has_root: false,
			}),
			ProbeBehavior::Fail => anyhow::bail!("mock probe failure"),
			ProbeBehavior::Hang => {
				std::future::pending::<()>().await;
				unreachable!()
			}
		}
	}
}

/// Page source tracking every page it created.
#[derive(Default)]
pub struct MockPageSource {
	created: Mutex<Vec<Arc<MockPage>>>,
}

impl MockPageSource {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn created_count(&self) -> usize {
		self.created.lock().unwrap_or_else(|e| e.into_inner()).len()
	}

	pub fn created(&self) -> Vec<Arc<MockPage>> {
		self.created.lock().unwrap_or_else(|e| e.into_inner()).clone()
	}
}

#[async_trait]
impl PageSource for MockPageSource {
	async fn create_page(&self) -> anyhow::Result<Arc<dyn PageHandle>> {
		let page = MockPage::new();
		self.created
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.push(page.clone());
		Ok(page)
	}
}

/// Page source that always fails, for creation-error paths.
pub struct FailingPageSource;

#[async_trait]
impl PageSource for FailingPageSource {
	async fn create_page(&self) -> anyhow::Result<Arc<dyn PageHandle>> {
		anyhow::bail!("mock context cannot create pages")
	}
}
