//! Browser automation capability consumed by capture sessions

use async_trait::async_trait;

use crate::error::VisageResult;

/// Creates fresh, isolated browser contexts. Each context owns its own
/// browser process, so nothing leaks between stories.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> VisageResult<Box<dyn BrowserContext>>;
}

/// One isolated rendering context.
///
/// Dropping a context without calling [`BrowserContext::close`] must still
/// tear it down; the orchestrator relies on this for timeouts and
/// cancellation.
#[async_trait]
pub trait BrowserContext: Send {
    /// Load `url` and wait for the page's load event
    async fn navigate(&mut self, url: &str) -> VisageResult<()>;

    /// Wait until an element matching `selector` is attached to the document
    async fn wait_present(&mut self, selector: &str) -> VisageResult<()>;

    /// Wait until the element is visible and can be interacted with
    async fn wait_ready(&mut self, selector: &str) -> VisageResult<()>;

    /// PNG screenshot clipped to the element
    async fn screenshot_element(&mut self, selector: &str) -> VisageResult<Vec<u8>>;

    /// Evaluate a read-only expression and return its value as text
    async fn evaluate(&mut self, expression: &str) -> VisageResult<String>;

    /// Shut the context down gracefully
    async fn close(self: Box<Self>) -> VisageResult<()>;
}
