use anyhow::Result;
use async_trait::async_trait;

use crate::events::{TabId, TabInfo, WindowId};

/// The engine's seam to the hosting browser. The production
/// implementation forwards to the connected shim over the bridge
/// socket; tests substitute a mock.
#[async_trait]
pub trait BrowserHost: Send + Sync {
    /// The active tab of the given window, or of the focused window
    /// when `window_id` is `None`. Resolves to `None` when the host
    /// cannot answer.
    async fn active_tab(&self, window_id: Option<WindowId>) -> Result<Option<TabInfo>>;

    /// Point a tab at a different URL.
    async fn redirect(&self, tab_id: TabId, url: &str) -> Result<()>;

    /// Close a tab.
    async fn close_tab(&self, tab_id: TabId) -> Result<()>;

    /// Push settings the host enforces on its side (idle detection
    /// interval).
    async fn configure(&self, idle_threshold_seconds: u32) -> Result<()>;
}
