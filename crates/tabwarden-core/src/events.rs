use serde::{Deserialize, Serialize};

/// Host-assigned tab identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TabId(pub u32);

impl std::fmt::Display for TabId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Host-assigned window identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct WindowId(pub u32);

impl std::fmt::Display for WindowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Idle state as reported by the host. A locked screen counts as idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleSignal {
    Active,
    Idle,
    Locked,
}

/// A tab the host reports as active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabInfo {
    pub tab_id: TabId,
    pub window_id: WindowId,
    pub url: String,
}

/// Lifecycle events forwarded by the browser shim.
///
/// The shim delivers these from independent sources (tabs, windows,
/// idle detection, navigation) with no guaranteed relative order; the
/// engine serializes them through a single queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    /// The user switched to a tab. `url` is the activated tab's URL at
    /// the time of the switch, when the shim could read it.
    TabActivated {
        tab_id: TabId,
        previous_tab_id: Option<TabId>,
        url: Option<String>,
    },
    /// A navigation finished loading in a tab.
    NavigationCommitted {
        tab_id: TabId,
        url: String,
        active: bool,
    },
    /// A navigation is about to happen. `frame_depth` is zero for
    /// top-level navigations.
    NavigationStarted {
        tab_id: TabId,
        url: String,
        frame_depth: u32,
    },
    /// A tab was closed.
    TabRemoved { tab_id: TabId },
    /// Window focus moved. `None` means the browser lost focus
    /// entirely.
    WindowFocusChanged { window_id: Option<WindowId> },
    /// The host's idle detector changed state.
    IdleStateChanged { state: IdleSignal },
}

/// Commands pushed back to the browser shim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostCommand {
    /// Point a tab at a different URL.
    Redirect { tab_id: TabId, url: String },
    /// Close a tab.
    CloseTab { tab_id: TabId },
    /// Ask for the active tab. `window_id` limits the query to one
    /// window; `None` means the focused window. The shim answers with
    /// an `active_tab` message carrying the same `request_id`.
    QueryActiveTab {
        window_id: Option<WindowId>,
        request_id: u64,
    },
    /// Push daemon settings the shim needs to enforce host-side.
    Configure { idle_threshold_seconds: u32 },
}
