//! Operations exposed to the shim's UI pages (popup, negotiation and
//! block pages), plus the duration formatting they display.

use serde::{Deserialize, Serialize};

use crate::events::TabId;

/// A request from a UI page, tagged by `action` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum UiRequest {
    /// Today's time on a hostname, formatted and raw.
    #[serde(rename_all = "camelCase")]
    GetTimeSpent { hostname: String },
    /// The negotiation UI let the user through: grant a one-shot
    /// bypass and navigate the tab to the original URL.
    #[serde(rename_all = "camelCase")]
    AllowSite { tab_id: TabId, url: String },
    /// Close the calling tab (the block page's only exit).
    #[serde(rename_all = "camelCase")]
    CloseTab { tab_id: TabId },
}

/// Response to a [`UiRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UiResponse {
    #[serde(rename_all = "camelCase")]
    TimeSpent { time_spent: String, ms: u64 },
    Success { success: bool },
}

/// Format a millisecond total the way the UI displays it: seconds
/// under a minute, whole minutes under an hour, hours and minutes
/// beyond.
#[must_use]
pub fn format_duration(ms: u64) -> String {
    if ms < 60_000 {
        format!("{}s", ms / 1_000)
    } else if ms < 3_600_000 {
        format!("{}m", ms / 60_000)
    } else {
        format!("{}h {}m", ms / 3_600_000, (ms % 3_600_000) / 60_000)
    }
}
