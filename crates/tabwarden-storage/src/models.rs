use serde::{Deserialize, Serialize};

/// Which of the two pattern lists a rule belongs to.
///
/// `Hard` takes absolute precedence over `Soft` at evaluation time; the
/// tier only selects which list a pattern is stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockTier {
    /// Soft block: navigation is redirected to the negotiation page.
    Soft,
    /// Hard block: navigation is redirected to the terminal block page.
    Hard,
}

impl BlockTier {
    /// Storage key for this tier's pattern list.
    #[must_use]
    pub const fn meta_key(&self) -> &'static str {
        match self {
            Self::Soft => "blocklist",
            Self::Hard => "super_blocklist",
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Soft => "soft",
            Self::Hard => "hard",
        }
    }
}

impl std::fmt::Display for BlockTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Daemon settings, stored as one JSON value in the `meta` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Seconds of inactivity before the host reports the user idle.
    pub idle_threshold_seconds: u32,
    /// Page a soft-blocked navigation is redirected to. The shim
    /// rewrites this at install time with its real extension origin.
    pub soft_block_page: String,
    /// Page a hard-blocked navigation is redirected to.
    pub hard_block_page: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            idle_threshold_seconds: 60,
            soft_block_page: "chrome-extension://tabwarden/popup/popup.html".to_string(),
            hard_block_page: "chrome-extension://tabwarden/popup/blocked.html".to_string(),
        }
    }
}
