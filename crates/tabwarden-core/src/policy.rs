//! Navigation interception: two-tier blocklist checks and one-shot
//! allowance grants.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use url::Url;

use crate::events::TabId;
use crate::hostname;
use crate::matcher;

/// The two pattern lists a navigation is checked against. The hard
/// list always wins, regardless of ordering inside either list.
#[derive(Debug, Clone, Default)]
pub struct BlockLists {
    pub soft: Vec<String>,
    pub hard: Vec<String>,
}

/// Outcome of evaluating one navigation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    SoftBlocked,
    HardBlocked,
}

/// Evaluates top-level navigations and holds the one-shot allowance
/// grants issued by the negotiation UI.
#[derive(Debug, Default)]
pub struct PolicyEngine {
    grants: HashSet<TabId>,
}

impl PolicyEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a one-shot grant: the very next top-level navigation on
    /// this tab passes unchecked.
    pub fn grant(&mut self, tab_id: TabId) {
        log::info!("allowance granted for tab {tab_id}");
        self.grants.insert(tab_id);
    }

    /// Discard a grant whose tab went away before using it.
    pub fn drop_grant(&mut self, tab_id: TabId) {
        if self.grants.remove(&tab_id) {
            log::debug!("dropped unused allowance for closed tab {tab_id}");
        }
    }

    #[must_use]
    pub fn has_grant(&self, tab_id: TabId) -> bool {
        self.grants.contains(&tab_id)
    }

    /// Decide a navigation attempt. Subframe navigations and internal
    /// URLs are never policed; a pending grant is consumed before any
    /// list is consulted; the hard list is checked before the soft
    /// list; an unparseable URL cannot be matched and passes.
    ///
    /// `lists` is only invoked when the blocklists are actually
    /// needed.
    pub fn evaluate(
        &mut self,
        tab_id: TabId,
        url: &str,
        frame_depth: u32,
        lists: impl FnOnce() -> BlockLists,
    ) -> Verdict {
        if frame_depth != 0 || hostname::is_internal(url) {
            return Verdict::Allowed;
        }

        if self.grants.remove(&tab_id) {
            log::info!("consuming one-shot allowance for tab {tab_id}");
            return Verdict::Allowed;
        }

        let Some(host) = hostname::resolve(url) else {
            return Verdict::Allowed;
        };

        let lists = lists();
        if matcher::matches_any(&host, &lists.hard) {
            Verdict::HardBlocked
        } else if matcher::matches_any(&host, &lists.soft) {
            Verdict::SoftBlocked
        } else {
            Verdict::Allowed
        }
    }
}

/// Redirect target for a soft-blocked navigation: the negotiation page
/// with the original URL, the originating tab and a cache-busting
/// timestamp.
pub fn soft_redirect_url(
    page: &str,
    original_url: &str,
    tab_id: TabId,
    now: DateTime<Utc>,
) -> Result<String, url::ParseError> {
    let mut redirect = Url::parse(page)?;
    redirect
        .query_pairs_mut()
        .append_pair("url", original_url)
        .append_pair("tabId", &tab_id.to_string())
        .append_pair("t", &now.timestamp_millis().to_string());
    Ok(redirect.to_string())
}

/// Redirect target for a hard-blocked navigation: the terminal block
/// page. No tab identifier is included; there is no escape path.
pub fn hard_redirect_url(
    page: &str,
    original_url: &str,
    now: DateTime<Utc>,
) -> Result<String, url::ParseError> {
    let mut redirect = Url::parse(page)?;
    redirect
        .query_pairs_mut()
        .append_pair("url", original_url)
        .append_pair("t", &now.timestamp_millis().to_string());
    Ok(redirect.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn lists() -> BlockLists {
        BlockLists {
            soft: vec!["reddit.com".to_string()],
            hard: vec!["x.com".to_string()],
        }
    }

    #[test]
    fn soft_list_blocks_subdomains() {
        let mut policy = PolicyEngine::new();
        assert_eq!(
            policy.evaluate(TabId(1), "https://www.reddit.com/r/foo", 0, lists),
            Verdict::SoftBlocked
        );
    }

    #[test]
    fn hard_list_blocks() {
        let mut policy = PolicyEngine::new();
        assert_eq!(
            policy.evaluate(TabId(1), "https://x.com", 0, lists),
            Verdict::HardBlocked
        );
    }

    #[test]
    fn hard_list_wins_when_both_match() {
        let mut policy = PolicyEngine::new();
        let both = || BlockLists {
            soft: vec!["x.com".to_string()],
            hard: vec!["x.com".to_string()],
        };
        assert_eq!(
            policy.evaluate(TabId(1), "https://sub.x.com/page", 0, both),
            Verdict::HardBlocked
        );
    }

    #[test]
    fn suffix_lookalike_is_allowed() {
        let mut policy = PolicyEngine::new();
        assert_eq!(
            policy.evaluate(TabId(1), "https://reddit.com.evil.com", 0, lists),
            Verdict::Allowed
        );
    }

    #[test]
    fn subframes_are_not_policed() {
        let mut policy = PolicyEngine::new();
        assert_eq!(
            policy.evaluate(TabId(1), "https://x.com/embed", 1, lists),
            Verdict::Allowed
        );
    }

    #[test]
    fn internal_urls_are_not_policed_and_keep_grants() {
        let mut policy = PolicyEngine::new();
        policy.grant(TabId(1));

        // An extension page load must not burn the grant.
        assert_eq!(
            policy.evaluate(TabId(1), "chrome-extension://abc/popup.html", 0, lists),
            Verdict::Allowed
        );
        assert!(policy.has_grant(TabId(1)));
    }

    #[test]
    fn grant_is_single_use() {
        let mut policy = PolicyEngine::new();
        policy.grant(TabId(1));

        assert_eq!(
            policy.evaluate(TabId(1), "https://reddit.com", 0, lists),
            Verdict::Allowed
        );
        assert_eq!(
            policy.evaluate(TabId(1), "https://reddit.com", 0, lists),
            Verdict::SoftBlocked
        );
    }

    #[test]
    fn grant_is_per_tab() {
        let mut policy = PolicyEngine::new();
        policy.grant(TabId(1));

        assert_eq!(
            policy.evaluate(TabId(2), "https://reddit.com", 0, lists),
            Verdict::SoftBlocked
        );
        assert!(policy.has_grant(TabId(1)));
    }

    #[test]
    fn dropped_grant_is_gone() {
        let mut policy = PolicyEngine::new();
        policy.grant(TabId(1));
        policy.drop_grant(TabId(1));

        assert_eq!(
            policy.evaluate(TabId(1), "https://reddit.com", 0, lists),
            Verdict::SoftBlocked
        );
    }

    #[test]
    fn empty_lists_allow_everything() {
        let mut policy = PolicyEngine::new();
        assert_eq!(
            policy.evaluate(TabId(1), "https://reddit.com", 0, BlockLists::default),
            Verdict::Allowed
        );
    }

    #[test]
    fn soft_redirect_carries_url_tab_and_timestamp() {
        let now = Utc.with_ymd_and_hms(2026, 8, 5, 12, 0, 0).unwrap();
        let redirect = soft_redirect_url(
            "chrome-extension://abc/popup.html",
            "https://www.reddit.com/r/foo?sort=top",
            TabId(7),
            now,
        )
        .unwrap();

        let parsed = Url::parse(&redirect).unwrap();
        let pairs: Vec<(String, String)> = parsed
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        // Percent-encoding round-trips the exact original URL.
        assert!(pairs.contains(&(
            "url".to_string(),
            "https://www.reddit.com/r/foo?sort=top".to_string()
        )));
        assert!(pairs.contains(&("tabId".to_string(), "7".to_string())));
        assert!(pairs
            .iter()
            .any(|(k, v)| k == "t" && v == &now.timestamp_millis().to_string()));
    }

    #[test]
    fn hard_redirect_has_no_tab_id() {
        let now = Utc.with_ymd_and_hms(2026, 8, 5, 12, 0, 0).unwrap();
        let redirect =
            hard_redirect_url("chrome-extension://abc/blocked.html", "https://x.com", now)
                .unwrap();

        let parsed = Url::parse(&redirect).unwrap();
        assert!(parsed.query_pairs().all(|(k, _)| k != "tabId"));
        assert!(parsed
            .query_pairs()
            .any(|(k, v)| k == "url" && v == "https://x.com"));
    }
}
