//! The event engine: one task owning every piece of mutable state.
//!
//! Lifecycle events, UI requests and control requests arrive from
//! independent sources with no guaranteed relative order. They all
//! funnel through one channel and are applied one at a time, so
//! ordering-sensitive invariants (flush-before-replace, the atomic
//! idle flush, torn-read freedom) hold regardless of arrival order.

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use tokio::sync::{mpsc, oneshot};

use tabwarden_storage::{BlockTier, Settings, Store};

use crate::events::{HostEvent, IdleSignal, TabId, WindowId};
use crate::facade::{self, UiRequest, UiResponse};
use crate::host::BrowserHost;
use crate::hostname;
use crate::ipc::{IpcRequest, IpcResponse};
use crate::ledger::UsageLedger;
use crate::policy::{self, BlockLists, PolicyEngine, Verdict};
use crate::tracker::{ActivityTracker, IdleTransition};

/// Everything the engine processes, from any source.
#[derive(Debug)]
pub enum Envelope {
    /// A lifecycle event from the browser shim.
    Host(HostEvent),
    /// A request from one of the shim's UI pages.
    Ui(UiRequest, oneshot::Sender<UiResponse>),
    /// A request from the control socket.
    Ipc(IpcRequest, oneshot::Sender<IpcResponse>),
    /// A shim (re)connected to the bridge socket.
    BridgeConnected,
}

enum Flow {
    Continue,
    Stop,
}

/// The stateful service instance constructed at process start; all
/// external events route into this one instance.
pub struct Engine {
    store: Store,
    host: Box<dyn BrowserHost>,
    tracker: ActivityTracker,
    policy: PolicyEngine,
    rx: mpsc::UnboundedReceiver<Envelope>,
    started_at: DateTime<Utc>,
}

impl Engine {
    /// The single inbound queue feeding an engine.
    #[must_use]
    pub fn channel() -> (
        mpsc::UnboundedSender<Envelope>,
        mpsc::UnboundedReceiver<Envelope>,
    ) {
        mpsc::unbounded_channel()
    }

    #[must_use]
    pub fn new(store: Store, host: Box<dyn BrowserHost>, rx: mpsc::UnboundedReceiver<Envelope>) -> Self {
        let ledger = UsageLedger::load(&store, Local::now().date_naive());
        Self {
            tracker: ActivityTracker::new(ledger),
            policy: PolicyEngine::new(),
            store,
            host,
            rx,
            started_at: Utc::now(),
        }
    }

    /// Process envelopes until a shutdown request, Ctrl-C, or every
    /// sender is gone. Open sessions are flushed before returning.
    pub async fn run(&mut self) -> Result<()> {
        log::info!("engine started");

        loop {
            tokio::select! {
                envelope = self.rx.recv() => {
                    match envelope {
                        Some(envelope) => {
                            if matches!(self.dispatch(envelope).await, Flow::Stop) {
                                log::info!("shutdown requested over control socket");
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    log::info!("received Ctrl-C, shutting down...");
                    break;
                }
            }
        }

        self.tracker.stop_all(&self.store, Utc::now());
        log::info!("engine shut down gracefully");
        Ok(())
    }

    async fn dispatch(&mut self, envelope: Envelope) -> Flow {
        match envelope {
            Envelope::Host(event) => {
                // A failing handler must not block subsequent events.
                if let Err(e) = self.handle_host_event(event).await {
                    log::error!("event handler failed: {e:#}");
                }
                Flow::Continue
            }
            Envelope::Ui(request, reply) => {
                let response = self.handle_ui(request).await;
                let _ = reply.send(response);
                Flow::Continue
            }
            Envelope::Ipc(IpcRequest::Shutdown, reply) => {
                let _ = reply.send(IpcResponse::Shutdown);
                Flow::Stop
            }
            Envelope::Ipc(request, reply) => {
                let _ = reply.send(self.handle_ipc(&request));
                Flow::Continue
            }
            Envelope::BridgeConnected => {
                let settings = self.load_settings();
                if let Err(e) = self.host.configure(settings.idle_threshold_seconds).await {
                    log::warn!("failed to push settings to shim: {e}");
                }
                Flow::Continue
            }
        }
    }

    async fn handle_host_event(&mut self, event: HostEvent) -> Result<()> {
        match event {
            HostEvent::TabActivated {
                tab_id,
                previous_tab_id,
                url,
            } => {
                self.on_tab_activated(tab_id, previous_tab_id, url.as_deref());
                Ok(())
            }
            HostEvent::NavigationCommitted { tab_id, url, active } => {
                self.on_navigation_committed(tab_id, &url, active);
                Ok(())
            }
            HostEvent::NavigationStarted {
                tab_id,
                url,
                frame_depth,
            } => self.on_navigation_started(tab_id, &url, frame_depth).await,
            HostEvent::TabRemoved { tab_id } => {
                self.on_tab_removed(tab_id);
                Ok(())
            }
            HostEvent::WindowFocusChanged { window_id } => self.on_focus_changed(window_id).await,
            HostEvent::IdleStateChanged { state } => self.on_idle_changed(state).await,
        }
    }

    fn on_tab_activated(&mut self, tab_id: TabId, previous: Option<TabId>, url: Option<&str>) {
        let now = Utc::now();
        if let Some(previous) = previous {
            self.tracker.stop(&self.store, previous, now);
        }
        if let Some(host) = url.and_then(hostname::resolve) {
            self.tracker.start(&self.store, tab_id, host, now);
        }
    }

    fn on_navigation_committed(&mut self, tab_id: TabId, url: &str, active: bool) {
        if !active {
            return;
        }
        if let Some(host) = hostname::resolve(url) {
            self.tracker.start(&self.store, tab_id, host, Utc::now());
        }
    }

    async fn on_navigation_started(
        &mut self,
        tab_id: TabId,
        url: &str,
        frame_depth: u32,
    ) -> Result<()> {
        let store = &self.store;
        let verdict = self
            .policy
            .evaluate(tab_id, url, frame_depth, || load_lists(store));

        match verdict {
            Verdict::Allowed => Ok(()),
            Verdict::SoftBlocked => {
                let settings = self.load_settings();
                let redirect =
                    policy::soft_redirect_url(&settings.soft_block_page, url, tab_id, Utc::now())?;
                log::info!("soft-blocking tab {tab_id}: {url}");
                self.host.redirect(tab_id, &redirect).await
            }
            Verdict::HardBlocked => {
                let settings = self.load_settings();
                let redirect =
                    policy::hard_redirect_url(&settings.hard_block_page, url, Utc::now())?;
                log::info!("hard-blocking tab {tab_id}: {url}");
                self.host.redirect(tab_id, &redirect).await
            }
        }
    }

    fn on_tab_removed(&mut self, tab_id: TabId) {
        self.tracker.stop(&self.store, tab_id, Utc::now());
        self.policy.drop_grant(tab_id);
    }

    async fn on_focus_changed(&mut self, window_id: Option<WindowId>) -> Result<()> {
        match window_id {
            None => {
                self.tracker.stop_all(&self.store, Utc::now());
                Ok(())
            }
            Some(window_id) => self.restart_active(Some(window_id)).await,
        }
    }

    async fn on_idle_changed(&mut self, signal: IdleSignal) -> Result<()> {
        match self.tracker.set_idle(&self.store, signal, Utc::now()) {
            IdleTransition::BecameActive => self.restart_active(None).await,
            IdleTransition::BecameIdle | IdleTransition::Unchanged => Ok(()),
        }
    }

    /// Resume tracking for the host-reported active tab. The host
    /// query is a suspension point; the idle state is re-checked after
    /// the await before any session starts.
    async fn restart_active(&mut self, window_id: Option<WindowId>) -> Result<()> {
        let tab = self.host.active_tab(window_id).await?;
        if !self.tracker.is_active() {
            return Ok(());
        }
        if let Some(tab) = tab {
            if let Some(host) = hostname::resolve(&tab.url) {
                self.tracker.start(&self.store, tab.tab_id, host, Utc::now());
            }
        }
        Ok(())
    }

    async fn handle_ui(&mut self, request: UiRequest) -> UiResponse {
        match request {
            UiRequest::GetTimeSpent { hostname } => {
                let ms = self.tracker.elapsed(&hostname, Utc::now());
                UiResponse::TimeSpent {
                    time_spent: facade::format_duration(ms),
                    ms,
                }
            }
            UiRequest::AllowSite { tab_id, url } => {
                self.policy.grant(tab_id);
                if let Err(e) = self.host.redirect(tab_id, &url).await {
                    log::error!("failed to navigate allowed tab {tab_id}: {e}");
                }
                UiResponse::Success { success: true }
            }
            UiRequest::CloseTab { tab_id } => {
                if let Err(e) = self.host.close_tab(tab_id).await {
                    log::error!("failed to close tab {tab_id}: {e}");
                }
                UiResponse::Success { success: true }
            }
        }
    }

    fn handle_ipc(&self, request: &IpcRequest) -> IpcResponse {
        match request {
            IpcRequest::Status | IpcRequest::Shutdown => {
                let now = Utc::now();
                IpcResponse::Status {
                    running: true,
                    idle: !self.tracker.is_active(),
                    tracked_tabs: self.tracker.tracked_count(),
                    today_total_ms: self.tracker.today_total(now),
                    uptime_seconds: u64::try_from(
                        now.signed_duration_since(self.started_at).num_seconds(),
                    )
                    .unwrap_or(0),
                }
            }
            IpcRequest::TimeSpent { hostname } => {
                let ms = self.tracker.elapsed(hostname, Utc::now());
                IpcResponse::TimeSpent {
                    formatted: facade::format_duration(ms),
                    ms,
                }
            }
            IpcRequest::UsageToday => IpcResponse::UsageToday {
                usage: self.tracker.usage_today(Utc::now()),
            },
        }
    }

    fn load_settings(&self) -> Settings {
        self.store.settings().unwrap_or_else(|e| {
            log::warn!("failed to read settings, using defaults: {e}");
            Settings::default()
        })
    }
}

/// Read both pattern lists; a failed read is non-fatal and evaluates
/// as an empty list (navigation fails open).
fn load_lists(store: &Store) -> BlockLists {
    BlockLists {
        soft: store.block_patterns(BlockTier::Soft).unwrap_or_else(|e| {
            log::warn!("failed to read blocklist: {e}");
            Vec::new()
        }),
        hard: store.block_patterns(BlockTier::Hard).unwrap_or_else(|e| {
            log::warn!("failed to read super blocklist: {e}");
            Vec::new()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TabInfo;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;
    use url::Url;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum HostCall {
        Redirect(TabId, String),
        Close(TabId),
        Configure(u32),
    }

    #[derive(Clone, Default)]
    struct MockHost {
        calls: Arc<Mutex<Vec<HostCall>>>,
        active: Arc<Mutex<Option<TabInfo>>>,
    }

    impl MockHost {
        fn calls(&self) -> Vec<HostCall> {
            self.calls.lock().unwrap().clone()
        }

        fn set_active(&self, tab: Option<TabInfo>) {
            *self.active.lock().unwrap() = tab;
        }
    }

    #[async_trait]
    impl BrowserHost for MockHost {
        async fn active_tab(&self, _window_id: Option<WindowId>) -> Result<Option<TabInfo>> {
            Ok(self.active.lock().unwrap().clone())
        }

        async fn redirect(&self, tab_id: TabId, url: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(HostCall::Redirect(tab_id, url.to_string()));
            Ok(())
        }

        async fn close_tab(&self, tab_id: TabId) -> Result<()> {
            self.calls.lock().unwrap().push(HostCall::Close(tab_id));
            Ok(())
        }

        async fn configure(&self, idle_threshold_seconds: u32) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(HostCall::Configure(idle_threshold_seconds));
            Ok(())
        }
    }

    fn engine_with(dir: &TempDir) -> (Engine, MockHost) {
        let store = Store::new(Some(dir.path().join("test.db"))).unwrap();
        let host = MockHost::default();
        let (_tx, rx) = Engine::channel();
        let engine = Engine::new(store, Box::new(host.clone()), rx);
        (engine, host)
    }

    fn redirect_query(url: &str) -> Vec<(String, String)> {
        Url::parse(url)
            .unwrap()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[tokio::test]
    async fn soft_block_redirects_to_negotiation_page() {
        let dir = TempDir::new().unwrap();
        let (mut engine, host) = engine_with(&dir);
        engine
            .store
            .set_block_patterns(BlockTier::Soft, &["reddit.com".to_string()])
            .unwrap();

        engine
            .handle_host_event(HostEvent::NavigationStarted {
                tab_id: TabId(1),
                url: "https://www.reddit.com/r/foo".to_string(),
                frame_depth: 0,
            })
            .await
            .unwrap();

        let calls = host.calls();
        assert_eq!(calls.len(), 1);
        let HostCall::Redirect(tab_id, redirect) = &calls[0] else {
            panic!("expected redirect, got {calls:?}");
        };
        assert_eq!(*tab_id, TabId(1));
        assert!(redirect.starts_with(&Settings::default().soft_block_page));

        let pairs = redirect_query(redirect);
        assert!(pairs.contains(&(
            "url".to_string(),
            "https://www.reddit.com/r/foo".to_string()
        )));
        assert!(pairs.contains(&("tabId".to_string(), "1".to_string())));
    }

    #[tokio::test]
    async fn hard_block_wins_and_offers_no_escape() {
        let dir = TempDir::new().unwrap();
        let (mut engine, host) = engine_with(&dir);
        engine
            .store
            .set_block_patterns(BlockTier::Soft, &["x.com".to_string()])
            .unwrap();
        engine
            .store
            .set_block_patterns(BlockTier::Hard, &["x.com".to_string()])
            .unwrap();

        engine
            .handle_host_event(HostEvent::NavigationStarted {
                tab_id: TabId(2),
                url: "https://x.com".to_string(),
                frame_depth: 0,
            })
            .await
            .unwrap();

        let calls = host.calls();
        assert_eq!(calls.len(), 1);
        let HostCall::Redirect(_, redirect) = &calls[0] else {
            panic!("expected redirect, got {calls:?}");
        };
        assert!(redirect.starts_with(&Settings::default().hard_block_page));
        assert!(redirect_query(redirect).iter().all(|(k, _)| k != "tabId"));
    }

    #[tokio::test]
    async fn suffix_lookalike_navigates_freely() {
        let dir = TempDir::new().unwrap();
        let (mut engine, host) = engine_with(&dir);
        engine
            .store
            .set_block_patterns(BlockTier::Soft, &["reddit.com".to_string()])
            .unwrap();

        engine
            .handle_host_event(HostEvent::NavigationStarted {
                tab_id: TabId(1),
                url: "https://reddit.com.evil.com".to_string(),
                frame_depth: 0,
            })
            .await
            .unwrap();

        assert!(host.calls().is_empty());
    }

    #[tokio::test]
    async fn subframe_navigation_is_ignored() {
        let dir = TempDir::new().unwrap();
        let (mut engine, host) = engine_with(&dir);
        engine
            .store
            .set_block_patterns(BlockTier::Hard, &["x.com".to_string()])
            .unwrap();

        engine
            .handle_host_event(HostEvent::NavigationStarted {
                tab_id: TabId(1),
                url: "https://x.com/embedded".to_string(),
                frame_depth: 2,
            })
            .await
            .unwrap();

        assert!(host.calls().is_empty());
    }

    #[tokio::test]
    async fn allow_site_bypasses_exactly_one_navigation() {
        let dir = TempDir::new().unwrap();
        let (mut engine, host) = engine_with(&dir);
        engine
            .store
            .set_block_patterns(BlockTier::Soft, &["reddit.com".to_string()])
            .unwrap();

        let response = engine
            .handle_ui(UiRequest::AllowSite {
                tab_id: TabId(3),
                url: "https://reddit.com".to_string(),
            })
            .await;
        assert_eq!(response, UiResponse::Success { success: true });
        // The allow itself navigates the tab to the original URL.
        assert_eq!(
            host.calls(),
            vec![HostCall::Redirect(
                TabId(3),
                "https://reddit.com".to_string()
            )]
        );

        // First navigation consumes the grant: no block redirect.
        engine
            .handle_host_event(HostEvent::NavigationStarted {
                tab_id: TabId(3),
                url: "https://reddit.com".to_string(),
                frame_depth: 0,
            })
            .await
            .unwrap();
        assert_eq!(host.calls().len(), 1);

        // Second navigation is policy-checked again.
        engine
            .handle_host_event(HostEvent::NavigationStarted {
                tab_id: TabId(3),
                url: "https://reddit.com".to_string(),
                frame_depth: 0,
            })
            .await
            .unwrap();
        assert_eq!(host.calls().len(), 2);
    }

    #[tokio::test]
    async fn closing_a_tab_drops_its_grant() {
        let dir = TempDir::new().unwrap();
        let (mut engine, host) = engine_with(&dir);
        engine
            .store
            .set_block_patterns(BlockTier::Soft, &["reddit.com".to_string()])
            .unwrap();

        engine
            .handle_ui(UiRequest::AllowSite {
                tab_id: TabId(3),
                url: "https://reddit.com".to_string(),
            })
            .await;
        engine
            .handle_host_event(HostEvent::TabRemoved { tab_id: TabId(3) })
            .await
            .unwrap();

        // A reused tab id starts with a clean slate.
        engine
            .handle_host_event(HostEvent::NavigationStarted {
                tab_id: TabId(3),
                url: "https://reddit.com".to_string(),
                frame_depth: 0,
            })
            .await
            .unwrap();

        let calls = host.calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(&calls[1], HostCall::Redirect(_, url) if url.contains("tabId=3")));
    }

    #[tokio::test]
    async fn activation_tracks_and_reports_time() {
        let dir = TempDir::new().unwrap();
        let (mut engine, _host) = engine_with(&dir);

        engine
            .handle_host_event(HostEvent::TabActivated {
                tab_id: TabId(1),
                previous_tab_id: None,
                url: Some("https://www.example.com/page".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(engine.tracker.tracked_count(), 1);

        let response = engine
            .handle_ui(UiRequest::GetTimeSpent {
                hostname: "example.com".to_string(),
            })
            .await;
        let UiResponse::TimeSpent { time_spent, .. } = response else {
            panic!("expected time response");
        };
        assert!(time_spent.ends_with('s'));

        // Switching away flushes tab 1 and tracks tab 2.
        engine
            .handle_host_event(HostEvent::TabActivated {
                tab_id: TabId(2),
                previous_tab_id: Some(TabId(1)),
                url: Some("https://news.ycombinator.com".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(engine.tracker.tracked_count(), 1);
    }

    #[tokio::test]
    async fn internal_pages_are_not_tracked() {
        let dir = TempDir::new().unwrap();
        let (mut engine, _host) = engine_with(&dir);

        engine
            .handle_host_event(HostEvent::TabActivated {
                tab_id: TabId(1),
                previous_tab_id: None,
                url: Some("chrome://settings".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(engine.tracker.tracked_count(), 0);
    }

    #[tokio::test]
    async fn idle_return_resumes_the_active_tab() {
        let dir = TempDir::new().unwrap();
        let (mut engine, host) = engine_with(&dir);
        host.set_active(Some(TabInfo {
            tab_id: TabId(5),
            window_id: WindowId(1),
            url: "https://reddit.com/r/rust".to_string(),
        }));

        engine
            .handle_host_event(HostEvent::IdleStateChanged {
                state: IdleSignal::Idle,
            })
            .await
            .unwrap();
        assert_eq!(engine.tracker.tracked_count(), 0);

        engine
            .handle_host_event(HostEvent::IdleStateChanged {
                state: IdleSignal::Active,
            })
            .await
            .unwrap();
        assert_eq!(engine.tracker.tracked_count(), 1);
    }

    #[tokio::test]
    async fn focus_loss_flushes_all_sessions() {
        let dir = TempDir::new().unwrap();
        let (mut engine, _host) = engine_with(&dir);

        engine
            .handle_host_event(HostEvent::TabActivated {
                tab_id: TabId(1),
                previous_tab_id: None,
                url: Some("https://example.com".to_string()),
            })
            .await
            .unwrap();
        engine
            .handle_host_event(HostEvent::WindowFocusChanged { window_id: None })
            .await
            .unwrap();

        assert_eq!(engine.tracker.tracked_count(), 0);
    }

    #[tokio::test]
    async fn bridge_connect_pushes_settings() {
        let dir = TempDir::new().unwrap();
        let (mut engine, host) = engine_with(&dir);

        let flow = engine.dispatch(Envelope::BridgeConnected).await;
        assert!(matches!(flow, Flow::Continue));
        assert_eq!(host.calls(), vec![HostCall::Configure(60)]);
    }

    #[tokio::test]
    async fn status_reports_tracked_state() {
        let dir = TempDir::new().unwrap();
        let (mut engine, _host) = engine_with(&dir);

        engine
            .handle_host_event(HostEvent::TabActivated {
                tab_id: TabId(1),
                previous_tab_id: None,
                url: Some("https://example.com".to_string()),
            })
            .await
            .unwrap();

        let IpcResponse::Status {
            running,
            idle,
            tracked_tabs,
            ..
        } = engine.handle_ipc(&IpcRequest::Status)
        else {
            panic!("expected status response");
        };
        assert!(running);
        assert!(!idle);
        assert_eq!(tracked_tabs, 1);
    }
}
