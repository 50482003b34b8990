//! Transport for the browser shim: newline-delimited JSON over a unix
//! socket. The shim forwards lifecycle events and UI-page requests
//! inbound; commands and responses flow outbound. One shim connection
//! is live at a time; a reconnect supersedes the previous writer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use std::{fs, io, path::Path};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        unix::{OwnedReadHalf, OwnedWriteHalf},
        UnixListener,
    },
    sync::{mpsc, oneshot, Mutex},
};

use crate::engine::Envelope;
use crate::events::{HostCommand, HostEvent, TabId, TabInfo, WindowId};
use crate::facade::{UiRequest, UiResponse};
use crate::host::BrowserHost;

/// How long to wait for the shim to answer an active-tab query before
/// treating the answer as unknown.
const QUERY_TIMEOUT: Duration = Duration::from_millis(750);

/// A line from the shim.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeIn {
    /// A lifecycle event.
    Event(HostEvent),
    /// A request from a UI page; `id` correlates the response.
    Request {
        id: u64,
        #[serde(flatten)]
        request: UiRequest,
    },
    /// Answer to a [`HostCommand::QueryActiveTab`].
    ActiveTab {
        request_id: u64,
        tab: Option<TabInfo>,
    },
}

/// A line to the shim.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeOut {
    Command(HostCommand),
    Response {
        id: u64,
        #[serde(flatten)]
        body: UiResponse,
    },
}

#[derive(Default)]
struct Shared {
    outbound: Mutex<Option<mpsc::UnboundedSender<BridgeOut>>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Option<TabInfo>>>>,
    next_request: AtomicU64,
}

/// [`BrowserHost`] implementation backed by the connected shim. Cheap
/// to clone; all clones share the connection slot.
#[derive(Clone, Default)]
pub struct BridgeHost {
    inner: Arc<Shared>,
}

impl BridgeHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn attach(&self, tx: mpsc::UnboundedSender<BridgeOut>) {
        *self.inner.outbound.lock().await = Some(tx);
        // Queries addressed to a previous shim can never be answered.
        self.inner.pending.lock().await.clear();
    }

    async fn send(&self, message: BridgeOut) -> bool {
        let guard = self.inner.outbound.lock().await;
        match guard.as_ref() {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    async fn respond(&self, id: u64, body: UiResponse) {
        if !self.send(BridgeOut::Response { id, body }).await {
            log::warn!("shim went away before response {id} could be delivered");
        }
    }

    async fn resolve_query(&self, request_id: u64, tab: Option<TabInfo>) {
        if let Some(reply) = self.inner.pending.lock().await.remove(&request_id) {
            let _ = reply.send(tab);
        }
    }
}

#[async_trait]
impl BrowserHost for BridgeHost {
    async fn active_tab(&self, window_id: Option<WindowId>) -> Result<Option<TabInfo>> {
        let request_id = self.inner.next_request.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.inner.pending.lock().await.insert(request_id, reply_tx);

        let sent = self
            .send(BridgeOut::Command(HostCommand::QueryActiveTab {
                window_id,
                request_id,
            }))
            .await;
        if !sent {
            self.inner.pending.lock().await.remove(&request_id);
            return Ok(None);
        }

        match tokio::time::timeout(QUERY_TIMEOUT, reply_rx).await {
            Ok(Ok(tab)) => Ok(tab),
            // The shim was replaced while we waited.
            Ok(Err(_)) => Ok(None),
            Err(_) => {
                log::warn!("active-tab query {request_id} timed out");
                self.inner.pending.lock().await.remove(&request_id);
                Ok(None)
            }
        }
    }

    async fn redirect(&self, tab_id: TabId, url: &str) -> Result<()> {
        let command = HostCommand::Redirect {
            tab_id,
            url: url.to_string(),
        };
        if !self.send(BridgeOut::Command(command)).await {
            log::warn!("no shim connected; dropping redirect for tab {tab_id}");
        }
        Ok(())
    }

    async fn close_tab(&self, tab_id: TabId) -> Result<()> {
        if !self
            .send(BridgeOut::Command(HostCommand::CloseTab { tab_id }))
            .await
        {
            log::warn!("no shim connected; dropping close for tab {tab_id}");
        }
        Ok(())
    }

    async fn configure(&self, idle_threshold_seconds: u32) -> Result<()> {
        if !self
            .send(BridgeOut::Command(HostCommand::Configure {
                idle_threshold_seconds,
            }))
            .await
        {
            log::warn!("no shim connected; settings will be pushed on connect");
        }
        Ok(())
    }
}

/// Accept shim connections. Each connection gets a reader task and a
/// writer task; the newest connection owns the outbound slot.
///
/// # Errors
///
/// Returns an error if the socket cannot be bound.
pub async fn listen(
    host: BridgeHost,
    engine_tx: mpsc::UnboundedSender<Envelope>,
    sock_path: &Path,
) -> io::Result<()> {
    if sock_path.exists() {
        fs::remove_file(sock_path)?;
    }
    let listener = UnixListener::bind(sock_path)?;

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                log::info!("browser shim connected");
                let (read_half, write_half) = stream.into_split();
                let (tx, rx) = mpsc::unbounded_channel();
                host.attach(tx).await;
                if engine_tx.send(Envelope::BridgeConnected).is_err() {
                    return Ok(());
                }
                tokio::spawn(write_loop(write_half, rx));
                tokio::spawn(read_loop(read_half, host.clone(), engine_tx.clone()));
            }
            Err(e) => {
                log::error!("bridge accept error: {e}");
            }
        }
    }
}

async fn write_loop(mut write_half: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<BridgeOut>) {
    while let Some(message) = rx.recv().await {
        let line = match serde_json::to_string(&message) {
            Ok(line) => line,
            Err(e) => {
                log::error!("bridge serialize error: {e}");
                continue;
            }
        };
        if write_half.write_all(line.as_bytes()).await.is_err()
            || write_half.write_all(b"\n").await.is_err()
        {
            log::info!("shim write side closed");
            return;
        }
    }
}

async fn read_loop(
    read_half: OwnedReadHalf,
    host: BridgeHost,
    engine_tx: mpsc::UnboundedSender<Envelope>,
) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<BridgeIn>(&line) {
                    Ok(message) => {
                        if !dispatch_line(message, &host, &engine_tx).await {
                            return;
                        }
                    }
                    // A malformed line is skipped; the connection
                    // stays up.
                    Err(e) => log::warn!("skipping malformed bridge line: {e}"),
                }
            }
            Ok(None) => {
                log::info!("browser shim disconnected");
                return;
            }
            Err(e) => {
                log::error!("bridge read error: {e}");
                return;
            }
        }
    }
}

async fn dispatch_line(
    message: BridgeIn,
    host: &BridgeHost,
    engine_tx: &mpsc::UnboundedSender<Envelope>,
) -> bool {
    match message {
        BridgeIn::Event(event) => engine_tx.send(Envelope::Host(event)).is_ok(),
        BridgeIn::Request { id, request } => {
            let (reply_tx, reply_rx) = oneshot::channel();
            if engine_tx.send(Envelope::Ui(request, reply_tx)).is_err() {
                return false;
            }
            let host = host.clone();
            tokio::spawn(async move {
                if let Ok(body) = reply_rx.await {
                    host.respond(id, body).await;
                }
            });
            true
        }
        BridgeIn::ActiveTab { request_id, tab } => {
            host.resolve_query(request_id, tab).await;
            true
        }
    }
}
