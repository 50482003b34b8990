use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{UnixListener, UnixStream},
    sync::{mpsc, oneshot},
};

use crate::engine::Envelope;

/// IPC request from CLI to daemon
#[derive(Serialize, Deserialize, Debug)]
pub enum IpcRequest {
    Status,
    Shutdown,
    TimeSpent { hostname: String },
    UsageToday,
}

/// IPC response from daemon to CLI
#[derive(Serialize, Deserialize, Debug)]
pub enum IpcResponse {
    Status {
        running: bool,
        idle: bool,
        tracked_tabs: usize,
        today_total_ms: u64,
        uptime_seconds: u64,
    },
    Shutdown,
    TimeSpent {
        formatted: String,
        ms: u64,
    },
    UsageToday {
        usage: Vec<(String, u64)>,
    },
}

#[derive(Debug)]
pub struct IpcClient {
    sock_path: PathBuf,
}

impl IpcClient {
    #[must_use]
    pub fn new(sock_path: &Path) -> Self {
        Self {
            sock_path: sock_path.to_path_buf(),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the daemon socket is unreachable or the
    /// exchange fails to encode/decode.
    pub async fn send_command(&self, request: IpcRequest) -> Result<IpcResponse> {
        let mut stream = UnixStream::connect(&self.sock_path).await?;

        let encoded = bincode::serialize(&request)?;
        stream.write_all(&encoded).await?;
        stream.shutdown().await?;

        let mut buffer = Vec::new();
        stream.read_to_end(&mut buffer).await?;
        let response: IpcResponse = bincode::deserialize(&buffer)?;

        Ok(response)
    }
}

/// Accept CLI connections and forward each request into the engine
/// queue, writing the engine's reply back.
///
/// # Errors
///
/// Returns an error if the socket cannot be bound.
pub async fn listen(
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
                let engine_tx = engine_tx.clone();
                tokio::spawn(handle_connection(stream, engine_tx));
            }
            Err(e) => {
                log::error!("ipc accept error: {e}");
            }
        }
    }
}

async fn handle_connection(mut stream: UnixStream, engine_tx: mpsc::UnboundedSender<Envelope>) {
    let mut buf = vec![0; 1024];
    match stream.read(&mut buf).await {
        Ok(n) if n > 0 => match bincode::deserialize::<IpcRequest>(&buf[..n]) {
            Ok(request) => {
                let (reply_tx, reply_rx) = oneshot::channel();
                if engine_tx.send(Envelope::Ipc(request, reply_tx)).is_err() {
                    log::warn!("engine is gone; dropping ipc request");
                    return;
                }
                match reply_rx.await {
                    Ok(response) => match bincode::serialize(&response) {
                        Ok(encoded) => {
                            if let Err(e) = stream.write_all(&encoded).await {
                                log::error!("ipc write error: {e}");
                            }
                        }
                        Err(e) => log::error!("ipc serialize error: {e}"),
                    },
                    Err(_) => log::warn!("engine dropped ipc reply"),
                }
            }
            Err(e) => {
                log::error!("ipc deserialize error: {e}");
            }
        },
        Ok(_) => {} // Connection closed
        Err(e) => {
            log::error!("ipc read error: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn client_roundtrips_through_listener() {
        let dir = TempDir::new().unwrap();
        let sock_path = dir.path().join("test.sock");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let listen_path = sock_path.clone();
        tokio::spawn(async move {
            let _ = listen(tx, &listen_path).await;
        });

        // Stand-in engine: answer every request with a fixed status.
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                if let Envelope::Ipc(IpcRequest::Status, reply) = envelope {
                    let _ = reply.send(IpcResponse::Status {
                        running: true,
                        idle: false,
                        tracked_tabs: 2,
                        today_total_ms: 1_234,
                        uptime_seconds: 9,
                    });
                }
            }
        });

        // Wait for the socket to appear.
        for _ in 0..50 {
            if sock_path.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let client = IpcClient::new(&sock_path);
        let response = client.send_command(IpcRequest::Status).await.unwrap();
        match response {
            IpcResponse::Status {
                running,
                tracked_tabs,
                today_total_ms,
                ..
            } => {
                assert!(running);
                assert_eq!(tracked_tabs, 2);
                assert_eq!(today_total_ms, 1_234);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }
}
