//! In-process transport for tests and embedding.
//!
//! [`MemoryConnector::new`] returns the connector plus a [`MemoryServer`].
//! Every successful `connect` hands the server one [`MemoryPeer`]: the far
//! end of that socket. Dropping the peer closes the socket from the server
//! side; the peer sees `None` from [`MemoryPeer::recv`] once the client
//! closes its side.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::channel::mpsc as pipe;
use futures::{FutureExt, SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;

use super::{Connector, FrameSink, FrameStream};
use crate::errors::TransportError;

#[derive(Debug, Default)]
struct Shared {
    refuse: AtomicBool,
    attempts: AtomicUsize,
}

/// Connector whose sockets terminate at a [`MemoryServer`].
#[derive(Clone, Debug)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    shared: Arc<Shared>,
}

/// Accepting side of a [`MemoryConnector`].
#[derive(Debug)]
pub struct MemoryServer {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
    shared: Arc<Shared>,
}

/// Server end of one in-memory socket.
#[derive(Debug)]
pub struct MemoryPeer {
    url: String,
    from_client: pipe::UnboundedReceiver<String>,
    to_client: pipe::UnboundedSender<Result<String, TransportError>>,
}

impl MemoryConnector {
    /// Create a connector and the server its sockets terminate at.
    pub fn new() -> (Self, MemoryServer) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());
        (
            Self {
                accept_tx,
                shared: Arc::clone(&shared),
            },
            MemoryServer { accept_rx, shared },
        )
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream), TransportError> {
        let _ = self.shared.attempts.fetch_add(1, Ordering::SeqCst);
        if self.shared.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Connect {
                url: url.to_owned(),
                reason: "connection refused".into(),
            });
        }

        let (client_tx, from_client) = pipe::unbounded();
        let (to_client, client_rx) = pipe::unbounded();
        let peer = MemoryPeer {
            url: url.to_owned(),
            from_client,
            to_client,
        };
        self.accept_tx.send(peer).map_err(|_| TransportError::Connect {
            url: url.to_owned(),
            reason: "memory server dropped".into(),
        })?;

        let sink = client_tx.sink_map_err(|e| TransportError::Send(e.to_string()));
        Ok((Box::pin(sink), Box::pin(client_rx)))
    }
}

impl MemoryServer {
    /// Wait for the next socket to open.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }

    /// Next socket if one has already opened.
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.try_recv().ok()
    }

    /// Make subsequent connects fail (or succeed again).
    pub fn refuse_connections(&self, refuse: bool) {
        self.shared.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Number of connect attempts so far, refused ones included.
    pub fn attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }
}

impl MemoryPeer {
    /// URL the client dialed.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Next frame from the client; `None` once the client closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.next().await
    }

    /// Next frame from the client, parsed as JSON.
    pub async fn recv_json(&mut self) -> Option<Value> {
        let text = self.recv().await?;
        serde_json::from_str(&text).ok()
    }

    /// Frame already sent by the client, without waiting.
    pub fn try_recv(&mut self) -> Option<String> {
        self.from_client.next().now_or_never().flatten()
    }

    /// Deliver a frame to the client. Returns `false` once the client is gone.
    pub fn send(&self, text: impl Into<String>) -> bool {
        self.to_client.unbounded_send(Ok(text.into())).is_ok()
    }

    /// Deliver a JSON frame to the client.
    pub fn send_json(&self, value: &Value) -> bool {
        self.send(value.to_string())
    }

    /// Deliver a transport error to the client.
    pub fn fail(&self, error: TransportError) -> bool {
        self.to_client.unbounded_send(Err(error)).is_ok()
    }

    /// Close the socket from the server side.
    pub fn close(self) {
        drop(self);
    }
}
