//! Per-socket pump task.
//!
//! Each socket the actor opens is served by one task that owns the sink and
//! stream. Frames for the socket arrive on an unbounded channel; everything
//! the socket produces goes back to the actor as [`SocketEvent`]s tagged with
//! the socket's generation, so the actor can discard events from sockets it
//! has already replaced. Dropping the [`SocketHandle`] closes the socket.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;

use super::Event;
use crate::errors::TransportError;
use crate::transport::Connector;

/// What happened on a socket.
#[derive(Debug)]
pub(crate) enum SocketEvent {
    Opened,
    Frame(String),
    Error(TransportError),
    Closed,
}

/// Actor-side handle of a socket.
#[derive(Debug)]
pub(crate) struct SocketHandle {
    generation: u64,
    outbound: mpsc::UnboundedSender<String>,
}

impl SocketHandle {
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Queue a frame. `false` when the pump is gone.
    pub(crate) fn send(&self, frame: String) -> bool {
        self.outbound.send(frame).is_ok()
    }
}

/// Open a socket on its own task.
pub(crate) fn open(
    generation: u64,
    url: String,
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,
    events: mpsc::UnboundedSender<Event>,
) -> SocketHandle {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let emitter = Emitter { generation, events };
    drop(tokio::spawn(pump(
        url,
        connector,
        connect_timeout,
        outbound_rx,
        emitter,
    )));
    SocketHandle {
        generation,
        outbound: outbound_tx,
    }
}

struct Emitter {
    generation: u64,
    events: mpsc::UnboundedSender<Event>,
}

impl Emitter {
    fn emit(&self, kind: SocketEvent) {
        let _ = self.events.send(Event::Socket {
            generation: self.generation,
            kind,
        });
    }

    fn fail(&self, error: TransportError) {
        self.emit(SocketEvent::Error(error));
        self.emit(SocketEvent::Closed);
    }
}

async fn pump(
    url: String,
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,
    mut outbound: mpsc::UnboundedReceiver<String>,
    emitter: Emitter,
) {
    let generation = emitter.generation;

    let opened = tokio::select! {
        result = tokio::time::timeout(connect_timeout, connector.connect(&url)) => result,
        // Handle dropped before the socket opened
        None = outbound.recv() => return,
    };

    let (mut sink, mut stream) = match opened {
        Ok(Ok(pair)) => pair,
        Ok(Err(error)) => {
            emitter.fail(error);
            return;
        }
        Err(_elapsed) => {
            emitter.fail(TransportError::Connect {
                url,
                reason: format!("timed out after {}ms", connect_timeout.as_millis()),
            });
            return;
        }
    };

    emitter.emit(SocketEvent::Opened);

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    debug!(generation, "socket detached, closing");
                    let _ = sink.close().await;
                    return;
                };
                if let Err(error) = sink.send(frame).await {
                    emitter.emit(SocketEvent::Error(error));
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(text)) => emitter.emit(SocketEvent::Frame(text)),
                Some(Err(error)) => {
                    emitter.emit(SocketEvent::Error(error));
                    break;
                }
                None => break,
            },
        }
    }

    let _ = sink.close().await;
    emitter.emit(SocketEvent::Closed);
}
