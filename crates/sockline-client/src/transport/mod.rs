//! Socket primitive consumed by the connection.
//!
//! A [`Connector`] opens a URL and yields a text-frame sink and stream.
//! The connection never touches the underlying protocol otherwise, so the
//! same engine runs over a real WebSocket ([`WebSocketConnector`]) or an
//! in-process pipe ([`MemoryConnector`]).

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream};

use crate::errors::TransportError;

pub mod memory;
pub mod websocket;

pub use memory::{MemoryConnector, MemoryPeer, MemoryServer};
pub use websocket::WebSocketConnector;

/// Outbound half of an open socket.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Inbound half of an open socket. Ends when the peer closes.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// Opens sockets.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a socket to `url`.
    async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream), TransportError>;
}
