//! # sockline-client
//!
//! Persistent-socket protocol client.
//!
//! One [`Connection`] keeps a single logical link to a remote endpoint and
//! multiplexes any number of request/response exchanges over it:
//!
//! - **Requests**: [`Connection::send`] allocates a session id, queues a
//!   message and resolves with the peer's [`Reply`]; [`Connection::end`]
//!   fires and forgets.
//! - **Delivery states**: every message walks
//!   `NOT_SENT → CONNECTED → SENT → RECEIVED → REPLIED` (plus `TIMEOUT`),
//!   observable through [`SendOptions::on_status`].
//! - **Pushes**: server-initiated requests are acknowledged and routed to
//!   [`PushHandler`]s by action name through a [`Dispatcher`].
//! - **Resilience**: dropped sockets are reopened with backoff, unconfirmed
//!   messages are retransmitted after the next handshake, and the host's
//!   [`Activity`] signal pauses and resumes networking.

#![deny(unsafe_code)]

pub mod activity;
pub mod connection;
pub mod dispatch;
pub mod errors;
pub mod lifecycle;
pub mod message;
pub mod options;
pub mod reply;
pub mod transport;

pub use activity::{Activity, activity_channel};
pub use connection::{Connection, ConnectionBuilder, ConnectionSnapshot};
pub use dispatch::{Dispatcher, PushHandler};
pub use errors::{ClientError, Result, TransportError};
pub use lifecycle::LifecycleEvent;
pub use message::PendingMessage;
pub use options::{SendOptions, StatusCallback};
pub use reply::Reply;
pub use transport::{Connector, MemoryConnector, MemoryPeer, MemoryServer, WebSocketConnector};

pub use sockline_core::{MessageStatus, SessionId};
pub use sockline_settings::{ClientSettings, Endpoint};
