//! The connection: a cloneable handle in front of a single actor task.
//!
//! All connection state (the socket, the message table, authentication and
//! pause flags) lives inside one actor task. [`Connection`] only posts
//! [`Command`]s to it, so no state is shared and nothing is locked.
//!
//! ```ignore
//! let connection = Connection::builder(settings)
//!     .dispatcher(Dispatcher::new().with("notify", on_notify))
//!     .build()?;
//! connection.start()?;
//! let reply = connection.send("ping", json!({})).await?;
//! ```

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use sockline_core::SessionId;
use sockline_settings::{ClientSettings, Endpoint};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::Instrument;

use crate::activity::Activity;
use crate::dispatch::Dispatcher;
use crate::errors::{ClientError, Result};
use crate::lifecycle::{LIFECYCLE_CHANNEL_CAPACITY, LifecycleEvent};
use crate::message::PendingMessage;
use crate::options::SendOptions;
use crate::reply::Reply;
use crate::transport::{Connector, WebSocketConnector};

mod actor;
pub(crate) mod socket;
pub(crate) mod timer;

use actor::Actor;
use socket::SocketEvent;

// ─── Commands & events ───────────────────────────────────────────────────

/// An outbound request as submitted by a caller.
#[derive(Debug)]
pub(crate) struct Outbound {
    /// Preassigned id (answers); a fresh one is allocated when `None`.
    pub(crate) session_id: Option<SessionId>,
    pub(crate) action: Option<String>,
    pub(crate) payload: Value,
    pub(crate) options: SendOptions,
}

/// Requests from handles to the actor.
#[derive(Debug)]
pub(crate) enum Command {
    Send {
        outbound: Outbound,
        completion: Option<oneshot::Sender<Result<Reply>>>,
    },
    Start,
    Connect,
    Disconnect,
    Reconnect,
    Pause,
    Resume,
    ChangeServers(Endpoint),
    CloseFlow(Value),
    Destroy,
    Snapshot(oneshot::Sender<ConnectionSnapshot>),
    Shutdown,
}

/// Events the actor posts to itself from sockets and timers.
#[derive(Debug)]
pub(crate) enum Event {
    Socket { generation: u64, kind: SocketEvent },
    Expired(SessionId),
    ReconnectDue(u64),
}

// ─── Snapshot ────────────────────────────────────────────────────────────

/// Point-in-time view of a connection.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSnapshot {
    /// Current endpoint.
    pub endpoint: Endpoint,
    /// Socket open and handshake accepted.
    pub connected: bool,
    /// Handshake accepted on the current socket.
    pub authenticated: bool,
    /// Networking suspended.
    pub paused: bool,
    /// A socket is open (handshake pending or done).
    pub transport_open: bool,
    /// In-flight messages in table order.
    pub pending: Vec<PendingMessage>,
}

impl ConnectionSnapshot {
    /// Pending message with the given id.
    pub fn message(&self, session_id: SessionId) -> Option<&PendingMessage> {
        self.pending.iter().find(|m| m.session_id == session_id)
    }
}

// ─── Builder ─────────────────────────────────────────────────────────────

/// Configures and spawns a [`Connection`].
pub struct ConnectionBuilder {
    settings: ClientSettings,
    connector: Arc<dyn Connector>,
    dispatcher: Dispatcher,
    activity: Option<watch::Receiver<Activity>>,
}

impl ConnectionBuilder {
    /// Use a custom socket connector (default: [`WebSocketConnector`]).
    #[must_use]
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    /// Push handlers.
    #[must_use]
    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Host activity signal. Without one the host is always foreground.
    #[must_use]
    pub fn activity(mut self, activity: watch::Receiver<Activity>) -> Self {
        self.activity = Some(activity);
        self
    }

    /// Validate the settings and spawn the actor. Must be called within a
    /// Tokio runtime.
    ///
    /// Nothing is dialed until [`Connection::start`] or
    /// [`Connection::connect`].
    pub fn build(self) -> Result<Connection> {
        self.settings.validate()?;
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (lifecycle, _) = broadcast::channel(LIFECYCLE_CHANNEL_CAPACITY);
        let span = tracing::info_span!("connection", url = %self.settings.endpoint.url());

        let (actor, events_rx) = Actor::new(
            self.settings,
            self.connector,
            Arc::new(self.dispatcher),
            self.activity,
            commands_tx.downgrade(),
            lifecycle.clone(),
        );
        drop(tokio::spawn(
            actor.run(commands_rx, events_rx).instrument(span),
        ));

        Ok(Connection {
            commands: commands_tx,
            lifecycle,
        })
    }
}

// ─── Handle ──────────────────────────────────────────────────────────────

/// Handle to a persistent connection. Cheap to clone.
///
/// The actor stops on [`shutdown`](Self::shutdown) or once every handle
/// (including those inside [`Reply`] values) has been dropped.
#[derive(Clone, Debug)]
pub struct Connection {
    commands: mpsc::UnboundedSender<Command>,
    lifecycle: broadcast::Sender<LifecycleEvent>,
}

impl Connection {
    /// Start configuring a connection.
    pub fn builder(settings: ClientSettings) -> ConnectionBuilder {
        ConnectionBuilder {
            settings,
            connector: Arc::new(WebSocketConnector),
            dispatcher: Dispatcher::new(),
            activity: None,
        }
    }

    pub(crate) fn from_parts(
        commands: mpsc::UnboundedSender<Command>,
        lifecycle: broadcast::Sender<LifecycleEvent>,
    ) -> Self {
        Self {
            commands,
            lifecycle,
        }
    }

    // ─── Requests ────────────────────────────────────────────────────────

    /// Send a request and wait for its reply.
    pub async fn send(&self, action: &str, payload: Value) -> Result<Reply> {
        self.send_with(action, payload, SendOptions::default()).await
    }

    /// [`send`](Self::send) with options.
    pub async fn send_with(
        &self,
        action: &str,
        payload: Value,
        options: SendOptions,
    ) -> Result<Reply> {
        self.request(Outbound {
            session_id: None,
            action: Some(action.to_owned()),
            payload,
            options,
        })
        .await
    }

    /// Send a request without waiting for a reply.
    ///
    /// The message is dropped from the table once the peer confirms it.
    pub fn end(&self, action: &str, payload: Value) -> Result<()> {
        self.end_with(action, payload, SendOptions::default())
    }

    /// [`end`](Self::end) with options.
    pub fn end_with(&self, action: &str, payload: Value, options: SendOptions) -> Result<()> {
        self.post(Outbound {
            session_id: None,
            action: Some(action.to_owned()),
            payload,
            options,
        })
    }

    pub(crate) async fn request(&self, outbound: Outbound) -> Result<Reply> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Send {
            outbound,
            completion: Some(tx),
        })?;
        rx.await.map_err(|_| ClientError::Closed)?
    }

    pub(crate) fn post(&self, outbound: Outbound) -> Result<()> {
        self.command(Command::Send {
            outbound,
            completion: None,
        })
    }

    /// Cancel every in-flight message of a flow.
    pub fn close_flow(&self, flow_id: Value) -> Result<()> {
        self.command(Command::CloseFlow(flow_id))
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Connect and keep the connection alive from now on.
    pub fn start(&self) -> Result<()> {
        self.command(Command::Start)
    }

    /// Replace any socket with a fresh one. No-op while paused.
    pub fn connect(&self) -> Result<()> {
        self.command(Command::Connect)
    }

    /// Close the socket. In-flight messages stay queued.
    pub fn disconnect(&self) -> Result<()> {
        self.command(Command::Disconnect)
    }

    /// Reconnect now, forgetting earlier failures. No-op while paused.
    pub fn reconnect(&self) -> Result<()> {
        self.command(Command::Reconnect)
    }

    /// Close the socket and block connects until [`resume`](Self::resume).
    pub fn pause(&self) -> Result<()> {
        self.command(Command::Pause)
    }

    /// Lift a pause and connect.
    pub fn resume(&self) -> Result<()> {
        self.command(Command::Resume)
    }

    /// Switch to another endpoint and reconnect.
    pub fn change_servers(&self, endpoint: Endpoint) -> Result<()> {
        self.command(Command::ChangeServers(endpoint))
    }

    /// Disconnect and cancel every in-flight message.
    ///
    /// The connection stays usable; see [`shutdown`](Self::shutdown) to
    /// stop it for good.
    pub fn destroy(&self) -> Result<()> {
        self.command(Command::Destroy)
    }

    /// Stop the actor. Pending callers observe [`ClientError::Cancelled`].
    pub fn shutdown(&self) -> Result<()> {
        self.command(Command::Shutdown)
    }

    /// Current state of the connection.
    pub async fn snapshot(&self) -> Result<ConnectionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Snapshot(tx))?;
        rx.await.map_err(|_| ClientError::Closed)
    }

    /// Subscribe to lifecycle notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle.subscribe()
    }

    /// Whether the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    fn command(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| ClientError::Closed)
    }

    /// Handle wired to a bare command channel instead of an actor.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (commands, rx) = mpsc::unbounded_channel();
        let (lifecycle, _) = broadcast::channel(LIFECYCLE_CHANNEL_CAPACITY);
        (Self::from_parts(commands, lifecycle), rx)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn send_posts_command_with_completion() {
        let (connection, mut commands) = Connection::detached();
        let pending = tokio::spawn(async move { connection.send("ping", json!({"n": 1})).await });

        let command = commands.recv().await.unwrap();
        let Command::Send {
            outbound,
            completion: Some(tx),
        } = command
        else {
            panic!("expected an awaited send");
        };
        assert_eq!(outbound.action.as_deref(), Some("ping"));
        assert!(outbound.session_id.is_none());

        drop(tx);
        assert_matches!(pending.await.unwrap(), Err(ClientError::Closed));
    }

    #[tokio::test]
    async fn commands_fail_once_actor_is_gone() {
        let (connection, commands) = Connection::detached();
        drop(commands);
        assert!(connection.is_closed());
        assert_matches!(connection.connect(), Err(ClientError::Closed));
        assert_matches!(connection.end("x", json!(null)), Err(ClientError::Closed));
        assert_matches!(connection.snapshot().await, Err(ClientError::Closed));
        assert_matches!(connection.send("x", json!(null)).await, Err(ClientError::Closed));
    }

    #[test]
    fn snapshot_lookup() {
        let snapshot = ConnectionSnapshot {
            endpoint: Endpoint::default(),
            connected: false,
            authenticated: false,
            paused: false,
            transport_open: false,
            pending: vec![PendingMessage {
                session_id: SessionId::new(2048),
                action: None,
                flow_id: None,
                status: sockline_core::MessageStatus::NotSent,
                max_status: sockline_core::MessageStatus::NotSent,
            }],
        };
        assert!(snapshot.message(SessionId::new(2048)).is_some());
        assert!(snapshot.message(SessionId::new(4096)).is_none());
    }
}
