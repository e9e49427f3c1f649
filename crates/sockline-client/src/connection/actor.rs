//! The actor task that owns every piece of connection state.
//!
//! One loop serializes caller commands, socket events, timer firings, the
//! periodic revival check and activity transitions. Handlers never await,
//! so a command is fully applied before the next event is looked at.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use sockline_core::wire::{self, FrameKind, InboundFrame};
use sockline_core::{Backoff, MessageStatus, SessionId, SessionIdAllocator};
use sockline_settings::{ClientSettings, Endpoint};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::socket::{self, SocketEvent, SocketHandle};
use super::timer::Timer;
use super::{Command, Connection, ConnectionSnapshot, Event, Outbound};
use crate::activity::Activity;
use crate::dispatch::Dispatcher;
use crate::errors::{ClientError, Result};
use crate::lifecycle::{LifecycleEvent, Notifier};
use crate::message::{Completion, Message, Transition};
use crate::reply::Reply;
use crate::transport::Connector;

/// Why networking is suspended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PauseCause {
    /// [`Connection::pause`]; only [`Connection::resume`] or a foreground
    /// transition lifts it.
    Caller,
    /// The host went to the background.
    Background,
}

pub(super) struct Actor {
    settings: ClientSettings,
    endpoint: Endpoint,
    connector: Arc<dyn Connector>,
    dispatcher: Arc<Dispatcher>,
    handle: mpsc::WeakUnboundedSender<Command>,
    notifier: Notifier,
    events_tx: mpsc::UnboundedSender<Event>,

    allocator: SessionIdAllocator,
    /// In-flight messages in submission order; flushes follow it.
    messages: IndexMap<SessionId, Message>,

    socket: Option<SocketHandle>,
    generation: u64,
    transport_open: bool,
    authenticated: bool,

    started: bool,
    pause: Option<PauseCause>,
    backoff: Backoff,
    reconnect_timer: Option<Timer>,
    reconnect_epoch: u64,

    activity_rx: Option<watch::Receiver<Activity>>,
    activity: Activity,
}

impl Actor {
    pub(super) fn new(
        settings: ClientSettings,
        connector: Arc<dyn Connector>,
        dispatcher: Arc<Dispatcher>,
        mut activity_rx: Option<watch::Receiver<Activity>>,
        handle: mpsc::WeakUnboundedSender<Command>,
        lifecycle: broadcast::Sender<LifecycleEvent>,
    ) -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let activity = activity_rx
            .as_mut()
            .map_or(Activity::Foreground, |rx| *rx.borrow_and_update());
        let backoff = Backoff::new(
            settings.reconnect.base_delay_ms,
            settings.reconnect.max_delay_ms,
            settings.reconnect.jitter_factor,
        );

        let actor = Self {
            endpoint: settings.endpoint.clone(),
            settings,
            connector,
            dispatcher,
            handle,
            notifier: Notifier::new(lifecycle),
            events_tx,
            allocator: SessionIdAllocator::new(),
            messages: IndexMap::new(),
            socket: None,
            generation: 0,
            transport_open: false,
            authenticated: false,
            started: false,
            pause: None,
            backoff,
            reconnect_timer: None,
            reconnect_epoch: 0,
            activity_rx,
            activity,
        };
        (actor, events_rx)
    }

    pub(super) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<Event>,
    ) {
        let mut revive = tokio::time::interval(self.settings.revive_interval());
        revive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        revive.reset();

        debug!("connection actor started");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
                Some(event) = events.recv() => self.on_event(event),
                _ = revive.tick() => self.revive(),
                change = next_activity(&mut self.activity_rx) => self.on_activity(change),
            }
        }

        self.teardown();
        info!("connection actor stopped");
    }

    // ─── Commands ────────────────────────────────────────────────────────

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Send {
                outbound,
                completion,
            } => self.submit(outbound, completion),
            Command::Start => self.start(),
            Command::Connect => self.connect(),
            Command::Disconnect => self.disconnect(),
            Command::Reconnect => self.reconnect(),
            Command::Pause => self.pause(PauseCause::Caller),
            Command::Resume => self.resume(),
            Command::ChangeServers(endpoint) => {
                info!(url = %endpoint.url(), "changing servers");
                self.endpoint = endpoint;
                self.reconnect();
            }
            Command::CloseFlow(flow_id) => self.close_flow(&flow_id),
            Command::Destroy => self.destroy(),
            Command::Snapshot(tx) => {
                let _ = tx.send(self.snapshot());
            }
            // Handled by the run loop
            Command::Shutdown => {}
        }
    }

    fn submit(&mut self, outbound: Outbound, completion: Option<oneshot::Sender<Result<Reply>>>) {
        let Outbound {
            session_id,
            action,
            payload,
            options,
        } = outbound;
        let session_id = session_id.unwrap_or_else(|| self.allocator.allocate());
        let timeout = options
            .timeout
            .unwrap_or_else(|| self.settings.timeouts.request());

        let mut message = Message::new(
            session_id,
            action,
            payload,
            timeout,
            options.on_status,
            completion.map(Completion::Caller),
        );
        // Only awaited messages expire
        if message.has_completion() {
            message.arm(self.timer(timeout, Event::Expired(session_id)));
        }
        if self.transport_open {
            let _ = message.advance(MessageStatus::Connected);
        }

        debug!(%session_id, awaited = message.has_completion(), "message queued");
        if self.messages.insert(session_id, message).is_some() {
            warn!(%session_id, "replaced an in-flight message with the same id");
        }
        if self.authenticated {
            self.transmit(session_id);
        }
    }

    fn start(&mut self) {
        self.started = true;
        if !self.activity.is_foreground() {
            self.pause(PauseCause::Background);
        } else if self.socket.is_none() {
            self.connect();
        }
    }

    fn connect(&mut self) {
        if self.pause.is_some() {
            debug!("connect ignored while paused");
            return;
        }
        self.reconnect_timer = None;
        self.detach_transport();

        self.generation += 1;
        let url = self.endpoint.url();
        info!(generation = self.generation, %url, "opening socket");
        self.socket = Some(socket::open(
            self.generation,
            url,
            Arc::clone(&self.connector),
            self.settings.timeouts.connect(),
            self.events_tx.clone(),
        ));
    }

    fn disconnect(&mut self) {
        self.reconnect_timer = None;
        self.detach_transport();
    }

    fn reconnect(&mut self) {
        if self.pause.is_some() {
            return;
        }
        self.backoff.reset();
        self.connect();
    }

    fn pause(&mut self, cause: PauseCause) {
        if self.pause.is_some() {
            return;
        }
        info!(?cause, "pausing");
        self.pause = Some(cause);
        self.disconnect();
    }

    fn resume(&mut self) {
        if self.pause.take().is_none() {
            return;
        }
        info!("resuming");
        self.connect();
    }

    fn close_flow(&mut self, flow_id: &Value) {
        let before = self.messages.len();
        self.messages
            .retain(|_, message| message.flow_id() != Some(flow_id));
        debug!(%flow_id, cancelled = before - self.messages.len(), "flow closed");
    }

    fn destroy(&mut self) {
        self.disconnect();
        let cancelled = std::mem::take(&mut self.messages);
        info!(cancelled = cancelled.len(), "connection destroyed");
    }

    fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            endpoint: self.endpoint.clone(),
            connected: self.transport_open && self.authenticated,
            authenticated: self.authenticated,
            paused: self.pause.is_some(),
            transport_open: self.transport_open,
            pending: self.messages.values().map(Message::pending).collect(),
        }
    }

    // ─── Events ──────────────────────────────────────────────────────────

    fn on_event(&mut self, event: Event) {
        match event {
            Event::Socket { generation, kind } => self.on_socket(generation, kind),
            Event::Expired(session_id) => self.expire(session_id),
            Event::ReconnectDue(epoch) => {
                if epoch == self.reconnect_epoch && self.reconnect_timer.take().is_some() {
                    self.connect();
                }
            }
        }
    }

    fn on_socket(&mut self, generation: u64, kind: SocketEvent) {
        if self.socket.as_ref().map(SocketHandle::generation) != Some(generation) {
            debug!(generation, "ignoring event from a replaced socket");
            return;
        }
        match kind {
            SocketEvent::Opened => self.on_open(),
            SocketEvent::Frame(text) => self.on_frame(&text),
            SocketEvent::Error(error) => warn!(generation, %error, "transport error"),
            SocketEvent::Closed => {
                info!(generation, "socket closed");
                self.drop_transport();
            }
        }
    }

    fn on_open(&mut self) {
        self.transport_open = true;

        let session_id = self.allocator.allocate();
        let timeout = self.settings.timeouts.handshake();
        let mut handshake = Message::new(
            session_id,
            Some(self.settings.handshake.action.clone()),
            self.settings.handshake.payload(),
            timeout,
            None,
            Some(Completion::Handshake),
        );
        handshake.arm(self.timer(timeout, Event::Expired(session_id)));
        let _ = self.messages.insert(session_id, handshake);

        for message in self.messages.values_mut() {
            if message.status() == MessageStatus::NotSent {
                let _ = message.advance(MessageStatus::Connected);
            }
        }

        info!(generation = self.generation, %session_id, "socket open, handshaking");
        self.flush();
    }

    fn on_frame(&mut self, text: &str) {
        let frame = match InboundFrame::decode(text) {
            Ok(frame) => frame,
            Err(error) => {
                debug!(%error, "dropping undecodable frame");
                return;
            }
        };

        match frame.classify() {
            FrameKind::Confirm { session_id } => {
                debug!(%session_id, "confirmed");
                self.advance(session_id, MessageStatus::Received);
            }
            FrameKind::Push {
                session_id,
                action,
                data,
            } => {
                self.confirm(session_id);
                self.dispatch(session_id, action, data);
            }
            FrameKind::Response { session_id, data } => {
                match session_id
                    .request_id()
                    .filter(|id| self.messages.contains_key(id))
                {
                    Some(request_id) => {
                        self.confirm(session_id);
                        self.complete(request_id, data);
                    }
                    None => debug!(%session_id, "dropping response with no pending request"),
                }
            }
            FrameKind::Unroutable => debug!("dropping frame without session id"),
        }
    }

    fn expire(&mut self, session_id: SessionId) {
        let Some(mut message) = self.messages.shift_remove(&session_id) else {
            return;
        };
        let _ = message.advance(MessageStatus::Timeout);
        let timeout = message.timeout();

        match message.take_completion() {
            Some(Completion::Caller(tx)) => {
                debug!(%session_id, ?timeout, "request timed out");
                let _ = tx.send(Err(ClientError::Timeout {
                    session_id,
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }));
            }
            Some(Completion::Handshake) => {
                warn!(%session_id, ?timeout, "handshake timed out");
                self.drop_transport();
            }
            None => {}
        }
    }

    fn on_activity(&mut self, change: Option<Activity>) {
        let Some(activity) = change else {
            debug!("activity signal closed, keeping last state");
            self.activity_rx = None;
            return;
        };
        if activity == self.activity {
            return;
        }
        self.activity = activity;
        // Recorded only; start() honors it
        if !self.started {
            return;
        }
        match activity {
            Activity::Foreground => self.resume(),
            Activity::Background => self.pause(PauseCause::Background),
        }
    }

    /// Periodic check that brings the socket back when nothing else will.
    fn revive(&mut self) {
        if !self.started
            || !self.activity.is_foreground()
            || self.socket.is_some()
            || self.reconnect_timer.is_some()
        {
            return;
        }
        match self.pause {
            Some(PauseCause::Caller) => {}
            Some(PauseCause::Background) => {
                debug!("revival check resuming");
                self.resume();
            }
            None => {
                debug!("revival check reconnecting");
                self.connect();
            }
        }
    }

    // ─── Inbound routing ─────────────────────────────────────────────────

    fn advance(&mut self, session_id: SessionId, status: MessageStatus) {
        let Some(message) = self.messages.get_mut(&session_id) else {
            debug!(%session_id, %status, "status for unknown message");
            return;
        };
        if message.advance(status) == Transition::Finished {
            let _ = self.messages.shift_remove(&session_id);
        }
    }

    fn dispatch(&mut self, session_id: SessionId, action: Option<String>, data: Value) {
        let Some(action) = action else {
            debug!(%session_id, "push without action");
            return;
        };
        let Some(handler) = self.dispatcher.lookup(&action) else {
            debug!(%session_id, %action, "no handler for push");
            return;
        };
        let Some(connection) = self.connection() else {
            return;
        };

        debug!(%session_id, %action, "dispatching push");
        let push = Reply::new(connection, session_id, Some(action), data, None);
        drop(tokio::spawn(async move { handler.handle(push).await }));
    }

    fn complete(&mut self, request_id: SessionId, data: Value) {
        let Some(mut message) = self.messages.shift_remove(&request_id) else {
            return;
        };
        let _ = message.advance(MessageStatus::Replied);

        match message.take_completion() {
            Some(Completion::Caller(tx)) => {
                let flow_id = message.flow_id().cloned();
                let outcome = self
                    .connection()
                    .map(|connection| {
                        Reply::new(connection, request_id.response_id(), None, data, flow_id)
                    })
                    .ok_or(ClientError::Closed);
                debug!(session_id = %request_id, "replied");
                let _ = tx.send(outcome);
            }
            Some(Completion::Handshake) => self.on_handshake(&data),
            None => {}
        }
    }

    fn on_handshake(&mut self, data: &Value) {
        if data.get("status").and_then(Value::as_str) == Some("ok") {
            info!(generation = self.generation, "handshake accepted");
            self.authenticated = true;
            self.backoff.reset();
            let _ = self.notifier.emit(LifecycleEvent::ConnectionState(true));
            self.flush();
        } else {
            warn!(generation = self.generation, reply = %data, "handshake rejected");
            self.drop_transport();
        }
    }

    // ─── Outbound ────────────────────────────────────────────────────────

    /// Transmit every message still below `SENT`, in table order.
    fn flush(&mut self) {
        if !self.transport_open {
            return;
        }
        let ready: Vec<SessionId> = self
            .messages
            .iter()
            .filter(|(_, m)| m.needs_transmit() && (self.authenticated || m.is_handshake()))
            .map(|(id, _)| *id)
            .collect();
        for session_id in ready {
            self.transmit(session_id);
        }
    }

    fn transmit(&mut self, session_id: SessionId) {
        let Some(socket) = self.socket.as_ref() else {
            return;
        };
        let Some(message) = self.messages.get_mut(&session_id) else {
            return;
        };
        let frame = match message.frame() {
            Ok(frame) => frame,
            Err(error) => {
                warn!(%session_id, %error, "dropping message that cannot be encoded");
                let _ = self.messages.shift_remove(&session_id);
                return;
            }
        };
        if !socket.send(frame) {
            return;
        }
        debug!(%session_id, "sent");
        if message.mark_transmitted() == Transition::Finished {
            let _ = self.messages.shift_remove(&session_id);
        }
    }

    fn confirm(&self, session_id: SessionId) {
        let Some(socket) = self.socket.as_ref() else {
            return;
        };
        match wire::encode_confirm(session_id) {
            Ok(frame) => {
                let _ = socket.send(frame);
            }
            Err(error) => debug!(%session_id, %error, "confirm not encodable"),
        }
    }

    // ─── Transport teardown ──────────────────────────────────────────────

    /// Forget the current socket: handshakes are destroyed, `SENT`
    /// messages roll back to `CONNECTED`, listeners hear `false`.
    fn detach_transport(&mut self) {
        let Some(socket) = self.socket.take() else {
            return;
        };
        debug!(generation = socket.generation(), "detaching socket");
        drop(socket);
        self.transport_open = false;
        self.authenticated = false;

        self.messages.retain(|_, message| !message.is_handshake());
        for message in self.messages.values_mut() {
            let _ = message.rollback();
        }
        let _ = self.notifier.emit(LifecycleEvent::ConnectionState(false));
    }

    /// Unplanned loss of the socket: detach and retry later.
    fn drop_transport(&mut self) {
        self.detach_transport();
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.pause.is_some() || self.reconnect_timer.is_some() {
            return;
        }
        let delay = self.backoff.next_delay();
        self.reconnect_epoch += 1;
        info!(?delay, attempt = self.backoff.attempts(), "reconnect scheduled");
        self.reconnect_timer = Some(self.timer(delay, Event::ReconnectDue(self.reconnect_epoch)));
    }

    fn teardown(&mut self) {
        self.reconnect_timer = None;
        self.detach_transport();
        self.messages.clear();
    }

    // ─── Helpers ─────────────────────────────────────────────────────────

    fn timer(&self, delay: std::time::Duration, event: Event) -> Timer {
        Timer::after(delay, self.events_tx.clone(), event)
    }

    /// Strong handle for a [`Reply`]; `None` once every handle is gone.
    fn connection(&self) -> Option<Connection> {
        self.handle
            .upgrade()
            .map(|tx| Connection::from_parts(tx, self.notifier.sender().clone()))
    }
}

async fn next_activity(rx: &mut Option<watch::Receiver<Activity>>) -> Option<Activity> {
    match rx {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(*rx.borrow_and_update()),
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::options::SendOptions;
    use crate::transport::MemoryConnector;

    fn actor() -> (Actor, mpsc::UnboundedSender<Command>) {
        let (connector, _server) = MemoryConnector::new();
        let (commands, _commands_rx) = mpsc::unbounded_channel();
        let (lifecycle, _) = broadcast::channel(8);
        let (actor, _events) = Actor::new(
            ClientSettings::default(),
            Arc::new(connector),
            Arc::new(Dispatcher::new()),
            None,
            commands.downgrade(),
            lifecycle,
        );
        (actor, commands)
    }

    fn outbound(action: &str, payload: Value) -> Outbound {
        Outbound {
            session_id: None,
            action: Some(action.into()),
            payload,
            options: SendOptions::new().timeout(Duration::from_secs(30)),
        }
    }

    #[tokio::test]
    async fn queued_message_waits_for_socket() {
        let (mut actor, _keep) = actor();
        actor.submit(outbound("ping", json!({})), None);

        let snapshot = actor.snapshot();
        assert_eq!(snapshot.pending.len(), 1);
        assert_eq!(snapshot.pending[0].status, MessageStatus::NotSent);
        assert!(!snapshot.connected);
    }

    #[tokio::test]
    async fn stale_generation_is_ignored() {
        let (mut actor, _keep) = actor();
        actor.connect();
        let current = actor.generation;

        actor.on_socket(current + 7, SocketEvent::Opened);
        assert!(!actor.transport_open);

        actor.on_socket(current, SocketEvent::Opened);
        assert!(actor.transport_open);
    }

    #[tokio::test]
    async fn open_creates_handshake_and_advances_queue() {
        let (mut actor, _keep) = actor();
        actor.submit(outbound("ping", json!({})), None);
        actor.connect();
        actor.on_socket(actor.generation, SocketEvent::Opened);

        let snapshot = actor.snapshot();
        let handshake = snapshot
            .pending
            .iter()
            .find(|m| m.action.as_deref() == Some("connect"))
            .unwrap();
        assert_eq!(handshake.status, MessageStatus::Sent);
        let ping = snapshot
            .pending
            .iter()
            .find(|m| m.action.as_deref() == Some("ping"))
            .unwrap();
        assert_eq!(ping.status, MessageStatus::Connected);
    }

    #[tokio::test]
    async fn close_removes_handshake_and_rolls_back() {
        let (mut actor, _keep) = actor();
        actor.connect();
        actor.on_socket(actor.generation, SocketEvent::Opened);
        actor.authenticated = true;
        actor.submit(outbound("ping", json!({})), None);
        assert_eq!(actor.snapshot().pending.len(), 2);

        actor.on_socket(actor.generation, SocketEvent::Closed);

        let snapshot = actor.snapshot();
        assert_eq!(snapshot.pending.len(), 1);
        assert_eq!(snapshot.pending[0].status, MessageStatus::Connected);
        assert_eq!(snapshot.pending[0].max_status, MessageStatus::Sent);
        assert!(!snapshot.authenticated);
        assert!(actor.reconnect_timer.is_some());
    }

    #[tokio::test]
    async fn caller_pause_survives_revival() {
        let (mut actor, _keep) = actor();
        actor.start();
        actor.pause(PauseCause::Caller);
        actor.revive();
        assert!(actor.socket.is_none());
        assert!(actor.snapshot().paused);
    }

    #[tokio::test]
    async fn background_pause_is_lifted_by_revival() {
        let (mut actor, _keep) = actor();
        actor.start();
        actor.pause(PauseCause::Background);
        actor.revive();
        assert!(actor.socket.is_some());
        assert!(!actor.snapshot().paused);
    }

    #[tokio::test]
    async fn table_keeps_submission_order() {
        let (mut actor, _keep) = actor();
        actor.submit(outbound("first", json!({})), None);
        let mut answer = outbound("second", json!({}));
        answer.session_id = Some(SessionId::new(3));
        actor.submit(answer, None);

        let pending = actor.snapshot().pending;
        assert!(pending[0].session_id.get() > pending[1].session_id.get());
        assert_eq!(pending[0].action.as_deref(), Some("first"));
        assert_eq!(pending[1].action.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn caller_connect_action_is_an_ordinary_message() {
        let (mut actor, _keep) = actor();
        actor.submit(outbound("connect", json!({"mine": true})), None);
        actor.connect();
        actor.on_socket(actor.generation, SocketEvent::Opened);

        // Only the real handshake goes out before authentication
        let pending = actor.snapshot().pending;
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].status, MessageStatus::Connected);
        assert_eq!(pending[1].status, MessageStatus::Sent);

        actor.on_socket(actor.generation, SocketEvent::Closed);
        let pending = actor.snapshot().pending;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].action.as_deref(), Some("connect"));
        assert_eq!(pending[0].status, MessageStatus::Connected);
    }

    #[tokio::test]
    async fn activity_before_start_does_not_dial() {
        let (mut actor, _keep) = actor();
        actor.on_activity(Some(Activity::Background));
        actor.on_activity(Some(Activity::Foreground));
        assert!(actor.socket.is_none());
        assert!(!actor.snapshot().paused);

        actor.start();
        assert!(actor.socket.is_some());
    }

    #[tokio::test]
    async fn close_flow_cancels_only_that_flow() {
        let (mut actor, _keep) = actor();
        actor.submit(outbound("a", json!({"flow-id": 1})), None);
        actor.submit(outbound("b", json!({"flow-id": 2})), None);
        actor.submit(outbound("c", json!({"flow-id": 1})), None);

        actor.close_flow(&json!(1));

        let pending = actor.snapshot().pending;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].action.as_deref(), Some("b"));
    }
}
