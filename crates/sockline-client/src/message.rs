//! One in-flight outbound request and its delivery state machine.
//!
//! A [`Message`] only ever moves forward through
//! `NOT_SENT → CONNECTED → SENT → RECEIVED → REPLIED`. Skipped statuses are
//! synthesized so the observer sees every step exactly once, and anything at
//! or below the highest status already reached is dropped as stale.
//!
//! Two exceptions exist:
//! - `TIMEOUT` is a side-state. It does not synthesize intermediates and
//!   does not move `max_status`, so a late `RECEIVED` or `REPLIED` can still
//!   supersede it. It is reported at most once per message.
//! - When the transport drops, the connection rolls `SENT` back to
//!   `CONNECTED`. Retransmission restores `SENT` without notifying again.
//!
//! Dropping a message releases its expiry timer. A caller still waiting on
//! it observes [`ClientError::Cancelled`].

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use sockline_core::wire::{self, flow_id_of};
use sockline_core::{MessageStatus, SessionId};
use tokio::sync::oneshot;

use crate::connection::timer::Timer;
use crate::errors::{ClientError, Result};
use crate::options::StatusCallback;
use crate::reply::Reply;

/// Who is waiting for the outcome.
pub(crate) enum Completion {
    /// A caller awaiting `send` / `reply`.
    Caller(oneshot::Sender<Result<Reply>>),
    /// The connection's own handshake.
    Handshake,
}

/// Outcome of an [`advance`](Message::advance).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Transition {
    /// Duplicate or out-of-order event; nothing changed.
    Stale,
    /// Status moved.
    Applied,
    /// Status moved and the message has nothing left to wait for.
    Finished,
}

/// Observable view of a pending message.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMessage {
    /// Correlation key.
    pub session_id: SessionId,
    /// Verb, if any.
    pub action: Option<String>,
    /// Flow the message belongs to.
    pub flow_id: Option<Value>,
    /// Current status.
    pub status: MessageStatus,
    /// Highest status reached.
    pub max_status: MessageStatus,
}

pub(crate) struct Message {
    session_id: SessionId,
    action: Option<String>,
    payload: Value,
    flow_id: Option<Value>,
    status: MessageStatus,
    max_status: MessageStatus,
    timeout: Duration,
    on_status: Option<StatusCallback>,
    completion: Option<Completion>,
    timer: Option<Timer>,
    timed_out: bool,
}

impl Message {
    pub(crate) fn new(
        session_id: SessionId,
        action: Option<String>,
        payload: Value,
        timeout: Duration,
        on_status: Option<StatusCallback>,
        completion: Option<Completion>,
    ) -> Self {
        Self {
            session_id,
            action,
            flow_id: flow_id_of(&payload),
            payload,
            status: MessageStatus::NotSent,
            max_status: MessageStatus::NotSent,
            timeout,
            on_status,
            completion,
            timer: None,
            timed_out: false,
        }
    }

    pub(crate) fn status(&self) -> MessageStatus {
        self.status
    }

    pub(crate) fn flow_id(&self) -> Option<&Value> {
        self.flow_id.as_ref()
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn has_completion(&self) -> bool {
        self.completion.is_some()
    }

    pub(crate) fn is_handshake(&self) -> bool {
        matches!(self.completion, Some(Completion::Handshake))
    }

    /// Below `SENT`: waiting for (re)transmission.
    pub(crate) fn needs_transmit(&self) -> bool {
        self.status < MessageStatus::Sent
    }

    pub(crate) fn arm(&mut self, timer: Timer) {
        self.timer = Some(timer);
    }

    pub(crate) fn take_completion(&mut self) -> Option<Completion> {
        self.timer = None;
        self.completion.take()
    }

    pub(crate) fn frame(&self) -> wire::Result<String> {
        wire::encode_request(self.session_id, self.action.as_deref(), &self.payload)
    }

    pub(crate) fn advance(&mut self, next: MessageStatus) -> Transition {
        if next.is_side_state() {
            if self.timed_out {
                return Transition::Stale;
            }
            self.timed_out = true;
            self.status = next;
            self.notify(next);
            return Transition::Applied;
        }

        if next <= self.max_status {
            return Transition::Stale;
        }

        for skipped in MessageStatus::between(self.max_status, next) {
            self.notify(skipped);
        }
        self.status = next;
        self.max_status = next;
        self.notify(next);

        if self.completion.is_none() && next >= MessageStatus::Received {
            Transition::Finished
        } else {
            Transition::Applied
        }
    }

    /// Record a successful write.
    ///
    /// A message rolled back after a drop returns to `SENT` silently.
    pub(crate) fn mark_transmitted(&mut self) -> Transition {
        if self.status == MessageStatus::Connected && self.max_status >= MessageStatus::Sent {
            self.status = MessageStatus::Sent;
            return Transition::Applied;
        }
        self.advance(MessageStatus::Sent)
    }

    /// `SENT → CONNECTED` after a transport drop. `max_status` is kept.
    pub(crate) fn rollback(&mut self) -> bool {
        if self.status == MessageStatus::Sent {
            self.status = MessageStatus::Connected;
            true
        } else {
            false
        }
    }

    pub(crate) fn pending(&self) -> PendingMessage {
        PendingMessage {
            session_id: self.session_id,
            action: self.action.clone(),
            flow_id: self.flow_id.clone(),
            status: self.status,
            max_status: self.max_status,
        }
    }

    fn notify(&mut self, status: MessageStatus) {
        if let Some(callback) = self.on_status.as_mut() {
            callback(status);
        }
    }
}

impl Drop for Message {
    fn drop(&mut self) {
        if let Some(Completion::Caller(tx)) = self.completion.take() {
            let _ = tx.send(Err(ClientError::Cancelled {
                session_id: self.session_id,
            }));
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("session_id", &self.session_id)
            .field("action", &self.action)
            .field("status", &self.status)
            .field("max_status", &self.max_status)
            .field("handshake", &self.is_handshake())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;
    use sockline_core::MessageStatus::{Connected, NotSent, Received, Replied, Sent, Timeout};

    type Seen = Arc<Mutex<Vec<MessageStatus>>>;

    fn observed(completion: Option<Completion>) -> (Message, Seen) {
        let seen: Seen = Arc::default();
        let sink = Arc::clone(&seen);
        let message = Message::new(
            SessionId::new(4096),
            Some("ping".into()),
            json!({"flow-id": "f"}),
            Duration::from_secs(1),
            Some(Box::new(move |s| sink.lock().unwrap().push(s))),
            completion,
        );
        (message, seen)
    }

    fn awaited() -> (Message, Seen, oneshot::Receiver<Result<Reply>>) {
        let (tx, rx) = oneshot::channel();
        let (message, seen) = observed(Some(Completion::Caller(tx)));
        (message, seen, rx)
    }

    #[test]
    fn starts_not_sent() {
        let (message, seen) = observed(None);
        assert_eq!(message.status(), NotSent);
        assert!(message.needs_transmit());
        assert_eq!(message.flow_id(), Some(&json!("f")));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn skipped_statuses_are_synthesized() {
        let (mut message, seen, _rx) = awaited();
        assert_eq!(message.advance(Replied), Transition::Applied);
        assert_eq!(*seen.lock().unwrap(), vec![Connected, Sent, Received, Replied]);
    }

    #[test]
    fn stale_event_is_ignored() {
        let (mut message, seen, _rx) = awaited();
        let _ = message.advance(Received);
        seen.lock().unwrap().clear();

        assert_eq!(message.advance(Sent), Transition::Stale);
        assert_eq!(message.advance(Received), Transition::Stale);
        assert_eq!(message.status(), Received);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn fire_and_forget_finishes_on_received() {
        let (mut message, _seen) = observed(None);
        assert_eq!(message.advance(Sent), Transition::Applied);
        assert_eq!(message.advance(Received), Transition::Finished);
    }

    #[test]
    fn awaited_message_survives_received() {
        let (mut message, _seen, _rx) = awaited();
        assert_eq!(message.advance(Received), Transition::Applied);
    }

    #[test]
    fn timeout_does_not_synthesize_or_raise_max() {
        let (mut message, seen, _rx) = awaited();
        let _ = message.advance(Sent);
        seen.lock().unwrap().clear();

        assert_eq!(message.advance(Timeout), Transition::Applied);
        assert_eq!(*seen.lock().unwrap(), vec![Timeout]);
        assert_eq!(message.pending().max_status, Sent);

        assert_eq!(message.advance(Timeout), Transition::Stale);
        // a late confirm is still above max_status
        assert_eq!(message.advance(Received), Transition::Applied);
        assert_eq!(message.status(), Received);
    }

    #[test]
    fn timeout_is_reported_once() {
        let (mut message, seen, _rx) = awaited();
        let _ = message.advance(Sent);
        assert_eq!(message.advance(Timeout), Transition::Applied);
        assert_eq!(message.advance(Received), Transition::Applied);

        assert_eq!(message.advance(Timeout), Transition::Stale);
        assert_eq!(message.status(), Received);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Connected, Sent, Timeout, Received]
        );
    }

    #[test]
    fn rollback_and_silent_retransmit() {
        let (mut message, seen, _rx) = awaited();
        let _ = message.mark_transmitted();
        assert_eq!(*seen.lock().unwrap(), vec![Connected, Sent]);

        assert!(message.rollback());
        assert_eq!(message.status(), Connected);
        assert_eq!(message.pending().max_status, Sent);
        assert!(message.needs_transmit());

        assert_eq!(message.mark_transmitted(), Transition::Applied);
        assert_eq!(message.status(), Sent);
        assert_eq!(*seen.lock().unwrap(), vec![Connected, Sent]);
    }

    #[test]
    fn rollback_only_from_sent() {
        let (mut message, _seen, _rx) = awaited();
        assert!(!message.rollback());
        let _ = message.advance(Received);
        assert!(!message.rollback());
        assert_eq!(message.status(), Received);
    }

    #[test]
    fn drop_cancels_waiting_caller() {
        let (message, _seen, mut rx) = awaited();
        drop(message);
        assert_matches!(
            rx.try_recv(),
            Ok(Err(ClientError::Cancelled { session_id })) if session_id.get() == 4096
        );
    }

    #[test]
    fn taken_completion_is_not_cancelled() {
        let (mut message, _seen, mut rx) = awaited();
        let completion = message.take_completion();
        assert!(!message.has_completion());
        drop(message);
        assert!(rx.try_recv().is_err());
        drop(completion);
    }

    #[test]
    fn handshake_completion() {
        let (message, _seen) = observed(Some(Completion::Handshake));
        assert!(message.is_handshake());
        assert!(message.has_completion());
    }

    #[test]
    fn frame_encodes_request() {
        let (message, _seen) = observed(None);
        let value: Value = serde_json::from_str(&message.frame().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"session-id": 4096, "data": {"flow-id": "f"}, "action": "ping"})
        );
    }

    fn status_strategy() -> impl Strategy<Value = MessageStatus> {
        prop::sample::select(MessageStatus::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn max_status_never_decreases(events in prop::collection::vec(status_strategy(), 0..32)) {
            let (tx, _rx) = oneshot::channel();
            let (mut message, _seen) = observed(Some(Completion::Caller(tx)));
            let mut previous = message.pending().max_status;
            for event in events {
                let _ = message.advance(event);
                let max = message.pending().max_status;
                prop_assert!(max >= previous);
                prop_assert!(max <= Replied);
                previous = max;
            }
        }

        #[test]
        fn stale_events_fire_nothing(events in prop::collection::vec(status_strategy(), 0..32)) {
            let (tx, _rx) = oneshot::channel();
            let (mut message, seen) = observed(Some(Completion::Caller(tx)));
            for event in events {
                let before_len = seen.lock().unwrap().len();
                let before = message.pending();
                if message.advance(event) == Transition::Stale {
                    prop_assert_eq!(seen.lock().unwrap().len(), before_len);
                    prop_assert_eq!(message.pending(), before);
                }
            }
        }

        #[test]
        fn every_status_observed_at_most_once(events in prop::collection::vec(status_strategy(), 0..32)) {
            let (tx, _rx) = oneshot::channel();
            let (mut message, seen) = observed(Some(Completion::Caller(tx)));
            for event in events {
                let _ = message.advance(event);
            }
            let seen = seen.lock().unwrap();
            for status in [Connected, Sent, Received, Replied, Timeout] {
                prop_assert!(seen.iter().filter(|s| **s == status).count() <= 1);
            }
        }
    }
}
