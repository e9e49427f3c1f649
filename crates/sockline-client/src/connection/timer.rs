//! One-shot timers that post an event back to the actor.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Sleeper task that delivers one value after a delay.
///
/// Dropping the timer aborts the task, so a timer owned by a destroyed
/// message or a replaced reconnect schedule never fires.
#[derive(Debug)]
pub(crate) struct Timer {
    task: JoinHandle<()>,
}

impl Timer {
    pub(crate) fn after<T>(delay: Duration, tx: mpsc::UnboundedSender<T>, value: T) -> Self
    where
        T: Send + 'static,
    {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(value);
        });
        Self { task }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
