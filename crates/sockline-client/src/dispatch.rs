//! Push routing.
//!
//! Server-initiated pushes carry an `action` name. The [`Dispatcher`] maps
//! action names to [`PushHandler`]s; it is built before the connection
//! starts and shared read-only with the actor afterwards.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::reply::Reply;

/// Handler for one push action.
///
/// Each push runs on its own task, so a slow handler never stalls the
/// connection. Respond through [`Reply::reply`] or [`Reply::end`].
#[async_trait]
pub trait PushHandler: Send + Sync {
    /// Handle one push.
    async fn handle(&self, push: Reply);
}

#[async_trait]
impl<F, Fut> PushHandler for F
where
    F: Fn(Reply) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, push: Reply) {
        (self)(push).await;
    }
}

/// Action name to handler table.
#[derive(Clone, Default)]
pub struct Dispatcher {
    handlers: HashMap<String, Arc<dyn PushHandler>>,
}

impl Dispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an action, replacing any previous one.
    pub fn register(&mut self, action: &str, handler: impl PushHandler + 'static) {
        let _ = self.handlers.insert(action.to_owned(), Arc::new(handler));
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, action: &str, handler: impl PushHandler + 'static) -> Self {
        self.register(action, handler);
        self
    }

    /// Handler registered for `action`.
    pub fn lookup(&self, action: &str) -> Option<Arc<dyn PushHandler>> {
        self.handlers.get(action).cloned()
    }

    /// All registered action names (sorted).
    pub fn actions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("actions", &self.actions())
            .finish()
    }
}
