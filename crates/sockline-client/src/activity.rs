//! Foreground/background signal from the host environment.
//!
//! The host publishes [`Activity`] on a `tokio::sync::watch` channel. The
//! connection pauses when the host goes to the background and resumes when
//! it comes back; the revival check only runs while in the foreground.

use tokio::sync::watch;

/// Host activity state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Activity {
    /// The host is active; networking is wanted.
    #[default]
    Foreground,
    /// The host is suspended; networking should stop.
    Background,
}

impl Activity {
    /// Whether this is [`Activity::Foreground`].
    pub fn is_foreground(self) -> bool {
        self == Self::Foreground
    }
}

/// Create an activity channel starting in the foreground.
pub fn activity_channel() -> (watch::Sender<Activity>, watch::Receiver<Activity>) {
    watch::channel(Activity::Foreground)
}
