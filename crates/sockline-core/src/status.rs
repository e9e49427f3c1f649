//! Delivery statuses for in-flight messages.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Ordered delivery status of one outbound message.
///
/// The first five variants form the normal progression. [`Timeout`] is a
/// side-state: it is reported to observers but never synthesizes the
/// statuses between the current one and itself.
///
/// [`Timeout`]: MessageStatus::Timeout
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    /// Created, no socket available yet.
    NotSent,
    /// A socket is open; waiting for authentication or a flush.
    Connected,
    /// Written to the socket.
    Sent,
    /// The peer acknowledged receipt (`confirm-id`).
    Received,
    /// The peer answered.
    Replied,
    /// No answer within the message's timeout.
    Timeout,
}

impl MessageStatus {
    /// Every status in ascending order.
    pub const ALL: [Self; 6] = [
        Self::NotSent,
        Self::Connected,
        Self::Sent,
        Self::Received,
        Self::Replied,
        Self::Timeout,
    ];

    /// Numeric rank used for ordering comparisons.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::NotSent => 0,
            Self::Connected => 1,
            Self::Sent => 2,
            Self::Received => 3,
            Self::Replied => 4,
            Self::Timeout => 5,
        }
    }

    /// Status for a numeric rank.
    #[must_use]
    pub fn from_rank(rank: u8) -> Option<Self> {
        Self::ALL.get(usize::from(rank)).copied()
    }

    /// Wire-style name, e.g. `"NOT_SENT"`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotSent => "NOT_SENT",
            Self::Connected => "CONNECTED",
            Self::Sent => "SENT",
            Self::Received => "RECEIVED",
            Self::Replied => "REPLIED",
            Self::Timeout => "TIMEOUT",
        }
    }

    /// Whether this is the timeout side-state.
    #[must_use]
    pub const fn is_side_state(self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// Statuses strictly between `low` and `high`, ascending.
    pub fn between(low: Self, high: Self) -> impl Iterator<Item = Self> {
        Self::ALL
            .into_iter()
            .filter(move |s| *s > low && *s < high)
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
