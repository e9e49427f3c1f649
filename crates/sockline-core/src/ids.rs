//! Session id newtype and allocator.
//!
//! A session id is the correlation key carried by every frame. The low 11
//! bits are reserved: a client request key always has them cleared, the
//! matching response uses `request + 1`, and an inbound id with the low bits
//! cleared that matches no pending request is a server push.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Spacing between consecutive allocated request ids.
pub const SESSION_ID_SHIFT: u64 = 2048;

/// Counter values wrap at this bound (2^41), keeping every id below 2^52.
pub const COUNTER_MODULUS: u64 = 2_199_023_255_552;

/// Wall-clock seconds are folded into this range before seeding.
const SEED_EPOCH_MODULUS: u64 = 219_902_325;

/// Random spread added to the wall-clock seed.
const SEED_JITTER: u64 = 10_000;

/// Correlation key for one exchange on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    /// Wrap a raw wire value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw wire value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Whether the reserved low bits are all clear.
    ///
    /// Inbound frames with such an id are server-initiated pushes.
    #[must_use]
    pub const fn is_push(self) -> bool {
        self.0 % SESSION_ID_SHIFT == 0
    }

    /// The id the peer uses to answer this one.
    #[must_use]
    pub const fn response_id(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// The request id a response id answers, if any.
    #[must_use]
    pub fn request_id(self) -> Option<Self> {
        self.0.checked_sub(1).map(Self)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SessionId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Hands out strictly increasing request ids (modulo [`COUNTER_MODULUS`]).
///
/// Seeded from wall-clock time plus randomness so a restarted process is
/// unlikely to reuse ids the server may still remember.
#[derive(Debug, Clone)]
pub struct SessionIdAllocator {
    counter: u64,
}

impl SessionIdAllocator {
    /// Create an allocator seeded from the clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_seed(clock_seed())
    }

    /// Create an allocator with an explicit seed.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            counter: seed % COUNTER_MODULUS,
        }
    }

    /// Allocate the next request id.
    pub fn allocate(&mut self) -> SessionId {
        self.counter = (self.counter + 1) % COUNTER_MODULUS;
        SessionId(self.counter * SESSION_ID_SHIFT)
    }
}

impl Default for SessionIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

fn clock_seed() -> u64 {
    let secs = chrono::Utc::now().timestamp().unsigned_abs();
    let jitter = rand::rng().random_range(0..SEED_JITTER);
    (secs % SEED_EPOCH_MODULUS) * SEED_JITTER + jitter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocated_ids_are_request_keys() {
        let mut alloc = SessionIdAllocator::new();
        for _ in 0..100 {
            let id = alloc.allocate();
            assert_eq!(id.get() % SESSION_ID_SHIFT, 0);
            assert_eq!(id.get() % 2, 0);
        }
    }

    #[test]
    fn ids_strictly_increase() {
        let mut alloc = SessionIdAllocator::with_seed(41);
        let a = alloc.allocate();
        let b = alloc.allocate();
        assert_eq!(a.get(), 42 * SESSION_ID_SHIFT);
        assert_eq!(b.get() - a.get(), SESSION_ID_SHIFT);
        assert!(b > a);
    }

    #[test]
    fn counter_wraps_at_modulus() {
        let mut alloc = SessionIdAllocator::with_seed(COUNTER_MODULUS - 2);
        assert_eq!(alloc.allocate().get(), (COUNTER_MODULUS - 1) * SESSION_ID_SHIFT);
        assert_eq!(alloc.allocate().get(), 0);
        assert_eq!(alloc.allocate().get(), SESSION_ID_SHIFT);
    }

    #[test]
    fn largest_id_fits_json_safe_integer() {
        let max = (COUNTER_MODULUS - 1) * SESSION_ID_SHIFT;
        assert!(max < (1u64 << 53));
    }

    #[test]
    fn clock_seed_is_within_counter_range() {
        let seed = clock_seed();
        assert!(seed < SEED_EPOCH_MODULUS * SEED_JITTER);
        assert!(seed < COUNTER_MODULUS);
    }

    #[test]
    fn response_id_pairs_with_request() {
        let request = SessionId::new(4096);
        let response = request.response_id();
        assert_eq!(response.get(), 4097);
        assert!(!response.is_push());
        assert_eq!(response.request_id(), Some(request));
    }

    #[test]
    fn request_id_of_zero_is_none() {
        assert_eq!(SessionId::new(0).request_id(), None);
    }

    #[test]
    fn push_detection() {
        assert!(SessionId::new(2048 * 7).is_push());
        assert!(!SessionId::new(2048 * 7 + 1).is_push());
        assert!(!SessionId::new(2048 * 7 + 2).is_push());
    }

    #[test]
    fn serializes_as_bare_integer() {
        let json = serde_json::to_string(&SessionId::new(8192)).unwrap();
        assert_eq!(json, "8192");
        let back: SessionId = serde_json::from_str("8193").unwrap();
        assert_eq!(back, SessionId::new(8193));
    }

    #[test]
    fn display_is_raw_value() {
        assert_eq!(SessionId::new(2048).to_string(), "2048");
    }
}
