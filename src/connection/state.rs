//! Connection Identity and Lifecycle State
//!
//! ## State Machine
//!
//! ```text
//!   handshake ok        peer close / reset
//!  ┌──────────┐        transport error
//!  │Connecting│──>Open──explicit close──>Closing──socket released──>Closed
//!  └──────────┘        shutdown
//! ```
//!
//! Transitions only move forward. `Closed` is terminal and the identifier
//! is retired with it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Locally unique connection identifier.
///
/// Assigned at acceptance time by an [`IdAllocator`] and never reused while
/// the allocator lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Hands out connection identifiers from a monotonically increasing counter.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle state of a connection.
///
/// The derived ordering follows the lifecycle, so `a < b` means `a` comes
/// before `b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    /// Returns true once closure has begun.
    #[inline]
    pub fn is_closing(self) -> bool {
        self >= ConnectionState::Closing
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a connection left the Open state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer sent a close frame or the stream ended
    PeerClosed,
    /// The peer dropped the TCP connection without a closing handshake
    PeerReset,
    /// A read or write failed
    Transport(String),
    /// The server asked this connection to close
    ServerRequested,
    /// The server is shutting down
    Shutdown,
}

impl CloseReason {
    /// Returns true for closures the peer caused in the normal course of things.
    pub fn is_expected(&self) -> bool {
        matches!(self, CloseReason::PeerClosed | CloseReason::PeerReset)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => f.write_str("peer closed"),
            CloseReason::PeerReset => f.write_str("peer reset"),
            CloseReason::Transport(e) => write!(f, "transport error: {}", e),
            CloseReason::ServerRequested => f.write_str("closed by server"),
            CloseReason::Shutdown => f.write_str("server shutdown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let ids = IdAllocator::new();
        let a = ids.next_id();
        let b = ids.next_id();
        assert_eq!(a.as_u64(), 1);
        assert!(b > a);
    }

    #[test]
    fn test_ids_unique_across_threads() {
        let ids = Arc::new(IdAllocator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = Arc::clone(&ids);
                std::thread::spawn(move || (0..1000).map(|_| ids.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {}", id);
            }
        }
        assert_eq!(seen.len(), 8000);
    }

    #[test]
    fn test_state_order_follows_lifecycle() {
        use ConnectionState::*;
        assert!(Connecting < Open);
        assert!(Open < Closing);
        assert!(Closing < Closed);
        assert!(!Open.is_closing());
        assert!(Closing.is_closing());
        assert!(Closed.is_closing());
    }

    #[test]
    fn test_close_reason_display() {
        assert_eq!(CloseReason::PeerClosed.to_string(), "peer closed");
        assert_eq!(
            CloseReason::Transport("broken pipe".into()).to_string(),
            "transport error: broken pipe"
        );
        assert!(CloseReason::PeerReset.is_expected());
        assert!(!CloseReason::Shutdown.is_expected());
    }
}
