//! Connection Handle
//!
//! A [`Connection`] is the shared, clonable-by-`Arc` view of one accepted
//! WebSocket client. The registry, the router and the connection's own
//! reader/writer tasks all hold the same handle.
//!
//! ## Send Path
//!
//! ```text
//!  send()/offer() ──> bounded mpsc queue ──> writer task ──> socket
//!                     (outbound_capacity)
//! ```
//!
//! The queue is bounded. [`Connection::send`] waits for room, which
//! backpressures the caller; [`Connection::offer`] never waits and drops the
//! message when the queue is full. Both fail with
//! [`RelayError::ClosedConnection`] once closure has begun, and a waiting
//! `send` is released the moment the connection enters Closing.
//!
//! ## Lifecycle
//!
//! State lives in a `watch` channel so that any task can await the Closing
//! transition. The task that wins the move into `Closed` notifies the
//! [`CloseObserver`], which makes the notification exactly-once.

use super::state::{CloseReason, ConnectionId, ConnectionState};
use crate::error::{RelayError, RelayResult};
use crate::protocol::Payload;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{watch, Semaphore};

/// Receiving half of a connection's outbound queue, drained by its writer task.
pub type OutboundQueue = mpsc::Receiver<Payload>;

/// Receives the terminal notification of every connection.
pub trait CloseObserver: Send + Sync {
    /// Called exactly once, after `connection` has entered `Closed`.
    fn on_closed(&self, connection: &Connection);
}

/// One accepted client link.
pub struct Connection {
    id: ConnectionId,

    /// Peer address (for logging)
    remote_addr: SocketAddr,

    /// Wall-clock creation time
    created_at: SystemTime,

    /// Monotonic reference point for activity tracking
    started: Instant,

    /// Milliseconds after `started` of the last successful send or receive
    last_activity_ms: AtomicU64,

    state: watch::Sender<ConnectionState>,

    /// Every state entered, in order
    history: Mutex<Vec<ConnectionState>>,

    /// Set once, together with the move into Closing
    close_reason: Mutex<Option<CloseReason>>,

    outbound: mpsc::Sender<Payload>,

    observer: Option<Arc<dyn CloseObserver>>,
}

impl Connection {
    /// Creates a connection in the `Connecting` state.
    ///
    /// Returns the shared handle and the receiving end of its outbound
    /// queue. A capacity of zero is rounded up to one.
    pub fn new(
        id: ConnectionId,
        remote_addr: SocketAddr,
        outbound_capacity: usize,
    ) -> (Arc<Self>, OutboundQueue) {
        Self::build(id, remote_addr, outbound_capacity, None)
    }

    /// Creates a connection that reports its closure to `observer`.
    pub fn with_observer(
        id: ConnectionId,
        remote_addr: SocketAddr,
        outbound_capacity: usize,
        observer: Arc<dyn CloseObserver>,
    ) -> (Arc<Self>, OutboundQueue) {
        Self::build(id, remote_addr, outbound_capacity, Some(observer))
    }

    fn build(
        id: ConnectionId,
        remote_addr: SocketAddr,
        outbound_capacity: usize,
        observer: Option<Arc<dyn CloseObserver>>,
    ) -> (Arc<Self>, OutboundQueue) {
        let (tx, rx) = mpsc::channel(outbound_capacity.clamp(1, Semaphore::MAX_PERMITS));
        let (state, _) = watch::channel(ConnectionState::Connecting);

        let connection = Arc::new(Self {
            id,
            remote_addr,
            created_at: SystemTime::now(),
            started: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            state,
            history: Mutex::new(vec![ConnectionState::Connecting]),
            close_reason: Mutex::new(None),
            outbound: tx,
            observer,
        });

        (connection, rx)
    }

    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Time since the connection was created.
    pub fn age(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time of the last successful send or receive.
    pub fn last_activity(&self) -> Instant {
        self.started + Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed))
    }

    /// Records activity on the connection.
    pub fn touch(&self) {
        let elapsed = self.started.elapsed().as_millis() as u64;
        self.last_activity_ms.fetch_max(elapsed, Ordering::Relaxed);
    }

    #[inline]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Returns a receiver that observes every later state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Every state this connection has entered, oldest first.
    pub fn history(&self) -> Vec<ConnectionState> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The reason closure began, if it has.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of messages waiting in the outbound queue.
    pub fn queued(&self) -> usize {
        self.outbound.max_capacity() - self.outbound.capacity()
    }

    /// Moves the state forward to `next`.
    ///
    /// `on_enter` runs under the state lock only when the move happens.
    /// Returns true if this call performed the transition.
    fn advance(&self, next: ConnectionState, on_enter: impl FnOnce()) -> bool {
        self.state.send_if_modified(|current| {
            if *current >= next {
                return false;
            }
            *current = next;
            self.history
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(next);
            on_enter();
            true
        })
    }

    /// Marks the handshake as complete.
    ///
    /// Returns false if the connection had already left `Connecting`.
    pub fn mark_open(&self) -> bool {
        self.advance(ConnectionState::Open, || {})
    }

    /// Begins closure for `reason`.
    ///
    /// Wakes the reader, the writer and any sender waiting for queue room.
    /// Only the first reason is kept. Returns true if this call started
    /// the closure.
    pub fn begin_close(&self, reason: CloseReason) -> bool {
        self.advance(ConnectionState::Closing, || {
            *self
                .close_reason
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(reason);
        })
    }

    /// Requests closure on behalf of the server.
    pub fn close(&self) -> bool {
        self.begin_close(CloseReason::ServerRequested)
    }

    /// Completes closure once the socket has been released.
    ///
    /// Passes through `Closing` if needed, then enters `Closed` and
    /// notifies the observer. Only the caller that performs the final
    /// transition notifies; every other call returns false.
    pub fn finish_close(&self) -> bool {
        self.begin_close(CloseReason::ServerRequested);

        if !self.advance(ConnectionState::Closed, || {}) {
            return false;
        }
        if let Some(observer) = &self.observer {
            observer.on_closed(self);
        }
        true
    }

    /// Resolves once the connection has entered `Closing` or `Closed`.
    pub async fn closing(&self) {
        let mut rx = self.state.subscribe();
        loop {
            if rx.borrow_and_update().is_closing() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Queues `payload` for delivery, waiting for room if the queue is full.
    ///
    /// Fails with [`RelayError::ClosedConnection`] if the connection is not
    /// open, or if it starts closing while this call waits.
    pub async fn send(&self, payload: Payload) -> RelayResult<()> {
        if !self.is_open() {
            return Err(RelayError::ClosedConnection(self.id));
        }

        tokio::select! {
            biased;
            _ = self.closing() => Err(RelayError::ClosedConnection(self.id)),
            sent = self.outbound.send(payload) => {
                sent.map_err(|_| RelayError::ClosedConnection(self.id))
            }
        }
    }

    /// Queues `payload` without waiting.
    ///
    /// When the queue is full the payload is dropped and
    /// [`RelayError::QueueFull`] is returned.
    pub fn offer(&self, payload: Payload) -> RelayResult<()> {
        if !self.is_open() {
            return Err(RelayError::ClosedConnection(self.id));
        }

        self.outbound.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => RelayError::QueueFull(self.id),
            TrySendError::Closed(_) => RelayError::ClosedConnection(self.id),
        })
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("state", &self.state())
            .field("queued", &self.queued())
            .finish()
    }
}
