//! Connection Worker
//!
//! This module drives one upgraded WebSocket connection. Each client gets
//! a reader (the task calling [`ConnectionHandler::run`]) and a writer task,
//! so a slow socket only ever stalls its own connection.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects, handshake succeeds, connection registered (Open)
//!        │
//!        ▼
//! 2. ConnectionHandler::run spawns the writer task
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐   ┌──────────────────────────┐
//!    │      Reader loop             │   │      Writer loop         │
//!    │                              │   │                          │
//!    │  next frame ──> Message      │   │  outbound queue          │
//!    │        │                     │   │        │                 │
//!    │        ▼                     │   │        ▼                 │
//!    │  Router::relay ──> send() ───┼──>│  write frame to socket   │
//!    │        │                     │   │        │                 │
//!    │   [Loop back]                │   │   [Loop back]            │
//!    └──────────────────────────────┘   └──────────────────────────┘
//!        │  both stop as soon as the connection enters Closing
//!        ▼
//! 4. Writer sends the close frame and releases the socket
//!        │
//!        ▼
//! 5. Connection enters Closed; the supervisor deregisters it
//! ```

use super::handle::{Connection, OutboundQueue};
use super::state::CloseReason;
use crate::protocol::{Message, Payload};
use crate::router::Router;
use futures_util::stream::{self, Stream};
use futures_util::{Sink, SinkExt, StreamExt};
use std::io::ErrorKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::error::{Error as WsError, ProtocolError};
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, trace, warn};

/// How long the writer waits for the closing handshake to flush.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently registered connections
    pub active_connections: AtomicU64,
    /// Upgrades that failed or timed out
    pub handshake_failures: AtomicU64,
    /// Total data messages received
    pub messages_received: AtomicU64,
    /// Total data messages written to sockets
    pub messages_sent: AtomicU64,
    /// Messages dropped by backpressure or closed targets
    pub messages_dropped: AtomicU64,
    /// Total payload bytes read
    pub bytes_read: AtomicU64,
    /// Total payload bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn handshake_failed(&self) {
        self.handshake_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn message_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn messages_dropped(&self, count: usize) {
        if count > 0 {
            self.messages_dropped.fetch_add(count as u64, Ordering::Relaxed);
        }
    }

    /// Number of currently registered connections.
    pub fn active(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }
}

/// Maps a transport error to the reason the connection is closing.
pub fn close_reason_for(err: &WsError) -> CloseReason {
    match err {
        WsError::ConnectionClosed | WsError::AlreadyClosed => CloseReason::PeerClosed,
        WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => CloseReason::PeerReset,
        WsError::Io(io)
            if matches!(
                io.kind(),
                ErrorKind::ConnectionReset | ErrorKind::BrokenPipe | ErrorKind::UnexpectedEof
            ) =>
        {
            CloseReason::PeerReset
        }
        other => CloseReason::Transport(other.to_string()),
    }
}

/// Turns a connection's inbound frames into a lazy stream of messages.
///
/// The stream ends when the peer closes, when a transport error occurs, or
/// as soon as the connection enters Closing, whichever comes first. A
/// pending read is abandoned on Closing. The reason for the end is recorded
/// on the connection before the stream finishes, and nothing is yielded
/// after closure has begun.
pub fn inbound<S>(connection: Arc<Connection>, frames: S) -> impl Stream<Item = Message>
where
    S: Stream<Item = Result<Frame, WsError>> + Unpin,
{
    stream::unfold((connection, frames), |(connection, mut frames)| async move {
        loop {
            let next = tokio::select! {
                biased;
                _ = connection.closing() => return None,
                next = frames.next() => next,
            };

            match next {
                Some(Ok(Frame::Close(frame))) => {
                    trace!(conn = %connection.id(), ?frame, "Close frame received");
                    connection.begin_close(CloseReason::PeerClosed);
                    return None;
                }
                Some(Ok(frame)) => {
                    let Some(payload) = Payload::from_frame(frame) else {
                        // ping/pong are answered by the transport
                        continue;
                    };
                    if !connection.is_open() {
                        return None;
                    }
                    connection.touch();
                    let message = Message::new(connection.id(), payload);
                    return Some((message, (connection, frames)));
                }
                Some(Err(e)) => {
                    connection.begin_close(close_reason_for(&e));
                    return None;
                }
                None => {
                    connection.begin_close(CloseReason::PeerClosed);
                    return None;
                }
            }
        }
    })
}

/// Drains the outbound queue into the socket until the connection closes.
///
/// On exit the queue is closed, which fails any sender still waiting, and
/// the closing handshake is attempted within [`CLOSE_TIMEOUT`].
pub async fn write_loop<S>(
    connection: Arc<Connection>,
    mut sink: S,
    mut outbound: OutboundQueue,
    stats: Arc<ConnectionStats>,
) where
    S: Sink<Frame, Error = WsError> + Unpin,
{
    loop {
        let payload = tokio::select! {
            biased;
            _ = connection.closing() => break,
            next = outbound.recv() => match next {
                Some(payload) => payload,
                None => break,
            },
        };

        let bytes = payload.len();
        let sent = tokio::select! {
            biased;
            _ = connection.closing() => break,
            sent = sink.send(Frame::from(payload)) => sent,
        };

        match sent {
            Ok(()) => {
                connection.touch();
                stats.message_sent(bytes);
                trace!(conn = %connection.id(), bytes = bytes, "Sent message");
            }
            Err(e) => {
                debug!(conn = %connection.id(), error = %e, "Write failed");
                connection.begin_close(close_reason_for(&e));
                break;
            }
        }
    }

    outbound.close();

    match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
        Ok(Ok(())) => trace!(conn = %connection.id(), "Socket closed"),
        Ok(Err(e)) => trace!(conn = %connection.id(), error = %e, "Close handshake failed"),
        Err(_) => debug!(conn = %connection.id(), "Close handshake timed out"),
    }
}

/// Handles a single upgraded client connection.
///
/// Built by the listener once the connection is registered and Open.
/// Dropping a handler without running it leaves the connection registered,
/// so the listener always runs it.
pub struct ConnectionHandler {
    /// The shared connection handle
    connection: Arc<Connection>,

    /// The upgraded WebSocket stream
    stream: WebSocketStream<TcpStream>,

    /// Receiving end of the connection's outbound queue
    outbound: OutboundQueue,

    /// Relay policy (shared across connections)
    router: Arc<Router>,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,

    /// Text queued to the client before anything else
    greeting: Option<String>,
}

impl ConnectionHandler {
    pub fn new(
        connection: Arc<Connection>,
        stream: WebSocketStream<TcpStream>,
        outbound: OutboundQueue,
        router: Arc<Router>,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        Self {
            connection,
            stream,
            outbound,
            router,
            stats,
            greeting: None,
        }
    }

    /// Queues `greeting` as the first message the client receives.
    pub fn with_greeting(mut self, greeting: Option<String>) -> Self {
        self.greeting = greeting;
        self
    }

    /// The connection this handler drives.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Runs the connection until it is Closed.
    ///
    /// Every inbound message is handed to the router in arrival order.
    /// Errors never escape: they close this connection and are logged.
    pub async fn run(self) {
        let ConnectionHandler {
            connection,
            stream,
            outbound,
            router,
            stats,
            greeting,
        } = self;
        let id = connection.id();
        let addr = connection.remote_addr();

        info!(conn = %id, client = %addr, "Client connected");

        let (sink, frames) = stream.split();
        let writer = tokio::spawn(write_loop(
            Arc::clone(&connection),
            sink,
            outbound,
            Arc::clone(&stats),
        ));

        if let Some(greeting) = greeting {
            if let Err(e) = connection.send(Payload::Text(greeting)).await {
                debug!(conn = %id, error = %e, "Greeting dropped");
            }
        }

        let mut messages = Box::pin(inbound(Arc::clone(&connection), frames));

        while let Some(message) = messages.next().await {
            stats.message_received(message.payload.len());
            trace!(conn = %id, payload = %message.payload, "Received message");

            let outcome = router.relay(&connection, message).await;
            stats.messages_dropped(outcome.dropped);
        }

        // Releases the read half; the writer releases the other
        drop(messages);
        connection.begin_close(CloseReason::PeerClosed);

        if let Err(e) = writer.await {
            warn!(conn = %id, error = %e, "Writer task failed");
        }

        match connection.close_reason() {
            Some(reason) if reason.is_expected() => {
                debug!(conn = %id, client = %addr, reason = %reason, "Client disconnected")
            }
            Some(CloseReason::Transport(e)) => {
                warn!(conn = %id, client = %addr, error = %e, "Connection error")
            }
            Some(reason) => {
                info!(conn = %id, client = %addr, reason = %reason, "Connection closed")
            }
            None => {}
        }

        connection.finish_close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionId, ConnectionState};
    use std::net::SocketAddr;
    use tokio::sync::mpsc;

    fn addr() -> SocketAddr {
        "127.0.0.1:40001".parse().unwrap()
    }

    fn open_connection(capacity: usize) -> (Arc<Connection>, OutboundQueue) {
        let (conn, rx) = Connection::new(ConnectionId::new(1), addr(), capacity);
        conn.mark_open();
        (conn, rx)
    }

    /// A sink that records every frame written to it.
    fn recording_sink() -> (
        impl Sink<Frame, Error = WsError> + Unpin,
        mpsc::UnboundedReceiver<Frame>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = futures_util::sink::unfold(tx, |tx, frame: Frame| async move {
            tx.send(frame).map_err(|_| WsError::ConnectionClosed)?;
            Ok::<_, WsError>(tx)
        });
        (Box::pin(sink), rx)
    }

    #[test]
    fn test_close_reason_classification() {
        assert_eq!(close_reason_for(&WsError::ConnectionClosed), CloseReason::PeerClosed);
        assert_eq!(
            close_reason_for(&WsError::Protocol(
                ProtocolError::ResetWithoutClosingHandshake
            )),
            CloseReason::PeerReset
        );
        assert_eq!(
            close_reason_for(&WsError::Io(std::io::Error::new(
                ErrorKind::ConnectionReset,
                "reset"
            ))),
            CloseReason::PeerReset
        );
        assert!(matches!(
            close_reason_for(&WsError::Io(std::io::Error::new(
                ErrorKind::PermissionDenied,
                "nope"
            ))),
            CloseReason::Transport(_)
        ));
    }

    #[tokio::test]
    async fn test_inbound_yields_data_frames_in_order() {
        let (conn, _rx) = open_connection(4);
        let frames = stream::iter(vec![
            Ok(Frame::Text("one".into())),
            Ok(Frame::Ping(vec![1])),
            Ok(Frame::Binary(vec![2])),
            Ok(Frame::Text("three".into())),
        ]);

        let messages: Vec<Message> = inbound(Arc::clone(&conn), frames).collect().await;
        let payloads: Vec<Payload> = messages.into_iter().map(Message::into_payload).collect();
        assert_eq!(
            payloads,
            vec![
                Payload::text("one"),
                Payload::binary(vec![2u8]),
                Payload::text("three"),
            ]
        );

        // End of stream means the peer went away
        assert_eq!(conn.state(), ConnectionState::Closing);
        assert_eq!(conn.close_reason(), Some(CloseReason::PeerClosed));
    }

    #[tokio::test]
    async fn test_inbound_stops_at_close_frame() {
        let (conn, _rx) = open_connection(4);
        let frames = stream::iter(vec![
            Ok(Frame::Text("before".into())),
            Ok(Frame::Close(None)),
            Ok(Frame::Text("after".into())),
        ]);

        let messages: Vec<Message> = inbound(Arc::clone(&conn), frames).collect().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].source, conn.id());
        assert_eq!(conn.close_reason(), Some(CloseReason::PeerClosed));
    }

    #[tokio::test]
    async fn test_inbound_records_transport_error() {
        let (conn, _rx) = open_connection(4);
        let frames = stream::iter(vec![
            Ok(Frame::Text("ok".into())),
            Err(WsError::Io(std::io::Error::new(ErrorKind::Other, "disk on fire"))),
        ]);

        let messages: Vec<Message> = inbound(Arc::clone(&conn), frames).collect().await;
        assert_eq!(messages.len(), 1);
        assert!(matches!(conn.close_reason(), Some(CloseReason::Transport(_))));
    }

    #[tokio::test]
    async fn test_inbound_cancelled_by_closing() {
        let (conn, _rx) = open_connection(4);
        // A source that never yields
        let frames = stream::pending::<Result<Frame, WsError>>();

        let reader = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { inbound(conn, frames).collect::<Vec<_>>().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        conn.close();

        let messages = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .expect("pending read was not cancelled")
            .unwrap();
        assert!(messages.is_empty());
        assert_eq!(conn.close_reason(), Some(CloseReason::ServerRequested));
    }

    #[tokio::test]
    async fn test_write_loop_preserves_order_and_counts() {
        let (conn, rx) = open_connection(8);
        let stats = Arc::new(ConnectionStats::new());
        let (sink, mut written) = recording_sink();

        let writer = tokio::spawn(write_loop(Arc::clone(&conn), sink, rx, Arc::clone(&stats)));

        conn.send(Payload::text("a")).await.unwrap();
        conn.send(Payload::text("bb")).await.unwrap();
        conn.send(Payload::binary(vec![1u8, 2, 3])).await.unwrap();

        assert_eq!(written.recv().await, Some(Frame::Text("a".into())));
        assert_eq!(written.recv().await, Some(Frame::Text("bb".into())));
        assert_eq!(written.recv().await, Some(Frame::Binary(vec![1, 2, 3])));

        conn.close();
        tokio::time::timeout(Duration::from_secs(1), writer)
            .await
            .expect("writer did not stop on close")
            .unwrap();

        assert_eq!(stats.messages_sent.load(Ordering::Relaxed), 3);
        assert_eq!(stats.bytes_written.load(Ordering::Relaxed), 6);

        // Queue closed with the writer
        assert!(conn.offer(Payload::text("late")).is_err());
    }

    #[tokio::test]
    async fn test_write_failure_closes_connection() {
        let (conn, rx) = open_connection(8);
        let stats = Arc::new(ConnectionStats::new());
        let sink = Box::pin(futures_util::sink::unfold((), |(), _frame: Frame| async move {
            Err::<(), _>(WsError::Io(std::io::Error::new(ErrorKind::BrokenPipe, "gone")))
        }));

        let writer = tokio::spawn(write_loop(Arc::clone(&conn), sink, rx, stats));
        conn.send(Payload::text("lost")).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), writer)
            .await
            .expect("writer did not stop on failure")
            .unwrap();
        assert_eq!(conn.state(), ConnectionState::Closing);
        assert_eq!(conn.close_reason(), Some(CloseReason::PeerReset));
    }

    #[test]
    fn test_stats_counters() {
        let stats = ConnectionStats::new();
        stats.connection_opened();
        stats.connection_opened();
        stats.connection_closed();
        stats.message_received(10);
        stats.message_sent(4);
        stats.messages_dropped(0);
        stats.messages_dropped(3);
        stats.handshake_failed();

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 2);
        assert_eq!(stats.active(), 1);
        assert_eq!(stats.bytes_read.load(Ordering::Relaxed), 10);
        assert_eq!(stats.bytes_written.load(Ordering::Relaxed), 4);
        assert_eq!(stats.messages_dropped.load(Ordering::Relaxed), 3);
        assert_eq!(stats.handshake_failures.load(Ordering::Relaxed), 1);
    }
}
