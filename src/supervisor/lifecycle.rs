//! Lifecycle Supervisor
//!
//! The supervisor admits connections into the registry and cleans up after
//! them. It is the [`CloseObserver`] of every connection the listener
//! creates, so cleanup is driven by the connection's own move into
//! `Closed` rather than by polling.
//!
//! Cleanup for a connection is:
//! 1. remove it from the registry (only if it is the registered holder of its id)
//! 2. tell the router, so a forward handler can drop its own state
//! 3. update statistics and log the closure

use crate::connection::{CloseObserver, CloseReason, Connection, ConnectionStats};
use crate::error::RelayResult;
use crate::registry::ConnectionRegistry;
use crate::router::Router;
use std::sync::Arc;
use tracing::{debug, info};

/// Admits connections and performs exactly-once cleanup when they close.
#[derive(Debug)]
pub struct Supervisor {
    registry: Arc<ConnectionRegistry>,
    router: Arc<Router>,
    stats: Arc<ConnectionStats>,
}

impl Supervisor {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        router: Arc<Router>,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        Self {
            registry,
            router,
            stats,
        }
    }

    /// Registers an open connection and counts it as active.
    pub fn admit(&self, connection: Arc<Connection>) -> RelayResult<()> {
        self.registry.register(connection)?;
        self.stats.connection_opened();
        Ok(())
    }

    /// Asks every registered connection to close.
    ///
    /// Returns the number of connections this call started closing.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        let mut started = 0;
        self.registry.for_each(|connection| {
            if connection.begin_close(reason.clone()) {
                started += 1;
            }
        });
        debug!(started = started, reason = %reason, "Requested closure of all connections");
        started
    }

    /// Completes closure of every connection still registered.
    ///
    /// Used after workers failed to finish in time; each connection passes
    /// through Closing into Closed and is cleaned up as usual.
    pub fn finish_all(&self) -> usize {
        let mut finished = 0;
        self.registry.for_each(|connection| {
            if connection.finish_close() {
                finished += 1;
            }
        });
        finished
    }
}

impl CloseObserver for Supervisor {
    fn on_closed(&self, connection: &Connection) {
        let id = connection.id();

        if !self.registry.deregister_connection(connection) {
            debug!(conn = %id, "Closed connection was not registered");
            return;
        }

        self.router.release(id);
        self.stats.connection_closed();

        info!(
            conn = %id,
            client = %connection.remote_addr(),
            reason = %connection
                .close_reason()
                .unwrap_or(CloseReason::ServerRequested),
            lifetime_ms = connection.age().as_millis() as u64,
            active = self.stats.active(),
            "Connection cleaned up"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionId, ConnectionState, OutboundQueue};
    use crate::error::RelayError;
    use crate::protocol::{Message, Payload};
    use crate::router::RoutingPolicy;
    use std::net::SocketAddr;

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        router: Arc<Router>,
        stats: Arc<ConnectionStats>,
        supervisor: Arc<Supervisor>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(Router::new(RoutingPolicy::Echo, Arc::clone(&registry)));
        let stats = Arc::new(ConnectionStats::new());
        let supervisor = Arc::new(Supervisor::new(
            Arc::clone(&registry),
            Arc::clone(&router),
            Arc::clone(&stats),
        ));
        Fixture {
            registry,
            router,
            stats,
            supervisor,
        }
    }

    fn supervised(f: &Fixture, id: u64) -> (Arc<Connection>, OutboundQueue) {
        let addr: SocketAddr = "127.0.0.1:40005".parse().unwrap();
        let (conn, rx) =
            Connection::with_observer(ConnectionId::new(id), addr, 4, f.supervisor.clone());
        conn.mark_open();
        (conn, rx)
    }

    #[test]
    fn test_admit_registers_and_counts() {
        let f = fixture();
        let (conn, _rx) = supervised(&f, 1);

        f.supervisor.admit(Arc::clone(&conn)).unwrap();
        assert!(f.registry.contains(conn.id()));
        assert_eq!(f.stats.active(), 1);
    }

    #[tokio::test]
    async fn test_close_cleans_up_once() {
        let f = fixture();
        let (conn, _rx) = supervised(&f, 1);
        f.supervisor.admit(Arc::clone(&conn)).unwrap();

        f.router
            .relay(&conn, Message::new(conn.id(), Payload::text("x")))
            .await;

        // Explicit close and the receive loop both try to finish
        conn.close();
        conn.finish_close();
        conn.finish_close();

        assert!(!f.registry.contains(conn.id()));
        assert_eq!(f.stats.active(), 0);
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_rejected_duplicate_does_not_evict_holder() {
        let f = fixture();
        let (holder, _rx1) = supervised(&f, 5);
        let (duplicate, _rx2) = supervised(&f, 5);

        f.supervisor.admit(Arc::clone(&holder)).unwrap();
        let err = f.supervisor.admit(Arc::clone(&duplicate)).unwrap_err();
        assert!(matches!(err, RelayError::DuplicateIdentifier(_)));

        duplicate.finish_close();

        assert!(Arc::ptr_eq(&f.registry.get(ConnectionId::new(5)).unwrap(), &holder));
        assert_eq!(f.stats.active(), 1);
    }

    #[test]
    fn test_close_all_then_finish_all() {
        let f = fixture();
        let mut conns = Vec::new();
        for id in 1..=3 {
            let (conn, rx) = supervised(&f, id);
            f.supervisor.admit(Arc::clone(&conn)).unwrap();
            conns.push((conn, rx));
        }

        assert_eq!(f.supervisor.close_all(CloseReason::Shutdown), 3);
        assert_eq!(f.supervisor.close_all(CloseReason::Shutdown), 0);
        for (conn, _) in &conns {
            assert_eq!(conn.state(), ConnectionState::Closing);
            assert_eq!(conn.close_reason(), Some(CloseReason::Shutdown));
        }

        assert_eq!(f.supervisor.finish_all(), 3);
        assert!(f.registry.is_empty());
        assert_eq!(f.stats.active(), 0);
        for (conn, _) in &conns {
            assert_eq!(
                conn.history(),
                vec![
                    ConnectionState::Connecting,
                    ConnectionState::Open,
                    ConnectionState::Closing,
                    ConnectionState::Closed,
                ]
            );
        }
    }
}
