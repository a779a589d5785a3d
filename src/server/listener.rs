//! Listener and Accept Loop
//!
//! [`RelayServer`] owns the listening socket and everything shared between
//! connections: the registry, the router, the supervisor, and statistics.
//!
//! ## Accepting a Connection
//!
//! ```text
//! TcpListener::accept
//!        │
//!        ▼
//! WebSocket upgrade (bounded by handshake_timeout)
//!        │ failure: stream dropped, nothing registered
//!        ▼
//! Connection created (Connecting) ──> Open ──> Supervisor::admit
//!        │
//!        ▼
//! ConnectionHandler::run (own task, tracked for shutdown)
//! ```
//!
//! ## Shutdown
//!
//! `run_until` stops accepting when its shutdown future completes, asks
//! every connection to close, and waits up to `shutdown_timeout` for the
//! workers. Workers still running after that are aborted and their
//! connections finished by the supervisor.

use super::config::ServerConfig;
use crate::connection::{
    CloseObserver, CloseReason, Connection, ConnectionHandler, ConnectionStats, IdAllocator,
};
use crate::error::{RelayError, RelayResult};
use crate::registry::ConnectionRegistry;
use crate::router::{Router, RoutingPolicy};
use crate::supervisor::{HealthMonitor, MonitorConfig, Supervisor};
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info, warn};

/// Pause after a failed `accept` so descriptor exhaustion does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// State shared by the accept loop and every upgrade task.
struct Acceptor {
    config: ServerConfig,
    ids: IdAllocator,
    router: Arc<Router>,
    supervisor: Arc<Supervisor>,
    stats: Arc<ConnectionStats>,
    shutting_down: AtomicBool,
}

impl Acceptor {
    /// Upgrades `stream` and admits the resulting connection.
    async fn upgrade(&self, stream: TcpStream, peer: SocketAddr) -> RelayResult<ConnectionHandler> {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(client = %peer, error = %e, "Failed to set TCP_NODELAY");
        }

        let ws = match timeout(self.config.handshake_timeout, accept_async(stream)).await {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => return Err(self.handshake_failed(peer, e.to_string())),
            Err(_) => return Err(self.handshake_failed(peer, "timed out".to_string())),
        };

        let observer: Arc<dyn CloseObserver> = self.supervisor.clone();
        let (connection, outbound) = Connection::with_observer(
            self.ids.next_id(),
            peer,
            self.config.outbound_capacity,
            observer,
        );
        connection.mark_open();

        if let Err(e) = self.supervisor.admit(Arc::clone(&connection)) {
            warn!(conn = %connection.id(), client = %peer, error = %e, "Rejected connection");
            connection.finish_close();
            return Err(e);
        }

        // Admitted after shutdown began: close_all may have missed it
        if self.shutting_down.load(Ordering::SeqCst) {
            connection.begin_close(CloseReason::Shutdown);
        }

        Ok(ConnectionHandler::new(
            connection,
            ws,
            outbound,
            Arc::clone(&self.router),
            Arc::clone(&self.stats),
        )
        .with_greeting(self.config.greeting.clone()))
    }

    fn handshake_failed(&self, peer: SocketAddr, reason: String) -> RelayError {
        self.stats.handshake_failed();
        warn!(client = %peer, reason = %reason, "WebSocket handshake failed");
        RelayError::Handshake { peer, reason }
    }
}

/// A bound relay server.
pub struct RelayServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    acceptor: Arc<Acceptor>,
}

impl fmt::Debug for RelayServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayServer")
            .field("local_addr", &self.local_addr)
            .field("policy", self.acceptor.router.policy())
            .field("connections", &self.registry.len())
            .finish()
    }
}

impl RelayServer {
    /// Binds the configured endpoint.
    ///
    /// The router is built from `policy` here and never changes afterwards.
    pub async fn bind(config: ServerConfig, policy: RoutingPolicy) -> RelayResult<Self> {
        config.validate()?;
        let addr = config.bind_address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| RelayError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| RelayError::Bind { addr, source })?;

        let registry = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(Router::new(policy, Arc::clone(&registry)));
        let stats = Arc::new(ConnectionStats::new());
        let supervisor = Arc::new(Supervisor::new(
            Arc::clone(&registry),
            Arc::clone(&router),
            Arc::clone(&stats),
        ));

        info!(
            policy = %router.policy(),
            "Listening on ws://{}",
            local_addr
        );

        Ok(Self {
            listener,
            local_addr,
            registry,
            acceptor: Arc::new(Acceptor {
                config,
                ids: IdAllocator::new(),
                router,
                supervisor,
                stats,
                shutting_down: AtomicBool::new(false),
            }),
        })
    }

    /// The address actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.acceptor.config
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn router(&self) -> Arc<Router> {
        Arc::clone(&self.acceptor.router)
    }

    pub fn stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.acceptor.stats)
    }

    /// Waits for the next client and upgrades it.
    ///
    /// The returned handler's connection is Open and registered; the
    /// caller must run it. Handshake failures are returned as
    /// [`RelayError::Handshake`] and affect only that client.
    pub async fn accept(&self) -> RelayResult<ConnectionHandler> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;
        debug!(client = %peer, "Accepted TCP connection");
        self.acceptor.upgrade(stream, peer).await
    }

    /// Runs the accept loop until `shutdown` completes, then closes every
    /// connection.
    pub async fn run_until<F>(self, shutdown: F) -> RelayResult<()>
    where
        F: Future<Output = ()>,
    {
        let RelayServer {
            listener,
            registry,
            acceptor,
            ..
        } = self;

        let _monitor = acceptor.config.monitor_interval.map(|interval| {
            HealthMonitor::start(
                Arc::clone(&registry),
                Arc::clone(&acceptor.stats),
                MonitorConfig {
                    interval,
                    ..Default::default()
                },
            )
        });

        let mut workers = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(client = %peer, "Accepted TCP connection");
                        let acceptor = Arc::clone(&acceptor);
                        workers.spawn(async move {
                            if let Ok(handler) = acceptor.upgrade(stream, peer).await {
                                handler.run().await;
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Connection task failed");
                    }
                }
            }
        }

        drop(listener);
        acceptor.shutting_down.store(true, Ordering::SeqCst);
        info!(
            active = registry.len(),
            "Shutdown requested, closing connections"
        );

        acceptor.supervisor.close_all(CloseReason::Shutdown);

        let drained = timeout(acceptor.config.shutdown_timeout, async {
            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    warn!(error = %e, "Connection task failed");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = workers.len(),
                "Connections did not close in time, aborting"
            );
            workers.abort_all();
            while workers.join_next().await.is_some() {}
            acceptor.supervisor.finish_all();
        }

        info!("Server shutdown complete");
        Ok(())
    }
}
