//! Message Router
//!
//! The router decides where each inbound message goes and then carries the
//! decision out through the target connections' send paths.
//!
//! ## Failure Handling
//!
//! A target can close between the routing decision and the send. Such
//! sends fail with a dropped-write error; the router counts them and moves
//! on to the next target. Routing itself never fails.
//!
//! ## Backpressure
//!
//! Replies to the source use [`Connection::send`] and wait for queue room,
//! which slows only the source's own reader. Deliveries to other
//! connections use [`Connection::offer`]: a full queue drops the newest
//! message for that target instead of stalling the source.

use super::policy::{RouterAction, RoutingPolicy};
use crate::connection::{Connection, ConnectionId};
use crate::protocol::{Message, Payload};
use crate::registry::ConnectionRegistry;
use std::sync::Arc;
use tracing::{debug, trace};

/// Result of executing one [`RouterAction`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayOutcome {
    /// Targets the payload was queued for
    pub delivered: usize,
    /// Targets whose write was dropped
    pub dropped: usize,
}

/// Routes inbound messages according to a fixed [`RoutingPolicy`].
pub struct Router {
    policy: RoutingPolicy,

    /// Connections that broadcast reaches
    registry: Arc<ConnectionRegistry>,
}

impl Router {
    pub fn new(policy: RoutingPolicy, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            policy,
            registry,
        }
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    /// Decides what to do with `message`, which arrived on `source`.
    pub fn route(&self, source: ConnectionId, message: Message) -> RouterAction {
        match &self.policy {
            RoutingPolicy::Echo => RouterAction::Echo {
                payload: message.payload,
            },
            RoutingPolicy::Broadcast { include_source } => RouterAction::Broadcast {
                payload: message.payload,
                exclude: (!include_source).then_some(source),
            },
            RoutingPolicy::Forward(_) => RouterAction::Forward { message },
        }
    }

    /// Carries out `action` for a message that arrived on `source`.
    pub async fn execute(&self, action: RouterAction, source: &Arc<Connection>) -> RelayOutcome {
        match action {
            RouterAction::Echo { payload } => Self::reply(source, payload).await,
            RouterAction::Broadcast { payload, exclude } => {
                self.broadcast(source, payload, exclude).await
            }
            RouterAction::Forward { message } => {
                let RoutingPolicy::Forward(handler) = &self.policy else {
                    debug!(conn = %source.id(), "Forward action without a forward handler");
                    return RelayOutcome {
                        delivered: 0,
                        dropped: 1,
                    };
                };
                match handler.handle(message.source, &message.payload) {
                    Some(reply) => Self::reply(source, reply).await,
                    None => RelayOutcome::default(),
                }
            }
        }
    }

    /// Routes `message` and executes the resulting action.
    pub async fn relay(&self, source: &Arc<Connection>, message: Message) -> RelayOutcome {
        let action = self.route(source.id(), message);
        let outcome = self.execute(action, source).await;
        trace!(
            conn = %source.id(),
            delivered = outcome.delivered,
            dropped = outcome.dropped,
            "Relayed message"
        );
        outcome
    }

    /// Tells the forward handler that `id` is gone.
    ///
    /// The router itself keeps no per-connection state.
    pub fn release(&self, id: ConnectionId) {
        if let RoutingPolicy::Forward(handler) = &self.policy {
            handler.disconnected(id);
        }
    }

    async fn reply(source: &Connection, payload: Payload) -> RelayOutcome {
        match source.send(payload).await {
            Ok(()) => RelayOutcome {
                delivered: 1,
                dropped: 0,
            },
            Err(e) => {
                debug!(conn = %source.id(), error = %e, "Reply dropped");
                RelayOutcome {
                    delivered: 0,
                    dropped: 1,
                }
            }
        }
    }

    async fn broadcast(
        &self,
        source: &Arc<Connection>,
        payload: Payload,
        exclude: Option<ConnectionId>,
    ) -> RelayOutcome {
        let mut outcome = RelayOutcome::default();

        for target in self.registry.snapshot() {
            if Some(target.id()) == exclude || !target.is_open() {
                continue;
            }

            let result = if target.id() == source.id() {
                source.send(payload.clone()).await
            } else {
                target.offer(payload.clone())
            };

            match result {
                Ok(()) => outcome.delivered += 1,
                Err(e) => {
                    debug!(conn = %target.id(), error = %e, "Broadcast delivery dropped");
                    outcome.dropped += 1;
                }
            }
        }

        outcome
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
