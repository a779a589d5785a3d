//! Routing Policies and Actions
//!
//! A [`RoutingPolicy`] is chosen once, when the server is built. For every
//! inbound message the router turns the policy into a [`RouterAction`],
//! which names where the payload goes.

use crate::connection::ConnectionId;
use crate::protocol::{Message, Payload};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// An external collaborator that answers forwarded messages.
///
/// `handle` is called synchronously on the source connection's reader, one
/// message at a time and in arrival order, so it should return quickly.
/// Any closure `Fn(ConnectionId, &Payload) -> Option<Payload>` is a handler.
pub trait ForwardHandler: Send + Sync {
    /// Returns the reply for `payload`, or `None` to send nothing back.
    fn handle(&self, source: ConnectionId, payload: &Payload) -> Option<Payload>;

    /// Called once when `id` is closed, to drop any state kept for it.
    fn disconnected(&self, _id: ConnectionId) {}
}

impl<F> ForwardHandler for F
where
    F: Fn(ConnectionId, &Payload) -> Option<Payload> + Send + Sync,
{
    fn handle(&self, source: ConnectionId, payload: &Payload) -> Option<Payload> {
        self(source, payload)
    }
}

/// Where inbound messages are relayed.
#[derive(Clone, Default)]
pub enum RoutingPolicy {
    /// Send every message back to its source, unchanged
    #[default]
    Echo,
    /// Send every message to every open connection
    Broadcast {
        /// Whether the source also receives its own message
        include_source: bool,
    },
    /// Hand every message to an external handler and relay its reply
    Forward(Arc<dyn ForwardHandler>),
}

impl RoutingPolicy {
    /// Builds a forward policy around `handler`.
    pub fn forward(handler: impl ForwardHandler + 'static) -> Self {
        RoutingPolicy::Forward(Arc::new(handler))
    }

    pub fn name(&self) -> &'static str {
        match self {
            RoutingPolicy::Echo => "echo",
            RoutingPolicy::Broadcast {
                include_source: true,
            } => "broadcast",
            RoutingPolicy::Broadcast {
                include_source: false,
            } => "broadcast-others",
            RoutingPolicy::Forward(_) => "forward",
        }
    }
}

impl fmt::Debug for RoutingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for RoutingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when a policy name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown routing policy '{0}' (expected echo, broadcast or broadcast-others)")]
pub struct UnknownPolicy(pub String);

impl FromStr for RoutingPolicy {
    type Err = UnknownPolicy;

    /// Parses the policies selectable without code: `echo`, `broadcast`,
    /// and `broadcast-others`. Forwarding needs a handler and is built
    /// with [`RoutingPolicy::forward`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "echo" => Ok(RoutingPolicy::Echo),
            "broadcast" => Ok(RoutingPolicy::Broadcast {
                include_source: true,
            }),
            "broadcast-others" => Ok(RoutingPolicy::Broadcast {
                include_source: false,
            }),
            _ => Err(UnknownPolicy(s.to_string())),
        }
    }
}

/// The relay decision for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterAction {
    /// Send `payload` back to the source
    Echo { payload: Payload },
    /// Send `payload` to every open connection except `exclude`
    Broadcast {
        payload: Payload,
        exclude: Option<ConnectionId>,
    },
    /// Pass `message` to the forward handler and relay its reply
    Forward { message: Message },
}
