//! Common types for the routing core.

use std::fmt;

use crate::envelope::{Envelope, MessageType};

/// Lifecycle of one client connection.
///
/// Transitions only move forward:
/// `Connecting -> Registered -> Closing -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    /// Transport upgraded, not yet known to the hub
    Connecting,
    /// Present in the hub's identity map
    Registered,
    /// A read/write failure, unregister or queue closure was observed
    Closing,
    /// Reader and writer have both exited and the transport is released
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Registered => write!(f, "registered"),
            SessionState::Closing => write!(f, "closing"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// How the hub will treat a non-heartbeat envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    /// Empty recipient: every registered session
    Broadcast,
    /// Persistable content to one user
    Direct,
    /// Persistable content to every member of a group
    Group,
    /// Live signalling (or unknown content) relayed as-is to one user
    Forward,
    /// Persistable content with no usable message type; stored, not delivered
    Undeliverable,
}

impl RouteKind {
    /// Classify an envelope by recipient, content type and message type.
    pub fn classify(envelope: &Envelope) -> Self {
        if envelope.is_broadcast() {
            return Self::Broadcast;
        }

        match envelope.content_kind() {
            Some(kind) if kind.is_persistable() => match envelope.message_kind() {
                Some(MessageType::Direct) => Self::Direct,
                Some(MessageType::Group) => Self::Group,
                None => Self::Undeliverable,
            },
            _ => Self::Forward,
        }
    }

    /// Whether this route stores the envelope before delivering it.
    pub fn persists(self) -> bool {
        matches!(self, Self::Direct | Self::Group | Self::Undeliverable)
    }

    /// Label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            RouteKind::Broadcast => "broadcast",
            RouteKind::Direct => "direct",
            RouteKind::Group => "group",
            RouteKind::Forward => "forward",
            RouteKind::Undeliverable => "undeliverable",
        }
    }
}

impl fmt::Display for RouteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
