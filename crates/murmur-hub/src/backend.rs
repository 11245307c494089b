//! External collaborators the routing core depends on.
//!
//! The hub never owns users, groups, message history or blobs. It reaches
//! them through these traits so that `murmur-server` (or a test) can plug in
//! whatever storage it has.

use std::sync::Arc;

use async_trait::async_trait;

use crate::envelope::Envelope;
use crate::error::BackendError;

/// Display profile of a user, as shown to group members.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    pub display_name: String,
    /// Avatar reference (blob name or URL)
    pub avatar: String,
}

/// Group membership directory.
#[async_trait]
pub trait GroupMembership: Send + Sync {
    /// List the member identities of a group, in join order.
    ///
    /// An unknown group yields an empty list, not an error.
    async fn list_members(&self, group_id: &str) -> Result<Vec<String>, BackendError>;
}

/// User profile lookup.
#[async_trait]
pub trait ProfileLookup: Send + Sync {
    /// Fetch the display profile for an identity, `None` if unknown.
    async fn get(&self, identity: &str) -> Result<Option<Profile>, BackendError>;
}

/// Durable message history.
///
/// Calls are fire-and-forget from the hub's point of view: a failure is
/// logged and never holds up delivery.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn save(&self, envelope: &Envelope) -> Result<(), BackendError>;
}

/// Named blob storage for attachments.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `bytes` under `name`. Names are generated and never reused.
    async fn write(&self, name: &str, bytes: &[u8]) -> Result<(), BackendError>;
}

/// The full set of collaborators a hub is built with.
#[derive(Clone)]
pub struct Backends {
    pub groups: Arc<dyn GroupMembership>,
    pub profiles: Arc<dyn ProfileLookup>,
    pub persistence: Arc<dyn PersistenceSink>,
    pub blobs: Arc<dyn BlobStore>,
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends").finish_non_exhaustive()
    }
}
