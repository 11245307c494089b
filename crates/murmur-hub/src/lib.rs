//! # murmur-hub
//!
//! Real-time chat routing core for Murmur.
//!
//! This crate owns everything between an upgraded client connection and the
//! storage collaborators: the envelope codec, per-connection actors, the hub
//! that makes every routing decision, group fan-out, attachment inlining and
//! the bus that lets several server instances act as one room. It is embedded
//! in `murmur-server`, which supplies the transport and the storage.
//!
//! ## Architecture
//!
//! - **Envelope**: protobuf frame, one per transport message
//! - **Client Actors**: one reader task and one writer task per connection,
//!   sharing a single outbound queue
//! - **Hub**: one task owning the identity map; reached through [`HubHandle`]
//! - **Group Expander**: one copy of a group message per member
//! - **Attachment Inliner**: moves image and file payloads into a [`BlobStore`]
//! - **Message Bus**: local routing or a shared pub/sub topic replayed into
//!   every hub
//!
//! ```text
//! client ─► ClientActor ─► MessageBus ─► Hub ─► ClientSession queues ─► client
//!                                         │
//!                                         ├─► AttachmentInliner ─► BlobStore
//!                                         ├─► PersistenceSink
//!                                         └─► GroupExpander ─► GroupMembership / ProfileLookup
//! ```

pub mod attachment;
pub mod backend;
pub mod bus;
pub mod client;
pub mod envelope;
pub mod group;
pub mod hub;
pub mod metrics;

mod error;
mod types;

pub use attachment::AttachmentInliner;
pub use backend::{Backends, BlobStore, GroupMembership, PersistenceSink, Profile, ProfileLookup};
pub use bus::{replay_frames, LocalBus, MessageBus};
pub use client::ClientActor;
pub use envelope::{ContentType, Envelope, MessageType};
pub use error::{AttachmentError, BackendError, BusError, CodecError, HubError};
pub use group::GroupExpander;
pub use hub::{ClientSession, Hub, HubConfig, HubHandle, SendResult, SessionId};
pub use types::*;
