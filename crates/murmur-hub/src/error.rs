//! Error types for the chat routing core.

use thiserror::Error;

/// A frame could not be turned into an envelope.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Frame bytes are not a valid protobuf encoding of an envelope
    #[error("malformed envelope frame: {0}")]
    Malformed(#[from] prost::DecodeError),
}

/// An external collaborator (storage, directory, profile service) failed.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backing store could not be reached or rejected the query
    #[error("storage error: {0}")]
    Storage(String),

    /// The requested record does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// IO error (filesystem blob store)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackendError {
    /// Create a new storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new not-found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

/// Extracting an attachment into the blob store failed.
///
/// Any of these aborts persistence of the one message being processed.
#[derive(Debug, Error)]
pub enum AttachmentError {
    /// Inline image content has no `base64` marker
    #[error("inline image content has no base64 marker")]
    MissingMarker,

    /// The inline payload is not valid base64
    #[error("invalid base64 payload: {0}")]
    Decode(#[from] base64::DecodeError),

    /// FILE envelope arrived without any bytes
    #[error("file envelope carries no bytes")]
    EmptyFile,

    /// The blob store refused the write
    #[error("blob write failed for {name}: {source}")]
    BlobWrite {
        /// Generated blob name
        name: String,
        /// Underlying collaborator error
        #[source]
        source: BackendError,
    },
}

/// Publishing to or consuming from the fan-out bus failed.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus transport rejected a publish
    #[error("bus publish failed: {0}")]
    Publish(String),

    /// The subscription could not be established or broke
    #[error("bus subscription failed: {0}")]
    Subscribe(String),

    /// The local hub is no longer running
    #[error(transparent)]
    Hub(#[from] HubError),
}

impl BusError {
    /// Create a new publish error.
    pub fn publish(msg: impl Into<String>) -> Self {
        Self::Publish(msg.into())
    }

    /// Create a new subscribe error.
    pub fn subscribe(msg: impl Into<String>) -> Self {
        Self::Subscribe(msg.into())
    }
}

/// The hub task has stopped and can no longer accept requests.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum HubError {
    /// All request channels are closed
    #[error("hub is not running")]
    Closed,
}
