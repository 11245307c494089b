//! Client sessions as seen by the hub.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id distinguishing two sessions that share an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Result of attempting to enqueue a frame on a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    /// Frame was queued for the writer
    Sent,
    /// The outbound queue is full (slow consumer)
    Full,
    /// The session has been closed
    Closed,
}

/// One live client: identity, outbound queue and close latch.
///
/// Cloning is cheap; every clone refers to the same queue and latch. The
/// hub keeps one clone in its identity map and the owning client actor keeps
/// another for heartbeat replies.
#[derive(Clone)]
pub struct ClientSession {
    id: SessionId,
    identity: Arc<str>,
    sender: mpsc::Sender<Bytes>,
    closed: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

impl ClientSession {
    /// Create a session and the receiving end of its outbound queue.
    pub fn new(identity: impl Into<Arc<str>>, capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let session = Self {
            id: SessionId::next(),
            identity: identity.into(),
            sender,
            closed: Arc::new(AtomicBool::new(false)),
            shutdown: CancellationToken::new(),
        };
        (session, receiver)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Enqueue a frame without waiting.
    pub fn try_send(&self, frame: Bytes) -> SendResult {
        if self.is_closed() {
            return SendResult::Closed;
        }

        match self.sender.try_send(frame) {
            Ok(()) => SendResult::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => SendResult::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => SendResult::Closed,
        }
    }

    /// Close the outbound queue and release the connection.
    ///
    /// Returns `true` only for the call that actually closed the session;
    /// later calls are no-ops.
    pub fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        if first {
            self.shutdown.cancel();
        }
        first
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Token cancelled when the session closes, for the reader and writer.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

impl fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sessions_get_distinct_ids() {
        let (a, _rx_a) = ClientSession::new("alice", 4);
        let (b, _rx_b) = ClientSession::new("alice", 4);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.identity(), b.identity());
    }

    #[tokio::test]
    async fn test_try_send_delivers_in_order() {
        let (session, mut rx) = ClientSession::new("alice", 4);
        assert_eq!(session.try_send(Bytes::from_static(b"one")), SendResult::Sent);
        assert_eq!(session.try_send(Bytes::from_static(b"two")), SendResult::Sent);
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"one"));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"two"));
    }

    #[test]
    fn test_try_send_reports_full_queue() {
        let (session, _rx) = ClientSession::new("alice", 1);
        assert_eq!(session.try_send(Bytes::from_static(b"one")), SendResult::Sent);
        assert_eq!(session.try_send(Bytes::from_static(b"two")), SendResult::Full);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (session, _rx) = ClientSession::new("alice", 4);
        let clone = session.clone();

        assert!(session.close());
        assert!(!session.close());
        assert!(!clone.close());
        assert!(clone.is_closed());
        assert!(session.shutdown_token().is_cancelled());
        assert_eq!(session.try_send(Bytes::from_static(b"late")), SendResult::Closed);
    }

    #[test]
    fn test_dropped_receiver_reports_closed() {
        let (session, rx) = ClientSession::new("alice", 4);
        drop(rx);
        assert_eq!(session.try_send(Bytes::from_static(b"x")), SendResult::Closed);
    }
}
