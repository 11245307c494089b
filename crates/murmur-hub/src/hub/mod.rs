//! The hub: single owner of the identity map and every routing decision.
//!
//! A [`Hub`] runs as one task consuming three request queues (register,
//! unregister, route). Each request is handled to completion before the next
//! one, so the map needs no lock. Everything else talks to it through a
//! cloneable [`HubHandle`].
//!
//! Outbound delivery never blocks: frames are offered to a session's queue
//! with `try_send`, and a session whose queue is full is force-unregistered.
//! Broadcast and live-signalling frames go out exactly as they were received.
//!
//! Persistence is handed to a single writer task through a bounded queue;
//! when the queue is full the record is dropped rather than stalling routing.

mod session;

pub use session::{ClientSession, SendResult, SessionId};

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::attachment::AttachmentInliner;
use crate::backend::{Backends, PersistenceSink};
use crate::envelope::Envelope;
use crate::error::HubError;
use crate::group::GroupExpander;
use crate::metrics;
use crate::types::RouteKind;

/// Default capacity of each hub request queue.
pub const DEFAULT_REQUEST_CAPACITY: usize = 1024;

/// Default capacity of a session's outbound queue.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Default number of envelopes waiting for the persistence writer.
pub const DEFAULT_PERSIST_CAPACITY: usize = 1024;

/// Hub tuning.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of the register, unregister and route queues
    pub request_capacity: usize,
    /// Close a session's queue when another session registers the same identity
    pub close_superseded_sessions: bool,
    /// Envelopes allowed to wait for the persistence writer
    pub persist_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            request_capacity: DEFAULT_REQUEST_CAPACITY,
            close_superseded_sessions: false,
            persist_capacity: DEFAULT_PERSIST_CAPACITY,
        }
    }
}

/// One envelope to route, with the frame it arrived in.
struct RouteRequest {
    envelope: Envelope,
    frame: Bytes,
}

/// The routing actor. Create with [`Hub::new`], then spawn [`Hub::run`].
pub struct Hub {
    sessions: HashMap<String, ClientSession>,
    config: HubConfig,
    persistence: Arc<dyn PersistenceSink>,
    persist_tx: mpsc::Sender<Envelope>,
    persist_rx: Option<mpsc::Receiver<Envelope>>,
    expander: GroupExpander,
    inliner: AttachmentInliner,
    register_rx: mpsc::Receiver<ClientSession>,
    unregister_rx: mpsc::Receiver<ClientSession>,
    route_rx: mpsc::Receiver<RouteRequest>,
    session_count: Arc<AtomicUsize>,
}

/// Cloneable entry point to a running [`Hub`].
#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::Sender<ClientSession>,
    unregister_tx: mpsc::Sender<ClientSession>,
    route_tx: mpsc::Sender<RouteRequest>,
    session_count: Arc<AtomicUsize>,
}

impl Hub {
    /// Build a hub and the handle used to reach it.
    pub fn new(config: HubConfig, backends: Backends) -> (Self, HubHandle) {
        let capacity = config.request_capacity.max(1);
        let (register_tx, register_rx) = mpsc::channel(capacity);
        let (unregister_tx, unregister_rx) = mpsc::channel(capacity);
        let (route_tx, route_rx) = mpsc::channel(capacity);
        let (persist_tx, persist_rx) = mpsc::channel(config.persist_capacity.max(1));
        let session_count = Arc::new(AtomicUsize::new(0));

        let hub = Self {
            sessions: HashMap::new(),
            config,
            persistence: backends.persistence,
            persist_tx,
            persist_rx: Some(persist_rx),
            expander: GroupExpander::new(backends.groups, backends.profiles),
            inliner: AttachmentInliner::new(backends.blobs),
            register_rx,
            unregister_rx,
            route_rx,
            session_count: Arc::clone(&session_count),
        };

        let handle = HubHandle {
            register_tx,
            unregister_tx,
            route_tx,
            session_count,
        };

        (hub, handle)
    }

    /// Build a hub and spawn it on the current runtime.
    pub fn spawn(config: HubConfig, backends: Backends) -> HubHandle {
        let (hub, handle) = Self::new(config, backends);
        tokio::spawn(hub.run());
        handle
    }

    /// Process requests until every [`HubHandle`] has been dropped.
    pub async fn run(mut self) {
        info!("Hub started");

        let writer = self
            .persist_rx
            .take()
            .map(|rx| tokio::spawn(persist_loop(Arc::clone(&self.persistence), rx)));

        loop {
            // Registrations first so a client's first message never overtakes
            // its own registration.
            tokio::select! {
                biased;
                Some(session) = self.register_rx.recv() => self.register(session),
                Some(session) = self.unregister_rx.recv() => self.unregister(session),
                Some(request) = self.route_rx.recv() => {
                    self.route(request.envelope, request.frame).await
                }
                else => break,
            }
        }

        for (_, session) in self.sessions.drain() {
            session.close();
        }
        self.publish_count();

        // closing the queue lets the writer finish what is already queued
        drop(self);
        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                warn!(error = %e, "Persistence writer panicked");
            }
        }
        info!("Hub stopped");
    }

    #[instrument(skip(self, session), fields(identity = %session.identity(), session = %session.id()))]
    fn register(&mut self, session: ClientSession) {
        let identity = session.identity().to_string();
        let welcome = Envelope::welcome(&identity).to_frame();

        if let Some(previous) = self.sessions.insert(identity.clone(), session.clone()) {
            if self.config.close_superseded_sessions {
                info!(previous = %previous.id(), "Closing superseded session");
                previous.close();
            } else {
                debug!(previous = %previous.id(), "Session superseded, previous left open");
            }
        }

        info!("Session registered");
        self.publish_count();
        self.deliver(&identity, welcome);
    }

    #[instrument(skip(self, session), fields(identity = %session.identity(), session = %session.id()))]
    fn unregister(&mut self, session: ClientSession) {
        match self.sessions.get(session.identity()) {
            Some(current) if current.id() == session.id() => {
                if let Some(removed) = self.sessions.remove(session.identity()) {
                    removed.close();
                }
                info!("Session unregistered");
                self.publish_count();
            }
            Some(_) => debug!("Ignoring unregister of superseded session"),
            None => debug!("Ignoring unregister of unknown session"),
        }
    }

    #[instrument(skip(self, envelope, frame), fields(from = %envelope.from, to = %envelope.to))]
    async fn route(&mut self, mut envelope: Envelope, frame: Bytes) {
        if envelope.is_heartbeat() {
            debug!("Heartbeat reached the hub, ignoring");
            return;
        }

        let kind = RouteKind::classify(&envelope);
        metrics::record_route(kind);
        debug!(route = %kind, "Routing envelope");

        if kind.persists() {
            if self.sessions.contains_key(&envelope.from) {
                persist(&self.inliner, &self.persist_tx, &mut envelope).await;
            } else {
                debug!("Sender not hosted here, skipping persistence");
            }
        }

        match kind {
            RouteKind::Broadcast => self.broadcast(frame),
            RouteKind::Forward => self.deliver(&envelope.to, frame),
            // inlining may have rewritten the envelope
            RouteKind::Direct => self.deliver(&envelope.to, envelope.to_frame()),
            RouteKind::Group => {
                for copy in self.expander.expand(&envelope).await {
                    self.deliver(&copy.to, copy.to_frame());
                }
            }
            RouteKind::Undeliverable => {
                debug!(message_type = envelope.message_type, "Unknown message type, not delivered");
                metrics::record_drop("message_type");
            }
        }
    }

    fn broadcast(&mut self, frame: Bytes) {
        let mut unreachable = Vec::new();

        for (identity, session) in &self.sessions {
            if session.try_send(frame.clone()) != SendResult::Sent {
                unreachable.push(identity.clone());
            }
        }

        debug!(
            recipients = self.sessions.len(),
            unreachable = unreachable.len(),
            "Broadcast enqueued"
        );

        for identity in unreachable {
            self.force_unregister(&identity, "broadcast");
        }
    }

    /// Offer one frame to one identity.
    fn deliver(&mut self, identity: &str, frame: Bytes) {
        let Some(session) = self.sessions.get(identity) else {
            debug!(to = %identity, "Recipient not connected, dropping");
            metrics::record_drop("offline");
            return;
        };

        if session.try_send(frame) != SendResult::Sent {
            self.force_unregister(identity, "deliver");
        }
    }

    fn force_unregister(&mut self, identity: &str, during: &'static str) {
        if let Some(session) = self.sessions.remove(identity) {
            let reason = if session.is_closed() { "closed" } else { "slow_consumer" };
            warn!(identity = %identity, session = %session.id(), during, reason, "Dropping unreachable session");
            session.close();
            metrics::record_drop(reason);
            self.publish_count();
        }
    }

    fn publish_count(&self) {
        let count = self.sessions.len();
        self.session_count.store(count, Ordering::Relaxed);
        metrics::record_session_count(count);
    }
}

/// Inline attachments and queue the envelope for the persistence writer.
///
/// A failed inline skips persistence and leaves the envelope as received.
async fn persist(
    inliner: &AttachmentInliner,
    queue: &mpsc::Sender<Envelope>,
    envelope: &mut Envelope,
) {
    if let Err(e) = inliner.inline(envelope).await {
        warn!(error = %e, "Attachment inlining failed, message not persisted");
        metrics::record_drop("attachment");
        return;
    }

    match queue.try_send(envelope.clone()) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!("Persistence queue full, message not persisted");
            metrics::record_drop("persistence_backlog");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            warn!("Persistence writer stopped, message not persisted");
            metrics::record_drop("persistence");
        }
    }
}

/// Save queued envelopes one at a time until the hub drops the queue.
async fn persist_loop(sink: Arc<dyn PersistenceSink>, mut queue: mpsc::Receiver<Envelope>) {
    while let Some(record) = queue.recv().await {
        if let Err(e) = sink.save(&record).await {
            warn!(error = %e, from = %record.from, to = %record.to, "Failed to persist message");
            metrics::record_drop("persistence");
        }
    }
    debug!("Persistence writer stopped");
}

impl HubHandle {
    /// Add a session to the identity map, replacing any session of the same identity.
    pub async fn register(&self, session: ClientSession) -> Result<(), HubError> {
        self.register_tx
            .send(session)
            .await
            .map_err(|_| HubError::Closed)
    }

    /// Remove a session if it is still the registered one for its identity.
    pub async fn unregister(&self, session: ClientSession) -> Result<(), HubError> {
        self.unregister_tx
            .send(session)
            .await
            .map_err(|_| HubError::Closed)
    }

    /// Submit an envelope for routing. Routing failures are absorbed by the hub.
    ///
    /// The envelope is encoded here; use [`HubHandle::route_frame`] when the
    /// frame it was decoded from is at hand.
    pub async fn route(&self, envelope: Envelope) -> Result<(), HubError> {
        let frame = envelope.to_frame();
        self.route_frame(envelope, frame).await
    }

    /// Submit an envelope together with the frame it was decoded from.
    ///
    /// Broadcast and live-signalling deliveries reuse `frame` byte for byte,
    /// so fields this build does not know about still reach the recipient.
    pub async fn route_frame(&self, envelope: Envelope, frame: Bytes) -> Result<(), HubError> {
        self.route_tx
            .send(RouteRequest { envelope, frame })
            .await
            .map_err(|_| HubError::Closed)
    }

    /// Number of sessions in the identity map as of the last processed request.
    pub fn session_count(&self) -> usize {
        self.session_count.load(Ordering::Relaxed)
    }

    /// Whether the hub task is still accepting requests.
    pub fn is_running(&self) -> bool {
        !self.route_tx.is_closed()
    }
}

impl std::fmt::Debug for HubHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubHandle")
            .field("sessions", &self.session_count())
            .finish_non_exhaustive()
    }
}
