//! Test utilities for hub routing tests.
//!
//! Provides in-memory collaborators and a harness that runs a real hub and
//! can wait until every previously submitted request has been processed.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use murmur_hub::{
    Backends, BackendError, BlobStore, ClientSession, ContentType, Envelope, GroupMembership,
    Hub, HubConfig, HubHandle, MessageType, PersistenceSink, Profile, ProfileLookup,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Default timeout for test operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

const PROBE: &str = "__probe";

/// Initialise tracing once for the whole test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("murmur_hub=debug")
        .with_test_writer()
        .try_init();
}

/// Persistence sink that records every saved envelope.
#[derive(Default)]
pub struct RecordingSink {
    saved: Mutex<Vec<Envelope>>,
}

impl RecordingSink {
    pub fn saved(&self) -> Vec<Envelope> {
        self.saved.lock().unwrap().clone()
    }

    /// Wait until at least `count` envelopes were saved, then return them.
    pub async fn wait_for(&self, count: usize) -> Vec<Envelope> {
        timeout(DEFAULT_TIMEOUT, async {
            loop {
                let saved = self.saved();
                if saved.len() >= count {
                    return saved;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("persistence sink never reached the expected count")
    }
}

#[async_trait]
impl PersistenceSink for RecordingSink {
    async fn save(&self, envelope: &Envelope) -> Result<(), BackendError> {
        self.saved.lock().unwrap().push(envelope.clone());
        Ok(())
    }
}

/// Fixed group memberships and profiles.
#[derive(Default)]
pub struct StaticDirectory {
    groups: HashMap<String, Vec<String>>,
    profiles: HashMap<String, Profile>,
}

impl StaticDirectory {
    pub fn with_group(mut self, group: &str, members: &[&str]) -> Self {
        self.groups.insert(
            group.to_string(),
            members.iter().map(|m| m.to_string()).collect(),
        );
        self
    }

    pub fn with_profile(mut self, identity: &str, display_name: &str, avatar: &str) -> Self {
        self.profiles.insert(
            identity.to_string(),
            Profile {
                display_name: display_name.to_string(),
                avatar: avatar.to_string(),
            },
        );
        self
    }
}

#[async_trait]
impl GroupMembership for StaticDirectory {
    async fn list_members(&self, group_id: &str) -> Result<Vec<String>, BackendError> {
        Ok(self.groups.get(group_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl ProfileLookup for StaticDirectory {
    async fn get(&self, identity: &str) -> Result<Option<Profile>, BackendError> {
        Ok(self.profiles.get(identity).cloned())
    }
}

/// Blob store keeping everything in memory; can be switched to failing.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    failing: AtomicBool,
}

impl MemoryBlobStore {
    pub fn fail_writes(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.blobs.lock().unwrap().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn write(&self, name: &str, bytes: &[u8]) -> Result<(), BackendError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BackendError::storage("blob store unavailable"));
        }
        self.blobs
            .lock()
            .unwrap()
            .insert(name.to_string(), bytes.to_vec());
        Ok(())
    }
}

/// A running hub with recording collaborators.
pub struct Harness {
    pub hub: HubHandle,
    pub sink: Arc<RecordingSink>,
    pub blobs: Arc<MemoryBlobStore>,
    probe_rx: mpsc::Receiver<Bytes>,
    probes: AtomicU64,
}

impl Harness {
    pub async fn start(directory: StaticDirectory) -> Self {
        Self::with_config(directory, HubConfig::default()).await
    }

    pub async fn with_config(directory: StaticDirectory, config: HubConfig) -> Self {
        init_tracing();

        let directory = Arc::new(directory);
        let sink = Arc::new(RecordingSink::default());
        let blobs = Arc::new(MemoryBlobStore::default());
        let hub = Hub::spawn(
            config,
            Backends {
                groups: directory.clone(),
                profiles: directory,
                persistence: sink.clone(),
                blobs: blobs.clone(),
            },
        );

        let (probe, probe_rx) = ClientSession::new(PROBE, 1024);
        hub.register(probe).await.unwrap();

        let mut harness = Self {
            hub,
            sink,
            blobs,
            probe_rx,
            probes: AtomicU64::new(0),
        };
        harness.settle().await;
        harness
    }

    /// Register a session and consume its welcome frame.
    pub async fn connect(&self, identity: &str, capacity: usize) -> (ClientSession, mpsc::Receiver<Bytes>) {
        let (session, mut rx) = ClientSession::new(identity, capacity);
        self.hub.register(session.clone()).await.unwrap();

        let welcome = recv(&mut rx).await;
        assert_eq!(welcome, Envelope::welcome(identity));
        (session, rx)
    }

    /// Wait until the hub has processed everything submitted so far.
    ///
    /// Routes a live-signal envelope to an internal probe session; the route
    /// queue is FIFO and register/unregister are served first, so its arrival
    /// means all earlier requests are done.
    pub async fn settle(&mut self) {
        let n = self.probes.fetch_add(1, Ordering::Relaxed);
        let marker = format!("probe-{n}");
        let mut probe = Envelope {
            from: PROBE.to_string(),
            to: PROBE.to_string(),
            content: marker.clone(),
            ..Default::default()
        };
        probe.set_content_kind(ContentType::VideoLive);
        self.hub.route(probe).await.unwrap();

        loop {
            let envelope = recv(&mut self.probe_rx).await;
            if envelope.content == marker {
                return;
            }
        }
    }
}

/// Receive and decode the next frame, failing the test on timeout.
pub async fn recv(rx: &mut mpsc::Receiver<Bytes>) -> Envelope {
    let frame = timeout(DEFAULT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("outbound queue closed");
    Envelope::decode_frame(&frame).expect("hub sent a malformed frame")
}

/// Assert nothing is waiting in a session's queue.
pub fn assert_silent(rx: &mut mpsc::Receiver<Bytes>) {
    if let Ok(frame) = rx.try_recv() {
        panic!(
            "unexpected frame: {:?}",
            Envelope::decode_frame(&frame).ok()
        );
    }
}

pub fn text(from: &str, to: &str, body: &str, message_type: MessageType) -> Envelope {
    let mut envelope = Envelope {
        from: from.to_string(),
        to: to.to_string(),
        content: body.to_string(),
        ..Default::default()
    };
    envelope.set_content_kind(ContentType::Text);
    envelope.set_message_kind(message_type);
    envelope
}
