//! Fan-out bus between client actors and hubs.
//!
//! A client actor hands every non-heartbeat envelope to a [`MessageBus`].
//! In a single-process deployment that is [`LocalBus`], which routes straight
//! into the local hub. A distributed bus instead publishes the raw frame to a
//! shared topic and every instance replays the topic into its own hub with
//! [`replay_frames`], so the hub's routing is the same in both topologies.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::envelope::Envelope;
use crate::error::BusError;
use crate::hub::HubHandle;

/// Destination for envelopes read from clients.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish one inbound envelope. `frame` is the envelope's original
    /// encoding, so buses that forward raw bytes need not re-encode.
    async fn publish(&self, envelope: Envelope, frame: Bytes) -> Result<(), BusError>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// In-process bus: envelopes go directly to the local hub.
#[derive(Debug, Clone)]
pub struct LocalBus {
    hub: HubHandle,
}

impl LocalBus {
    pub fn new(hub: HubHandle) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn publish(&self, envelope: Envelope, frame: Bytes) -> Result<(), BusError> {
        self.hub.route_frame(envelope, frame).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

/// Decode every frame of a bus subscription and route it into `hub`.
///
/// Malformed frames and stray heartbeats are skipped. Returns the number of
/// envelopes routed once the stream ends, or an error if the hub stops.
pub async fn replay_frames<S>(mut frames: S, hub: &HubHandle) -> Result<u64, BusError>
where
    S: Stream<Item = Bytes> + Unpin,
{
    let mut routed = 0u64;

    while let Some(frame) = frames.next().await {
        let envelope = match Envelope::decode_frame(&frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, len = frame.len(), "Dropping malformed bus frame");
                continue;
            }
        };

        if envelope.is_heartbeat() {
            debug!("Skipping heartbeat on bus");
            continue;
        }

        hub.route_frame(envelope, frame).await?;
        routed += 1;
    }

    debug!(routed, "Bus subscription ended");
    Ok(routed)
}
