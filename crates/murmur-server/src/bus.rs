//! Redis pub/sub bus for multi-instance deployments.
//!
//! Every instance publishes the raw frames its clients send to one channel
//! and replays everything on that channel (its own frames included) into its
//! local hub. Ordering holds per publishing connection; duplicates are not
//! filtered.

use std::pin::pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use murmur_hub::{replay_frames, BusError, Envelope, HubHandle, MessageBus};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{debug, info, instrument, warn};

/// Delay before re-subscribing after the subscription breaks.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Publishes frames to a Redis channel.
#[derive(Clone)]
pub struct RedisBus {
    conn: MultiplexedConnection,
    channel: String,
}

impl RedisBus {
    #[instrument(skip(client))]
    pub async fn connect(client: &redis::Client, channel: &str) -> Result<Self, BusError> {
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BusError::publish(format!("Failed to connect to Redis: {}", e)))?;

        info!("Connected Redis publisher");
        Ok(Self {
            conn,
            channel: channel.to_string(),
        })
    }
}

#[async_trait]
impl MessageBus for RedisBus {
    async fn publish(&self, envelope: Envelope, frame: Bytes) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(&self.channel, frame.as_ref())
            .await
            .map_err(|e| BusError::publish(e.to_string()))?;

        debug!(from = %envelope.from, to = %envelope.to, channel = %self.channel, "Published frame");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Replay the channel into `hub` until the hub stops, re-subscribing after
/// any Redis failure.
#[instrument(skip(client, hub))]
pub async fn run_redis_subscriber(client: redis::Client, channel: String, hub: HubHandle) {
    loop {
        match subscribe_once(&client, &channel, &hub).await {
            Ok(routed) => warn!(routed, "Redis subscription ended"),
            Err(BusError::Hub(e)) => {
                info!(error = %e, "Hub stopped, ending subscriber");
                return;
            }
            Err(e) => warn!(error = %e, "Redis subscription failed"),
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

async fn subscribe_once(
    client: &redis::Client,
    channel: &str,
    hub: &HubHandle,
) -> Result<u64, BusError> {
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|e| BusError::subscribe(e.to_string()))?;
    pubsub
        .subscribe(channel)
        .await
        .map_err(|e| BusError::subscribe(e.to_string()))?;
    info!("Subscribed to bus channel");

    let frames = pin!(pubsub
        .on_message()
        .map(|msg| Bytes::copy_from_slice(msg.get_payload_bytes())));
    replay_frames(frames, hub).await
}
