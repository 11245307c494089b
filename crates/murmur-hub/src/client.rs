//! Client actor: one physical connection bridged to the hub.
//!
//! The actor registers its session, then runs a reader task and a writer task
//! until either of them (or the hub) closes the session:
//!
//! ```text
//!   transport ──► reader ──► MessageBus ──► Hub
//!                   │                        │
//!                   │ heartbeat reply        │ try_send
//!                   ▼                        ▼
//!               outbound queue ◄─────────────┘
//!                   │
//!                   ▼
//!                writer ──► transport
//! ```
//!
//! The writer is the only code that touches the transport's sink, so frames
//! are never interleaved on the wire.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn, Instrument};

use crate::bus::MessageBus;
use crate::envelope::Envelope;
use crate::error::BusError;
use crate::hub::{ClientSession, HubHandle, SendResult};
use crate::metrics;
use crate::types::SessionState;

/// How long the writer waits for the transport to close cleanly.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns one connection for its whole life.
pub struct ClientActor {
    session: ClientSession,
    outbound: mpsc::Receiver<Bytes>,
    hub: HubHandle,
    bus: Arc<dyn MessageBus>,
    state: watch::Sender<SessionState>,
}

impl ClientActor {
    pub fn new(
        identity: impl Into<Arc<str>>,
        outbound_capacity: usize,
        hub: HubHandle,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        let (session, outbound) = ClientSession::new(identity, outbound_capacity);
        let (state, _) = watch::channel(SessionState::Connecting);
        Self {
            session,
            outbound,
            hub,
            bus,
            state,
        }
    }

    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    /// Observe the connection's lifecycle.
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Drive the connection until it closes. Returns the final state.
    #[instrument(
        name = "client.session",
        skip_all,
        fields(identity = %self.session.identity(), session = %self.session.id())
    )]
    pub async fn run<R, W, E>(self, reader: R, mut writer: W) -> SessionState
    where
        R: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
        E: fmt::Display + Send + 'static,
        W: Sink<Bytes> + Send + Unpin + 'static,
        W::Error: fmt::Display + Send,
    {
        let ClientActor {
            session,
            outbound,
            hub,
            bus,
            state,
        } = self;

        if let Err(e) = hub.register(session.clone()).await {
            warn!(error = %e, "Hub unavailable, refusing connection");
            session.close();
            if let Err(e) = writer.close().await {
                debug!(error = %e, "Error closing refused connection");
            }
            state.send_replace(SessionState::Closed);
            return SessionState::Closed;
        }
        state.send_replace(SessionState::Registered);
        debug!(bus = bus.name(), "Client registered");

        let shutdown = session.shutdown_token();
        let reader_task = tokio::spawn(read_loop(reader, session.clone(), bus).in_current_span());
        let writer_task =
            tokio::spawn(write_loop(writer, outbound, session.clone()).in_current_span());

        shutdown.cancelled().await;
        state.send_replace(SessionState::Closing);

        if let Err(e) = hub.unregister(session.clone()).await {
            debug!(error = %e, "Hub stopped before unregister");
        }

        for (path, task) in [("reader", reader_task), ("writer", writer_task)] {
            if let Err(e) = task.await {
                warn!(error = %e, path, "Connection task panicked");
            }
        }

        state.send_replace(SessionState::Closed);
        info!("Connection closed");
        SessionState::Closed
    }
}

impl fmt::Debug for ClientActor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientActor")
            .field("session", &self.session)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

async fn read_loop<R, E>(mut reader: R, session: ClientSession, bus: Arc<dyn MessageBus>)
where
    R: Stream<Item = Result<Bytes, E>> + Unpin,
    E: fmt::Display,
{
    let shutdown = session.shutdown_token();

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = reader.next() => next,
        };

        let frame = match next {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                warn!(error = %e, "Connection read failed");
                break;
            }
            None => {
                debug!("Connection closed by peer");
                break;
            }
        };

        if handle_frame(&session, bus.as_ref(), frame).await.is_break() {
            break;
        }
    }

    session.close();
}

async fn handle_frame(session: &ClientSession, bus: &dyn MessageBus, frame: Bytes) -> ControlFlow<()> {
    let envelope = match Envelope::decode_frame(&frame) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, len = frame.len(), "Dropping malformed frame");
            return ControlFlow::Continue(());
        }
    };

    if envelope.is_heartbeat() {
        match session.try_send(Envelope::heartbeat_reply().to_frame()) {
            SendResult::Sent => metrics::record_heartbeat(),
            SendResult::Full => warn!("Outbound queue full, heartbeat reply dropped"),
            SendResult::Closed => return ControlFlow::Break(()),
        }
        return ControlFlow::Continue(());
    }

    match bus.publish(envelope, frame).await {
        Ok(()) => ControlFlow::Continue(()),
        Err(BusError::Hub(e)) => {
            warn!(error = %e, "Hub stopped, closing connection");
            ControlFlow::Break(())
        }
        Err(e) => {
            warn!(error = %e, bus = bus.name(), "Failed to publish envelope");
            ControlFlow::Continue(())
        }
    }
}

async fn write_loop<W>(mut writer: W, mut outbound: mpsc::Receiver<Bytes>, session: ClientSession)
where
    W: Sink<Bytes> + Unpin,
    W::Error: fmt::Display,
{
    let shutdown = session.shutdown_token();

    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            result = writer.send(frame) => {
                if let Err(e) = result {
                    warn!(error = %e, "Connection write failed");
                    break;
                }
            }
        }
    }

    session.close();
    outbound.close();

    match tokio::time::timeout(CLOSE_TIMEOUT, writer.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "Error closing connection"),
        Err(_) => debug!("Timed out closing connection"),
    }
}
