//! Chat over WebSocket
//!
//! Each connection becomes one client actor. Binary and text frames both
//! carry a single encoded envelope; outbound frames are always binary.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use futures::{future, SinkExt, StreamExt};
use murmur_hub::ClientActor;
use serde::Deserialize;
use tracing::{info, warn};

use super::super::AppState;

/// Create the WebSocket router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/socket.io", get(socket_handler))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    #[serde(default)]
    user: String,
}

/// GET /socket.io?user=<identity>
async fn socket_handler(
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if params.user.is_empty() {
        warn!("WebSocket request without user");
        return (StatusCode::BAD_REQUEST, "missing user").into_response();
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    info!(user = %params.user, "WebSocket connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, params.user, state))
}

async fn handle_socket(socket: WebSocket, user: String, state: Arc<AppState>) {
    let (sink, stream) = socket.split();

    // Close ends the read side; pings are answered by the socket itself
    let reader = stream
        .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Binary(data)) => Some(Ok(Bytes::from(data))),
                Ok(Message::Text(text)) => Some(Ok(Bytes::from(text))),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            })
        });

    let writer = sink.with(|frame: Bytes| {
        future::ready(Ok::<_, axum::Error>(Message::Binary(frame.to_vec())))
    });

    let actor = ClientActor::new(
        user,
        state.outbound_capacity,
        state.hub.clone(),
        state.bus.clone(),
    );
    let session = actor.session().id();

    let final_state = actor.run(reader, writer).await;
    info!(%session, state = ?final_state, "WebSocket connection closed");
}
