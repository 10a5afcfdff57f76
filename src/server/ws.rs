//! WebSocket upgrades onto the subscription bus.
//!
//! Attributes come from the route (e.g. `/ws/nodes` pins `kind=node`) merged
//! with query parameters; a route-pinned attribute wins over the query. One
//! task per socket drains the session queue onto the transport; the session
//! ends at the first of peer close, send error, or queue overflow.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tracing::{debug, trace};

use super::state::AppState;
use crate::bus::Bus;

/// `GET /ws` and `GET /health/ws`: attributes come from the query only.
pub async fn watch_all(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Response {
    upgrade(ws, state, params, &[])
}

/// `GET /ws/namespaces`
pub async fn watch_namespaces(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Response {
    upgrade(ws, state, params, &[("kind", "namespace")])
}

/// `GET /ws/nodes`
pub async fn watch_nodes(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Response {
    upgrade(ws, state, params, &[("kind", "node")])
}

/// `GET /ws/urls`
pub async fn watch_urls(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Response {
    upgrade(ws, state, params, &[("kind", "urlprobe")])
}

/// `GET /ws/ns/{name}`: everything happening inside one namespace.
pub async fn watch_namespace(
    ws: WebSocketUpgrade,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Response {
    let pinned = [("namespace", name)];
    let pinned: Vec<(&str, &str)> = pinned.iter().map(|(k, v)| (*k, v.as_str())).collect();
    upgrade(ws, state, params, &pinned)
}

fn upgrade(
    ws: WebSocketUpgrade,
    state: AppState,
    mut attributes: HashMap<String, String>,
    pinned: &[(&str, &str)],
) -> Response {
    for (key, value) in pinned {
        attributes.insert(key.to_string(), value.to_string());
    }
    let bus = state.bus.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, bus, attributes))
}

async fn handle_socket(socket: WebSocket, bus: Arc<Bus>, attributes: HashMap<String, String>) {
    let (id, mut queue) = bus.register(attributes);
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            msg = queue.recv() => match msg {
                Some(msg) => {
                    if sink.send(Message::Text(msg.into())).await.is_err() {
                        debug!("Session {id} send failed; closing");
                        break;
                    }
                }
                // Queue sender gone: the bus evicted this session.
                None => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    debug!("Session {id} peer closed");
                    break;
                }
                // Inbound payloads carry no meaning on this channel.
                Some(Ok(other)) => trace!("Session {id} sent {other:?}; ignoring"),
            }
        }
    }

    bus.unregister(&id);
}
