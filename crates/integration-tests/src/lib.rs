// Hookscope - Live Trace Monitor for Binder Daemons
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Integration test support for Hookscope.
//!
//! [`MockDaemonServer`] serves the `x-afb-ws-json1` protocol over a real
//! websocket, answering calls from a [`FakeDaemon`] so the engine can be
//! exercised end to end through [`hookscope_engine::WsJson1Transport`].

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use hookscope_engine::{test_utils::FakeDaemon, Frame, PushEvent, WSJ1_PROTOCOL};
use serde_json::{json, Value};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, error, info, warn};

/// What the server sends to every open socket
#[derive(Debug, Clone)]
enum Broadcast {
    Event(PushEvent),
    Close,
}

/// State shared by every connection
#[derive(Clone)]
struct ServerState {
    daemon: Arc<Mutex<FakeDaemon>>,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
    tokens: Arc<Mutex<Vec<Option<String>>>>,
    broadcast: broadcast::Sender<Broadcast>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A websocket server standing in for a binder daemon
pub struct MockDaemonServer {
    addr: SocketAddr,
    state: ServerState,
    server: JoinHandle<()>,
}

impl MockDaemonServer {
    /// Bind an ephemeral port on localhost and serve `daemon` at `/api`
    pub async fn start(daemon: FakeDaemon) -> eyre::Result<Self> {
        let (broadcast, _) = broadcast::channel(64);
        let state = ServerState {
            daemon: Arc::new(Mutex::new(daemon)),
            calls: Arc::default(),
            tokens: Arc::default(),
            broadcast,
        };

        let app = Router::new().route("/api", get(ws_handler)).with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        info!("Mock daemon listening on {}", addr);

        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Mock daemon failed: {}", e);
            }
        });

        Ok(Self { addr, state, server })
    }

    /// `host:port` to connect to
    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    /// The simulated daemon
    pub fn daemon(&self) -> MutexGuard<'_, FakeDaemon> {
        lock(&self.state.daemon)
    }

    /// Every call received so far, in order
    pub fn calls(&self) -> Vec<(String, Value)> {
        lock(&self.state.calls).clone()
    }

    /// Arguments of the calls received for `api_verb`
    pub fn calls_to(&self, api_verb: &str) -> Vec<Value> {
        lock(&self.state.calls)
            .iter()
            .filter(|(v, _)| v == api_verb)
            .map(|(_, a)| a.clone())
            .collect()
    }

    /// Token query parameter of each accepted connection
    pub fn tokens(&self) -> Vec<Option<String>> {
        lock(&self.state.tokens).clone()
    }

    /// Push an event to every open connection; returns how many received it
    pub fn push(&self, event: PushEvent) -> usize {
        self.state.broadcast.send(Broadcast::Event(event)).unwrap_or(0)
    }

    /// Close every open connection from the server side
    pub fn close_connections(&self) -> usize {
        self.state.broadcast.send(Broadcast::Close).unwrap_or(0)
    }
}

impl Drop for MockDaemonServer {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<ServerState>,
) -> Response {
    lock(&state.tokens).push(query.get("token").cloned());
    ws.protocols([WSJ1_PROTOCOL]).on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: ServerState) {
    let mut broadcast = state.broadcast.subscribe();
    let (mut sender, mut receiver) = socket.split();
    debug!("Client connected");

    loop {
        let outgoing = tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => match answer(&state, text.as_str()) {
                    Some(frame) => frame,
                    None => continue,
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!("Websocket error: {}", e);
                    break;
                }
            },
            pushed = broadcast.recv() => match pushed {
                Ok(Broadcast::Event(PushEvent { event, data })) => Frame::Event {
                    message: json!({"jtype": "afb-event", "event": &event, "data": data}),
                    name: event,
                },
                Ok(Broadcast::Close) => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Dropped pushed events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        if let Err(e) = sender.send(Message::Text(outgoing.encode().into())).await {
            warn!("Failed to send frame: {}", e);
            break;
        }
    }

    debug!("Client disconnected");
}

/// Reply frame for a received text message, if it is a call
fn answer(state: &ServerState, text: &str) -> Option<Frame> {
    let (id, api_verb, args) = match Frame::decode(text) {
        Ok(Frame::Call { id, api_verb, args }) => (id, api_verb, args),
        Ok(other) => {
            warn!(?other, "Ignoring non-call frame");
            return None;
        }
        Err(e) => {
            warn!("Malformed frame: {}", e);
            return None;
        }
    };

    lock(&state.calls).push((api_verb.clone(), args.clone()));
    let reply = lock(&state.daemon).handle(&api_verb, &args);
    let success = reply.is_success();
    let reply = serde_json::to_value(&reply).unwrap_or(Value::Null);
    Some(if success { Frame::ReplyOk { id, reply } } else { Frame::ReplyErr { id, reply } })
}
