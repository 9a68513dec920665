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

//! Websocket client for the binder daemon.
//!
//! One reader task correlates replies with pending calls and forwards pushed
//! events; one writer task owns the sink. Dropping or closing the transport
//! fails every pending call with [`TransportError::Closed`].

use super::{
    transport::{ConnectTarget, Connector, EventReceiver, EventSender, Transport},
    types::{Frame, PushEvent, Reply, WSJ1_PROTOCOL},
};
use crate::error::TransportError;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use std::{
    collections::HashMap,
    fmt::Display,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        self,
        client::IntoClientRequest,
        http::{header::SEC_WEBSOCKET_PROTOCOL, HeaderValue},
        Message,
    },
};
use tracing::{debug, error, info, warn};

type ReplySender = oneshot::Sender<Result<Reply, TransportError>>;

#[derive(Default, Debug)]
struct PendingCalls {
    calls: HashMap<String, ReplySender>,
    closed: bool,
}

/// Calls waiting for their reply, by correlation id
///
/// Once failed, the table stays closed and settles new calls immediately.
#[derive(Default, Clone, Debug)]
struct Pending(Arc<Mutex<PendingCalls>>);

impl Pending {
    fn lock(&self) -> MutexGuard<'_, PendingCalls> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, id: String, sender: ReplySender) {
        let mut pending = self.lock();
        if pending.closed {
            let _ = sender.send(Err(TransportError::Closed));
        } else {
            pending.calls.insert(id, sender);
        }
    }

    fn settle(&self, id: &str, result: Result<Reply, TransportError>) {
        match self.lock().calls.remove(id) {
            Some(sender) => {
                // The caller may have given up on the reply
                let _ = sender.send(result);
            }
            None => warn!(id, "reply for unknown call"),
        }
    }

    fn fail_all(&self) {
        let mut pending = self.lock();
        pending.closed = true;
        for (_, sender) in pending.calls.drain() {
            let _ = sender.send(Err(TransportError::Closed));
        }
    }
}

/// Websocket transport speaking `x-afb-ws-json1`
#[derive(Debug)]
pub struct WsJson1Transport {
    url: String,
    outgoing: mpsc::UnboundedSender<Message>,
    pending: Pending,
    token: Arc<Mutex<Option<String>>>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl WsJson1Transport {
    /// Connect to `target` and start the reader and writer tasks
    pub async fn connect(target: &ConnectTarget) -> Result<(Self, EventReceiver), TransportError> {
        let url = target.url();
        let mut request =
            url.as_str().into_client_request().map_err(|e| TransportError::connect(&url, e))?;
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(WSJ1_PROTOCOL));

        debug!(%url, "Connecting to daemon");
        let (stream, _response) =
            connect_async(request).await.map_err(|e| TransportError::connect(&url, e))?;
        info!(%url, "Connected to daemon");

        let (sink, stream) = stream.split();
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pending = Pending::default();
        let token = Arc::new(Mutex::new(target.token.clone()));

        let writer = tokio::spawn(write_loop(sink, outgoing_rx, pending.clone()));
        let reader = tokio::spawn(read_loop(stream, pending.clone(), token.clone(), events_tx));

        let transport =
            Self { url, outgoing, pending, token, next_id: AtomicU64::new(1), reader, writer };
        Ok((transport, events_rx))
    }

    /// Latest token known for this connection
    ///
    /// Starts as the token given at connect time and follows any refresh
    /// announced by the daemon in a reply.
    pub fn token(&self) -> Option<String> {
        self.token.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Transport for WsJson1Transport {
    async fn call(&self, api_verb: &str, args: Value) -> Result<Reply, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let (sender, receiver) = oneshot::channel();
        self.pending.insert(id.clone(), sender);

        let frame = Frame::Call { id: id.clone(), api_verb: api_verb.to_string(), args };
        if self.outgoing.send(Message::Text(frame.encode().into())).is_err() {
            self.pending.settle(&id, Err(TransportError::Closed));
        }

        receiver.await.map_err(|_| TransportError::Closed)?
    }

    async fn close(&self) {
        debug!(url = %self.url, "Closing connection");
        let _ = self.outgoing.send(Message::Close(None));
        self.reader.abort();
        self.pending.fail_all();
    }

    fn url(&self) -> &str {
        &self.url
    }
}

impl Drop for WsJson1Transport {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
        self.pending.fail_all();
    }
}

/// Opens [`WsJson1Transport`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    type Transport = WsJson1Transport;

    async fn connect(
        &self,
        target: &ConnectTarget,
    ) -> Result<(WsJson1Transport, EventReceiver), TransportError> {
        WsJson1Transport::connect(target).await
    }
}

async fn write_loop<S>(
    mut sink: S,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
    pending: Pending,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    while let Some(message) = outgoing.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            error!("Failed to send frame: {e}");
            pending.fail_all();
            break;
        }
        if closing {
            break;
        }
    }
}

async fn read_loop<S>(
    mut stream: S,
    pending: Pending,
    token: Arc<Mutex<Option<String>>>,
    events: EventSender,
) where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(frame)) => {
                info!(?frame, "Daemon closed the connection");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                error!("Websocket error: {e}");
                break;
            }
        };

        match Frame::decode(text.as_str()) {
            Ok(Frame::ReplyOk { id, reply }) => {
                pending.settle(&id, parse_reply(reply, false, &token));
            }
            Ok(Frame::ReplyErr { id, reply }) => {
                pending.settle(&id, parse_reply(reply, true, &token));
            }
            Ok(Frame::Event { name, message }) => {
                if events.send(PushEvent::from_message(name, message)).is_err() {
                    debug!("Event receiver dropped");
                }
            }
            Ok(Frame::Call { api_verb, .. }) => {
                warn!(%api_verb, "Ignoring call issued by the daemon");
            }
            Err(e) => warn!("Dropping malformed frame: {e}"),
        }
    }

    pending.fail_all();
}

fn parse_reply(
    value: Value,
    rejected: bool,
    token: &Mutex<Option<String>>,
) -> Result<Reply, TransportError> {
    let mut reply: Reply = serde_json::from_value(value)?;
    reply.rejected = rejected;
    if let Some(refreshed) = &reply.request.token {
        *token.lock().unwrap_or_else(PoisonError::into_inner) = Some(refreshed.clone());
    }
    Ok(reply)
}
