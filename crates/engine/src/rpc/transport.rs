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

//! Transport abstraction consumed by the session engine.
//!
//! The engine never touches sockets directly: it talks to a [`Transport`]
//! for calls and reads pushed events from the [`EventReceiver`] handed out
//! when the channel was established.

use super::types::{PushEvent, Reply};
use crate::error::TransportError;
use serde_json::Value;
use std::{fmt, future::Future};
use tokio::sync::mpsc;

/// Stream of events pushed by the daemon; closed when the channel closes
pub type EventReceiver = mpsc::UnboundedReceiver<PushEvent>;

/// Sending half matching [`EventReceiver`]
pub type EventSender = mpsc::UnboundedSender<PushEvent>;

/// Where to connect and with which credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    /// `host:port` of the daemon
    pub host: String,
    /// Opaque access token, forwarded untouched
    pub token: Option<String>,
}

impl ConnectTarget {
    /// Create a target for `host` with an optional token
    pub fn new(host: impl Into<String>, token: Option<String>) -> Self {
        Self { host: host.into(), token: token.filter(|t| !t.is_empty()) }
    }

    /// Websocket url of the daemon's api endpoint
    pub fn url(&self) -> String {
        let host = self.host.trim_start_matches("ws://").trim_end_matches('/');
        match &self.token {
            Some(token) => format!("ws://{host}/api?token={token}"),
            None => format!("ws://{host}/api"),
        }
    }
}

impl fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.host)
    }
}

/// A connected bidirectional RPC channel
///
/// Replies are returned whatever their status; deciding what counts as a
/// failure belongs to the call logger.
pub trait Transport: Send + Sync {
    /// Invoke `api_verb` with `args` and wait for the reply
    fn call(
        &self,
        api_verb: &str,
        args: Value,
    ) -> impl Future<Output = Result<Reply, TransportError>> + Send;

    /// Close the channel; pending calls fail with [`TransportError::Closed`]
    fn close(&self) -> impl Future<Output = ()> + Send;

    /// Url the channel is connected to
    fn url(&self) -> &str;
}

/// Something able to open transports
pub trait Connector: Send + Sync {
    /// Transport produced by this connector
    type Transport: Transport;

    /// Open a channel to `target`
    fn connect(
        &self,
        target: &ConnectTarget,
    ) -> impl Future<Output = Result<(Self::Transport, EventReceiver), TransportError>> + Send;
}
