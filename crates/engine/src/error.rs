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

//! Error types of the monitoring engine
//!
//! Transport failures and operator-level failures are kept apart: a
//! [`TransportError`] means the channel itself misbehaved, while a
//! [`MonitorError`] is what session operations report to their caller.

use crate::session::call_log::CallFailure;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Failures of the underlying RPC channel
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The websocket handshake failed
    #[error("failed to connect to {url}: {reason}")]
    Connect {
        /// Url that was dialed
        url: String,
        /// Human readable cause
        reason: String,
    },

    /// The channel is closed; pending and future calls cannot complete
    #[error("connection closed")]
    Closed,

    /// A frame could not be written to the channel
    #[error("failed to send frame: {0}")]
    Send(String),

    /// The peer sent something that does not follow the wire protocol
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Build a [`TransportError::Connect`] from a websocket error
    pub fn connect(url: impl Into<String>, err: tungstenite::Error) -> Self {
        Self::Connect { url: url.into(), reason: err.to_string() }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

/// Errors reported by session and monitor operations
#[derive(Debug, Error)]
pub enum MonitorError {
    /// No session is open
    #[error("not connected")]
    NotConnected,

    /// A trace tag could not be parsed
    #[error("invalid trace tag '{0}', expected <api-or-*>/<category>")]
    InvalidTag(String),

    /// A trace mode could not be parsed
    #[error("invalid trace mode '{0}'")]
    InvalidMode(String),

    /// A verbosity level could not be parsed
    #[error("invalid verbosity level '{0}'")]
    InvalidLevel(String),

    /// A verbosity target could not be parsed
    #[error("invalid verbosity target '{0}', expected an api name, '*' or '-'")]
    InvalidTarget(String),

    /// A server round-trip failed
    #[error(transparent)]
    Call(#[from] CallFailure),

    /// The server answered with an unexpected shape
    #[error("unexpected response to {call}: {reason}")]
    Response {
        /// The `api/verb` that was called
        call: String,
        /// What was wrong with the answer
        reason: String,
    },

    /// Establishing the channel failed
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Result alias used across the engine
pub type Result<T, E = MonitorError> = std::result::Result<T, E>;
