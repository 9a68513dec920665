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

//! Call logger and log feed.
//!
//! [`CallLogger`] is the only component issuing RPC calls. Every call is
//! recorded before dispatch and again once it settles, both in the operator
//! facing [`LogFeed`] and through `tracing`.

use crate::{
    error::TransportError,
    rpc::{Reply, Transport},
};
use chrono::{DateTime, Local};
use serde_json::Value;
use std::{collections::VecDeque, fmt};
use thiserror::Error;
use tracing::{debug, warn};

/// Default capacity of a [`LogFeed`]
pub const DEFAULT_MAX_LOG_ENTRIES: usize = 1000;

/// Category of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    /// A call was dispatched
    SendRequest,
    /// A call settled successfully
    ReceiveSuccess,
    /// A call was rejected or the channel failed
    ReceiveError,
    /// A trace event arrived
    TraceEvent,
    /// A push that is not a trace event arrived
    UnexpectedEvent,
    /// Any other failure worth showing
    Error,
}

impl LogKind {
    /// Short class name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendRequest => "call",
            Self::ReceiveSuccess => "retok",
            Self::ReceiveError => "reterr",
            Self::TraceEvent => "trace",
            Self::UnexpectedEvent => "event",
            Self::Error => "error",
        }
    }
}

/// One entry of the log feed
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// When the entry was recorded
    pub at: DateTime<Local>,
    /// Entry category
    pub kind: LogKind,
    /// Short tag, e.g. `send request`
    pub tag: String,
    /// Free-form content
    pub content: String,
}

/// Append-only, operator-clearable log of the session
///
/// While disabled, entries are dropped rather than queued. The feed keeps at
/// most `max_entries` entries, evicting the oldest first.
#[derive(Debug, Clone)]
pub struct LogFeed {
    entries: VecDeque<LogEntry>,
    enabled: bool,
    max_entries: usize,
}

impl Default for LogFeed {
    fn default() -> Self {
        Self::new(false, DEFAULT_MAX_LOG_ENTRIES)
    }
}

impl LogFeed {
    /// Create a feed
    pub fn new(enabled: bool, max_entries: usize) -> Self {
        Self { entries: VecDeque::new(), enabled, max_entries: max_entries.max(1) }
    }

    /// Record an entry; returns whether it was kept
    pub fn push(&mut self, kind: LogKind, tag: impl Into<String>, content: impl Into<String>) -> bool {
        if !self.enabled {
            return false;
        }
        if self.entries.len() == self.max_entries {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            at: Local::now(),
            kind,
            tag: tag.into(),
            content: content.into(),
        });
        true
    }

    /// Record an error entry with a pretty-printed JSON body
    pub fn push_error(&mut self, tag: impl Into<String>, body: &Value) -> bool {
        self.push(LogKind::Error, tag, pretty(body))
    }

    /// Enable or disable recording
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Whether entries are being recorded
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entries, oldest first
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the feed holds no entry
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Why a call did not succeed
#[derive(Debug, Clone, Error)]
pub enum CallFailure {
    /// The daemon answered with an error status
    #[error("request rejected: {}", describe_rejection(.0))]
    Rejected(Reply),
    /// The channel failed before a reply arrived
    #[error(transparent)]
    Transport(#[from] TransportError),
}

fn describe_rejection(reply: &Reply) -> String {
    match &reply.request.info {
        Some(info) => format!("{} ({info})", reply.request.status),
        None => reply.request.status.clone(),
    }
}

impl CallFailure {
    /// Whether the channel itself is gone
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Transport(TransportError::Closed))
    }
}

/// Explicit outcome of a call
pub type CallOutcome = Result<Reply, CallFailure>;

/// Wraps a transport and logs every call
pub struct CallLogger<T> {
    transport: T,
    feed: LogFeed,
}

impl<T: fmt::Debug> fmt::Debug for CallLogger<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallLogger").field("transport", &self.transport).finish_non_exhaustive()
    }
}

impl<T: Transport> CallLogger<T> {
    /// Wrap `transport`, recording into `feed`
    pub fn new(transport: T, feed: LogFeed) -> Self {
        Self { transport, feed }
    }

    /// Call `api_verb` with `args`
    ///
    /// Logs `send request` before dispatch, then `receive success` or
    /// `receive error` with the reply. A reply whose status is not `success`
    /// becomes [`CallFailure::Rejected`].
    pub async fn call(&mut self, api_verb: &str, args: Value) -> CallOutcome {
        let call = format!("{api_verb}({})", pretty(&args));
        debug!(api_verb, args = %args, "Sending request");
        self.feed.push(LogKind::SendRequest, "send request", call.as_str());

        match self.transport.call(api_verb, args).await {
            Ok(reply) if reply.is_success() => {
                debug!(api_verb, "Request succeeded");
                self.feed.push(
                    LogKind::ReceiveSuccess,
                    "receive success",
                    format!("{call} -> {}", pretty_reply(&reply)),
                );
                Ok(reply)
            }
            Ok(reply) => {
                warn!(api_verb, status = %reply.request.status, "Request rejected");
                self.feed.push(
                    LogKind::ReceiveError,
                    "receive error",
                    format!("{call} -> {}", pretty_reply(&reply)),
                );
                Err(CallFailure::Rejected(reply))
            }
            Err(e) => {
                warn!(api_verb, "Request failed: {e}");
                self.feed.push(LogKind::ReceiveError, "receive error", format!("{call} -> {e}"));
                Err(CallFailure::Transport(e))
            }
        }
    }

    /// The wrapped transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The log feed
    pub fn feed(&self) -> &LogFeed {
        &self.feed
    }

    /// The log feed, mutably
    pub fn feed_mut(&mut self) -> &mut LogFeed {
        &mut self.feed
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn pretty_reply(reply: &Reply) -> String {
    serde_json::to_string_pretty(reply).unwrap_or_else(|_| format!("{reply:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{mock_transport, FakeDaemon};
    use serde_json::json;

    #[test]
    fn test_disabled_feed_drops_entries() {
        let mut feed = LogFeed::new(false, 10);
        assert!(!feed.push(LogKind::Error, "tag", "dropped"));
        assert!(feed.is_empty());

        feed.set_enabled(true);
        assert!(feed.push(LogKind::Error, "tag", "kept"));
        assert_eq!(feed.len(), 1);

        feed.clear();
        assert!(feed.is_empty());
    }

    #[test]
    fn test_feed_is_bounded() {
        let mut feed = LogFeed::new(true, 3);
        for i in 0..5 {
            feed.push(LogKind::SendRequest, "send request", i.to_string());
        }
        let contents: Vec<_> = feed.entries().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, ["2", "3", "4"]);
    }

    #[tokio::test]
    async fn test_success_logs_two_entries() {
        let (transport, _events, handle) = mock_transport(FakeDaemon::new());
        let mut logger = CallLogger::new(transport, LogFeed::new(true, 10));

        let reply = logger.call("monitor/get", json!({"verbosity": true})).await.unwrap();
        assert!(reply.is_success());

        let entries: Vec<_> = logger.feed().entries().collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, LogKind::SendRequest);
        assert_eq!(entries[0].tag, "send request");
        assert!(entries[0].content.starts_with("monitor/get("));
        assert_eq!(entries[1].kind, LogKind::ReceiveSuccess);
        assert!(entries[1].content.contains(" -> "));
        assert_eq!(handle.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_rejection_is_a_value_not_a_panic() {
        let (transport, _events, _handle) = mock_transport(FakeDaemon::new());
        let mut logger = CallLogger::new(transport, LogFeed::new(true, 10));

        let failure = logger.call("monitor/unknown", json!(null)).await.unwrap_err();
        assert!(matches!(failure, CallFailure::Rejected(_)));
        assert!(!failure.is_closed());

        let last = logger.feed().entries().last().unwrap();
        assert_eq!(last.kind, LogKind::ReceiveError);
        assert_eq!(last.tag, "receive error");
    }

    #[tokio::test]
    async fn test_closed_transport_reports_transport_failure() {
        let (transport, _events, handle) = mock_transport(FakeDaemon::new());
        handle.close();
        let mut logger = CallLogger::new(transport, LogFeed::default());

        let failure = logger.call("monitor/get", json!({})).await.unwrap_err();
        assert!(failure.is_closed());
        // Disabled by default
        assert!(logger.feed().is_empty());
    }
}
