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

//! Monitoring session over one daemon connection.
//!
//! A [`Session`] owns everything learned through its transport: the API
//! registry, verbosity levels, trace subscriptions, the log feed and the
//! trace events kept for display. Methods take `&mut self` and await each
//! call before issuing the next, which keeps a verbosity write ahead of the
//! read that follows it and a trace drop ahead of the add that replaces it.

pub mod call_log;
pub mod registry;
pub mod trace;
pub mod verbosity;

pub use call_log::{
    CallFailure, CallLogger, CallOutcome, LogEntry, LogFeed, LogKind, DEFAULT_MAX_LOG_ENTRIES,
};
pub use registry::{Api, ApiDescription, MergeReport, MonitorSnapshot, Operation, Registry};
pub use trace::{TraceCategory, TraceCommand, TraceMode, TraceSlot, TraceSubscriptions, TraceTag};
pub use verbosity::{
    Inhibitor, VerbosityCommand, VerbosityLevel, VerbosityState, VerbosityTarget,
};

use crate::{
    error::{MonitorError, Result, TransportError},
    event::{classify_push, Classification, ClassifyOptions, TraceEvent, DEFAULT_MONITOR_API},
    rpc::{EventReceiver, PushEvent, Reply, Transport},
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::{collections::VecDeque, fmt};
use tracing::{debug, error, info, warn};

/// Default number of trace events kept for display
pub const DEFAULT_MAX_TRACE_EVENTS: usize = 500;

/// Settings of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Name of the monitoring API on the daemon
    pub monitor_api: String,
    /// Keep trace events generated by the monitoring API itself
    pub show_monitor_events: bool,
    /// Whether the log feed records entries
    pub log_enabled: bool,
    /// Capacity of the log feed
    pub max_log_entries: usize,
    /// Number of trace events kept for display
    pub max_trace_events: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            monitor_api: DEFAULT_MONITOR_API.to_string(),
            show_monitor_events: false,
            log_enabled: false,
            max_log_entries: DEFAULT_MAX_LOG_ENTRIES,
            max_trace_events: DEFAULT_MAX_TRACE_EVENTS,
        }
    }
}

/// Observable state of the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session
    Disconnected,
    /// Connected to the given url
    Connected(String),
    /// The channel was closed, by either side
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("Disconnected"),
            Self::Connected(url) => write!(f, "Connected {url}"),
            Self::Closed => f.write_str("Connection Closed"),
        }
    }
}

/// Client session as seen by the daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session identifier
    pub uuid: String,
    /// Current token
    pub token: String,
    /// Session timeout, in seconds
    pub timeout: i64,
    /// Seconds left before expiry
    pub remain: i64,
}

/// A live monitoring session
pub struct Session<T> {
    logger: CallLogger<T>,
    events: EventReceiver,
    registry: Registry,
    verbosity: VerbosityState,
    traces: TraceSubscriptions,
    trace_events: VecDeque<TraceEvent>,
    classify: ClassifyOptions,
    max_trace_events: usize,
    state: ConnectionState,
}

impl<T: fmt::Debug> fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("apis", &self.registry.len())
            .field("trace_events", &self.trace_events.len())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Session<T> {
    /// Wrap a connected transport without talking to the daemon
    pub fn new(transport: T, events: EventReceiver, config: SessionConfig) -> Self {
        let state = ConnectionState::Connected(transport.url().to_string());
        let feed = LogFeed::new(config.log_enabled, config.max_log_entries);
        Self {
            logger: CallLogger::new(transport, feed),
            events,
            registry: Registry::new(),
            verbosity: VerbosityState::new(),
            traces: TraceSubscriptions::new(),
            trace_events: VecDeque::new(),
            classify: ClassifyOptions {
                monitor_api: config.monitor_api,
                show_monitor_events: config.show_monitor_events,
            },
            max_trace_events: config.max_trace_events.max(1),
            state,
        }
    }

    /// Wrap a connected transport and run discovery
    ///
    /// A failed discovery is logged and leaves the registry empty; the
    /// session stays usable.
    pub async fn open(transport: T, events: EventReceiver, config: SessionConfig) -> Self {
        let mut session = Self::new(transport, events, config);
        info!(url = %session.url(), "Session opened");
        if let Err(e) = session.discover().await {
            warn!("Discovery failed: {e}");
        }
        session
    }

    /// Query every API and verbosity level and merge them
    pub async fn discover(&mut self) -> Result<MergeReport> {
        let call = self.verb("get");
        let reply = match self.call(&call, json!({"apis": true, "verbosity": true})).await {
            Ok(reply) => reply,
            Err(e) => {
                self.report_failure("can't get apis", &e);
                return Err(e);
            }
        };
        let snapshot: MonitorSnapshot = match parse_body(&call, &reply) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Unusable discovery response: {e}");
                self.report_failure("can't get apis", &e);
                return Err(e);
            }
        };

        let report = match &snapshot.apis {
            Some(apis) => self.registry.apply_discovery(apis, &self.classify.monitor_api),
            None => MergeReport::default(),
        };
        if let Some(levels) = &snapshot.verbosity {
            self.verbosity.apply_confirmed(levels, &self.classify.monitor_api);
        }

        info!(
            apis = self.registry.len(),
            new_apis = report.added_apis.len(),
            new_operations = report.added_operations.len(),
            "Discovery applied"
        );
        Ok(report)
    }

    /// Set the verbosity of `target`, then read every level back
    ///
    /// The read is issued once the write settled, whatever its outcome, and
    /// is the only thing that updates the displayed levels: the requested
    /// level is pending meanwhile and forgotten afterwards. Nothing is sent
    /// while the verbosity inhibitor is held.
    pub async fn set_verbosity(
        &mut self,
        target: VerbosityTarget,
        level: VerbosityLevel,
    ) -> Result<()> {
        let Some(command) = self.verbosity.select(target, level) else {
            return Ok(());
        };

        let call = self.verb("set");
        let written = self.call(&call, command.to_args()).await;
        if let Err(e) = &written {
            warn!(target = %command.target, %level, "Setting verbosity failed: {e}");
        }
        let refreshed = self.refresh_verbosity().await;
        self.verbosity.settle(&command.target);

        written?;
        refreshed.map(|_| ())
    }

    /// Read every verbosity level and apply it; returns how many were applied
    pub async fn refresh_verbosity(&mut self) -> Result<usize> {
        let call = self.verb("get");
        let reply = self.call(&call, verbosity::get_verbosity_args()).await?;
        let snapshot: MonitorSnapshot = parse_body(&call, &reply)?;
        let applied = match &snapshot.verbosity {
            Some(levels) => self.verbosity.apply_confirmed(levels, &self.classify.monitor_api),
            None => 0,
        };
        debug!(applied, "Verbosity refreshed");
        Ok(applied)
    }

    /// Select `mode` for `tag`
    ///
    /// Issues a drop when another mode was active, then an add unless
    /// `mode` is off. The add goes out after the drop settled even if the
    /// drop failed. Failures are logged and the first one is returned; the
    /// displayed mode keeps the selection. Selecting that mode again is then
    /// a no-op, so retrying a failed selection goes through another mode.
    pub async fn select_trace(&mut self, tag: TraceTag, mode: TraceMode) -> Result<()> {
        let commands = self.traces.select(&tag, mode);
        if commands.is_empty() {
            debug!(%tag, "Trace mode unchanged");
            return Ok(());
        }

        let call = self.verb("trace");
        let mut first_failure = None;
        for command in commands {
            match self.call(&call, command.to_args()).await {
                Ok(_) => self.traces.confirm(&command),
                Err(e) => {
                    error!(%command, "Trace command failed: {e}");
                    first_failure.get_or_insert(e);
                }
            }
        }
        first_failure.map_or(Ok(()), Err)
    }

    /// Drop every trace subscription of the session
    ///
    /// Always issues exactly one command and displays every tag as off,
    /// even when nothing was subscribed or the command fails.
    pub async fn untrace_all(&mut self) -> Result<()> {
        let call = self.verb("trace");
        let result = self.call(&call, TraceCommand::DropAll.to_args()).await;
        self.traces.reset_all();
        match result {
            Ok(_) => {
                self.traces.confirm(&TraceCommand::DropAll);
                Ok(())
            }
            Err(e) => {
                error!("Dropping all traces failed: {e}");
                Err(e)
            }
        }
    }

    /// Query the client session, optionally renewing its token
    pub async fn session_info(&mut self, refresh_token: bool) -> Result<SessionInfo> {
        let call = self.verb("session");
        let reply = self.call(&call, json!({ "refresh-token": refresh_token })).await?;
        parse_body(&call, &reply)
    }

    /// Wait for the next pushed event and classify it
    ///
    /// Returns `None` once the channel is closed.
    pub async fn next_event(&mut self) -> Option<Classification> {
        match self.events.recv().await {
            Some(push) => Some(self.handle_push(push)),
            None => {
                self.mark_closed();
                None
            }
        }
    }

    /// Classify a pushed event, logging it and keeping trace events
    pub fn handle_push(&mut self, push: PushEvent) -> Classification {
        let feed = self.logger.feed_mut();
        if push.event == self.classify.trace_event_name() {
            feed.push(LogKind::TraceEvent, "trace event", pretty_push(&push));
        } else {
            feed.push(LogKind::UnexpectedEvent, "unexpected event!", pretty_push(&push));
        }

        let classification = classify_push(&push, &self.classify);
        match &classification {
            Classification::Trace(event) => {
                debug!(tag = %event.tag(), "Trace event");
                if self.trace_events.len() == self.max_trace_events {
                    self.trace_events.pop_front();
                }
                self.trace_events.push_back(event.clone());
            }
            Classification::Suppressed(variant) => {
                debug!(tag = %variant, "Suppressed monitoring event");
            }
            Classification::Unexpected(push) => {
                warn!(event = %push.event, "Unexpected event");
            }
            Classification::Malformed(reason) => {
                warn!("Malformed trace event: {reason}");
                self.logger.feed_mut().push(LogKind::Error, "malformed trace event", reason.as_str());
            }
        }
        classification
    }

    /// Drop the kept trace events
    pub fn clear_trace_events(&mut self) {
        self.trace_events.clear();
    }

    /// Trace events kept for display, oldest first
    pub fn trace_events(&self) -> impl Iterator<Item = &TraceEvent> {
        self.trace_events.iter()
    }

    /// Untrace everything, then close the channel
    pub async fn close(&mut self) -> Result<()> {
        let untraced = if self.state == ConnectionState::Closed {
            Ok(())
        } else {
            self.untrace_all().await
        };
        self.logger.transport().close().await;
        self.state = ConnectionState::Closed;
        info!("Session closed");
        untraced
    }

    /// Close the channel without retracting anything
    pub async fn abandon(self) {
        self.logger.transport().close().await;
        debug!(url = %self.url(), "Session abandoned");
    }

    /// API registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Verbosity levels
    pub fn verbosity(&self) -> &VerbosityState {
        &self.verbosity
    }

    /// Trace subscriptions
    pub fn traces(&self) -> &TraceSubscriptions {
        &self.traces
    }

    /// Log feed
    pub fn feed(&self) -> &LogFeed {
        self.logger.feed()
    }

    /// Log feed, mutably
    pub fn feed_mut(&mut self) -> &mut LogFeed {
        self.logger.feed_mut()
    }

    /// Classification settings
    pub fn classify_options(&self) -> &ClassifyOptions {
        &self.classify
    }

    /// Show or hide events generated by the monitoring API
    pub fn set_show_monitor_events(&mut self, show: bool) {
        self.classify.show_monitor_events = show;
    }

    /// Connection state
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// The underlying transport
    pub fn transport(&self) -> &T {
        self.logger.transport()
    }

    /// Url of the daemon
    pub fn url(&self) -> &str {
        self.logger.transport().url()
    }

    fn verb(&self, verb: &str) -> String {
        format!("{}/{verb}", self.classify.monitor_api)
    }

    async fn call(&mut self, api_verb: &str, args: Value) -> Result<Reply> {
        match self.logger.call(api_verb, args).await {
            Ok(reply) => Ok(reply),
            Err(failure) => {
                if let CallFailure::Transport(TransportError::Closed) = &failure {
                    self.mark_closed();
                }
                Err(MonitorError::Call(failure))
            }
        }
    }

    fn mark_closed(&mut self) {
        if self.state != ConnectionState::Closed {
            let url = self.url().to_string();
            error!(%url, "Connection closed");
            self.state = ConnectionState::Closed;
            self.logger.feed_mut().push(LogKind::Error, "connection closed", url);
        }
    }

    fn report_failure(&mut self, tag: &str, err: &MonitorError) {
        let body = match err {
            MonitorError::Call(CallFailure::Rejected(reply)) => {
                serde_json::to_value(reply).unwrap_or_else(|_| Value::from(err.to_string()))
            }
            other => Value::from(other.to_string()),
        };
        self.logger.feed_mut().push_error(tag, &body);
    }
}

fn parse_body<D: DeserializeOwned>(call: &str, reply: &Reply) -> Result<D> {
    D::deserialize(reply.body()).map_err(|e| MonitorError::Response {
        call: call.to_string(),
        reason: e.to_string(),
    })
}

fn pretty_push(push: &PushEvent) -> String {
    serde_json::to_string_pretty(push).unwrap_or_else(|_| format!("{push:?}"))
}
