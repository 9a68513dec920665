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

//! Holder of the current session.
//!
//! At most one [`Session`] is live. Connecting again abandons the previous
//! one: its channel is closed and its state dropped, so replies still in
//! flight for it can no longer be observed.

use crate::{
    error::{MonitorError, Result},
    rpc::{ConnectTarget, Connector},
    session::{ConnectionState, Session, SessionConfig},
};
use std::fmt;
use tracing::{error, info};

/// Connects sessions through a [`Connector`]
pub struct Monitor<C: Connector> {
    connector: C,
    config: SessionConfig,
    session: Option<Session<C::Transport>>,
    closed: bool,
}

impl<C: Connector> fmt::Debug for Monitor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<C: Connector> Monitor<C> {
    /// Create a monitor without session
    pub fn new(connector: C, config: SessionConfig) -> Self {
        Self { connector, config, session: None, closed: false }
    }

    /// Open a session to `target`, replacing the current one
    ///
    /// The previous session is not untraced. If the connection fails no
    /// session is left.
    pub async fn connect(&mut self, target: &ConnectTarget) -> Result<&mut Session<C::Transport>> {
        if let Some(previous) = self.session.take() {
            info!(url = %previous.url(), "Replacing session");
            previous.abandon().await;
        }

        info!(%target, "Connecting");
        let (transport, events) = match self.connector.connect(target).await {
            Ok(channel) => channel,
            Err(e) => {
                error!(%target, "Connection failed: {e}");
                self.closed = true;
                return Err(e.into());
            }
        };

        self.closed = false;
        let session = Session::open(transport, events, self.config.clone()).await;
        Ok(self.session.insert(session))
    }

    /// Untrace everything and close the current session
    ///
    /// Does nothing without a session.
    pub async fn disconnect(&mut self) -> Result<()> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        self.closed = true;
        session.close().await
    }

    /// Current session, if any
    pub fn session(&self) -> Option<&Session<C::Transport>> {
        self.session.as_ref()
    }

    /// Current session, or [`MonitorError::NotConnected`]
    pub fn session_mut(&mut self) -> Result<&mut Session<C::Transport>> {
        self.session.as_mut().ok_or(MonitorError::NotConnected)
    }

    /// State of the connection
    pub fn state(&self) -> ConnectionState {
        match &self.session {
            Some(session) => session.state().clone(),
            None if self.closed => ConnectionState::Closed,
            None => ConnectionState::Disconnected,
        }
    }

    /// Session settings used for new connections
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeDaemon, MockConnector};
    use hookscope_common::ensure_test_logging;
    use serde_json::json;

    fn target() -> ConnectTarget {
        ConnectTarget::new("localhost:1234", Some("HELLO".to_string()))
    }

    #[tokio::test]
    async fn test_connect_discovers() {
        ensure_test_logging(None);
        let mut monitor = Monitor::new(MockConnector::new(FakeDaemon::calc()), SessionConfig::default());
        assert_eq!(monitor.state(), ConnectionState::Disconnected);
        assert!(matches!(monitor.session_mut(), Err(MonitorError::NotConnected)));

        let session = monitor.connect(&target()).await.unwrap();
        assert!(session.registry().contains("calc"));
        assert!(matches!(monitor.state(), ConnectionState::Connected(_)));
    }

    #[tokio::test]
    async fn test_reconnect_abandons_previous_session() {
        ensure_test_logging(None);
        let connector = MockConnector::new(FakeDaemon::calc());
        let mut monitor = Monitor::new(connector.clone(), SessionConfig::default());

        let session = monitor.connect(&target()).await.unwrap();
        session.select_trace("calc/request".parse().unwrap(), "all".parse().unwrap()).await.unwrap();
        monitor.connect(&target()).await.unwrap();

        let handles = connector.handles();
        assert_eq!(handles.len(), 2);
        assert!(handles[0].is_closed());
        // No untrace on replacement
        assert!(handles[0].calls_to("monitor/trace").iter().all(|args| args.get("add").is_some()));
        assert!(!handles[1].is_closed());
        assert_eq!(monitor.session().unwrap().traces().active().count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_untraces() {
        ensure_test_logging(None);
        let connector = MockConnector::new(FakeDaemon::calc());
        let mut monitor = Monitor::new(connector.clone(), SessionConfig::default());
        monitor.connect(&target()).await.unwrap();

        monitor.disconnect().await.unwrap();
        let handle = &connector.handles()[0];
        assert_eq!(handle.calls_to("monitor/trace"), [json!({"drop": true})]);
        assert!(handle.is_closed());
        assert_eq!(monitor.state(), ConnectionState::Closed);

        // Idempotent
        monitor.disconnect().await.unwrap();
        assert_eq!(handle.calls_to("monitor/trace").len(), 1);
    }

    #[tokio::test]
    async fn test_refused_connection() {
        ensure_test_logging(None);
        let mut monitor = Monitor::new(MockConnector::refusing(), SessionConfig::default());
        let err = monitor.connect(&target()).await.unwrap_err();
        assert!(matches!(err, MonitorError::Transport(_)));
        assert!(monitor.session().is_none());
        assert_eq!(monitor.state(), ConnectionState::Closed);
    }
}
