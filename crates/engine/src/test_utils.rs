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

//! In-memory daemon and transport used by tests.
//!
//! [`FakeDaemon`] answers the monitoring verbs the way the binder daemon
//! does, including its verbosity encoding. [`MockTransport`] routes calls to
//! it and records them; the paired [`MockHandle`] lets a test inspect calls,
//! push events and break the channel.

use crate::{
    error::TransportError,
    rpc::{ConnectTarget, Connector, EventReceiver, EventSender, PushEvent, Reply, Transport},
};
use serde_json::{json, Map, Value};
use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};
use tokio::sync::mpsc;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Simulated binder daemon exposing the monitoring API
#[derive(Debug, Clone)]
pub struct FakeDaemon {
    monitor_api: String,
    apis: BTreeMap<String, Value>,
    levels: BTreeMap<String, i64>,
    global_level: i64,
    traces: BTreeSet<String>,
    failing: HashSet<String>,
    uuid: String,
    token: String,
    refreshes: u32,
}

impl Default for FakeDaemon {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDaemon {
    /// A daemon exposing only the monitoring API
    pub fn new() -> Self {
        let monitor_api = "monitor".to_string();
        let mut daemon = Self {
            monitor_api: monitor_api.clone(),
            apis: BTreeMap::new(),
            levels: BTreeMap::new(),
            global_level: 1,
            traces: BTreeSet::new(),
            failing: HashSet::new(),
            uuid: "5c3f0a60-2f4e-4c4e-9d61-2a3b4c5d6e7f".to_string(),
            token: "HELLO".to_string(),
            refreshes: 0,
        };
        daemon = daemon.with_api(
            &monitor_api,
            json!({
                "info": {"description": "monitoring of bindings and internals"},
                "paths": {"/get": {}, "/set": {}, "/trace": {}, "/session": {}}
            }),
        );
        daemon
    }

    /// The daemon of the `calc` scenario: one API with one verb, at `warning`
    pub fn calc() -> Self {
        Self::new().with_api(
            "calc",
            json!({
                "info": {"description": "Calculator"},
                "paths": {"/add": {"get": {"responses": {"200": {"description": "adds numbers"}}}}}
            }),
        )
    }

    /// Add an API with its description (`null` for none), at `warning`
    pub fn with_api(mut self, name: &str, description: Value) -> Self {
        self.apis.insert(name.to_string(), description);
        self.levels.insert(name.to_string(), 1);
        self
    }

    /// Make every call to `api_verb` fail
    pub fn failing(mut self, api_verb: &str) -> Self {
        self.failing.insert(api_verb.to_string());
        self
    }

    /// Start failing calls to `api_verb`
    pub fn set_failing(&mut self, api_verb: &str) {
        self.failing.insert(api_verb.to_string());
    }

    /// Stop failing calls to `api_verb`
    pub fn recover(&mut self, api_verb: &str) {
        self.failing.remove(api_verb);
    }

    /// Tags of the active trace subscriptions
    pub fn trace_tags(&self) -> Vec<String> {
        self.traces.iter().cloned().collect()
    }

    /// Numeric level of `api`, or of the daemon for the empty name
    pub fn level(&self, api: &str) -> Option<i64> {
        if api.is_empty() {
            Some(self.global_level)
        } else {
            self.levels.get(api).copied()
        }
    }

    /// Current session token
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Answer a call
    pub fn handle(&mut self, api_verb: &str, args: &Value) -> Reply {
        if self.failing.contains(api_verb) {
            return Reply::failure("failed", Some("injected failure"));
        }
        let verb = api_verb.strip_prefix(self.monitor_api.as_str()).and_then(|v| v.strip_prefix('/'));
        match verb {
            Some("get") => Reply::success(Some(self.get(args))),
            Some("set") => {
                if let Some(spec) = args.get("verbosity") {
                    self.set(spec);
                }
                Reply::success(None)
            }
            Some("trace") => self.trace(args),
            Some("session") => {
                if args.get("refresh-token").and_then(Value::as_bool).unwrap_or(false) {
                    self.refreshes += 1;
                    self.token = format!("TOKEN-{}", self.refreshes);
                }
                let mut reply = Reply::success(Some(json!({
                    "uuid": self.uuid,
                    "token": self.token,
                    "timeout": 3600,
                    "remain": 3599
                })));
                reply.request.token = Some(self.token.clone());
                reply
            }
            _ => Reply::failure("unknown-verb", Some(api_verb)),
        }
    }

    fn get(&self, args: &Value) -> Value {
        let mut response = Map::new();
        if truthy(args.get("verbosity")) {
            let mut levels = Map::new();
            levels.insert(String::new(), encode_level(self.global_level));
            for (name, level) in &self.levels {
                levels.insert(name.clone(), encode_level(*level));
            }
            response.insert("verbosity".to_string(), Value::Object(levels));
        }
        if truthy(args.get("apis")) {
            let apis = self.apis.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            response.insert("apis".to_string(), Value::Object(apis));
        }
        Value::Object(response)
    }

    fn set(&mut self, spec: &Value) {
        match spec {
            Value::Object(levels) => {
                for (name, level) in levels {
                    if let Some(level) = decode_level(level) {
                        self.set_level(name, level);
                    }
                }
            }
            level => {
                if let Some(level) = decode_level(level) {
                    self.set_level("", level);
                    self.set_level("*", level);
                }
            }
        }
    }

    fn set_level(&mut self, name: &str, level: i64) {
        match name {
            "" => self.global_level = level,
            "*" => self.levels.values_mut().for_each(|l| *l = level),
            api => {
                if let Some(l) = self.levels.get_mut(api) {
                    *l = level;
                }
            }
        }
    }

    fn trace(&mut self, args: &Value) -> Reply {
        if let Some(add) = args.get("add") {
            match add.get("tag").and_then(Value::as_str) {
                Some(tag) if add.get("name").is_some() => {
                    self.traces.insert(tag.to_string());
                }
                _ => return Reply::failure("failed", Some("invalid add specification")),
            }
        }
        match args.get("drop") {
            Some(Value::Bool(true)) => self.traces.clear(),
            Some(drop) => {
                let tag = drop.get("tag").and_then(Value::as_str).unwrap_or_default();
                if !self.traces.remove(tag) {
                    return Reply::failure("failed", Some("tag not found"));
                }
            }
            None => {}
        }
        Reply::success(None)
    }
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(_) => true,
    }
}

fn encode_level(level: i64) -> Value {
    match level {
        0 => json!("error"),
        1 => json!("warning"),
        2 => json!("info"),
        3 => json!("debug"),
        n => json!(n),
    }
}

fn decode_level(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().map(|n| n.clamp(0, 3)),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "error" => Some(0),
            "warning" | "notice" => Some(1),
            "info" => Some(2),
            "debug" => Some(3),
            _ => None,
        },
        _ => None,
    }
}

/// A push on the trace channel of the default monitoring API
pub fn trace_push(data: Value) -> PushEvent {
    PushEvent { event: "monitor/trace".to_string(), data: Some(data) }
}

/// Transport answering from a [`FakeDaemon`]
#[derive(Debug)]
pub struct MockTransport {
    daemon: Arc<Mutex<FakeDaemon>>,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
    closed: Arc<AtomicBool>,
}

impl Transport for MockTransport {
    async fn call(&self, api_verb: &str, args: Value) -> Result<Reply, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        lock(&self.calls).push((api_verb.to_string(), args.clone()));
        let reply = lock(&self.daemon).handle(api_verb, &args);
        tokio::task::yield_now().await;
        Ok(reply)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn url(&self) -> &str {
        "mock://daemon/api"
    }
}

/// Test-side view of a [`MockTransport`]
#[derive(Debug, Clone)]
pub struct MockHandle {
    daemon: Arc<Mutex<FakeDaemon>>,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
    closed: Arc<AtomicBool>,
    events: Arc<Mutex<Option<EventSender>>>,
}

impl MockHandle {
    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<(String, Value)> {
        lock(&self.calls).clone()
    }

    /// Arguments of the calls made to `api_verb`, in order
    pub fn calls_to(&self, api_verb: &str) -> Vec<Value> {
        lock(&self.calls).iter().filter(|(v, _)| v == api_verb).map(|(_, a)| a.clone()).collect()
    }

    /// Forget the recorded calls
    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    /// The simulated daemon
    pub fn daemon(&self) -> MutexGuard<'_, FakeDaemon> {
        lock(&self.daemon)
    }

    /// Deliver a pushed event; returns false once the channel is closed
    pub fn push(&self, event: PushEvent) -> bool {
        lock(&self.events).as_ref().is_some_and(|tx| tx.send(event).is_ok())
    }

    /// Break the channel: calls fail and the event stream ends
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        lock(&self.events).take();
    }

    /// Whether the channel was closed by either side
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Create a transport backed by `daemon`
pub fn mock_transport(daemon: FakeDaemon) -> (MockTransport, EventReceiver, MockHandle) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = MockHandle {
        daemon: Arc::new(Mutex::new(daemon)),
        calls: Arc::default(),
        closed: Arc::default(),
        events: Arc::new(Mutex::new(Some(tx))),
    };
    let transport = MockTransport {
        daemon: handle.daemon.clone(),
        calls: handle.calls.clone(),
        closed: handle.closed.clone(),
    };
    (transport, rx, handle)
}

/// Connector producing [`MockTransport`]s over copies of one daemon
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    daemon: FakeDaemon,
    refuse: bool,
    handles: Arc<Mutex<Vec<MockHandle>>>,
}

impl MockConnector {
    /// Connector whose sessions talk to copies of `daemon`
    pub fn new(daemon: FakeDaemon) -> Self {
        Self { daemon, refuse: false, handles: Arc::default() }
    }

    /// Connector whose connections always fail
    pub fn refusing() -> Self {
        Self { refuse: true, ..Self::default() }
    }

    /// Handles of the transports opened so far, oldest first
    pub fn handles(&self) -> Vec<MockHandle> {
        lock(&self.handles).clone()
    }
}

impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(
        &self,
        target: &ConnectTarget,
    ) -> Result<(MockTransport, EventReceiver), TransportError> {
        if self.refuse {
            return Err(TransportError::Connect {
                url: target.url(),
                reason: "connection refused".to_string(),
            });
        }
        let (transport, events, handle) = mock_transport(self.daemon.clone());
        lock(&self.handles).push(handle);
        Ok((transport, events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notice_reads_back_as_warning() {
        let mut daemon = FakeDaemon::calc();
        daemon.handle("monitor/set", &json!({"verbosity": {"calc": "notice"}}));
        let reply = daemon.handle("monitor/get", &json!({"verbosity": true}));
        assert_eq!(reply.body()["verbosity"]["calc"], json!("warning"));
        assert!(reply.body().get("apis").is_none());
    }

    #[test]
    fn test_trace_bookkeeping() {
        let mut daemon = FakeDaemon::new();
        let add = json!({"add": {"tag": "calc/request", "name": "trace", "request": "all"}});
        assert!(daemon.handle("monitor/trace", &add).is_success());
        assert_eq!(daemon.trace_tags(), ["calc/request"]);

        let drop_unknown = json!({"drop": {"tag": "calc/event"}});
        assert!(!daemon.handle("monitor/trace", &drop_unknown).is_success());

        assert!(daemon.handle("monitor/trace", &json!({"drop": true})).is_success());
        assert!(daemon.trace_tags().is_empty());
    }
}
