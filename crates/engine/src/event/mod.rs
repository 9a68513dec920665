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

//! Classification of pushed events.
//!
//! Trace events carry exactly one descriptor among `request`, `service`,
//! `daemon` and `event`. They are checked in that order and the first key
//! present decides the variant.

pub mod render;

pub use render::{render_trace_event, render_value, LeafClass, RenderDepths, RenderNode};

use crate::rpc::PushEvent;
use chrono::{DateTime, Local};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{Map, Value};
use std::fmt;

/// Default name of the monitoring API
pub const DEFAULT_MONITOR_API: &str = "monitor";

/// Variant keys, in priority order
const VARIANT_KEYS: [&str; 4] = ["request", "service", "daemon", "event"];

/// Descriptor of a trace event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceVariant {
    /// A request handled by an API
    Request {
        /// API handling the request
        api: String,
        /// Invoked verb
        verb: String,
        /// Per-request sequence number assigned by the daemon
        index: i64,
        /// What happened to the request
        action: String,
    },
    /// Service-level activity of an API
    Service {
        /// API concerned
        api: String,
        /// What happened
        action: String,
    },
    /// A call from an API to the daemon interface
    Daemon {
        /// Calling API
        api: String,
        /// What happened
        action: String,
    },
    /// Activity of an event
    Event {
        /// Full event name, `<api>/<event>`
        name: String,
        /// What happened
        action: String,
    },
}

#[derive(Deserialize)]
struct RequestDescriptor {
    api: String,
    verb: String,
    index: i64,
    action: String,
}

#[derive(Deserialize)]
struct ActorDescriptor {
    api: String,
    action: String,
}

#[derive(Deserialize)]
struct EventDescriptor {
    name: String,
    action: String,
}

impl TraceVariant {
    /// Variant key as found in the payload
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request { .. } => "request",
            Self::Service { .. } => "service",
            Self::Daemon { .. } => "daemon",
            Self::Event { .. } => "event",
        }
    }

    /// One-line summary of the descriptor
    pub fn tag(&self) -> String {
        match self {
            Self::Request { api, verb, index, action } => format!("{api}/{verb}  [{index}] {action}"),
            Self::Service { api, action } => format!("{api}@{action}"),
            Self::Daemon { api, action } => format!("{api}:{action}"),
            Self::Event { name, action } => format!("{name}!{action}"),
        }
    }

    /// Whether the descriptor was produced by the monitoring API itself
    pub fn is_self_generated(&self, monitor_api: &str) -> bool {
        match self {
            Self::Request { api, .. } | Self::Service { api, .. } | Self::Daemon { api, .. } => {
                api == monitor_api
            }
            Self::Event { name, .. } => {
                name.strip_prefix(monitor_api).is_some_and(|rest| rest.starts_with('/'))
            }
        }
    }

    fn decode(kind: &str, descriptor: &Value) -> Result<Self, String> {
        fn parse<D: DeserializeOwned>(kind: &str, value: &Value) -> Result<D, String> {
            D::deserialize(value).map_err(|e| format!("invalid {kind} descriptor: {e}"))
        }

        match kind {
            "request" => {
                let RequestDescriptor { api, verb, index, action } = parse(kind, descriptor)?;
                Ok(Self::Request { api, verb, index, action })
            }
            "service" => {
                let ActorDescriptor { api, action } = parse(kind, descriptor)?;
                Ok(Self::Service { api, action })
            }
            "daemon" => {
                let ActorDescriptor { api, action } = parse(kind, descriptor)?;
                Ok(Self::Daemon { api, action })
            }
            _ => {
                let EventDescriptor { name, action } = parse(kind, descriptor)?;
                Ok(Self::Event { name, action })
            }
        }
    }
}

impl fmt::Display for TraceVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

/// A received trace event; never mutated after creation
#[derive(Debug, Clone, PartialEq)]
pub struct TraceEvent {
    /// Local receipt time
    pub received_at: DateTime<Local>,
    /// Daemon timestamp, `<seconds>.<micros>` of a monotonic clock
    pub time: String,
    /// Tag of the subscription that produced the event, if sent
    pub subscription: Option<String>,
    /// Classified descriptor
    pub variant: TraceVariant,
    /// Descriptor object as received
    pub descriptor: Map<String, Value>,
    /// Free-form payload
    pub data: Option<Value>,
}

impl TraceEvent {
    /// Summary line of the event
    pub fn tag(&self) -> String {
        self.variant.tag()
    }
}

/// How pushes are classified
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifyOptions {
    /// Name of the monitoring API
    pub monitor_api: String,
    /// Keep events generated by the monitoring API itself
    pub show_monitor_events: bool,
}

impl Default for ClassifyOptions {
    fn default() -> Self {
        Self { monitor_api: DEFAULT_MONITOR_API.to_string(), show_monitor_events: false }
    }
}

impl ClassifyOptions {
    /// Name of the push channel carrying trace events
    pub fn trace_event_name(&self) -> String {
        format!("{}/trace", self.monitor_api)
    }
}

/// Result of classifying a push
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// A trace event to display
    Trace(TraceEvent),
    /// A trace event generated by the monitoring API, hidden
    Suppressed(TraceVariant),
    /// A push on another channel
    Unexpected(PushEvent),
    /// A trace push whose payload does not match any variant
    Malformed(String),
}

/// Classify a pushed event
pub fn classify_push(push: &PushEvent, options: &ClassifyOptions) -> Classification {
    if push.event != options.trace_event_name() {
        return Classification::Unexpected(push.clone());
    }

    let Some(Value::Object(data)) = &push.data else {
        return Classification::Malformed("trace event without object payload".to_string());
    };
    let Some((kind, value)) = VARIANT_KEYS.iter().find_map(|key| data.get(*key).map(|d| (*key, d)))
    else {
        return Classification::Malformed(format!(
            "trace event matches none of {}",
            VARIANT_KEYS.join(", ")
        ));
    };
    let Value::Object(descriptor) = value else {
        return Classification::Malformed(format!("{kind} descriptor is not an object"));
    };
    let variant = match TraceVariant::decode(kind, value) {
        Ok(variant) => variant,
        Err(reason) => return Classification::Malformed(reason),
    };

    if !options.show_monitor_events && variant.is_self_generated(&options.monitor_api) {
        return Classification::Suppressed(variant);
    }

    let time = match data.get("time") {
        Some(Value::String(time)) => time.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };

    Classification::Trace(TraceEvent {
        received_at: Local::now(),
        time,
        subscription: data.get("tag").and_then(Value::as_str).map(str::to_string),
        variant,
        descriptor: descriptor.clone(),
        data: data.get("data").cloned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn trace(data: Value) -> PushEvent {
        PushEvent { event: "monitor/trace".to_string(), data: Some(data) }
    }

    fn expect_trace(classification: Classification) -> TraceEvent {
        match classification {
            Classification::Trace(event) => event,
            other => panic!("expected trace event, got {other:?}"),
        }
    }

    #[test]
    fn test_request_wins_over_event() {
        let push = trace(json!({
            "time": "12.000001",
            "tag": "calc/request",
            "event": {"name": "calc/changed", "action": "push"},
            "request": {"index": 3, "api": "calc", "verb": "add", "action": "reply"}
        }));
        let event = expect_trace(classify_push(&push, &ClassifyOptions::default()));

        assert_eq!(event.variant.kind(), "request");
        assert_eq!(event.tag(), "calc/add  [3] reply");
        assert_eq!(event.time, "12.000001");
        assert_eq!(event.subscription.as_deref(), Some("calc/request"));
        assert_eq!(event.data, None);
    }

    #[test]
    fn test_tag_formats() {
        let options = ClassifyOptions::default();
        let cases = [
            (json!({"service": {"api": "calc", "action": "start_before"}}), "calc@start_before"),
            (json!({"daemon": {"api": "calc", "action": "vverbose"}}), "calc:vverbose"),
            (json!({"event": {"id": 1, "name": "calc/changed", "action": "push_after"}}), "calc/changed!push_after"),
        ];
        for (data, tag) in cases {
            assert_eq!(expect_trace(classify_push(&trace(data), &options)).tag(), tag);
        }
    }

    #[test]
    fn test_self_generated_events_are_suppressed() {
        let mut options = ClassifyOptions::default();
        let own_event = trace(json!({
            "event": {"name": "monitor/trace", "action": "push_before"},
            "data": {"x": 1}
        }));
        let own_request = trace(json!({
            "request": {"index": 1, "api": "monitor", "verb": "get", "action": "begin"}
        }));
        let lookalike = trace(json!({"event": {"name": "monitoring/x", "action": "push"}}));

        assert!(matches!(classify_push(&own_event, &options), Classification::Suppressed(_)));
        assert!(matches!(classify_push(&own_request, &options), Classification::Suppressed(_)));
        assert!(matches!(classify_push(&lookalike, &options), Classification::Trace(_)));

        options.show_monitor_events = true;
        let event = expect_trace(classify_push(&own_event, &options));
        assert_eq!(event.data, Some(json!({"x": 1})));
        assert_eq!(event.descriptor["name"], json!("monitor/trace"));
    }

    #[test]
    fn test_other_channels_are_unexpected() {
        let push = PushEvent { event: "calc/changed".to_string(), data: Some(json!(1)) };
        assert_eq!(
            classify_push(&push, &ClassifyOptions::default()),
            Classification::Unexpected(push.clone())
        );

        let options = ClassifyOptions { monitor_api: "mon".to_string(), ..Default::default() };
        assert!(matches!(
            classify_push(&trace(json!({})), &options),
            Classification::Unexpected(_)
        ));
    }

    #[test]
    fn test_malformed_payloads() {
        let options = ClassifyOptions::default();
        for data in [
            json!({"time": "1.0"}),
            json!({"request": "calc/add"}),
            json!({"daemon": {"api": 42, "action": "x"}}),
        ] {
            assert!(matches!(classify_push(&trace(data), &options), Classification::Malformed(_)));
        }
        let empty = PushEvent { event: "monitor/trace".to_string(), data: None };
        assert!(matches!(classify_push(&empty, &options), Classification::Malformed(_)));
    }
}
