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

//! Wire types of the binder websocket protocol (`x-afb-ws-json1`).
//!
//! Every websocket text message is a JSON array whose first element is a
//! message code:
//!
//! | code | shape | meaning |
//! |---|---|---|
//! | 2 | `[2, id, "api/verb", args]` | call |
//! | 3 | `[3, id, reply]` | successful reply |
//! | 4 | `[4, id, reply]` | error reply |
//! | 5 | `[5, event, message]` | pushed event |

use crate::error::TransportError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Websocket sub-protocol spoken by the daemon
pub const WSJ1_PROTOCOL: &str = "x-afb-ws-json1";

/// Status string of a successful reply
pub const STATUS_SUCCESS: &str = "success";

const CODE_CALL: u64 = 2;
const CODE_RETOK: u64 = 3;
const CODE_RETERR: u64 = 4;
const CODE_EVENT: u64 = 5;

/// One websocket message
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Outgoing call
    Call {
        /// Correlation id
        id: String,
        /// `api/verb` being invoked
        api_verb: String,
        /// Call arguments
        args: Value,
    },
    /// Successful reply to a call
    ReplyOk {
        /// Correlation id of the call
        id: String,
        /// Reply message
        reply: Value,
    },
    /// Error reply to a call
    ReplyErr {
        /// Correlation id of the call
        id: String,
        /// Reply message
        reply: Value,
    },
    /// Event pushed by the daemon
    Event {
        /// Event name
        name: String,
        /// Event message (`{jtype, event, data}`)
        message: Value,
    },
}

impl Frame {
    /// Serialize the frame to its textual form
    pub fn encode(&self) -> String {
        let value = match self {
            Self::Call { id, api_verb, args } => json!([CODE_CALL, id, api_verb, args]),
            Self::ReplyOk { id, reply } => json!([CODE_RETOK, id, reply]),
            Self::ReplyErr { id, reply } => json!([CODE_RETERR, id, reply]),
            Self::Event { name, message } => json!([CODE_EVENT, name, message]),
        };
        value.to_string()
    }

    /// Parse a frame from a websocket text message
    pub fn decode(text: &str) -> Result<Self, TransportError> {
        let items: Vec<Value> = serde_json::from_str(text)?;
        let mut items = items.into_iter();

        let code = items
            .next()
            .and_then(|code| code.as_u64())
            .ok_or_else(|| TransportError::Protocol(format!("missing message code: {text}")))?;
        let key = items.next().and_then(|key| id_text(&key)).ok_or_else(|| {
            TransportError::Protocol(format!("missing message identifier: {text}"))
        })?;
        let mut payload = || items.next().unwrap_or(Value::Null);

        match code {
            CODE_CALL => {
                let api_verb = match payload() {
                    Value::String(api_verb) => api_verb,
                    other => {
                        return Err(TransportError::Protocol(format!(
                            "call without api/verb: {other}"
                        )))
                    }
                };
                Ok(Self::Call { id: key, api_verb, args: payload() })
            }
            CODE_RETOK => Ok(Self::ReplyOk { id: key, reply: payload() }),
            CODE_RETERR => Ok(Self::ReplyErr { id: key, reply: payload() }),
            CODE_EVENT => Ok(Self::Event { name: key, message: payload() }),
            other => Err(TransportError::Protocol(format!("unknown message code {other}"))),
        }
    }
}

/// Identifiers are strings on the wire but some peers send numbers
fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Status block of a reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplyRequest {
    /// `success` or an error status such as `failed` or `invalid`
    #[serde(default)]
    pub status: String,
    /// Optional human readable information
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    /// Token refreshed by the daemon, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Session uuid, if sent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

/// Reply to a call, successful or not
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Message type marker, `afb-reply`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jtype: Option<String>,
    /// Status of the request
    #[serde(default)]
    pub request: ReplyRequest,
    /// Response body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    /// Set when the reply arrived as an error frame
    #[serde(skip)]
    pub rejected: bool,
}

impl Reply {
    /// A successful reply carrying `response`
    pub fn success(response: Option<Value>) -> Self {
        Self {
            jtype: Some("afb-reply".to_string()),
            request: ReplyRequest { status: STATUS_SUCCESS.to_string(), ..Default::default() },
            response,
            rejected: false,
        }
    }

    /// An error reply with `status` and optional `info`
    pub fn failure(status: impl Into<String>, info: Option<&str>) -> Self {
        Self {
            jtype: Some("afb-reply".to_string()),
            request: ReplyRequest {
                status: status.into(),
                info: info.map(str::to_string),
                ..Default::default()
            },
            response: None,
            rejected: true,
        }
    }

    /// Whether the daemon accepted the request
    pub fn is_success(&self) -> bool {
        !self.rejected && self.request.status == STATUS_SUCCESS
    }

    /// The response body, `null` when absent
    pub fn body(&self) -> &Value {
        self.response.as_ref().unwrap_or(&Value::Null)
    }
}

/// An event pushed by the daemon, as delivered to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEvent {
    /// Name of the pushed channel, e.g. `monitor/trace`
    pub event: String,
    /// Event payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl PushEvent {
    /// Build a push event from the frame name and message
    ///
    /// The message normally repeats the name in its `event` field; the frame
    /// name wins when they disagree.
    pub fn from_message(name: String, message: Value) -> Self {
        let data = match message {
            Value::Object(mut fields) => fields.remove("data"),
            Value::Null => None,
            other => Some(other),
        };
        Self { event: name, data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_frame_layout() {
        let frame = Frame::Call {
            id: "7".to_string(),
            api_verb: "monitor/get".to_string(),
            args: json!({"apis": true}),
        };
        let value: Value = serde_json::from_str(&frame.encode()).unwrap();
        assert_eq!(value, json!([2, "7", "monitor/get", {"apis": true}]));
    }

    #[test]
    fn test_decode_replies_and_events() {
        let ok = Frame::decode(r#"[3,"1",{"jtype":"afb-reply","request":{"status":"success"}}]"#)
            .unwrap();
        assert!(matches!(ok, Frame::ReplyOk { ref id, .. } if id == "1"));

        let err = Frame::decode(r#"[4,2,{"request":{"status":"failed"}}]"#).unwrap();
        assert!(matches!(err, Frame::ReplyErr { ref id, .. } if id == "2"));

        let event = Frame::decode(
            r#"[5,"monitor/trace",{"jtype":"afb-event","event":"monitor/trace","data":{"time":"1"}}]"#,
        )
        .unwrap();
        let Frame::Event { name, message } = event else { panic!("expected event") };
        let push = PushEvent::from_message(name, message);
        assert_eq!(push.event, "monitor/trace");
        assert_eq!(push.data, Some(json!({"time": "1"})));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Frame::decode("{}").is_err());
        assert!(Frame::decode("[9,\"1\",null]").is_err());
        assert!(Frame::decode("[2,\"1\",42]").is_err());
        assert!(Frame::decode("[]").is_err());
    }

    #[test]
    fn test_reply_status() {
        let reply: Reply = serde_json::from_value(json!({
            "jtype": "afb-reply",
            "request": {"status": "success", "token": "abc"},
            "response": {"verbosity": {}}
        }))
        .unwrap();
        assert!(reply.is_success());
        assert_eq!(reply.request.token.as_deref(), Some("abc"));
        assert_eq!(reply.body(), &json!({"verbosity": {}}));

        let failed = Reply::failure("invalid", Some("reserved to direct clients"));
        assert!(!failed.is_success());
        assert_eq!(failed.body(), &Value::Null);
    }
}
