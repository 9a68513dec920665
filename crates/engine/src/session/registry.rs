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

//! Registry of the APIs and operations exposed by the daemon.
//!
//! The registry only grows: discovery responses are merged into it, new
//! entries are created lazily and existing ones are never overwritten.

use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

// Discovery documents are free-form: a part that does not have the expected
// shape is replaced by its default instead of failing the whole response.

fn decode_or_default<T: DeserializeOwned + Default>(value: &Value) -> T {
    T::deserialize(value).unwrap_or_else(|e| {
        warn!(%value, "Ignoring malformed discovery entry: {e}");
        T::default()
    })
}

fn entries<T: DeserializeOwned + Default>(value: Value) -> Option<BTreeMap<String, T>> {
    match value {
        Value::Object(fields) => {
            Some(fields.iter().map(|(k, v)| (k.clone(), decode_or_default(v))).collect())
        }
        Value::Null => None,
        other => {
            warn!(value = %other, "Ignoring malformed discovery map");
            None
        }
    }
}

fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    Ok(decode_or_default(&Value::deserialize(deserializer)?))
}

fn lenient_map<'de, D, T>(deserializer: D) -> Result<BTreeMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    Ok(entries(Value::deserialize(deserializer)?).unwrap_or_default())
}

fn lenient_opt_map<'de, D, T>(deserializer: D) -> Result<Option<BTreeMap<String, T>>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    Ok(entries(Value::deserialize(deserializer)?))
}

/// `info` block of an API description
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiInfo {
    /// Human readable description
    #[serde(default, deserialize_with = "lenient")]
    pub description: Option<String>,
}

/// Documentation of a response code
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseDoc {
    /// Human readable description
    #[serde(default, deserialize_with = "lenient")]
    pub description: Option<String>,
}

/// Documentation of the `get` method of a path
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationDoc {
    /// Responses by status code
    #[serde(default, deserialize_with = "lenient_map")]
    pub responses: BTreeMap<String, ResponseDoc>,
    /// Permission metadata, kept verbatim
    #[serde(default, rename = "x-permissions")]
    pub permissions: Option<Value>,
}

/// One path of an API description
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathDoc {
    /// The `get` method, which documents the verb
    #[serde(default, deserialize_with = "lenient")]
    pub get: Option<OperationDoc>,
}

/// Description of one API as returned by discovery
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiDescription {
    /// General information
    #[serde(default, deserialize_with = "lenient")]
    pub info: Option<ApiInfo>,
    /// Paths, one per verb, e.g. `/ping`
    #[serde(default, deserialize_with = "lenient_map")]
    pub paths: BTreeMap<String, PathDoc>,
}

/// Body of a `monitor/get` response
///
/// Either part may be absent depending on what was asked. An API may be
/// described as `null` when the daemon knows it but has no description;
/// malformed descriptions are treated the same way.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MonitorSnapshot {
    /// API descriptions by name
    #[serde(default, deserialize_with = "lenient_opt_map")]
    pub apis: Option<BTreeMap<String, Option<ApiDescription>>>,
    /// Verbosity levels by API name, as sent by the daemon
    #[serde(default, deserialize_with = "lenient_opt_map")]
    pub verbosity: Option<BTreeMap<String, Value>>,
}

/// An operation (verb) of an API
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    /// Operation name, without leading separator
    pub name: String,
    /// Description taken from the `200` response documentation
    pub description: String,
    /// Permission metadata
    pub permissions: Option<Value>,
}

/// An API exposed by the daemon
#[derive(Debug, Clone, PartialEq)]
pub struct Api {
    /// Unique name
    pub name: String,
    /// Human readable description
    pub description: String,
    /// Operations by name
    pub operations: BTreeMap<String, Operation>,
}

/// What a merge added to the registry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Names of the APIs created by the merge
    pub added_apis: Vec<String>,
    /// `(api, operation)` pairs created by the merge
    pub added_operations: Vec<(String, String)>,
}

impl MergeReport {
    /// Whether the merge changed nothing
    pub fn is_empty(&self) -> bool {
        self.added_apis.is_empty() && self.added_operations.is_empty()
    }
}

/// API to operation registry of a session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Registry {
    apis: BTreeMap<String, Api>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge the API descriptions of a discovery response
    ///
    /// `monitor_api` is skipped: the monitoring API does not introspect itself.
    pub fn apply_discovery(
        &mut self,
        apis: &BTreeMap<String, Option<ApiDescription>>,
        monitor_api: &str,
    ) -> MergeReport {
        let mut report = MergeReport::default();
        let empty = ApiDescription::default();

        for (api_name, desc) in apis {
            if api_name == monitor_api {
                continue;
            }
            let desc = desc.as_ref().unwrap_or(&empty);

            let api = self.apis.entry(api_name.clone()).or_insert_with(|| {
                report.added_apis.push(api_name.clone());
                Api {
                    name: api_name.clone(),
                    description: desc
                        .info
                        .as_ref()
                        .and_then(|info| info.description.clone())
                        .unwrap_or_default(),
                    operations: BTreeMap::new(),
                }
            });

            for (path, path_doc) in &desc.paths {
                let name = path.strip_prefix('/').unwrap_or(path);
                if api.operations.contains_key(name) {
                    continue;
                }
                let get = path_doc.get.as_ref();
                let description = get
                    .and_then(|get| get.responses.get("200"))
                    .and_then(|ok| ok.description.clone())
                    .unwrap_or_default();
                let permissions = get.and_then(|get| get.permissions.clone());

                api.operations.insert(
                    name.to_string(),
                    Operation { name: name.to_string(), description, permissions },
                );
                report.added_operations.push((api_name.clone(), name.to_string()));
            }
        }

        debug!(
            apis = report.added_apis.len(),
            operations = report.added_operations.len(),
            "Merged discovery response"
        );
        report
    }

    /// Look up an API
    pub fn api(&self, name: &str) -> Option<&Api> {
        self.apis.get(name)
    }

    /// Look up an operation of an API
    pub fn operation(&self, api: &str, name: &str) -> Option<&Operation> {
        self.apis.get(api).and_then(|api| api.operations.get(name))
    }

    /// APIs in name order
    pub fn apis(&self) -> impl Iterator<Item = &Api> {
        self.apis.values()
    }

    /// Whether `name` is a known API
    pub fn contains(&self, name: &str) -> bool {
        self.apis.contains_key(name)
    }

    /// Number of APIs
    pub fn len(&self) -> usize {
        self.apis.len()
    }

    /// Whether no API is known
    pub fn is_empty(&self) -> bool {
        self.apis.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(value: Value) -> MonitorSnapshot {
        serde_json::from_value(value).unwrap()
    }

    fn calc_response() -> Value {
        json!({
            "apis": {
                "calc": {
                    "info": {"description": "Calculator"},
                    "paths": {
                        "/add": {"get": {"responses": {"200": {"description": "adds numbers"}}}}
                    }
                }
            },
            "verbosity": {"calc": "warning"}
        })
    }

    #[test]
    fn test_calc_discovery() {
        let mut registry = Registry::new();
        let snap = snapshot(calc_response());
        let report = registry.apply_discovery(snap.apis.as_ref().unwrap(), "monitor");

        assert_eq!(report.added_apis, ["calc"]);
        assert_eq!(report.added_operations, [("calc".to_string(), "add".to_string())]);

        let calc = registry.api("calc").unwrap();
        assert_eq!(calc.description, "Calculator");
        let add = registry.operation("calc", "add").unwrap();
        assert_eq!(add.description, "adds numbers");
        assert_eq!(add.permissions, None);
    }

    #[test]
    fn test_discovery_is_idempotent() {
        let mut registry = Registry::new();
        let snap = snapshot(calc_response());
        let apis = snap.apis.as_ref().unwrap();

        registry.apply_discovery(apis, "monitor");
        let first = registry.clone();
        let report = registry.apply_discovery(apis, "monitor");

        assert!(report.is_empty());
        assert_eq!(registry, first);
    }

    #[test]
    fn test_monitor_api_is_excluded() {
        let mut registry = Registry::new();
        let snap = snapshot(json!({
            "apis": {
                "monitor": {"info": {"description": "monitoring"}, "paths": {"/get": {}}},
                "hello": null
            }
        }));
        registry.apply_discovery(snap.apis.as_ref().unwrap(), "monitor");

        assert!(!registry.contains("monitor"));
        let hello = registry.api("hello").unwrap();
        assert_eq!(hello.description, "");
        assert!(hello.operations.is_empty());
    }

    #[test]
    fn test_existing_entries_are_never_overwritten() {
        let mut registry = Registry::new();
        let snap = snapshot(calc_response());
        registry.apply_discovery(snap.apis.as_ref().unwrap(), "monitor");

        let update = snapshot(json!({
            "apis": {
                "calc": {
                    "info": {"description": "Renamed"},
                    "paths": {
                        "/add": {"get": {"responses": {"200": {"description": "changed"}}}},
                        "/sub": {"get": {
                            "responses": {"200": {"description": "subtracts"}},
                            "x-permissions": {"permission": "urn:calc:sub"}
                        }}
                    }
                }
            }
        }));
        let report = registry.apply_discovery(update.apis.as_ref().unwrap(), "monitor");

        assert!(report.added_apis.is_empty());
        assert_eq!(report.added_operations, [("calc".to_string(), "sub".to_string())]);
        let calc = registry.api("calc").unwrap();
        assert_eq!(calc.description, "Calculator");
        assert_eq!(calc.operations["add"].description, "adds numbers");
        assert_eq!(
            calc.operations["sub"].permissions,
            Some(json!({"permission": "urn:calc:sub"}))
        );
    }

    #[test]
    fn test_malformed_parts_fall_back_to_defaults() {
        let snap = snapshot(json!({
            "apis": {
                "calc": calc_response()["apis"]["calc"].clone(),
                "odd": {"info": "not an object", "paths": {"/x": null, "/y": 3}},
                "weird": "text"
            },
            "verbosity": ["warning"]
        }));
        assert!(snap.verbosity.is_none());

        let mut registry = Registry::new();
        let report = registry.apply_discovery(snap.apis.as_ref().unwrap(), "monitor");

        assert_eq!(report.added_apis, ["calc", "odd", "weird"]);
        assert_eq!(registry.operation("calc", "add").unwrap().description, "adds numbers");
        assert_eq!(registry.operation("odd", "x").unwrap().description, "");
        assert!(registry.operation("odd", "y").is_some());
        assert!(registry.api("weird").unwrap().operations.is_empty());
    }

    #[test]
    fn test_missing_documentation_yields_empty_descriptions() {
        let mut registry = Registry::new();
        let snap = snapshot(json!({
            "apis": {"bare": {"paths": {"/ping": {}, "verb": {"get": {}}}}}
        }));
        registry.apply_discovery(snap.apis.as_ref().unwrap(), "monitor");

        let bare = registry.api("bare").unwrap();
        assert_eq!(bare.operations["ping"].description, "");
        assert!(bare.operations.contains_key("verb"));
    }

    #[test]
    fn test_empty_discovery_is_valid() {
        let mut registry = Registry::new();
        let snap = snapshot(json!({"apis": {}}));
        assert!(registry.apply_discovery(snap.apis.as_ref().unwrap(), "monitor").is_empty());
        assert!(registry.is_empty());
        assert!(snapshot(json!({})).apis.is_none());
    }
}
