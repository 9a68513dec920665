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

//! Trace subscriptions: one exclusive mode per tag over an additive protocol.
//!
//! The daemon never replaces a subscription on its own, so switching a tag
//! from one mode to another means dropping the old subscription before
//! adding the new one.

use crate::error::MonitorError;
use serde_json::{json, Value};
use std::{collections::BTreeMap, fmt, str::FromStr};

/// Trace dimension offered by the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TraceCategory {
    /// Requests handled by the APIs
    Request,
    /// Calls made by bindings to the daemon interface
    Daemon,
    /// Service-level activity of the bindings
    Service,
    /// Events created and pushed
    Event,
}

impl TraceCategory {
    /// Every category, in the order the daemon documents them
    pub const ALL: [Self; 4] = [Self::Request, Self::Daemon, Self::Service, Self::Event];

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Daemon => "daemon",
            Self::Service => "service",
            Self::Event => "event",
        }
    }
}

impl FromStr for TraceCategory {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| MonitorError::InvalidTag(s.to_string()))
    }
}

impl fmt::Display for TraceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detail level of a subscription
///
/// The daemon accepts any flag name it knows for a category, so modes are
/// validated words rather than a closed set. `no` is the inactive mode.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TraceMode(String);

impl TraceMode {
    /// Name of the inactive mode
    pub const OFF: &'static str = "no";

    /// Modes offered by the console, `no` first
    pub const OFFERED: [&'static str; 4] = [Self::OFF, "common", "extra", "all"];

    /// The inactive mode
    pub fn off() -> Self {
        Self(Self::OFF.to_string())
    }

    /// Whether this is the inactive mode
    pub fn is_off(&self) -> bool {
        self.0 == Self::OFF
    }

    /// Mode name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceMode {
    fn default() -> Self {
        Self::off()
    }
}

impl FromStr for TraceMode {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_lowercase() || b == b'_') {
            return Err(MonitorError::InvalidMode(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for TraceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key of a subscription slot: `<api-or-*>/<category>`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TraceTag {
    api: Option<String>,
    category: TraceCategory,
}

impl TraceTag {
    /// Tag of `category` for one API
    pub fn api(api: impl Into<String>, category: TraceCategory) -> Self {
        Self { api: Some(api.into()), category }
    }

    /// Tag of `category` for every API
    pub fn wildcard(category: TraceCategory) -> Self {
        Self { api: None, category }
    }

    /// Traced API, `None` for the wildcard
    pub fn api_name(&self) -> Option<&str> {
        self.api.as_deref()
    }

    /// Traced category
    pub fn category(&self) -> TraceCategory {
        self.category
    }
}

impl FromStr for TraceTag {
    type Err = MonitorError;

    /// The category follows the last `/`; API names may contain separators
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || MonitorError::InvalidTag(s.to_string());
        let (api, category) = s.trim().rsplit_once('/').ok_or_else(invalid)?;
        let category = category.parse().map_err(|_| invalid())?;
        match api {
            "" => Err(invalid()),
            "*" => Ok(Self::wildcard(category)),
            api => Ok(Self::api(api, category)),
        }
    }
}

impl fmt::Display for TraceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api.as_deref().unwrap_or("*"), self.category)
    }
}

/// A `monitor/trace` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceCommand {
    /// Retract the subscription of a tag
    Drop(TraceTag),
    /// Subscribe a tag with a mode
    Add {
        /// Subscribed slot
        tag: TraceTag,
        /// Requested mode, never `no`
        mode: TraceMode,
    },
    /// Retract every subscription of the session
    DropAll,
}

impl TraceCommand {
    /// Arguments of the `monitor/trace` call
    pub fn to_args(&self) -> Value {
        match self {
            Self::Drop(tag) => json!({ "drop": { "tag": tag.to_string() } }),
            Self::Add { tag, mode } => {
                let mut spec = serde_json::Map::new();
                spec.insert("tag".to_string(), Value::from(tag.to_string()));
                spec.insert("name".to_string(), Value::from("trace"));
                spec.insert(tag.category.as_str().to_string(), Value::from(mode.as_str()));
                if let Some(api) = &tag.api {
                    spec.insert("api".to_string(), Value::from(api.as_str()));
                }
                json!({ "add": spec })
            }
            Self::DropAll => json!({ "drop": true }),
        }
    }
}

impl fmt::Display for TraceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drop(tag) => write!(f, "drop {tag}"),
            Self::Add { tag, mode } => write!(f, "add {tag}={mode}"),
            Self::DropAll => f.write_str("drop all"),
        }
    }
}

/// State of one tag
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceSlot {
    /// Mode the operator selected last
    pub displayed: TraceMode,
    /// Mode the daemon last acknowledged
    pub confirmed: TraceMode,
}

/// Per-tag trace subscriptions of a session
#[derive(Debug, Clone, Default)]
pub struct TraceSubscriptions {
    slots: BTreeMap<TraceTag, TraceSlot>,
}

impl TraceSubscriptions {
    /// Create a state where every tag is off
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands needed to move `tag` to `mode`, without changing state
    pub fn plan(&self, tag: &TraceTag, mode: &TraceMode) -> Vec<TraceCommand> {
        let current = self.mode(tag);
        if &current == mode {
            return Vec::new();
        }

        let mut commands = Vec::with_capacity(2);
        if !current.is_off() {
            commands.push(TraceCommand::Drop(tag.clone()));
        }
        if !mode.is_off() {
            commands.push(TraceCommand::Add { tag: tag.clone(), mode: mode.clone() });
        }
        commands
    }

    /// Select `mode` for `tag` and return the commands to issue, in order
    ///
    /// The displayed mode changes immediately; it is not rolled back if the
    /// commands later fail.
    pub fn select(&mut self, tag: &TraceTag, mode: TraceMode) -> Vec<TraceCommand> {
        let commands = self.plan(tag, &mode);
        if !commands.is_empty() {
            self.slots.entry(tag.clone()).or_default().displayed = mode;
        }
        commands
    }

    /// Record that the daemon acknowledged `command`
    pub fn confirm(&mut self, command: &TraceCommand) {
        match command {
            TraceCommand::Drop(tag) => {
                self.slots.entry(tag.clone()).or_default().confirmed = TraceMode::off();
            }
            TraceCommand::Add { tag, mode } => {
                self.slots.entry(tag.clone()).or_default().confirmed = mode.clone();
            }
            TraceCommand::DropAll => {
                for slot in self.slots.values_mut() {
                    slot.confirmed = TraceMode::off();
                }
            }
        }
    }

    /// Display every tag as off, as after a drop-all
    pub fn reset_all(&mut self) {
        for slot in self.slots.values_mut() {
            slot.displayed = TraceMode::off();
        }
    }

    /// Displayed mode of `tag`
    pub fn mode(&self, tag: &TraceTag) -> TraceMode {
        self.slots.get(tag).map(|slot| slot.displayed.clone()).unwrap_or_default()
    }

    /// Acknowledged mode of `tag`
    pub fn confirmed_mode(&self, tag: &TraceTag) -> TraceMode {
        self.slots.get(tag).map(|slot| slot.confirmed.clone()).unwrap_or_default()
    }

    /// Tags whose displayed mode is active
    pub fn active(&self) -> impl Iterator<Item = (&TraceTag, &TraceMode)> {
        self.slots
            .iter()
            .filter(|(_, slot)| !slot.displayed.is_off())
            .map(|(tag, slot)| (tag, &slot.displayed))
    }

    /// Tags whose displayed mode differs from what the daemon acknowledged
    pub fn drifted(&self) -> impl Iterator<Item = &TraceTag> {
        self.slots.iter().filter(|(_, slot)| slot.displayed != slot.confirmed).map(|(tag, _)| tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode(s: &str) -> TraceMode {
        s.parse().unwrap()
    }

    fn calc_request() -> TraceTag {
        "calc/request".parse().unwrap()
    }

    #[test]
    fn test_tag_parsing() {
        let tag = calc_request();
        assert_eq!(tag.api_name(), Some("calc"));
        assert_eq!(tag.category(), TraceCategory::Request);
        assert_eq!(tag.to_string(), "calc/request");

        let wildcard: TraceTag = "*/event".parse().unwrap();
        assert_eq!(wildcard.api_name(), None);
        assert_eq!(wildcard.to_string(), "*/event");

        let nested: TraceTag = "low-can/v2/service".parse().unwrap();
        assert_eq!(nested.api_name(), Some("low-can/v2"));

        for bad in ["calc", "/request", "calc/verbs", ""] {
            assert!(matches!(bad.parse::<TraceTag>(), Err(MonitorError::InvalidTag(_))), "{bad}");
        }
    }

    #[test]
    fn test_mode_validation() {
        assert!(mode("no").is_off());
        assert_eq!(mode("full").as_str(), "full");
        assert!(matches!("Full".parse::<TraceMode>(), Err(MonitorError::InvalidMode(_))));
        assert!("".parse::<TraceMode>().is_err());
        assert!("a b".parse::<TraceMode>().is_err());
    }

    #[test]
    fn test_toggle_on_then_off() {
        let mut traces = TraceSubscriptions::new();
        let tag = calc_request();

        let on = traces.select(&tag, mode("full"));
        assert_eq!(on.len(), 1);
        assert_eq!(
            on[0].to_args(),
            json!({"add": {"tag": "calc/request", "name": "trace", "request": "full", "api": "calc"}})
        );

        let off = traces.select(&tag, TraceMode::off());
        assert_eq!(off.len(), 1);
        assert_eq!(off[0].to_args(), json!({"drop": {"tag": "calc/request"}}));
        assert!(traces.mode(&tag).is_off());
    }

    #[test]
    fn test_switching_drops_before_adding() {
        let mut traces = TraceSubscriptions::new();
        let tag = calc_request();
        traces.select(&tag, mode("common"));

        let commands = traces.select(&tag, mode("all"));
        assert_eq!(
            commands,
            [
                TraceCommand::Drop(tag.clone()),
                TraceCommand::Add { tag: tag.clone(), mode: mode("all") },
            ]
        );
        assert_eq!(traces.active().count(), 1);
        assert_eq!(traces.mode(&tag), mode("all"));
    }

    #[test]
    fn test_reselecting_is_a_no_op() {
        let mut traces = TraceSubscriptions::new();
        let tag = calc_request();
        assert!(traces.select(&tag, TraceMode::off()).is_empty());
        traces.select(&tag, mode("extra"));
        assert!(traces.select(&tag, mode("extra")).is_empty());
    }

    #[test]
    fn test_wildcard_add_has_no_api() {
        let tag = TraceTag::wildcard(TraceCategory::Daemon);
        let add = TraceCommand::Add { tag, mode: mode("all") };
        assert_eq!(
            add.to_args(),
            json!({"add": {"tag": "*/daemon", "name": "trace", "daemon": "all"}})
        );
        assert_eq!(add.to_string(), "add */daemon=all");
        assert_eq!(TraceCommand::DropAll.to_args(), json!({"drop": true}));
    }

    #[test]
    fn test_confirmation_tracks_drift() {
        let mut traces = TraceSubscriptions::new();
        let tag = calc_request();

        let commands = traces.select(&tag, mode("common"));
        assert_eq!(traces.drifted().count(), 1);
        traces.confirm(&commands[0]);
        assert_eq!(traces.confirmed_mode(&tag), mode("common"));
        assert_eq!(traces.drifted().count(), 0);

        traces.reset_all();
        assert_eq!(traces.active().count(), 0);
        assert_eq!(traces.drifted().collect::<Vec<_>>(), [&tag]);
        traces.confirm(&TraceCommand::DropAll);
        assert_eq!(traces.drifted().count(), 0);
    }
}
