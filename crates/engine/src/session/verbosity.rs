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

//! Verbosity levels and the displayed/confirmed verbosity state.
//!
//! The daemon stores levels as small integers where `warning` and `notice`
//! share a value, so a level written as `notice` reads back as `warning`.
//! Displayed levels therefore only ever come from what the daemon reports.

use crate::error::MonitorError;
use serde_json::{json, Value};
use std::{
    collections::BTreeMap,
    fmt,
    str::FromStr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tracing::{debug, warn};

/// Verbosity of an API, from least to most talkative
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VerbosityLevel {
    /// Errors only
    Error,
    /// Warnings and errors
    Warning,
    /// Notices and above
    Notice,
    /// Informational messages and above
    Info,
    /// Everything
    Debug,
    /// Numeric level the daemon reported without a name
    Raw(i64),
}

impl VerbosityLevel {
    /// Named levels, in increasing order
    pub const NAMED: [Self; 5] = [Self::Error, Self::Warning, Self::Notice, Self::Info, Self::Debug];

    /// Wire name, if the level has one
    pub fn name(&self) -> Option<&'static str> {
        match self {
            Self::Error => Some("error"),
            Self::Warning => Some("warning"),
            Self::Notice => Some("notice"),
            Self::Info => Some("info"),
            Self::Debug => Some("debug"),
            Self::Raw(_) => None,
        }
    }

    /// Numeric value as stored by the daemon
    pub fn number(&self) -> i64 {
        match self {
            Self::Error => 0,
            Self::Warning | Self::Notice => 1,
            Self::Info => 2,
            Self::Debug => 3,
            Self::Raw(n) => *n,
        }
    }

    /// Level for an integer input, clamped to the named range
    pub fn from_number(n: i64) -> Self {
        match n.clamp(0, 3) {
            0 => Self::Error,
            1 => Self::Warning,
            2 => Self::Info,
            _ => Self::Debug,
        }
    }

    /// Decode a level reported by the daemon
    ///
    /// Names are matched case-insensitively. Numbers are kept as reported:
    /// in-range values map to their name, others become [`Self::Raw`].
    pub fn from_reply_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Self::from_name(s),
            Value::Number(n) => {
                let n = n.as_i64()?;
                Some(if (0..=3).contains(&n) { Self::from_number(n) } else { Self::Raw(n) })
            }
            _ => None,
        }
    }

    /// JSON form sent to the daemon
    pub fn to_value(&self) -> Value {
        match self.name() {
            Some(name) => Value::from(name),
            None => Value::from(self.number()),
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::NAMED.into_iter().find(|level| level.name().is_some_and(|n| n.eq_ignore_ascii_case(name)))
    }
}

impl FromStr for VerbosityLevel {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(level) = Self::from_name(s) {
            return Ok(level);
        }
        s.parse::<i64>().map(Self::from_number).map_err(|_| MonitorError::InvalidLevel(s.to_string()))
    }
}

impl fmt::Display for VerbosityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{}", self.number()),
        }
    }
}

/// What a verbosity setting applies to
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VerbosityTarget {
    /// The daemon-wide level, reported under the empty name
    Global,
    /// Every API at once
    All,
    /// One API
    Api(String),
}

impl VerbosityTarget {
    /// Target for a name found in a daemon response
    pub fn from_wire_name(name: &str) -> Self {
        match name {
            "" => Self::Global,
            "*" => Self::All,
            api => Self::Api(api.to_string()),
        }
    }

    /// Name used on the wire
    pub fn wire_name(&self) -> &str {
        match self {
            Self::Global => "",
            Self::All => "*",
            Self::Api(name) => name,
        }
    }

    /// Whether this target names `api`
    pub fn is_api(&self, api: &str) -> bool {
        matches!(self, Self::Api(name) if name == api)
    }
}

impl FromStr for VerbosityTarget {
    type Err = MonitorError;

    /// `*` is every API, `-` the daemon-wide level, anything else an API name
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "*" => Ok(Self::All),
            "-" => Ok(Self::Global),
            "" => Err(MonitorError::InvalidTarget(s.to_string())),
            api => Ok(Self::Api(api.to_string())),
        }
    }
}

impl fmt::Display for VerbosityTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("-"),
            Self::All => f.write_str("*"),
            Self::Api(name) => f.write_str(name),
        }
    }
}

/// A `monitor/set` request for one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerbosityCommand {
    /// Target of the change
    pub target: VerbosityTarget,
    /// Requested level
    pub level: VerbosityLevel,
}

impl VerbosityCommand {
    /// Arguments of the `monitor/set` call
    ///
    /// Every API at once uses the bare form, which the daemon also applies
    /// to the global level.
    pub fn to_args(&self) -> Value {
        match &self.target {
            VerbosityTarget::All => json!({ "verbosity": self.level.to_value() }),
            target => {
                let mut levels = serde_json::Map::new();
                levels.insert(target.wire_name().to_string(), self.level.to_value());
                json!({ "verbosity": levels })
            }
        }
    }
}

/// Arguments of the `monitor/get` call reading every level
pub fn get_verbosity_args() -> Value {
    json!({ "verbosity": true })
}

/// Re-entrancy guard suppressing feedback while confirmed values are applied
///
/// Clones share the same counter: a front-end keeps a clone next to its
/// level widgets and holds it while it updates them from confirmed values,
/// so the change notifications those widgets emit are not sent back as
/// writes. Only nesting is counted, no other memory is synchronized.
#[derive(Debug, Clone, Default)]
pub struct Inhibitor(Arc<AtomicUsize>);

impl Inhibitor {
    /// Hold the inhibitor until the returned guard is dropped
    pub fn hold(&self) -> InhibitGuard {
        self.0.fetch_add(1, Ordering::Relaxed);
        InhibitGuard(self.0.clone())
    }

    /// Whether some guard is alive
    pub fn is_held(&self) -> bool {
        self.0.load(Ordering::Relaxed) > 0
    }
}

/// Releases its [`Inhibitor`] on drop
#[derive(Debug)]
pub struct InhibitGuard(Arc<AtomicUsize>);

impl Drop for InhibitGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Confirmed, displayed and pending verbosity levels
///
/// Displayed levels only ever come from the daemon. A level the operator
/// asked for stays pending until the read that follows the write settles.
#[derive(Debug, Clone, Default)]
pub struct VerbosityState {
    confirmed: BTreeMap<VerbosityTarget, VerbosityLevel>,
    displayed: BTreeMap<VerbosityTarget, VerbosityLevel>,
    pending: BTreeMap<VerbosityTarget, VerbosityLevel>,
    inhibitor: Inhibitor,
}

impl VerbosityState {
    /// Create an empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Last level the daemon reported for `target`
    pub fn confirmed(&self, target: &VerbosityTarget) -> Option<VerbosityLevel> {
        self.confirmed.get(target).copied()
    }

    /// Level currently displayed for `target`
    pub fn displayed(&self, target: &VerbosityTarget) -> Option<VerbosityLevel> {
        self.displayed.get(target).copied()
    }

    /// Level requested for `target` and not yet settled
    pub fn pending(&self, target: &VerbosityTarget) -> Option<VerbosityLevel> {
        self.pending.get(target).copied()
    }

    /// Every confirmed level
    pub fn confirmed_levels(&self) -> &BTreeMap<VerbosityTarget, VerbosityLevel> {
        &self.confirmed
    }

    /// The guard held while confirmed values are applied
    pub fn inhibitor(&self) -> &Inhibitor {
        &self.inhibitor
    }

    /// Record a selection
    ///
    /// While the inhibitor is held the selection comes from applying daemon
    /// values: it is displayed and no command is returned, so it never
    /// echoes back as a write. Otherwise the level becomes pending and the
    /// command to send is returned; the displayed level is left alone.
    pub fn select(
        &mut self,
        target: VerbosityTarget,
        level: VerbosityLevel,
    ) -> Option<VerbosityCommand> {
        if self.inhibitor.is_held() {
            debug!(%target, %level, "Selection applied without command");
            self.displayed.insert(target, level);
            return None;
        }
        self.pending.insert(target.clone(), level);
        Some(VerbosityCommand { target, level })
    }

    /// Forget the pending level of `target` once its round trip settled
    pub fn settle(&mut self, target: &VerbosityTarget) -> Option<VerbosityLevel> {
        self.pending.remove(target)
    }

    /// Apply the `verbosity` part of a `monitor/get` response
    ///
    /// Entries of `monitor_api` and undecodable levels are skipped. Returns
    /// the number of targets updated.
    pub fn apply_confirmed(&mut self, levels: &BTreeMap<String, Value>, monitor_api: &str) -> usize {
        let _guard = self.inhibitor.hold();
        let mut applied = 0;

        for (name, value) in levels {
            if name == monitor_api {
                continue;
            }
            let Some(level) = VerbosityLevel::from_reply_value(value) else {
                warn!(api = %name, %value, "Ignoring undecodable verbosity");
                continue;
            };
            let target = VerbosityTarget::from_wire_name(name);
            self.confirmed.insert(target.clone(), level);
            let echoed = self.select(target, level);
            debug_assert!(echoed.is_none());
            applied += 1;
        }

        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels(value: Value) -> BTreeMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!("DEBUG".parse::<VerbosityLevel>().unwrap(), VerbosityLevel::Debug);
        assert_eq!("notice".parse::<VerbosityLevel>().unwrap(), VerbosityLevel::Notice);
        assert_eq!("-4".parse::<VerbosityLevel>().unwrap(), VerbosityLevel::Error);
        assert_eq!("2".parse::<VerbosityLevel>().unwrap(), VerbosityLevel::Info);
        assert_eq!("17".parse::<VerbosityLevel>().unwrap(), VerbosityLevel::Debug);
        assert!(matches!(
            "chatty".parse::<VerbosityLevel>(),
            Err(MonitorError::InvalidLevel(s)) if s == "chatty"
        ));
        assert!(VerbosityLevel::Error < VerbosityLevel::Debug);
    }

    #[test]
    fn test_reply_values() {
        assert_eq!(VerbosityLevel::from_reply_value(&json!("Warning")), Some(VerbosityLevel::Warning));
        assert_eq!(VerbosityLevel::from_reply_value(&json!(1)), Some(VerbosityLevel::Warning));
        assert_eq!(VerbosityLevel::from_reply_value(&json!(7)), Some(VerbosityLevel::Raw(7)));
        assert_eq!(VerbosityLevel::from_reply_value(&json!("loud")), None);
        assert_eq!(VerbosityLevel::from_reply_value(&json!(null)), None);
        assert_eq!(VerbosityLevel::Raw(7).to_value(), json!(7));
        assert_eq!(VerbosityLevel::Raw(7).to_string(), "7");
    }

    #[test]
    fn test_command_shapes() {
        let one = VerbosityCommand {
            target: VerbosityTarget::Api("foo".to_string()),
            level: VerbosityLevel::Debug,
        };
        assert_eq!(one.to_args(), json!({"verbosity": {"foo": "debug"}}));

        let global = VerbosityCommand { target: VerbosityTarget::Global, level: VerbosityLevel::Info };
        assert_eq!(global.to_args(), json!({"verbosity": {"": "info"}}));

        let all = VerbosityCommand { target: VerbosityTarget::All, level: VerbosityLevel::Error };
        assert_eq!(all.to_args(), json!({"verbosity": "error"}));
    }

    #[test]
    fn test_target_parsing() {
        assert_eq!("*".parse::<VerbosityTarget>().unwrap(), VerbosityTarget::All);
        assert_eq!("-".parse::<VerbosityTarget>().unwrap(), VerbosityTarget::Global);
        assert_eq!("calc".parse::<VerbosityTarget>().unwrap(), VerbosityTarget::Api("calc".into()));
        assert!("  ".parse::<VerbosityTarget>().is_err());
        assert_eq!(VerbosityTarget::from_wire_name(""), VerbosityTarget::Global);
    }

    #[test]
    fn test_apply_confirmed_skips_monitor_and_reconciles() {
        let mut state = VerbosityState::new();
        let calc = VerbosityTarget::Api("calc".to_string());

        // Operator intent that the daemon does not confirm
        let cmd = state.select(calc.clone(), VerbosityLevel::Notice);
        assert!(cmd.is_some());
        assert_eq!(state.pending(&calc), Some(VerbosityLevel::Notice));
        assert_eq!(state.displayed(&calc), None);
        assert_eq!(state.confirmed(&calc), None);

        let applied = state.apply_confirmed(
            &levels(json!({"": "info", "calc": "warning", "monitor": "debug", "odd": {}})),
            "monitor",
        );
        assert_eq!(applied, 2);
        assert_eq!(state.displayed(&calc), Some(VerbosityLevel::Warning));
        assert_eq!(state.confirmed(&calc), Some(VerbosityLevel::Warning));
        assert_eq!(state.confirmed(&VerbosityTarget::Global), Some(VerbosityLevel::Info));
        assert_eq!(state.confirmed(&VerbosityTarget::Api("monitor".into())), None);
        assert!(!state.inhibitor().is_held());
    }

    #[test]
    fn test_inhibited_selection_issues_no_command() {
        let mut state = VerbosityState::new();
        let inhibitor = state.inhibitor().clone();
        let guard = inhibitor.hold();
        let nested = inhibitor.hold();

        let target = VerbosityTarget::Api("foo".to_string());
        assert_eq!(state.select(target.clone(), VerbosityLevel::Debug), None);
        assert_eq!(state.displayed(&target), Some(VerbosityLevel::Debug));

        drop(nested);
        assert!(inhibitor.is_held());
        drop(guard);
        assert!(state.select(target.clone(), VerbosityLevel::Info).is_some());
        assert_eq!(state.displayed(&target), Some(VerbosityLevel::Debug));
        assert_eq!(state.pending(&target), Some(VerbosityLevel::Info));
    }

    #[test]
    fn test_unconfirmed_request_is_never_displayed() {
        let mut state = VerbosityState::new();
        state.apply_confirmed(&levels(json!({"calc": "warning"})), "monitor");

        let calc = VerbosityTarget::Api("calc".to_string());
        assert!(state.select(calc.clone(), VerbosityLevel::Debug).is_some());
        assert!(state.select(VerbosityTarget::All, VerbosityLevel::Info).is_some());
        assert_eq!(state.displayed(&calc), Some(VerbosityLevel::Warning));
        assert_eq!(state.displayed(&VerbosityTarget::All), None);

        assert_eq!(state.settle(&calc), Some(VerbosityLevel::Debug));
        assert_eq!(state.pending(&calc), None);
        assert_eq!(state.displayed(&calc), Some(VerbosityLevel::Warning));
    }
}
