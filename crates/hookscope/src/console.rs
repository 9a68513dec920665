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

//! Text rendering of registries, levels, trace events and log entries.

use crate::config::{Config, StyleConfig};
use crossterm::style::{Color, Stylize};
use hookscope_engine::{
    render_trace_event, LeafClass, LogEntry, LogKind, Registry, RenderDepths, RenderNode,
    SessionInfo, TraceEvent, VerbosityState, VerbosityTarget,
};
use std::fmt::Write;

/// Resolved colors
#[derive(Debug, Clone)]
struct Palette {
    number: Color,
    string: Color,
    boolean: Color,
    null: Color,
    json: Color,
    key: Color,
    tag: Color,
    error: Color,
}

impl From<&StyleConfig> for Palette {
    fn from(style: &StyleConfig) -> Self {
        Self {
            number: Config::parse_color(&style.number),
            string: Config::parse_color(&style.string),
            boolean: Config::parse_color(&style.boolean),
            null: Config::parse_color(&style.null),
            json: Config::parse_color(&style.json),
            key: Config::parse_color(&style.key),
            tag: Config::parse_color(&style.tag),
            error: Config::parse_color(&style.error),
        }
    }
}

/// Formats engine state for the terminal
#[derive(Debug, Clone)]
pub struct Console {
    palette: Palette,
    colored: bool,
    show_permissions: bool,
}

impl Console {
    /// Console using the colors of `style`
    pub fn new(style: &StyleConfig, colored: bool, show_permissions: bool) -> Self {
        Self { palette: Palette::from(style), colored: colored && style.enabled, show_permissions }
    }

    fn paint(&self, text: &str, color: Color) -> String {
        if self.colored {
            text.with(color).to_string()
        } else {
            text.to_string()
        }
    }

    /// Highlight an error message
    pub fn error(&self, text: &str) -> String {
        self.paint(text, self.palette.error)
    }

    /// APIs with their operations and levels
    pub fn registry(&self, registry: &Registry, verbosity: &VerbosityState) -> String {
        let mut out = String::new();
        if registry.is_empty() {
            out.push_str("no api\n");
        }
        for api in registry.apis() {
            let level = verbosity
                .displayed(&VerbosityTarget::Api(api.name.clone()))
                .map(|l| l.to_string())
                .unwrap_or_else(|| "-".to_string());
            let _ = writeln!(
                out,
                "{}  {}  [{level}]",
                self.paint(&api.name, self.palette.key),
                api.description
            );
            for op in api.operations.values() {
                let _ = writeln!(out, "    {}  {}", op.name, op.description);
                if let Some(permissions) = op.permissions.as_ref().filter(|_| self.show_permissions)
                {
                    let _ = writeln!(out, "        permissions: {permissions}");
                }
            }
        }
        out
    }

    /// Confirmed levels, global first
    pub fn verbosity(&self, verbosity: &VerbosityState) -> String {
        let mut out = String::new();
        for (target, level) in verbosity.confirmed_levels() {
            let name = match target {
                VerbosityTarget::Global => "(daemon)".to_string(),
                other => other.to_string(),
            };
            let _ = writeln!(out, "{:<20} {level}", self.paint(&name, self.palette.key));
        }
        out
    }

    /// A trace event: a header line, then the rendered descriptor and payload
    pub fn trace_event(&self, event: &TraceEvent, depths: RenderDepths) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} {:<8} {}",
            event.time,
            event.variant.kind(),
            self.paint(&event.tag(), self.palette.tag)
        );
        self.write_node(&mut out, &render_trace_event(event, depths), 4);
        out
    }

    /// Session uuid, token and timeouts
    pub fn session_info(&self, info: &SessionInfo) -> String {
        let mut out = String::new();
        for (key, value) in [
            ("uuid", info.uuid.clone()),
            ("token", info.token.clone()),
            ("timeout", info.timeout.to_string()),
            ("remain", info.remain.to_string()),
        ] {
            let _ = writeln!(out, "{:<8} {value}", self.paint(key, self.palette.key));
        }
        out
    }

    /// One log feed entry
    pub fn log_entry(&self, entry: &LogEntry) -> String {
        let tag = match entry.kind {
            LogKind::ReceiveError | LogKind::Error | LogKind::UnexpectedEvent => {
                self.paint(&entry.tag, self.palette.error)
            }
            _ => self.paint(&entry.tag, self.palette.tag),
        };
        format!(
            "{} [{}] {tag}\n{}\n",
            entry.at.format("%H:%M:%S%.3f"),
            entry.kind.as_str(),
            entry.content
        )
    }

    fn leaf_color(&self, class: LeafClass) -> Color {
        match class {
            LeafClass::Number => self.palette.number,
            LeafClass::String => self.palette.string,
            LeafClass::Boolean => self.palette.boolean,
            LeafClass::Null => self.palette.null,
            LeafClass::Json => self.palette.json,
        }
    }

    fn write_node(&self, out: &mut String, node: &RenderNode, indent: usize) {
        match node {
            RenderNode::Leaf { class, text } => {
                let _ = writeln!(out, " {}", self.paint(text, self.leaf_color(*class)));
            }
            RenderNode::Object(rows) => {
                for (key, child) in rows {
                    let _ = write!(out, "{:indent$}{}:", "", self.paint(key, self.palette.key));
                    self.write_child(out, child, indent);
                }
            }
            RenderNode::Array(items) => {
                for child in items {
                    let _ = write!(out, "{:indent$}-", "");
                    self.write_child(out, child, indent);
                }
            }
        }
    }

    fn write_child(&self, out: &mut String, child: &RenderNode, indent: usize) {
        if !child.is_leaf() {
            out.push('\n');
        }
        self.write_node(out, child, indent + 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookscope_engine::{
        classify_push, test_utils::trace_push, ApiDescription, Classification, ClassifyOptions,
    };
    use serde_json::json;
    use std::collections::BTreeMap;

    fn plain(show_permissions: bool) -> Console {
        Console::new(&StyleConfig::default(), false, show_permissions)
    }

    fn calc_registry() -> Registry {
        let apis: BTreeMap<String, Option<ApiDescription>> = serde_json::from_value(json!({
            "calc": {
                "info": {"description": "Calculator"},
                "paths": {"/add": {"get": {
                    "responses": {"200": {"description": "adds numbers"}},
                    "x-permissions": {"session": "check"}
                }}}
            }
        }))
        .unwrap();
        let mut registry = Registry::new();
        registry.apply_discovery(&apis, "monitor");
        registry
    }

    #[test]
    fn test_registry_listing() {
        let registry = calc_registry();
        let verbosity = VerbosityState::new();

        let text = plain(false).registry(&registry, &verbosity);
        assert_eq!(text, "calc  Calculator  [-]\n    add  adds numbers\n");

        let with_perms = plain(true).registry(&registry, &verbosity);
        assert!(with_perms.contains("permissions: {\"session\":\"check\"}"));
    }

    #[test]
    fn test_trace_event_layout() {
        let push = trace_push(json!({
            "time": "42.000100",
            "service": {"api": "calc", "action": "start_before"},
            "data": {"list": [1, 2]}
        }));
        let Classification::Trace(event) = classify_push(&push, &ClassifyOptions::default())
        else {
            panic!("expected trace event")
        };

        let text = plain(false).trace_event(&event, RenderDepths::default());
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "42.000100 service  calc@start_before");
        assert_eq!(lines[1], "    action: \"start_before\"");
        assert_eq!(lines[2], "    api: \"calc\"");
        assert_eq!(lines[3], "    data:");
        assert_eq!(lines[4], "      list: [1,2]");
    }

    #[test]
    fn test_disabled_style_is_plain() {
        let style = StyleConfig { enabled: false, ..Default::default() };
        let console = Console::new(&style, true, false);
        assert_eq!(console.error("boom"), "boom");
        assert!(Console::new(&StyleConfig::default(), true, false).error("boom").contains("boom"));
    }
}
