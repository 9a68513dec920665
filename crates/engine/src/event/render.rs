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

//! Bounded-depth rendering of JSON values into row trees.

use super::TraceEvent;
use serde_json::Value;
use std::fmt;

/// Display class of a leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafClass {
    /// JSON number
    Number,
    /// JSON string, shown quoted
    String,
    /// `true` or `false`
    Boolean,
    /// `null`
    Null,
    /// Container whose depth budget ran out, shown as JSON text
    Json,
}

impl LeafClass {
    /// Class of a value rendered as a leaf
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Bool(_) => Self::Boolean,
            Value::Null => Self::Null,
            Value::Array(_) | Value::Object(_) => Self::Json,
        }
    }
}

/// Rendered value
#[derive(Debug, Clone, PartialEq)]
pub enum RenderNode {
    /// Value shown as text
    Leaf {
        /// Display class
        class: LeafClass,
        /// JSON text of the value
        text: String,
    },
    /// One row per key, keys sorted
    Object(Vec<(String, RenderNode)>),
    /// One row per element, in order
    Array(Vec<RenderNode>),
}

impl RenderNode {
    /// Whether the node is a leaf
    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf { .. })
    }

    /// Value of the row named `key`, for object nodes
    pub fn row(&self, key: &str) -> Option<&RenderNode> {
        match self {
            Self::Object(rows) => rows.iter().find(|(k, _)| k == key).map(|(_, node)| node),
            _ => None,
        }
    }

    fn write_indented(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        match self {
            Self::Leaf { text, .. } => writeln!(f, " {text}"),
            Self::Object(rows) => {
                writeln!(f)?;
                for (key, node) in rows {
                    write!(f, "{:indent$}{key}:", "")?;
                    node.write_indented(f, indent + 2)?;
                }
                Ok(())
            }
            Self::Array(items) => {
                writeln!(f)?;
                for node in items {
                    write!(f, "{:indent$}-", "")?;
                    node.write_indented(f, indent + 2)?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for RenderNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leaf { text, .. } => f.write_str(text),
            Self::Object(rows) => {
                for (key, node) in rows {
                    write!(f, "{key}:")?;
                    node.write_indented(f, 2)?;
                }
                Ok(())
            }
            Self::Array(items) => {
                for node in items {
                    f.write_str("-")?;
                    node.write_indented(f, 2)?;
                }
                Ok(())
            }
        }
    }
}

/// Render `value` expanding at most `depth` container levels
pub fn render_value(value: &Value, depth: usize) -> RenderNode {
    match value {
        Value::Object(map) if depth > 0 => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            RenderNode::Object(
                keys.into_iter()
                    .map(|key| (key.clone(), render_value(&map[key.as_str()], depth - 1)))
                    .collect(),
            )
        }
        Value::Array(items) if depth > 0 => {
            RenderNode::Array(items.iter().map(|item| render_value(item, depth - 1)).collect())
        }
        leaf => RenderNode::Leaf { class: LeafClass::of(leaf), text: leaf.to_string() },
    }
}

/// Depth budgets of a trace event rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderDepths {
    /// Depth of the descriptor table
    pub descriptor: usize,
    /// Depth of the `data` row
    pub data: usize,
}

impl Default for RenderDepths {
    fn default() -> Self {
        Self { descriptor: 4, data: 2 }
    }
}

/// Render a trace event as its descriptor rows plus a trailing `data` row
///
/// A row at depth `d` expands `d - 1` container levels of its value.
pub fn render_trace_event(event: &TraceEvent, depths: RenderDepths) -> RenderNode {
    let descriptor_rows = depths.descriptor.saturating_sub(1);
    let mut keys: Vec<&String> = event.descriptor.keys().collect();
    keys.sort();

    let mut rows: Vec<(String, RenderNode)> = keys
        .into_iter()
        .map(|key| (key.clone(), render_value(&event.descriptor[key.as_str()], descriptor_rows)))
        .collect();
    if let Some(data) = &event.data {
        rows.push(("data".to_string(), render_value(data, depths.data.saturating_sub(1))));
    }
    RenderNode::Object(rows)
}
