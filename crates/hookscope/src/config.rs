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

//! Configuration of the Hookscope console
//!
//! Stored as TOML in `~/.hookscope.toml`. Every section is optional in the
//! file; missing values take their defaults.

use crossterm::style::Color;
use eyre::{Context, Result};
use hookscope_engine::{
    RenderDepths, SessionConfig, DEFAULT_MAX_LOG_ENTRIES, DEFAULT_MAX_TRACE_EVENTS,
    DEFAULT_MONITOR_API,
};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where to connect
    pub connection: ConnectionConfig,
    /// Monitoring API settings
    pub monitor: MonitorConfig,
    /// Call log settings
    pub log: LogConfig,
    /// Trace event settings
    pub trace: TraceConfig,
    /// Output colors
    pub style: StyleConfig,
}

/// Connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Daemon address, `host:port`
    pub host: String,
    /// Opaque access token
    pub token: Option<String>,
}

/// Monitoring API settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Name of the monitoring API
    pub api: String,
    /// Show trace events generated by the monitoring API itself
    pub show_monitor_events: bool,
    /// Print permission metadata of operations
    pub show_permissions: bool,
}

/// Call log settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Record calls and events in the log feed
    pub enabled: bool,
    /// Maximum number of entries kept
    pub max_entries: usize,
}

/// Trace event settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Maximum number of trace events kept
    pub max_events: usize,
    /// Rendering depth of event descriptors
    pub descriptor_depth: usize,
    /// Rendering depth of event payloads
    pub data_depth: usize,
}

/// Output colors, by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleConfig {
    /// Use colors when writing to a terminal
    pub enabled: bool,
    /// Numbers
    pub number: String,
    /// Strings
    pub string: String,
    /// Booleans
    pub boolean: String,
    /// `null`
    pub null: String,
    /// Truncated containers
    pub json: String,
    /// Keys and names
    pub key: String,
    /// Event tags
    pub tag: String,
    /// Errors
    pub error: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self { host: "localhost:1234".to_string(), token: None }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            api: DEFAULT_MONITOR_API.to_string(),
            show_monitor_events: false,
            show_permissions: false,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { enabled: false, max_entries: DEFAULT_MAX_LOG_ENTRIES }
    }
}

impl Default for TraceConfig {
    fn default() -> Self {
        let depths = RenderDepths::default();
        Self {
            max_events: DEFAULT_MAX_TRACE_EVENTS,
            descriptor_depth: depths.descriptor,
            data_depth: depths.data,
        }
    }
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            number: "dark_yellow".to_string(),
            string: "green".to_string(),
            boolean: "blue".to_string(),
            null: "magenta".to_string(),
            json: "gray".to_string(),
            key: "cyan".to_string(),
            tag: "yellow".to_string(),
            error: "red".to_string(),
        }
    }
}

impl Config {
    /// Get the config file path (~/.hookscope.toml)
    pub fn config_path() -> Result<PathBuf> {
        let home =
            dirs::home_dir().ok_or_else(|| eyre::eyre!("Unable to determine home directory"))?;
        Ok(home.join(".hookscope.toml"))
    }

    /// Load the configuration from the default path
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`, creating a default file if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("Config file not found, creating default at {:?}", path);
            let default_config = Self::default();
            if let Err(e) = default_config.save_to(path) {
                warn!("Could not write default config: {e:#}");
            }
            return Ok(default_config);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path:?}"))?;
        let config: Self =
            toml::from_str(&content).with_context(|| "Failed to parse config file as TOML")?;

        debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).with_context(|| "Failed to serialize config to TOML")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {path:?}"))?;

        debug!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Session settings derived from this configuration
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            monitor_api: self.monitor.api.clone(),
            show_monitor_events: self.monitor.show_monitor_events,
            log_enabled: self.log.enabled,
            max_log_entries: self.log.max_entries,
            max_trace_events: self.trace.max_events,
        }
    }

    /// Rendering depths of trace events
    pub fn render_depths(&self) -> RenderDepths {
        RenderDepths { descriptor: self.trace.descriptor_depth, data: self.trace.data_depth }
    }

    /// Convert a color name to a crossterm [`Color`]
    pub fn parse_color(color_str: &str) -> Color {
        match color_str.to_lowercase().as_str() {
            "black" => Color::Black,
            "red" => Color::Red,
            "dark_red" => Color::DarkRed,
            "green" => Color::Green,
            "dark_green" => Color::DarkGreen,
            "yellow" => Color::Yellow,
            "dark_yellow" => Color::DarkYellow,
            "blue" => Color::Blue,
            "dark_blue" => Color::DarkBlue,
            "magenta" => Color::Magenta,
            "dark_magenta" => Color::DarkMagenta,
            "cyan" => Color::Cyan,
            "dark_cyan" => Color::DarkCyan,
            "gray" | "grey" => Color::Grey,
            "dark_gray" | "dark_grey" => Color::DarkGrey,
            "white" => Color::White,
            _ => {
                warn!("Unknown color '{}', using default grey", color_str);
                Color::Grey
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_creates_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hookscope.toml");

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hookscope.toml");
        fs::write(
            &path,
            r#"
[connection]
host = "10.0.0.2:1234"
token = "HELLO"

[trace]
data_depth = 3
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.connection.host, "10.0.0.2:1234");
        assert_eq!(config.connection.token.as_deref(), Some("HELLO"));
        assert_eq!(config.trace.data_depth, 3);
        assert_eq!(config.trace.descriptor_depth, 4);
        assert_eq!(config.monitor.api, "monitor");
        assert_eq!(config.render_depths(), RenderDepths { descriptor: 4, data: 3 });
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hookscope.toml");
        fs::write(&path, "connection = 3").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(format!("{err:#}").contains("TOML"));
    }

    #[test]
    fn test_session_config_mapping() {
        let mut config = Config::default();
        config.monitor.api = "mon".to_string();
        config.log.enabled = true;

        let session = config.session_config();
        assert_eq!(session.monitor_api, "mon");
        assert!(session.log_enabled);
        assert_eq!(session.max_trace_events, DEFAULT_MAX_TRACE_EVENTS);
    }

    #[test]
    fn test_parse_color() {
        assert_eq!(Config::parse_color("Green"), Color::Green);
        assert_eq!(Config::parse_color("dark_grey"), Color::DarkGrey);
        assert_eq!(Config::parse_color("chartreuse"), Color::Grey);
    }
}
