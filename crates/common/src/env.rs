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

//! Environment variable name constants for Hookscope configuration.
//!
//! These constants are the single source of truth for the environment
//! variables read by the binary and the logging setup.
//!
//! # Environment Variables
//!
//! - [`HOOKSCOPE_HOST`] - Default `host:port` of the binder daemon
//! - [`HOOKSCOPE_TOKEN`] - Default access token sent when connecting
//! - [`HOOKSCOPE_LOG_DIR`] - Overrides the directory used for log files

/// Environment variable holding the `host:port` of the daemon to monitor.
///
/// Used as a fallback by the `--host` command line flag.
///
/// ```bash
/// HOOKSCOPE_HOST=localhost:1234 hookscope apis
/// ```
pub const HOOKSCOPE_HOST: &str = "HOOKSCOPE_HOST";

/// Environment variable holding the access token.
///
/// The token is opaque to Hookscope and forwarded as-is in the connection URL.
pub const HOOKSCOPE_TOKEN: &str = "HOOKSCOPE_TOKEN";

/// Environment variable overriding the log directory.
///
/// When unset, logs go to `<temp>/hookscope-logs/<component>`.
pub const HOOKSCOPE_LOG_DIR: &str = "HOOKSCOPE_LOG_DIR";
