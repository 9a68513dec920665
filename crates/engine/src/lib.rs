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

//! Session and trace-subscription engine of Hookscope.
//!
//! - **RPC** ([`rpc`]) - wire types, the [`Transport`] trait and the websocket client
//! - **Session** ([`session`]) - call logging, discovery, verbosity and trace control
//! - **Events** ([`event`]) - classification and rendering of pushed trace events
//! - **Monitor** ([`monitor`]) - keeps at most one live session

pub mod error;
pub use error::*;

pub mod event;
pub use event::*;

pub mod monitor;
pub use monitor::*;

pub mod rpc;
pub use rpc::*;

pub mod session;
pub use session::*;

pub mod test_utils;
