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

//! RPC channel to the binder daemon.
//!
//! - **Types** ([`types`]) - frames, replies and pushed events of `x-afb-ws-json1`
//! - **Transport** ([`transport`]) - the trait the session engine consumes
//! - **Websocket** ([`ws`]) - the concrete websocket client

pub mod transport;
pub mod types;
pub mod ws;

pub use transport::{ConnectTarget, Connector, EventReceiver, EventSender, Transport};
pub use types::{Frame, PushEvent, Reply, ReplyRequest, WSJ1_PROTOCOL};
pub use ws::{WsConnector, WsJson1Transport};
