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

//! Session command - show the client session known to the daemon

use crate::console::Console;
use eyre::{Context, Result};
use hookscope_engine::{Session, Transport};
use std::io::Write;

/// Print the session uuid, token and timeouts
pub async fn show_session<T: Transport>(
    session: &mut Session<T>,
    refresh_token: bool,
    console: &Console,
    out: &mut impl Write,
) -> Result<()> {
    let info = session
        .session_info(refresh_token)
        .await
        .wrap_err("Failed to query the client session")?;
    write!(out, "{}", console.session_info(&info))?;
    Ok(())
}
