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

//! Apis command - list discovered APIs and operations

use crate::console::Console;
use eyre::Result;
use hookscope_engine::{Session, Transport};
use std::io::Write;

/// Print the registry built by discovery
pub fn show_apis<T: Transport>(
    session: &Session<T>,
    console: &Console,
    out: &mut impl Write,
) -> Result<()> {
    tracing::info!(apis = session.registry().len(), "Listing apis");
    write!(out, "{}", console.registry(session.registry(), session.verbosity()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StyleConfig;
    use hookscope_engine::{
        test_utils::{mock_transport, FakeDaemon},
        SessionConfig,
    };

    #[tokio::test]
    async fn test_lists_calc() {
        let (transport, events, _handle) = mock_transport(FakeDaemon::calc());
        let session = Session::open(transport, events, SessionConfig::default()).await;
        let console = Console::new(&StyleConfig::default(), false, false);

        let mut out = Vec::new();
        show_apis(&session, &console, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "calc  Calculator  [warning]\n    add  adds numbers\n");
    }
}
