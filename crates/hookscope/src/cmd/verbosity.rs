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

//! Verbosity command - read or change verbosity levels

use crate::console::Console;
use eyre::{Context, Result};
use hookscope_engine::{Session, Transport, VerbosityLevel, VerbosityTarget};
use std::io::Write;

/// Print the confirmed levels
pub fn show_verbosity<T: Transport>(
    session: &Session<T>,
    console: &Console,
    out: &mut impl Write,
) -> Result<()> {
    write!(out, "{}", console.verbosity(session.verbosity()))?;
    Ok(())
}

/// Set a level, then print the levels the daemon reports back
pub async fn set_verbosity<T: Transport>(
    session: &mut Session<T>,
    target: VerbosityTarget,
    level: VerbosityLevel,
    console: &Console,
    out: &mut impl Write,
) -> Result<()> {
    tracing::info!(%target, %level, "Setting verbosity");
    session
        .set_verbosity(target.clone(), level)
        .await
        .wrap_err_with(|| format!("Failed to set verbosity of {target} to {level}"))?;
    show_verbosity(session, console, out)
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
    async fn test_set_prints_confirmed_levels() {
        let (transport, events, _handle) = mock_transport(FakeDaemon::calc());
        let mut session = Session::open(transport, events, SessionConfig::default()).await;
        let console = Console::new(&StyleConfig::default(), false, false);

        let mut out = Vec::new();
        let target = VerbosityTarget::Api("calc".to_string());
        set_verbosity(&mut session, target, VerbosityLevel::Debug, &console, &mut out)
            .await
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().map(|l| l.split_whitespace().collect::<Vec<_>>()).collect();
        assert_eq!(lines, [vec!["(daemon)", "warning"], vec!["calc", "debug"]]);
    }

    #[tokio::test]
    async fn test_rejected_set_is_reported() {
        let (transport, events, _handle) = mock_transport(FakeDaemon::calc().failing("monitor/set"));
        let mut session = Session::open(transport, events, SessionConfig::default()).await;
        let console = Console::new(&StyleConfig::default(), false, false);

        let err = set_verbosity(
            &mut session,
            VerbosityTarget::All,
            VerbosityLevel::Info,
            &console,
            &mut Vec::new(),
        )
        .await
        .unwrap_err();
        assert!(format!("{err:#}").contains("Failed to set verbosity of * to info"));
    }
}
