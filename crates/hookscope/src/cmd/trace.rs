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

//! Trace command - select trace modes and stream the resulting events

use crate::console::Console;
use eyre::Result;
use hookscope_engine::{
    Classification, MonitorError, RenderDepths, Session, TraceMode, TraceTag, Transport,
};
use std::{fmt, future::Future, io::Write, str::FromStr};

/// Mode used when a selection names no mode
pub const DEFAULT_SELECTION_MODE: &str = "common";

/// One `<api-or-*>/<category>[=<mode>]` argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceSelection {
    /// Subscription slot
    pub tag: TraceTag,
    /// Requested mode, `no` to unsubscribe
    pub mode: TraceMode,
}

impl FromStr for TraceSelection {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (tag, mode) = s.split_once('=').unwrap_or((s, DEFAULT_SELECTION_MODE));
        Ok(Self { tag: tag.parse()?, mode: mode.parse()? })
    }
}

impl fmt::Display for TraceSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.tag, self.mode)
    }
}

/// Apply every selection in order
///
/// A rejected selection is reported on `out` and does not stop the ones
/// after it. Returns the number of selections that failed.
pub async fn apply_selections<T: Transport>(
    session: &mut Session<T>,
    selections: &[TraceSelection],
    console: &Console,
    out: &mut impl Write,
) -> Result<usize> {
    let mut failed = 0;
    for selection in selections {
        if let Err(e) = session.select_trace(selection.tag.clone(), selection.mode.clone()).await {
            failed += 1;
            writeln!(out, "{}", console.error(&format!("trace {selection}: {e}")))?;
        }
    }
    for tag in session.traces().drifted() {
        tracing::warn!(%tag, "Displayed trace mode differs from the daemon's");
    }
    Ok(failed)
}

/// Print trace events until `shutdown` resolves or the channel closes
///
/// Returns the number of trace events printed.
pub async fn stream_events<T: Transport>(
    session: &mut Session<T>,
    console: &Console,
    depths: RenderDepths,
    out: &mut impl Write,
    shutdown: impl Future<Output = ()>,
) -> Result<usize> {
    tokio::pin!(shutdown);
    let mut printed = 0;

    loop {
        let classification = tokio::select! {
            biased;
            _ = &mut shutdown => {
                tracing::info!("Stopping trace stream");
                break;
            }
            next = session.next_event() => match next {
                Some(classification) => classification,
                None => {
                    writeln!(out, "{}", console.error("connection closed"))?;
                    break;
                }
            },
        };

        match classification {
            Classification::Trace(event) => {
                write!(out, "{}", console.trace_event(&event, depths))?;
                printed += 1;
            }
            Classification::Unexpected(push) => {
                writeln!(out, "{}", console.error(&format!("unexpected event {}", push.event)))?;
            }
            Classification::Malformed(reason) => {
                writeln!(out, "{}", console.error(&format!("malformed trace event: {reason}")))?;
            }
            Classification::Suppressed(_) => {}
        }
        out.flush()?;
    }

    Ok(printed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StyleConfig;
    use hookscope_engine::{
        test_utils::{mock_transport, trace_push, FakeDaemon},
        PushEvent, SessionConfig,
    };
    use serde_json::json;

    fn console() -> Console {
        Console::new(&StyleConfig::default(), false, false)
    }

    #[test]
    fn test_parse_selection() {
        let selection: TraceSelection = "calc/request=all".parse().unwrap();
        assert_eq!(selection.to_string(), "calc/request=all");

        let defaulted: TraceSelection = "*/event".parse().unwrap();
        assert_eq!(defaulted.mode.as_str(), DEFAULT_SELECTION_MODE);

        assert!(matches!(
            "calc/bogus=all".parse::<TraceSelection>(),
            Err(MonitorError::InvalidTag(_))
        ));
        assert!(matches!(
            "calc/request=Loud".parse::<TraceSelection>(),
            Err(MonitorError::InvalidMode(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_selection_does_not_stop_others() {
        let (transport, events, handle) = mock_transport(FakeDaemon::calc());
        let mut session = Session::open(transport, events, SessionConfig::default()).await;
        let selections: Vec<TraceSelection> = ["calc/request=common", "calc/event=extra"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();

        handle.daemon().set_failing("monitor/trace");
        let mut out = Vec::new();
        let failed = apply_selections(&mut session, &selections, &console(), &mut out)
            .await
            .unwrap();
        assert_eq!(failed, 2);
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 2);

        handle.daemon().recover("monitor/trace");
        let failed = apply_selections(&mut session, &selections, &console(), &mut Vec::new())
            .await
            .unwrap();
        // displayed modes kept the first selection, so nothing is resent
        assert_eq!(failed, 0);
        assert!(handle.daemon().trace_tags().is_empty());
    }

    #[tokio::test]
    async fn test_stream_until_closed() {
        let (transport, events, handle) = mock_transport(FakeDaemon::calc());
        let mut session = Session::open(transport, events, SessionConfig::default()).await;

        handle.push(trace_push(json!({
            "time": "1.000002",
            "request": {"index": 1, "api": "calc", "verb": "add", "action": "begin"}
        })));
        handle.push(trace_push(json!({
            "time": "1.000003",
            "service": {"api": "monitor", "action": "call"}
        })));
        handle.push(PushEvent::from_message("calc/overflow".to_string(), json!(null)));
        handle.close();

        let mut out = Vec::new();
        let printed = stream_events(
            &mut session,
            &console(),
            RenderDepths::default(),
            &mut out,
            std::future::pending(),
        )
        .await
        .unwrap();

        assert_eq!(printed, 1);
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("1.000002 request  calc/add  [1] begin\n"));
        assert!(text.contains("unexpected event calc/overflow\n"));
        assert!(text.ends_with("connection closed\n"));
    }

    #[tokio::test]
    async fn test_stream_stops_on_shutdown() {
        let (transport, events, _handle) = mock_transport(FakeDaemon::calc());
        let mut session = Session::open(transport, events, SessionConfig::default()).await;

        let printed = stream_events(
            &mut session,
            &console(),
            RenderDepths::default(),
            &mut Vec::new(),
            async {},
        )
        .await
        .unwrap();
        assert_eq!(printed, 0);
    }
}
