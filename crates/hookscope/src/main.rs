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

//! Hookscope - Live Trace Monitor for Binder Daemons
//!
//! Connects to a daemon's monitoring API to list its APIs, read and change
//! verbosity levels, and stream trace events.

use clap::{Parser, Subcommand};
use eyre::{Context, Result};
use hookscope_engine::{
    ConnectTarget, Monitor, Session, Transport, VerbosityLevel, VerbosityTarget, WsConnector,
};
use std::{
    io::{self, IsTerminal, Write},
    path::PathBuf,
};

mod cmd;
mod config;
mod console;

use cmd::TraceSelection;
use config::Config;
use console::Console;

/// Command-line interface for Hookscope
#[derive(Debug, Parser)]
#[command(name = "hookscope")]
#[command(about = "Hookscope - Live trace monitor for binder daemons")]
#[command(version)]
pub struct Cli {
    /// Daemon address as host:port
    #[arg(long, env = "HOOKSCOPE_HOST")]
    pub host: Option<String>,

    /// Access token passed to the daemon
    #[arg(long, env = "HOOKSCOPE_TOKEN")]
    pub token: Option<String>,

    /// Configuration file (default: ~/.hookscope.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Keep trace events generated by the monitoring API itself
    #[arg(long)]
    pub show_monitor_events: bool,

    /// Print the call and event log before exiting
    #[arg(long)]
    pub log: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List the APIs and operations of the daemon
    Apis,
    /// Read or change verbosity levels
    Verbosity {
        /// Verbosity action
        #[command(subcommand)]
        action: VerbosityAction,
    },
    /// Subscribe to traces and print events until interrupted
    Trace {
        /// Selections as <api-or-*>/<category>[=<mode>], e.g. calc/request=all
        #[arg(required = true)]
        selections: Vec<TraceSelection>,
    },
    /// Show the client session known to the daemon
    Session {
        /// Ask the daemon for a new token
        #[arg(long)]
        refresh_token: bool,
    },
}

/// Verbosity actions
#[derive(Debug, Subcommand)]
pub enum VerbosityAction {
    /// Print the current levels
    Get,
    /// Set the level of an API, of every API (*) or of the daemon (-)
    Set {
        /// API name, '*' or '-'
        target: VerbosityTarget,
        /// error, warning, notice, info, debug or a number
        level: VerbosityLevel,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    // stdout carries rendered output, so diagnostics go to a file
    match hookscope_common::logging::init_file_only_logging("hookscope") {
        Ok(path) => tracing::debug!("Logging to {}", path.display()),
        Err(e) => eprintln!("warning: logging disabled: {e}"),
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(host) = &cli.host {
        config.connection.host = host.clone();
    }
    if cli.token.is_some() {
        config.connection.token = cli.token.clone();
    }
    config.monitor.show_monitor_events |= cli.show_monitor_events;
    config.log.enabled |= cli.log;

    let console = Console::new(
        &config.style,
        io::stdout().is_terminal(),
        config.monitor.show_permissions,
    );
    let target = ConnectTarget::new(&config.connection.host, config.connection.token.clone());

    let mut monitor = Monitor::new(WsConnector, config.session_config());
    let session = monitor
        .connect(&target)
        .await
        .wrap_err_with(|| format!("Failed to connect to {target}"))?;
    tracing::info!("Connected to {}", session.url());

    let mut stdout = io::stdout().lock();
    let outcome = run(&cli.command, session, &config, &console, &mut stdout).await;

    if cli.log {
        if let Some(session) = monitor.session() {
            for entry in session.feed().entries() {
                write!(stdout, "{}", console.log_entry(entry))?;
            }
        }
    }

    tracing::info!("Shutting down Hookscope...");
    if let Err(e) = monitor.disconnect().await {
        tracing::error!("Failed to close the session cleanly: {e}");
    }

    outcome
}

/// Execute `command` on a connected session
async fn run<T: Transport>(
    command: &Commands,
    session: &mut Session<T>,
    config: &Config,
    console: &Console,
    out: &mut impl Write,
) -> Result<()> {
    match command {
        Commands::Apis => cmd::show_apis(session, console, out),
        Commands::Verbosity { action: VerbosityAction::Get } => {
            cmd::show_verbosity(session, console, out)
        }
        Commands::Verbosity { action: VerbosityAction::Set { target, level } } => {
            cmd::set_verbosity(session, target.clone(), *level, console, out).await
        }
        Commands::Session { refresh_token } => {
            cmd::show_session(session, *refresh_token, console, out).await
        }
        Commands::Trace { selections } => {
            let failed = cmd::apply_selections(session, selections, console, out).await?;
            if failed == selections.len() {
                eyre::bail!("No trace selection was accepted");
            }
            tracing::info!("Tracing. Press Ctrl+C to exit.");
            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("Failed to listen for Ctrl+C: {e}");
                    std::future::pending::<()>().await;
                }
            };
            let printed =
                cmd::stream_events(session, console, config.render_depths(), out, shutdown)
                    .await?;
            tracing::info!(printed, "Trace stream ended");
            Ok(())
        }
    }
}
