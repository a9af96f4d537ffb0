mod cli;
mod config;
mod render;
mod terminal;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::broadcast::error::TryRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use talkdata_api::{http_client, HttpAgentTransport, HttpStatementExecutor};
use talkdata_core::config::{load_dotenv, Config};
use talkdata_runtime::{AgentSession, AgentSettings, AgentState, TurnOutcome};

use crate::cli::CliArgs;
use crate::config::CliConfig;
use crate::render::TranscriptPrinter;
use crate::terminal::Terminal;

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    let cli_config = CliConfig::load(args.config.as_deref())
        .context("failed to load configuration")?;
    let terminal = Terminal::new(cli_config.show_tool_results);

    let config = match &args.profile {
        Some(profile) => Config::for_profile(profile),
        None => Config::from_env(),
    };
    config.validate().context("invalid service configuration")?;
    config.log_summary();

    let model = cli_config.resolve_model(args.model.as_deref(), &config.agent.model);
    let mut settings = AgentSettings::from_config(&config).with_model(model);
    if args.no_tools {
        settings = settings.with_tools(Vec::new());
    }

    let client = http_client(&config).context("failed to build HTTP client")?;
    let session = AgentSession::new(
        Arc::new(HttpAgentTransport::from_config(client.clone(), &config)),
        Arc::new(HttpStatementExecutor::from_config(client, &config)),
        settings,
    );

    terminal.print_banner(config.profile_label(), &session.settings().model)?;

    let mut snapshots = session.subscribe();
    let mut notices = session.notices();
    let mut printer = TranscriptPrinter::new();
    let mut last_state = AgentState::Idle;

    loop {
        let input = match terminal.read_input()? {
            Some(text) => text,
            None => {
                terminal.print_info("Goodbye.")?;
                break;
            }
        };

        if input.is_empty() {
            continue;
        }
        if input == "/config" {
            let summary = serde_json::to_string_pretty(&config.redacted_summary())?;
            terminal.print_info(&summary)?;
            continue;
        }

        let cancel = CancellationToken::new();
        let turn = session.start_turn(&input, &cancel);
        tokio::pin!(turn);

        // Render while the turn runs; Ctrl+C cancels only this turn.
        let result = loop {
            tokio::select! {
                result = &mut turn => break result,
                Ok(()) = snapshots.changed() => {
                    let snapshot = snapshots.borrow_and_update().clone();
                    for piece in printer.diff(snapshot.transcript.messages()) {
                        terminal.print_piece(&piece)?;
                    }
                    if cli_config.show_state_changes && snapshot.state != last_state {
                        terminal.print_state(snapshot.state)?;
                    }
                    last_state = snapshot.state;
                }
                Ok(notice) = notices.recv() => terminal.print_notice(&notice)?,
                Ok(()) = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                    info!("Cancelling turn");
                    cancel.cancel();
                }
            }
        };

        // Flush whatever arrived after the last render.
        for piece in printer.diff(session.snapshot().transcript.messages()) {
            terminal.print_piece(&piece)?;
        }
        loop {
            match notices.try_recv() {
                Ok(notice) => terminal.print_notice(&notice)?,
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        last_state = AgentState::Idle;

        match result {
            Ok(TurnOutcome::Cancelled) => terminal.print_info("\n[cancelled]")?,
            Ok(_) => terminal.print_info("")?,
            Err(e) => {
                error!(error = %e, "Turn failed");
                terminal.print_error(&format!("{:#}", e))?;
            }
        }
    }

    Ok(())
}
