// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parley - conversational commerce assistant for small businesses.
//!
//! This is the binary entry point: the queue worker plus operator commands
//! for driving single interactions and clarification tickets.

mod app;
mod outbound;
mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use parley_config::ParleyConfig;
use parley_core::ParleyError;

use crate::app::App;

/// Parley - conversational commerce assistant.
#[derive(Parser, Debug)]
#[command(name = "parley", version, about, long_about = None)]
struct Cli {
    /// Load configuration from this file instead of the standard locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the queue worker until interrupted.
    Serve,
    /// Process one pending interaction immediately.
    Process {
        interaction_id: String,
    },
    /// Deliver a system event into the conversation of an interaction.
    Notify {
        interaction_id: String,
        /// Event name, for example `order_confirmed`.
        event: String,
        #[arg(long)]
        note: Option<String>,
    },
    /// Answer (or dismiss) an open clarification ticket.
    ResolveTicket {
        ticket_id: String,
        /// The seller's answer. Required unless `--dismiss` is given.
        answer: Option<String>,
        #[arg(long, conflicts_with = "answer")]
        dismiss: bool,
    },
    /// Inspect configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Validate the effective configuration.
    Check,
    /// Print the default configuration as TOML.
    Show,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Commands::Config {
        action: ConfigAction::Show,
    } = &cli.command
    {
        match parley_config::default_config_toml() {
            Ok(rendered) => print!("{rendered}"),
            Err(e) => {
                eprintln!("parley: failed to render default config: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    let loaded = match &cli.config {
        Some(path) => parley_config::load_and_validate_path(path),
        None => parley_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            parley_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    serve::init_tracing(&config.agent.log_level);

    if let Err(e) = run(cli.command, config).await {
        eprintln!("parley: {e}");
        std::process::exit(1);
    }
}

async fn run(command: Commands, config: ParleyConfig) -> Result<(), ParleyError> {
    match command {
        Commands::Serve => serve::run_serve(config).await,
        Commands::Process { interaction_id } => {
            let app = App::build(&config).await?;
            let outcome = app.processor.process_interaction(&interaction_id).await;
            app.close().await?;
            let outcome = outcome?;
            println!("{} {}", outcome.interaction_id, outcome.status);
            if let Some(reply) = &outcome.reply {
                println!("reply: {reply}");
            }
            if let Some(ticket) = &outcome.ticket_id {
                println!("ticket: {ticket}");
            }
            if let Some(order) = &outcome.order {
                println!("order: {}", order.reference);
            }
            Ok(())
        }
        Commands::Notify {
            interaction_id,
            event,
            note,
        } => {
            let app = App::build(&config).await?;
            let sent = app
                .processor
                .handle_system_notification(&interaction_id, &event, note.as_deref())
                .await;
            app.close().await?;
            println!("{}", sent?);
            Ok(())
        }
        Commands::ResolveTicket {
            ticket_id,
            answer,
            dismiss,
        } => {
            let app = App::build(&config).await?;
            let result = resolve_ticket(&app, &ticket_id, answer.as_deref(), dismiss).await;
            app.close().await?;
            result
        }
        Commands::Config {
            action: ConfigAction::Check,
        } => {
            println!(
                "parley: configuration valid (agent.name={}, database={})",
                config.agent.name, config.storage.database_path
            );
            Ok(())
        }
        Commands::Config {
            action: ConfigAction::Show,
        } => Ok(()),
    }
}

async fn resolve_ticket(
    app: &App,
    ticket_id: &str,
    answer: Option<&str>,
    dismiss: bool,
) -> Result<(), ParleyError> {
    if dismiss {
        app.processor.dismiss_ticket(ticket_id).await?;
        println!("ticket {ticket_id} dismissed");
        return Ok(());
    }
    let answer = answer.ok_or_else(|| {
        ParleyError::Validation("an answer is required unless --dismiss is given".into())
    })?;
    let resolution = app.processor.resolve_ticket(ticket_id, answer).await?;
    println!(
        "ticket {} resolved: {} learned, {} superseded, {} duplicate",
        resolution.ticket.id,
        resolution.taught.created.len(),
        resolution.taught.superseded.len(),
        resolution.taught.duplicates.len(),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_resolve_ticket_with_dismiss() {
        let cli = Cli::try_parse_from(["parley", "resolve-ticket", "t-1", "--dismiss"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::ResolveTicket { dismiss: true, answer: None, .. }
        ));
    }

    #[test]
    fn answer_and_dismiss_conflict() {
        let parsed = Cli::try_parse_from(["parley", "resolve-ticket", "t-1", "yes", "--dismiss"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn binary_loads_config_defaults() {
        let config = parley_config::load_and_validate_str("").expect("default config should be valid");
        assert_eq!(config.agent.name, ParleyConfig::default().agent.name);
    }
}
