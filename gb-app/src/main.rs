//! grumpybot main binary.
//!
//! Relays Slack threads that mention the bot to an OpenAI-compatible model and posts the
//! answer back into the thread.

mod commands;
mod completion;
mod config;
mod gateway;
mod relay;
mod server;

use clap::{Parser, Subcommand};
use config::{CliOverrides, GrumpyConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Debug, Parser)]
#[command(name = "grumpybot", version, about = "Slack thread relay to a grumpy LLM")]
struct Cli {
    /// Path to a TOML config file. Defaults to ~/.grumpybot/config.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Slack App-Level Token (must start with xapp-).
    #[arg(long, global = true)]
    app_token: Option<String>,

    /// Slack Bot User OAuth Token (must start with xoxb-).
    #[arg(long, global = true)]
    bot_token: Option<String>,

    /// Bot user ID on Slack. Resolved through auth.test when omitted.
    #[arg(long, global = true)]
    bot_id: Option<String>,

    /// Model to request from the completion backend.
    #[arg(long, global = true)]
    openai_model: Option<String>,

    /// Base URL of the OpenAI-compatible API.
    #[arg(long, global = true)]
    openai_url: Option<String>,

    /// API token for the completion backend.
    #[arg(long, global = true)]
    openai_token: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            app_token: self.app_token.clone(),
            bot_token: self.bot_token.clone(),
            bot_id: self.bot_id.clone(),
            openai_model: self.openai_model.clone(),
            openai_url: self.openai_url.clone(),
            openai_token: self.openai_token.clone(),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Connect to Slack and relay mentioned threads (default).
    Serve,
    /// Ask the configured model one question with the bot persona and print the answer.
    Ask { question: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("grumpybot: failed to load .env: {e}");
        }
    }
    init_tracing()?;
    install_panic_hook();

    let cli = Cli::parse();
    let cfg = GrumpyConfig::load(cli.config.clone(), &cli.overrides()).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => server::serve(cfg).await,
        Command::Ask { question } => {
            let answer = server::ask(cfg, &question).await?;
            println!("{answer}");
            Ok(())
        }
    }
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(v) => v,
        Err(_) => EnvFilter::new(
            "info,grumpybot=debug,gb_app=debug,gb_channels=debug,gb_llm=debug",
        ),
    };
    let log_format = std::env::var("GRUMPYBOT_LOG_FORMAT")
        .unwrap_or_else(|_| "json".to_string())
        .to_ascii_lowercase();

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_span_events(FmtSpan::CLOSE)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .init();
        }
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .pretty()
                .init();
        }
        "compact" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .compact()
                .init();
        }
        other => {
            return Err(anyhow::anyhow!(
                "unsupported GRUMPYBOT_LOG_FORMAT={other:?}; expected one of: json, pretty, compact"
            ));
        }
    }

    tracing::info!(
        log_format = %log_format,
        env_filter = ?std::env::var("RUST_LOG").ok(),
        "tracing initialized"
    );
    Ok(())
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = panic_payload_to_string(panic_info.payload());
        tracing::error!(
            panic_location = %location,
            panic_payload = %payload,
            "panic captured"
        );
        default_hook(panic_info);
    }));
}

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        return msg.to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}
