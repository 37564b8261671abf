//! jarvis-relay main binary.
//!
//! Relays a command to a chat-completion provider behind a fixed persona and
//! pushes the reply to the operator's phone.

mod config;
mod relay;
mod routes;
mod server;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Debug, Parser)]
#[command(name = "jarvis-relay", version, about = "J.A.R.V.I.S. LLM command relay")]
struct Cli {
    /// Path to the TOML config (default: ./jarvis-relay.toml, optional).
    #[arg(long, global = true, env = "JARVIS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the HTTP relay (default).
    Serve,
    /// Validate config and report provider and notification readiness.
    Doctor,
    /// Relay a single command and print the reply.
    Ask { command: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv_path = dotenvy::dotenv().ok();
    init_tracing()?;
    install_panic_hook();
    if let Some(path) = dotenv_path {
        tracing::info!(path = %path.display(), "loaded environment from .env");
    }

    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => server::serve(cli.config).await,
        Command::Doctor => server::doctor(cli.config).await,
        Command::Ask { command } => {
            let reply = server::ask_one_shot(cli.config, &command).await?;
            println!("{reply}");
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl LogFormat {
    /// Defaults to JSON, which is what the hosted log collector ingests.
    fn from_env_value(value: Option<&str>) -> anyhow::Result<Self> {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("json") => Ok(Self::Json),
            Some("pretty") => Ok(Self::Pretty),
            Some("compact") => Ok(Self::Compact),
            Some(other) => Err(anyhow::anyhow!(
                "unsupported JARVIS_LOG_FORMAT={other:?}; expected one of: json, pretty, compact"
            )),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Pretty => "pretty",
            Self::Compact => "compact",
        }
    }
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(v) => v,
        Err(_) => EnvFilter::new(
            "info,jarvis_relay=debug,relay_llm=debug,relay_notify=debug,tower_http=info",
        ),
    };
    let log_format = LogFormat::from_env_value(std::env::var("JARVIS_LOG_FORMAT").ok().as_deref())?;

    match log_format {
        // Request spans carry `request_id`, so every event inside a request,
        // panics included, is tagged with it.
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_span_events(FmtSpan::CLOSE)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(true)
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_span_events(FmtSpan::CLOSE)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .pretty()
                .init();
        }
        // One line per event for a terminal next to `jarvis-relay ask`; source
        // locations and span-close events would double its width.
        LogFormat::Compact => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .compact()
                .init();
        }
    }

    tracing::info!(
        log_format = log_format.as_str(),
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
        let thread = std::thread::current();
        tracing::error!(
            panic_thread = thread.name().unwrap_or("unnamed"),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_to_serve_without_subcommand() {
        let cli = Cli::try_parse_from(["jarvis-relay"]).expect("parse");
        assert!(cli.command.is_none());
    }

    #[test]
    fn cli_parses_ask_with_global_config() {
        let cli = Cli::try_parse_from(["jarvis-relay", "ask", "accendi le luci", "--config", "r.toml"])
            .expect("parse");
        assert_eq!(cli.config, Some(PathBuf::from("r.toml")));
        match cli.command {
            Some(Command::Ask { command }) => assert_eq!(command, "accendi le luci"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn log_format_defaults_to_json_and_rejects_unknown_values() {
        assert_eq!(LogFormat::from_env_value(None).expect("default"), LogFormat::Json);
        assert_eq!(
            LogFormat::from_env_value(Some(" Compact ")).expect("compact"),
            LogFormat::Compact
        );
        assert_eq!(
            LogFormat::from_env_value(Some("PRETTY")).expect("pretty"),
            LogFormat::Pretty
        );
        let err = LogFormat::from_env_value(Some("xml")).expect_err("unknown format");
        assert!(err.to_string().contains("JARVIS_LOG_FORMAT"));
    }

    #[test]
    fn panic_payload_handles_str_and_string() {
        let s: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_payload_to_string(s.as_ref()), "boom");
        let s: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_payload_to_string(s.as_ref()), "bang");
        let s: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        assert_eq!(panic_payload_to_string(s.as_ref()), "non-string panic payload");
    }
}
