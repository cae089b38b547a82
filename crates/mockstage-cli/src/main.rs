use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use mockstage_core::{DefaultProviderFactory, InterviewEngine, SessionStore};
use mockstage_schema::{LlmConfig, ProviderKind};
use mockstage_server::state::AppState;

#[derive(Parser)]
#[command(name = "mockstage", version, about = "mockstage interview practice server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Start the HTTP API server")]
    Serve {
        #[arg(long, default_value = "127.0.0.1:8000", help = "Bind address")]
        addr: String,
        #[arg(
            long,
            default_value = "1800",
            help = "Evict sessions idle longer than this many seconds"
        )]
        session_ttl_secs: u64,
        #[arg(long, default_value = "60", help = "Idle session sweep interval in seconds")]
        sweep_interval_secs: u64,
    },
    #[command(about = "Check provider credentials with one minimal request")]
    TestConnection {
        #[arg(long, help = "Provider: anthropic, openai, gemini or ollama")]
        provider: String,
        #[arg(long, help = "Model identifier")]
        model: String,
        #[arg(long, help = "API key (cloud providers)")]
        api_key: Option<String>,
        #[arg(long, help = "Endpoint override (ollama)")]
        base_url: Option<String>,
    },
}

fn parse_provider(name: &str) -> Result<ProviderKind> {
    match name.to_ascii_lowercase().as_str() {
        "anthropic" => Ok(ProviderKind::Anthropic),
        "openai" => Ok(ProviderKind::OpenAi),
        "gemini" => Ok(ProviderKind::Gemini),
        "ollama" => Ok(ProviderKind::Ollama),
        other => bail!("unknown provider: {other}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    match command {
        Commands::Serve {
            addr,
            session_ttl_secs,
            sweep_interval_secs,
        } => {
            let store = Arc::new(SessionStore::new(chrono::Duration::seconds(
                session_ttl_secs as i64,
            )));
            let engine = Arc::new(InterviewEngine::new(
                store.clone(),
                Arc::new(DefaultProviderFactory),
            ));

            let sweep_store = store.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(sweep_interval_secs));
                loop {
                    interval.tick().await;
                    let removed = sweep_store.sweep();
                    if removed > 0 {
                        tracing::info!(removed, "swept idle sessions");
                    }
                }
            });

            mockstage_server::serve(AppState::new(engine), &addr).await
        }
        Commands::TestConnection {
            provider,
            model,
            api_key,
            base_url,
        } => {
            let config = LlmConfig {
                provider: parse_provider(&provider)?,
                api_key,
                model,
                base_url,
            };
            match mockstage_provider::test_connection(&config).await {
                Ok(()) => {
                    println!("ok: connected to {}", config.provider.as_str());
                    Ok(())
                }
                Err(e) => bail!("connection test failed: {e}"),
            }
        }
    }
}
