//! Medic CLI: API server with background poller, or a one-shot triage run.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use medic::config::AppConfig;
use medic::github::{GitHubClient, RepoRef};
use medic::llm::ChatCompletionsClient;
use medic::monitor::{github_host_factory, Monitor};
use medic::server::{run_server, AppState};
use medic::store::Store;
use medic::triage::{TerminalStatus, TriageMachine};

/// GitHub Actions failure monitor - triages failed runs and commits fixes or opens issues
#[derive(Parser)]
#[command(name = "medic")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON configuration file
    #[arg(long, env = "MEDIC_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging for medic
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Default, ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API and the repository poller
    Server {
        /// Bind address (overrides config)
        #[arg(long, env = "MEDIC_ADDR")]
        addr: Option<String>,

        /// SQLite database path (overrides config)
        #[arg(long, env = "MEDIC_DB")]
        db: Option<PathBuf>,

        /// Poll interval in seconds (overrides config)
        #[arg(long)]
        poll_interval: Option<u64>,

        /// Disable the background poller
        #[arg(long)]
        no_poll: bool,
    },

    /// Triage one repository and print the terminal record as JSON
    Triage {
        /// Repository URL (e.g. https://github.com/owner/repo)
        repo_url: String,

        /// GitHub token for the repository
        #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let default_filter = if verbose { "info,medic=debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

fn text_generator(config: &AppConfig) -> Result<ChatCompletionsClient> {
    ChatCompletionsClient::from_env(
        &config.llm.api_key_env,
        &config.llm.api_url,
        &config.llm.model,
        config.llm.timeout(),
    )
    .context("Failed to configure text-generation client")
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    let mut config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Server {
            addr,
            db,
            poll_interval,
            no_poll,
        } => {
            if let Some(addr) = addr {
                config.server.addr = addr;
            }
            if let Some(db) = db {
                config.store.path = db;
            }
            if let Some(secs) = poll_interval {
                config.monitor.poll_interval_secs = secs;
            }
            if no_poll {
                config.monitor.poll_enabled = false;
            }
            config.validate().context("Invalid server options")?;
            run_service(config).await
        }
        Commands::Triage { repo_url, token } => run_triage(&config, &repo_url, token).await,
    }
}

async fn run_service(config: AppConfig) -> Result<()> {
    info!("Starting Medic v{}", env!("CARGO_PKG_VERSION"));

    let store = Store::open(&config.store.path).with_context(|| {
        format!("Failed to open database {}", config.store.path.display())
    })?;
    let generator = text_generator(&config)?;
    info!(model = generator.model(), "Text generation configured");

    let monitor = Monitor::new(
        Arc::new(store),
        Arc::new(generator),
        github_host_factory(config.github.api_url.clone()),
        &config,
    );

    let poller = config.monitor.poll_enabled.then(|| {
        tokio::spawn(
            monitor
                .clone()
                .run_poller(config.monitor.poll_interval()),
        )
    });

    run_server(AppState { monitor }, &config.server.addr, shutdown_signal()).await?;

    if let Some(handle) = poller {
        handle.abort();
    }
    info!("Medic stopped");
    Ok(())
}

async fn run_triage(config: &AppConfig, repo_url: &str, token: Option<String>) -> Result<()> {
    let repo = RepoRef::from_url(repo_url)?;
    let host = GitHubClient::with_base_url(&config.github.api_url, token.as_deref().unwrap_or(""))
        .context("Failed to create GitHub client")?;
    let generator = text_generator(config)?;
    let options = config.triage.options();

    let machine = TriageMachine::new(&host, &generator, &options);
    let record = tokio::time::timeout(config.triage.run_timeout(), machine.run(repo.clone()))
        .await
        .unwrap_or_else(|_| {
            medic::TriageRecord::error(format!(
                "Triage timed out after {}s",
                config.triage.run_timeout_secs
            ))
        });

    let status = match record.status {
        TerminalStatus::Success => "success".green(),
        TerminalStatus::Failure => "failure".yellow(),
        TerminalStatus::Error => "error".red(),
    };
    eprintln!("{} {repo}: {status}", "medic".bold());
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
