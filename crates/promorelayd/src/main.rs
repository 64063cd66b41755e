//! promorelayd - change-notification relay for the promo directory
//!
//! # Usage
//!
//! ```bash
//! # Run the relay
//! promorelayd -c relay.yaml
//!
//! # Validate configuration
//! promorelayd -c relay.yaml validate
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use promorelayd::commands::CommandListener;
use promorelayd::config::RelayConfig;
use promorelayd::fanout::FanoutRunner;
use promorelayd::registry::{FileRegistry, SubscriberRegistry};
use promorelayd::shutdown::ShutdownController;
use promorelayd::source::KafkaChangeSource;
use promorelayd::telegram::TelegramClient;

#[derive(Parser)]
#[command(name = "promorelayd")]
#[command(version, about = "Change-notification relay for the promo directory")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "relay.yaml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay (default)
    Run,
    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = RelayConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Validate => validate(config),
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

fn validate(config: RelayConfig) -> Result<()> {
    println!("Configuration is valid");
    println!("  brokers:     {:?}", config.broker.brokers);
    println!("  group:       {}", config.broker.consumer_group);
    for (topic, table) in &config.topics {
        println!("  topic:       {topic} -> {table}");
    }
    println!("  registry:    {}", config.registry.path.display());
    Ok(())
}

async fn run(config: RelayConfig) -> Result<()> {
    let telegram = Arc::new(TelegramClient::new(&config.telegram)?);
    let registry: Arc<dyn SubscriberRegistry> =
        Arc::new(FileRegistry::new(&config.registry.path));

    let initial = registry
        .list()
        .await
        .context("Failed to read subscriber registry")?;
    info!(
        subscribers = initial.len(),
        brokers = ?config.broker.brokers,
        topics = config.topics.len(),
        "Starting promorelay"
    );

    // Startup connectivity is the only fatal failure class: if the
    // broker stays unreachable through the bounded retries, exit.
    let source = KafkaChangeSource::connect(&config)
        .await
        .context("Event source unreachable")?;

    let shutdown = ShutdownController::new();

    let runner = FanoutRunner::new(
        Box::new(source),
        registry.clone(),
        telegram.clone(),
        config.relay.clone(),
    );
    let fanout_task = tokio::spawn(runner.run(shutdown.subscribe()));

    let listener = CommandListener::new(
        telegram.clone(),
        registry.clone(),
        config.telegram.poll_timeout(),
    );
    let listener_task = tokio::spawn(listener.run(shutdown.subscribe()));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");
    shutdown.signal();

    for (name, task) in [("fan-out loop", fanout_task), ("command listener", listener_task)] {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(task = name, error = %e, "Task finished with error"),
            Err(e) => error!(task = name, error = %e, "Task panicked"),
        }
    }

    info!("promorelay stopped");
    Ok(())
}
