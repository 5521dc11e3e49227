//! Main entry point for the Peril game server
//!
//! Declares the exchanges, records every player's game logs, serves health
//! and metrics endpoints, and broadcasts pause/resume from an operator REPL.

use anyhow::{Context, Result};
use clap::Parser;
use peril::config::AppConfig;
use peril::metrics::{HealthServer, HealthServerConfig, MetricsCollector};
use peril::pubsub::{AmqpConnection, Broker, Publisher, Subscriber, Topology};
use peril::server::{subscribe_game_logs, GameLogWriter, GameServer, ServerCommand, SERVER_HELP};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info};

/// Peril game server
#[derive(Parser)]
#[command(
    name = "peril",
    version,
    about = "Game server for Peril: pause/resume broadcasts and the game log"
)]
struct Args {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Log level override
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// AMQP URL override
    #[arg(long, value_name = "URL", help = "Override AMQP connection URL")]
    amqp_url: Option<String>,

    /// Metrics port override
    #[arg(long, value_name = "PORT", help = "Override metrics server port")]
    metrics_port: Option<u16>,

    /// Game log file override
    #[arg(long, value_name = "FILE", help = "Override the game log file")]
    game_log: Option<PathBuf>,

    /// Enable debug mode
    #[arg(short, long, help = "Enable debug mode with verbose logging")]
    debug: bool,

    /// Dry run mode (validate config and exit)
    #[arg(long, help = "Validate configuration and exit without starting the server")]
    dry_run: bool,
}

/// Initialize structured logging with the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Load and merge configuration from file or environment and CLI arguments
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(config_path) => AppConfig::from_file(config_path)?,
        None => AppConfig::from_env()?,
    };

    // Apply CLI overrides
    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }
    if args.debug {
        config.service.log_level = "debug".to_string();
    }
    if let Some(amqp_url) = &args.amqp_url {
        config.amqp.url = amqp_url.clone();
    }
    if let Some(metrics_port) = args.metrics_port {
        config.service.metrics_port = metrics_port;
    }
    if let Some(game_log) = &args.game_log {
        config.service.game_log_path = game_log.clone();
    }

    peril::config::validate_config(&config)?;
    Ok(config)
}

fn display_startup_banner(config: &AppConfig) {
    info!("Peril server");
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   Metrics port: {}", config.service.metrics_port);
    info!("   Game log: {}", config.service.game_log_path.display());
    info!(
        "   Exchanges: {}, {}, {}",
        config.routing.direct_exchange,
        config.routing.topic_exchange,
        config.routing.dead_letter_exchange
    );
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

/// Read operator commands until `quit`, end of input or Ctrl+C
async fn run_repl<C: peril::pubsub::BrokerChannel>(server: &GameServer<C>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        prompt();
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read input")?,
            _ = signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C) signal");
                return Ok(());
            }
        };
        let Some(line) = line else {
            return Ok(());
        };

        match ServerCommand::parse(&line) {
            Ok(None) => {}
            Ok(Some(ServerCommand::Quit)) => {
                println!("Quitting server...");
                return Ok(());
            }
            Ok(Some(command)) => match server.execute(command).await {
                Ok(output) => println!("{}", output),
                Err(e) => println!("Error: {}", e),
            },
            Err(e) => println!("{}", e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Configuration error: {:#}", e);
        std::process::exit(1);
    });

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    display_startup_banner(&config);
    if args.dry_run {
        info!("Dry run completed - exiting without starting the server");
        return Ok(());
    }

    let metrics = Arc::new(MetricsCollector::new()?);
    let health = Arc::new(HealthServer::new(
        HealthServerConfig {
            port: config.service.metrics_port,
            ..HealthServerConfig::default()
        },
        metrics.clone(),
    ));
    let health_task = {
        let health = health.clone();
        tokio::spawn(async move {
            if let Err(e) = health.start().await {
                error!("Health server failed: {:#}", e);
            }
        })
    };

    let connection = Arc::new(
        AmqpConnection::new(config.amqp_config()?)
            .await
            .context("Failed to connect to AMQP")?,
    );
    let topology = Topology::new(&config.routing.dead_letter_exchange);
    let channel = connection.open_channel().await?;
    config
        .routing
        .declare_exchanges(&topology, &channel)
        .await
        .context("Failed to declare exchanges")?;

    let subscriber = Subscriber::new(connection.clone(), topology)
        .with_prefetch(config.amqp.prefetch_count)
        .with_metrics(metrics.clone());
    let game_logs = subscribe_game_logs(
        &subscriber,
        &config.routing,
        GameLogWriter::new(&config.service.game_log_path),
    )
    .await
    .context("Failed to subscribe to game logs")?;
    info!("Consuming game logs from '{}'", game_logs.queue().name());
    health.readiness().store(true, Ordering::Relaxed);

    let server = GameServer::new(
        Publisher::new(channel).with_metrics(metrics),
        config.routing.clone(),
    );

    println!("{}", SERVER_HELP);
    run_repl(&server).await?;

    info!("Shutting down...");
    health.stop();
    let _ = health_task.await;
    if let Err(e) = connection.close().await {
        error!("{}", e);
    }
    info!("Peril server stopped");
    Ok(())
}
