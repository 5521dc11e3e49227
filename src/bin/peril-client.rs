//! Peril player client
//!
//! Joins the game under a username, consumes pause broadcasts, army moves and
//! war recognitions, and runs the player REPL.

use anyhow::{Context, Result};
use clap::Parser;
use peril::client::{join_game, validate_username, ClientCommand, GameClient, CLIENT_HELP};
use peril::config::AppConfig;
use peril::game::{GameHandle, GameState};
use peril::pubsub::{AmqpConnection, Broker, BrokerChannel, Publisher, Subscriber, Topology};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::signal;
use tracing::{error, info};

/// Peril player client
#[derive(Parser)]
#[command(name = "peril-client", version, about = "Play Peril from the terminal")]
struct Args {
    /// Username to play as; asked for when missing
    #[arg(short, long)]
    username: Option<String>,

    /// Configuration file path (TOML format)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Override AMQP connection URL
    #[arg(long, value_name = "URL")]
    amqp_url: Option<String>,
}

fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::from_env()?,
    };
    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }
    if let Some(amqp_url) = &args.amqp_url {
        config.amqp.url = amqp_url.clone();
    }
    peril::config::validate_config(&config)?;
    Ok(config)
}

fn prompt(text: &str) {
    print!("{}", text);
    let _ = std::io::stdout().flush();
}

async fn ask_username(lines: &mut Lines<BufReader<Stdin>>) -> Result<String> {
    loop {
        prompt("Please enter your username: ");
        let line = lines
            .next_line()
            .await?
            .context("No username given")?;
        match validate_username(&line) {
            Ok(username) => return Ok(username),
            Err(e) => println!("{}", e),
        }
    }
}

async fn run_repl<C: BrokerChannel>(
    client: &GameClient<C>,
    lines: &mut Lines<BufReader<Stdin>>,
) -> Result<()> {
    loop {
        prompt("> ");
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

        match ClientCommand::parse(&line) {
            Ok(None) => {}
            Ok(Some(ClientCommand::Quit)) => {
                println!("Quitting client...");
                return Ok(());
            }
            Ok(Some(command)) => match client.execute(command).await {
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

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("Welcome to the Peril client!");
    let username = match &args.username {
        Some(name) => validate_username(name)?,
        None => ask_username(&mut lines).await?,
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

    let (game, game_task) = GameHandle::start(GameState::new(&username));
    let publisher = Publisher::new(channel);
    let subscriber =
        Subscriber::new(connection.clone(), topology).with_prefetch(config.amqp.prefetch_count);
    let _session = join_game(&subscriber, publisher.clone(), &config.routing, game.clone())
        .await
        .context("Failed to join the game")?;

    let client = GameClient::new(game, publisher, config.routing.clone());
    println!("{}", CLIENT_HELP);
    run_repl(&client, &mut lines).await?;

    if let Err(e) = connection.close().await {
        error!("{}", e);
    }
    game_task.abort();
    Ok(())
}
