//! syncmqtt - publish to an MQTT broker with blocking connect/publish/disconnect

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use syncmqtt::blocking::BlockingClient;
use syncmqtt::config::{ClientConfig, ConfigError};
use syncmqtt::engine::RumqttEngine;
use syncmqtt::error::{errno, SessionError, SessionResult};
use syncmqtt::identity::ClientIdentity;
use syncmqtt::observability::init_default_logging;
use tracing::{error, info, warn};

/// Config file looked up when `--config` is not given
const DEFAULT_CONFIG_PATH: &str = "syncmqtt.toml";

#[derive(Parser)]
#[command(name = "syncmqtt")]
#[command(about = "Blocking MQTT publisher over an event-driven client")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, publish one message, disconnect
    Publish {
        /// Broker host (`host`, `host:port` or `mqtt://host:port`)
        #[arg(long, env = "SYNCMQTT_HOST")]
        host: Option<String>,
        #[arg(long, default_value = "time")]
        topic: String,
        /// Message payload; defaults to the current local time
        #[arg(long)]
        message: Option<String>,
        /// Repeat the cycle every N seconds until interrupted
        #[arg(long, value_name = "SECS")]
        every: Option<u64>,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    init_default_logging();

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Publish {
            host,
            topic,
            message,
            every,
        } => run_publish(&config, host, &topic, message.as_deref(), every),
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(path: Option<&Path>) -> Result<ClientConfig, ConfigError> {
    match path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            ClientConfig::load_from_file(path)
        }
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            info!("Loading configuration from: {}", DEFAULT_CONFIG_PATH);
            ClientConfig::load_from_file(Path::new(DEFAULT_CONFIG_PATH))
        }
        None => Ok(ClientConfig::default()),
    }
}

fn run_publish(
    config: &ClientConfig,
    host: Option<String>,
    topic: &str,
    message: Option<&str>,
    every: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let host = host
        .or_else(|| config.client.broker.clone())
        .ok_or("no broker host: pass --host or set client.broker")?;

    let source = config.identity_source().map_err(SessionError::from)?;
    let identity = ClientIdentity::from_source(source.as_ref()).map_err(SessionError::from)?;
    info!(client_id = %identity, "Using client identity");

    let client = BlockingClient::new(
        identity,
        Arc::new(RumqttEngine::new()),
        config.session_settings(),
    )?;

    loop {
        let result = publish_cycle(&client, &host, topic, message);
        match every {
            Some(secs) => {
                if let Err(e) = result {
                    warn!(code = e.code(), "Publish cycle failed: {}", e);
                }
                std::thread::sleep(Duration::from_secs(secs));
            }
            None => return Ok(result?),
        }
    }
}

/// One connect, publish, disconnect round
fn publish_cycle(
    client: &BlockingClient<RumqttEngine>,
    host: &str,
    topic: &str,
    message: Option<&str>,
) -> SessionResult<()> {
    client.connect(host)?;

    let payload = message
        .map(str::to_string)
        .unwrap_or_else(|| chrono::Local::now().to_rfc3339());
    let published = client.publish(topic, payload.as_bytes());
    if published.is_ok() {
        info!(topic, payload = %payload, "Published");
    }

    match client.disconnect() {
        Err(e) if e.code() != errno::ENOTCONN => {
            warn!(code = e.code(), "Disconnect failed: {}", e);
        }
        _ => {}
    }

    published
}

fn handle_config_command(
    config: &ClientConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
