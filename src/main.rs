//! Edgelink - main entry point
//!
//! Loads the configuration snapshot, wires the periodic events and message
//! handlers, and hands control to the agent run loop.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use rumqttc::v5::mqttbytes::QoS;
use tracing::{debug, error, info, warn};

use edgelink::config::EdgeConfig;
use edgelink::error::HandlerError;
use edgelink::observability::init_default_logging;
use edgelink::session::connection::effective_client_id;
use edgelink::EdgeAgent;

/// Edge-device MQTT session client
#[derive(Parser)]
#[command(name = "edgelink")]
#[command(about = "Edge-device MQTT session client")]
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
    /// Run the agent
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("starting edgelink v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_agent(config).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("command failed: {}", e);
        process::exit(1);
    }

    info!("shutdown complete");
}

fn load_configuration(config_path: &Option<PathBuf>) -> Result<EdgeConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("loading configuration from: {}", path.display());
            Ok(EdgeConfig::load_from_file(path)?)
        }
        None => {
            let default_paths = ["edgelink.toml", "config/edgelink.toml"];

            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("loading configuration from: {}", path.display());
                    return Ok(EdgeConfig::load_from_file(&path)?);
                }
            }

            Err("no configuration file found; provide one with -c/--config or create edgelink.toml".into())
        }
    }
}

async fn run_agent(config: EdgeConfig) -> Result<(), Box<dyn std::error::Error>> {
    let device_id = effective_client_id(&config);
    let mut agent = EdgeAgent::new(config.clone())?;
    let session = agent.session();

    // Periodic heartbeat: a small JSON status published to the device's
    // heartbeat topic. Only scheduled when an interval is configured.
    let heartbeat_topic = format!("devices/{device_id}/heartbeat");
    let heartbeat_session = session.clone();
    let heartbeat_device = device_id.clone();
    agent.register_periodic_task(
        "heartbeat",
        config.events.heartbeat_interval_ms.map(Duration::from_millis),
        Arc::new(move || {
            let session = heartbeat_session.clone();
            let topic = heartbeat_topic.clone();
            let device = heartbeat_device.clone();
            Box::pin(async move {
                let payload = serde_json::json!({
                    "device": device,
                    "sent_at": chrono::Utc::now().to_rfc3339(),
                })
                .to_string();
                session
                    .publish(&topic, payload, QoS::AtMostOnce, false)
                    .await
                    .map_err(|e| HandlerError::msg(e.to_string()))?;
                Ok(())
            })
        }),
    );

    agent.register_periodic_task(
        "data-recovery",
        config.events.recovery_interval_ms.map(Duration::from_millis),
        Arc::new(|| {
            Box::pin(async {
                debug!("data recovery pass");
                Ok(())
            })
        }),
    );

    // Command handling for this device, plus a catch-all for anything else
    // the broker delivers.
    let command_filter = format!("devices/{device_id}/cmd/#");
    agent.register_topic_handler(
        &command_filter,
        Arc::new(|msg| {
            Box::pin(async move {
                info!(
                    topic = %msg.topic,
                    "command received: {}",
                    String::from_utf8_lossy(&msg.payload)
                );
                Ok(())
            })
        }),
    )?;
    agent.register_fallback_handler(Arc::new(|msg| {
        Box::pin(async move {
            debug!(topic = %msg.topic, bytes = msg.payload.len(), "unhandled message");
            Ok(())
        })
    }));

    agent.register_connect_handler(|| info!("broker session established"));
    agent.register_disconnect_handler(|| warn!("broker session lost"));

    // Recorded in the registry now, applied by the replay once the broker
    // acknowledges the session.
    if let Err(err) = session.subscribe(&command_filter, QoS::AtLeastOnce).await {
        debug!(code = %err.code, "command subscription deferred: {}", err.detail);
    }

    agent.run().await?;
    Ok(())
}

fn handle_config_command(config: EdgeConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("{}", toml::to_string_pretty(&config)?);
    }

    info!("configuration validation complete");
    Ok(())
}
