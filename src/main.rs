//! CLI for meterbus
//!
//! Subcommands:
//! - `broker`: serve the development broker over WebSocket
//! - `processor`: run the event processor until Ctrl-C
//! - `reading`: publish one meter reading
//! - `reset`: ask the processor to reset a user's billing

use std::error::Error;
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{error, info};

use meterbus::broker::Broker;
use meterbus::broker::server::start_websocket_server;
use meterbus::client::{Publisher, StatusReport, Subscriber};
use meterbus::config::{Settings, load_config};
use meterbus::notify::TracingBroadcaster;
use meterbus::persistence::SledReadingStore;
use meterbus::processor::{EventProcessor, ProcessorOptions};
use meterbus::transport::{ConnectionOptions, TransportConnection, WebSocketConnector};
use meterbus::utils::logging;

#[derive(Parser)]
#[command(name = "meterbus", about = "Smart-meter telemetry over pub/sub")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the development broker
    Broker,
    /// Store readings and publish billing snapshots until Ctrl-C
    Processor,
    /// Publish one meter reading
    Reading {
        /// Meter client id, also used as the user id
        #[arg(long)]
        client_id: String,
        /// Consumption in kWh
        #[arg(long)]
        value: f64,
        /// Also publish a retained online status for the client
        #[arg(long)]
        announce: bool,
    },
    /// Reset a user's readings and billing
    Reset {
        #[arg(long)]
        user_id: String,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {}", e);
            return;
        }
    };
    logging::init(&settings.logging.level);

    let result = match cli.command {
        Command::Broker => run_broker(&settings).await,
        Command::Processor => run_processor(&settings).await,
        Command::Reading {
            client_id,
            value,
            announce,
        } => publish_reading(&settings, &client_id, value, announce).await,
        Command::Reset { user_id } => publish_reset(&settings, &user_id).await,
    };

    if let Err(e) = result {
        error!("meterbus failed: {}", e);
    }
}

fn connection(settings: &Settings, role: &str) -> Arc<TransportConnection> {
    Arc::new(TransportConnection::new(
        Arc::new(WebSocketConnector::new(&settings.transport.url)),
        ConnectionOptions::from_settings(&settings.transport, role),
    ))
}

async fn run_broker(settings: &Settings) -> Result<(), Box<dyn Error>> {
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let broker = Arc::new(Mutex::new(Broker::new()));

    tokio::select! {
        result = start_websocket_server(&addr, broker) => {
            result?;
            error!("WebSocket server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    Ok(())
}

async fn run_processor(settings: &Settings) -> Result<(), Box<dyn Error>> {
    let store = SledReadingStore::open(&settings.storage.path)?;
    let processor = EventProcessor::new(
        Arc::new(store.clone()),
        Publisher::new(connection(settings, "processor-pub")),
        Subscriber::new(connection(settings, "processor-sub")),
        ProcessorOptions::from_settings(settings),
    )
    .with_broadcaster(Arc::new(TracingBroadcaster));

    processor.start().await?;
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Stopping processor.");

    processor.stop().await;
    store.flush().await?;
    Ok(())
}

async fn publish_reading(
    settings: &Settings,
    client_id: &str,
    value: f64,
    announce: bool,
) -> Result<(), Box<dyn Error>> {
    let publisher = Publisher::new(connection(settings, "meter"));

    if announce {
        publisher
            .publish_status(&settings.topics, &StatusReport::online(client_id))
            .await?;
    }

    let topic = settings.topics.reading_topic(client_id);
    let reading = json!({
        "ClientId": client_id,
        "Value": value,
        "Timestamp": chrono::Utc::now(),
    });
    publisher.publish(&topic, &reading, false).await?;
    info!(topic = %topic, value, "reading published");

    publisher.connection().stop().await;
    Ok(())
}

async fn publish_reset(settings: &Settings, user_id: &str) -> Result<(), Box<dyn Error>> {
    let publisher = Publisher::new(connection(settings, "billing-admin"));
    let topic = settings.topics.billing_reset_topic(user_id);

    publisher.publish(&topic, &json!({ "UserId": user_id }), false).await?;
    info!(topic = %topic, "reset requested");

    publisher.connection().stop().await;
    Ok(())
}
