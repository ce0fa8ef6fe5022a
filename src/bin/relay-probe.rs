//! Probe binary for the relay connection.
//!
//! Usage:
//!   cargo run --bin relay-probe
//!
//! Connects with the account from the environment, subscribes to the
//! command and alert topics, and logs how every directive would be
//! translated. Nothing is acknowledged or published.

use log::{error, info, warn};
use tokio::sync::{mpsc, watch};

use voice_relay_bridge::config::Config;
use voice_relay_bridge::directive::InboundCommand;
use voice_relay_bridge::transport::{ConnectionStatus, MqttClient, MqttMessage, topics};

#[tokio::main]
async fn main() {
    voice_relay_bridge::config::load_dotenv();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting relay probe");

    let config = Config::from_env();
    let account = &config.account.username;
    info!(
        "Connecting to relay broker at {}:{} as {}",
        config.mqtt.broker_host,
        config.mqtt.port(),
        account
    );

    let mqtt_client = match MqttClient::new(&config.mqtt, account, &config.account.password) {
        Ok(client) => client,
        Err(e) => {
            error!("Unable to create MQTT client: {}", e);
            return;
        }
    };

    let subscriptions = vec![topics::command_filter(account), topics::message_filter(account)];
    let (msg_tx, mut msg_rx) = mpsc::channel::<MqttMessage>(100);
    let (status_tx, mut status_rx) = watch::channel(ConnectionStatus::Connecting);

    let mqtt_handle = tokio::spawn(async move {
        mqtt_client.run(msg_tx, status_tx, subscriptions).await;
    });

    let status_handle = tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let status = *status_rx.borrow();
            info!(">>> Connection {}", status);
        }
    });

    let relay_account = account.clone();
    let msg_handle = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            match topics::classify(&relay_account, &msg.topic) {
                topics::InboundTopic::Command { device } => {
                    probe(device.unwrap_or("?"), &msg.payload)
                }
                topics::InboundTopic::Message => info!(">>> Alert: {}", msg.payload),
                topics::InboundTopic::Unknown => warn!("Unexpected topic {}", msg.topic),
            }
        }
    });

    info!("Listening for directives... Press Ctrl+C to exit.");
    info!("Try asking your assistant to switch a linked device!");

    tokio::select! {
        _ = mqtt_handle => {
            warn!("MQTT event loop ended");
        }
        _ = msg_handle => {
            warn!("Message processor ended");
        }
        _ = status_handle => {
            warn!("Status watcher ended");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
        }
    }

    info!("Probe complete.");
}

fn probe(device: &str, payload: &str) {
    let command = match InboundCommand::parse(payload) {
        Ok(command) => command,
        Err(e) => {
            warn!("Unreadable directive for {}: {}", device, e);
            return;
        }
    };

    match command.translate() {
        Ok(translation) => info!(
            ">>> {} {} for {} -> {} {}",
            command.format(),
            command.vendor_command().unwrap_or("?"),
            device,
            translation.command,
            translation
                .payload
                .map(|p| p.to_string())
                .unwrap_or_default()
        ),
        Err(e) => warn!(
            ">>> {} directive for {} not supported: {}",
            command.format(),
            device,
            e
        ),
    }
}
