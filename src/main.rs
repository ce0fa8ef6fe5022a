use clap::Parser;
use log::{debug, error, info, warn};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;

use voice_relay_bridge::admin;
use voice_relay_bridge::config::{self, Config, FlowConfig, NodeConfig};
use voice_relay_bridge::directory::DeviceDirectory;
use voice_relay_bridge::error::BridgeError;
use voice_relay_bridge::handlers::{AckHandler, CommandHandler, CommandMessage, ResponseMessage};
use voice_relay_bridge::registry::AccountRegistry;
use voice_relay_bridge::state::{StateInput, StateReporter};
use voice_relay_bridge::transport::{Publisher, RegisteredHandler, TransportSession};

/// Bridge between a voice-assistant cloud relay and local automation flows.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// JSON file declaring the command, state and response nodes.
    #[arg(long, env = "BRIDGE_FLOW")]
    flow: Option<PathBuf>,

    /// Address of the admin HTTP surface.
    #[arg(long, env = "ADMIN_BIND")]
    admin_bind: Option<String>,
}

/// Nodes that accept messages from the user flow.
enum FlowNode {
    State(StateReporter),
    Response(AckHandler),
}

/// One line on stdin.
#[derive(Debug, Deserialize)]
struct FlowInput {
    node: String,
    msg: Value,
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

#[tokio::main]
async fn main() {
    config::load_dotenv();
    init_logger();
    let args = Args::parse();
    info!("Starting voice relay bridge");

    let mut config = Config::from_env();
    if let Some(bind) = args.admin_bind {
        config.admin.bind = bind;
    }
    info!("Configuration loaded:");
    info!("  Account: {} ({})", config.account.id, config.account.username);
    info!(
        "  Relay broker: {}:{}{}",
        config.mqtt.broker_host,
        config.mqtt.port(),
        if config.mqtt.use_tls() { " (TLS)" } else { "" }
    );
    info!(
        "  State sweep: every {}ms, dwell {}ms",
        config.coalescer.sweep_interval_ms, config.coalescer.dwell_ms
    );

    let flow = match &args.flow {
        Some(path) => match FlowConfig::load(path) {
            Ok(flow) => flow,
            Err(e) => {
                error!("Failed to load flow {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => {
            warn!("No flow file given, running without nodes");
            FlowConfig::default()
        }
    };

    let registry = Arc::new(AccountRegistry::new(Arc::new(DeviceDirectory::new())));
    let session = registry.configure(config.account.clone(), config.mqtt.clone());

    let (flow_tx, flow_rx) = mpsc::unbounded_channel::<CommandMessage>();
    let (nodes, command_ids) = build_nodes(&flow, &config, &registry, &session, flow_tx);
    let nodes = Arc::new(nodes);
    info!(
        "Flow loaded: {} command node(s), {} other node(s)",
        command_ids.len(),
        nodes.len()
    );

    let writer_task = tokio::spawn(write_commands(flow_rx));
    let router_task = tokio::spawn(route_stdin(nodes.clone()));

    let bind = config.admin.bind.clone();
    let admin_registry = registry.clone();
    let admin_task = tokio::spawn(async move {
        if let Err(e) = admin::serve(&bind, admin_registry).await {
            error!("[Admin] Server error: {}", e);
        }
    });

    let mut status = session.status();
    let status_task = tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = *status.borrow();
            info!("[MQTT] Connection {}", current);
        }
    });

    info!("Voice relay bridge is running");
    info!("  - Press Ctrl+C to exit");

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal");
        }
        Err(e) => {
            error!("Failed to listen for shutdown signal: {}", e);
        }
    }

    router_task.abort();
    admin_task.abort();
    status_task.abort();

    for (id, node) in nodes.iter() {
        if let FlowNode::State(reporter) = node {
            reporter.close().await;
            session.deregister(id);
        }
    }
    for id in &command_ids {
        session.deregister(id);
    }
    registry.remove(&config.account.id);
    writer_task.abort();

    info!("Voice relay bridge stopped");
}

fn build_nodes(
    flow: &FlowConfig,
    config: &Config,
    registry: &Arc<AccountRegistry>,
    session: &Arc<TransportSession>,
    flow_tx: mpsc::UnboundedSender<CommandMessage>,
) -> (HashMap<String, FlowNode>, Vec<String>) {
    let publisher: Arc<dyn Publisher> = session.clone();
    let mut nodes = HashMap::new();
    let mut command_ids = Vec::new();

    for node in &flow.nodes {
        match node {
            NodeConfig::Command(c) => {
                let handler = Arc::new(CommandHandler::new(
                    c.clone(),
                    config.account.id.clone(),
                    publisher.clone(),
                    flow_tx.clone(),
                ));
                session.register(RegisteredHandler::command(handler));
                command_ids.push(c.id.clone());
            }
            NodeConfig::State(s) => {
                let reporter = StateReporter::spawn(s, config.coalescer, publisher.clone());
                session.register(RegisteredHandler::state(&s.id, &s.device));
                nodes.insert(s.id.clone(), FlowNode::State(reporter));
            }
            NodeConfig::Response(r) => {
                nodes.insert(
                    r.id.clone(),
                    FlowNode::Response(AckHandler::new(&r.id, registry.clone())),
                );
            }
        }
    }

    (nodes, command_ids)
}

/// Command messages go to the user flow as JSON lines on stdout.
async fn write_commands(mut rx: mpsc::UnboundedReceiver<CommandMessage>) {
    let mut stdout = tokio::io::stdout();
    while let Some(message) = rx.recv().await {
        let mut line = match serde_json::to_string(&message) {
            Ok(line) => line,
            Err(e) => {
                warn!("[Command] Unable to encode command message: {}", e);
                continue;
            }
        };
        line.push('\n');
        if let Err(e) = stdout.write_all(line.as_bytes()).await {
            error!("[Command] stdout closed: {}", e);
            break;
        }
        let _ = stdout.flush().await;
    }
}

/// Route `{"node": ..., "msg": ...}` lines from the user flow.
async fn route_stdin(nodes: Arc<HashMap<String, FlowNode>>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read stdin: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let input: FlowInput = match serde_json::from_str(&line) {
            Ok(input) => input,
            Err(e) => {
                warn!("Ignoring unreadable flow message: {}", e);
                continue;
            }
        };

        match nodes.get(&input.node) {
            Some(FlowNode::State(reporter)) => {
                let state: StateInput = match serde_json::from_value(input.msg) {
                    Ok(state) => state,
                    Err(e) => {
                        warn!("[State] {}: unreadable message: {}", input.node, e);
                        continue;
                    }
                };
                // Rejections are logged by the reporter task
                if let Err(e) = reporter.send(state) {
                    warn!("[State] {}: {}", input.node, e);
                }
            }
            Some(FlowNode::Response(handler)) => {
                let response: ResponseMessage = match serde_json::from_value(input.msg) {
                    Ok(response) => response,
                    Err(e) => {
                        warn!("[Command] {}: unreadable response: {}", input.node, e);
                        continue;
                    }
                };
                match handler.handle(&response) {
                    Ok(()) => {}
                    Err(BridgeError::TransportUnavailable) => {
                        debug!("[Command] {}: offline, response dropped", handler.id());
                    }
                    Err(e) => warn!("[Command] {}: {}", handler.id(), e),
                }
            }
            None => warn!("No state or response node named {}", input.node),
        }
    }
    debug!("stdin closed");
}
