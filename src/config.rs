use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Load environment variables from .env file with robust parsing.
/// Handles values with spaces without requiring quotes.
pub fn load_dotenv() {
    let env_path = Path::new(".env");
    if !env_path.exists() {
        return;
    }

    let content = match fs::read_to_string(env_path) {
        Ok(c) => c,
        Err(_) => return,
    };

    for (key, value) in parse_dotenv(&content) {
        // Only set if not already set (env vars take precedence)
        if std::env::var(key).is_err() {
            // SAFETY: We're single-threaded at this point (called before any async runtime)
            unsafe { std::env::set_var(key, value) };
        }
    }
}

fn parse_dotenv(content: &str) -> Vec<(&str, &str)> {
    let mut pairs = Vec::new();

    for line in content.lines() {
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(eq_pos) = line.find('=') {
            let key = line[..eq_pos].trim();
            let mut value = line[eq_pos + 1..].trim();

            if value.len() >= 2
                && ((value.starts_with('"') && value.ends_with('"'))
                    || (value.starts_with('\'') && value.ends_with('\'')))
            {
                value = &value[1..value.len() - 1];
            }

            pairs.push((key, value));
        }
    }

    pairs
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub account: AccountConfig,
    pub mqtt: MqttConfig,
    pub admin: AdminConfig,
    pub coalescer: CoalescerConfig,
}

/// Credentials and endpoints of one relay account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Local identifier of the account configuration.
    pub id: String,
    pub username: String,
    pub password: String,
    /// Host (or base URL) of the device directory web API.
    pub web_api_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub broker_host: String,
    /// Falls back to 8883 with TLS, 1883 without.
    pub broker_port: Option<u16>,
    pub ca_path: Option<PathBuf>,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    pub keep_alive_secs: u64,
    pub reconnect_secs: u64,
}

impl MqttConfig {
    pub fn use_tls(&self) -> bool {
        self.ca_path.is_some()
    }

    pub fn port(&self) -> u16 {
        self.broker_port
            .unwrap_or(if self.use_tls() { 8883 } else { 1883 })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    pub bind: String,
}

/// Timing of the state-update sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoalescerConfig {
    pub sweep_interval_ms: u64,
    pub dwell_ms: u64,
}

impl CoalescerConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms)
    }
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: 250,
            dwell_ms: 1000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            account: AccountConfig {
                id: "default".to_string(),
                username: String::new(),
                password: String::new(),
                web_api_url: None,
            },
            mqtt: MqttConfig {
                broker_host: "localhost".to_string(),
                broker_port: None,
                ca_path: None,
                cert_path: None,
                key_path: None,
                keep_alive_secs: 30,
                reconnect_secs: 5,
            },
            admin: AdminConfig {
                bind: "127.0.0.1:1881".to_string(),
            },
            coalescer: CoalescerConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(id) = std::env::var("BRIDGE_ACCOUNT_ID") {
            config.account.id = id;
        }
        if let Ok(username) = std::env::var("BRIDGE_USERNAME") {
            config.account.username = username;
        }
        if let Ok(password) = std::env::var("BRIDGE_PASSWORD") {
            config.account.password = password;
        }
        if let Ok(url) = std::env::var("WEB_API_URL")
            && !url.is_empty()
        {
            config.account.web_api_url = Some(url);
        }

        // MQTT configuration
        if let Ok(host) = std::env::var("MQTT_BROKER_HOST") {
            config.mqtt.broker_host = host;
        }
        if let Ok(port) = std::env::var("MQTT_BROKER_PORT")
            && let Ok(p) = port.parse()
        {
            config.mqtt.broker_port = Some(p);
        }
        if let Ok(ca) = std::env::var("MQTT_CA")
            && !ca.is_empty()
        {
            config.mqtt.ca_path = Some(PathBuf::from(ca));
        }
        if let Ok(cert) = std::env::var("MQTT_CERT")
            && !cert.is_empty()
        {
            config.mqtt.cert_path = Some(PathBuf::from(cert));
        }
        if let Ok(key) = std::env::var("MQTT_KEY")
            && !key.is_empty()
        {
            config.mqtt.key_path = Some(PathBuf::from(key));
        }
        if let Ok(secs) = std::env::var("MQTT_RECONNECT_SECS")
            && let Ok(s) = secs.parse()
        {
            config.mqtt.reconnect_secs = s;
        }

        if let Ok(bind) = std::env::var("ADMIN_BIND") {
            config.admin.bind = bind;
        }

        // State sweep timing
        if let Ok(interval) = std::env::var("STATE_SWEEP_INTERVAL_MS")
            && let Ok(ms) = interval.parse()
        {
            config.coalescer.sweep_interval_ms = ms;
        }
        if let Ok(dwell) = std::env::var("STATE_DWELL_MS")
            && let Ok(ms) = dwell.parse()
        {
            config.coalescer.dwell_ms = ms;
        }

        config
    }
}

/// One node instance declared in a flow file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeConfig {
    Command(CommandNodeConfig),
    State(StateNodeConfig),
    Response(ResponseNodeConfig),
}

impl NodeConfig {
    pub fn id(&self) -> &str {
        match self {
            NodeConfig::Command(c) => &c.id,
            NodeConfig::State(c) => &c.id,
            NodeConfig::Response(c) => &c.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandNodeConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Endpoint id of the device this node answers for.
    pub device: String,
    #[serde(default)]
    pub topic: String,
    /// Publish a success response as soon as the command is forwarded.
    #[serde(default)]
    pub acknowledge: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateNodeConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub device: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseNodeConfig {
    pub id: String,
}

/// Node declarations for one account.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowConfig {
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

impl FlowConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let flow: FlowConfig = serde_json::from_str(&content)?;

        let mut seen = std::collections::HashSet::new();
        for node in &flow.nodes {
            if !seen.insert(node.id()) {
                return Err(BridgeError::Config(format!(
                    "duplicate node id '{}' in {}",
                    node.id(),
                    path.display()
                )));
            }
        }

        Ok(flow)
    }
}
