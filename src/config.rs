use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DomBridgeError, Result};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 9222;

const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 2_000;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BrokerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ControllerConfig {
    pub command_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AgentConfig {
    pub reconnect_delay_ms: Option<u64>,
    pub profile_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    pub broker: Option<BrokerConfig>,
    pub controller: Option<ControllerConfig>,
    pub agent: Option<AgentConfig>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| DomBridgeError::Config(e.to_string()))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| DomBridgeError::Config(e.to_string()))?;
        Ok(config)
    }

    pub fn broker_host(&self) -> String {
        self.broker
            .as_ref()
            .and_then(|broker| broker.host.clone())
            .unwrap_or_else(|| DEFAULT_HOST.to_string())
    }

    pub fn broker_port(&self) -> u16 {
        self.broker
            .as_ref()
            .and_then(|broker| broker.port)
            .unwrap_or(DEFAULT_PORT)
    }

    pub fn broker_url(&self) -> String {
        format!("ws://{}:{}", self.broker_host(), self.broker_port())
    }

    pub fn command_timeout(&self) -> Duration {
        let millis = self
            .controller
            .as_ref()
            .and_then(|controller| controller.command_timeout_ms)
            .unwrap_or(DEFAULT_COMMAND_TIMEOUT_MS);
        Duration::from_millis(millis.max(1))
    }

    pub fn reconnect_delay(&self) -> Duration {
        let millis = self
            .agent
            .as_ref()
            .and_then(|agent| agent.reconnect_delay_ms)
            .unwrap_or(DEFAULT_RECONNECT_DELAY_MS);
        Duration::from_millis(millis.max(1))
    }
}

pub fn default_command_timeout() -> Duration {
    Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS)
}

pub fn default_reconnect_delay() -> Duration {
    Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS)
}
