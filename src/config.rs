use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub sandbox: SandboxConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Single origin allowed to reach the service from a browser.
    /// Supports ${ENV_VAR} substitution.
    pub allowed_origin: String,
    /// Directory served for requests that don't match an API route.
    pub static_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SandboxConfig {
    /// Wall-clock deadline for a single script run, in milliseconds.
    pub timeout_ms: u64,
    /// Engine operation ceiling per run (0 disables the ceiling).
    pub max_operations: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            allowed_origin: "https://obscureorbits-10ae709.ingress-earth.ewp.live".to_string(),
            static_dir: "public".to_string(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            max_operations: 10_000_000,
        }
    }
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Config {
    /// Loads the config file if it exists, otherwise falls back to defaults.
    /// The service is deployable with nothing but the ALLY_KEY env var set.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        if !Path::new(path).exists() {
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path)?;
        // Expand environment variables like ${ALLOWED_ORIGIN}
        let expanded = shellexpand::env(&content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
