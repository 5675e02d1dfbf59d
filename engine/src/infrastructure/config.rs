//! Supervisor configuration loading from YAML

use crate::domain::entities::ProcessSpec;
use crate::domain::error::{DomainError, Result};
use crate::domain::value_objects::RouteConfig;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Top-level configuration structure
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub processes: Vec<ProcessConfig>,

    #[serde(default)]
    pub load_balancers: Vec<LoadBalancerConfig>,

    #[serde(default)]
    pub secrets: SecretsConfig,

    #[serde(default)]
    pub github: GithubConfig,

    #[serde(default)]
    pub registry: RegistryConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    /// Shared HTTP listener: REST + gRPC-Web + dynamic proxy
    #[serde(default = "default_http_port")]
    pub port: u16,

    /// Native gRPC listener; probed forward when busy
    #[serde(default = "default_grpc_port")]
    pub grpc_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_http_port(),
            grpc_port: default_grpc_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_grpc_port() -> u16 {
    9090
}

fn default_max_instances() -> usize {
    1
}

/// Configuration for one managed process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub name: String,

    #[serde(default)]
    pub repository: String,

    #[serde(default)]
    pub binary_path: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default)]
    pub work_dir: Option<String>,

    /// Base port hint; actual ports are probe-allocated
    #[serde(default)]
    pub port: u16,

    #[serde(default)]
    pub auto_restart: bool,

    #[serde(default = "default_max_instances")]
    pub max_instances: usize,

    #[serde(default)]
    pub secrets_keys: Vec<String>,
}

impl ProcessConfig {
    pub fn to_spec(&self) -> ProcessSpec {
        ProcessSpec {
            name: self.name.clone(),
            repository: self.repository.clone(),
            binary_path: self.binary_path.as_ref().map(PathBuf::from),
            args: self.args.clone(),
            work_dir: self.work_dir.as_ref().map(PathBuf::from),
            port_hint: self.port,
            auto_restart: self.auto_restart,
            max_instances: self.max_instances,
            secrets_keys: self.secrets_keys.clone(),
            env: self.env.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancerConfig {
    pub name: String,
    pub listen_port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

fn default_protocol() -> String {
    "grpc".to_string()
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SecretsConfig {
    /// Regenerate environment files on every startup
    #[serde(default, rename = "override")]
    pub override_env: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct GithubConfig {
    #[serde(default)]
    pub update_mode: UpdateModeConfig,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UpdateModeConfig {
    #[serde(default)]
    pub polling: Option<PollingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_poll_interval_secs")]
    pub interval_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    300
}

/// Exclusion sets applied to the reflection catalog
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Service name prefixes omitted from the catalog
    #[serde(default)]
    pub skip_services: Vec<String>,
    /// Fully-qualified message name prefixes omitted from the catalog
    #[serde(default)]
    pub skip_messages: Vec<String>,
}

/// Load and validate the configuration file
pub fn load_config(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        DomainError::InvalidConfiguration(format!("read {}: {e}", path.display()))
    })?;
    let config: Config = serde_yaml::from_str(&contents)
        .map_err(|e| DomainError::InvalidConfiguration(e.to_string()))?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let mut seen = HashSet::new();
    for process in &config.processes {
        if process.name.is_empty() {
            return Err(DomainError::InvalidConfiguration(
                "process name cannot be empty".to_string(),
            ));
        }
        if !seen.insert(process.name.as_str()) {
            return Err(DomainError::InvalidConfiguration(format!(
                "duplicate process name '{}'",
                process.name
            )));
        }
        if process.max_instances < 1 {
            return Err(DomainError::InvalidConfiguration(format!(
                "{}: max_instances must be at least 1",
                process.name
            )));
        }
    }
    for lb in &config.load_balancers {
        if lb.protocol != "grpc" {
            return Err(DomainError::InvalidConfiguration(format!(
                "load balancer '{}': only the grpc protocol is supported, got '{}'",
                lb.name, lb.protocol
            )));
        }
    }
    Ok(())
}
