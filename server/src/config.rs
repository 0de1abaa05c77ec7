use std::env;

use config::{Config, ConfigError, File};
use serde::Deserialize;
use txqueue_core::chain::ChainSettings;
use txqueue_executors::eoa::{GasConfig, WorkerConfig};

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub queue: WorkerConfig,
    #[serde(default)]
    pub gas: GasConfig,
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub wallets: WalletsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Redis,
    /// Records live in process memory and are lost on restart
    Memory,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Prefix for every Redis key, lets several deployments share one Redis
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    #[serde(flatten)]
    pub settings: ChainSettings,
    pub rpc_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WalletsConfig {
    /// Hex private keys of the backend wallets
    pub private_keys: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "0.0.0.0".into(),
            log_format: LogFormat::default(),
        }
    }
}

pub fn get_config() -> Result<EngineConfig, ConfigError> {
    let base_path = env::current_dir()
        .map_err(|e| ConfigError::Message(format!("Failed to determine the current directory: {e}")))?;
    let configuration_directory = base_path.join("configuration");

    // Detect the running environment
    let environment: Environment = env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(ConfigError::Message)?;

    let environment_filename = format!("server_{}.yaml", environment.as_str());

    // Load configuration from files
    let config = Config::builder()
        .add_source(File::from(configuration_directory.join("server_base.yaml")))
        .add_source(File::from(configuration_directory.join(environment_filename)).required(false))
        .add_source(
            config::Environment::with_prefix("app")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("wallets.private_keys"),
        )
        .build()?;

    config.try_deserialize::<EngineConfig>()
}

/// The possible runtime environment for our application.
pub enum Environment {
    Local,
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "development" => Ok(Self::Development),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{other} is not a supported environment. Use either `local`, `development`, or `production`."
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
server:
  port: 3005
  log_format: json
redis:
  url: redis://127.0.0.1:6379
store:
  backend: memory
  namespace: staging
queue:
  max_inflight: 10
  stuck_timeout_secs: 30
gas:
  bump_percent: 125
  max_fee_cap: "500000000000"
chains:
  - chain_id: 80001
    rpc_url: https://rpc-mumbai.example
    confirmations: 2
wallets:
  private_keys:
    - "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"
"#;

    fn parse(yaml: &str) -> EngineConfig {
        Config::builder()
            .add_source(File::from_str(yaml, config::FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn parses_every_section() {
        let config = parse(BASE);

        assert_eq!(config.server.port, 3005);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.log_format, LogFormat::Json);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.namespace.as_deref(), Some("staging"));
        assert_eq!(config.queue.max_inflight, 10);
        assert_eq!(config.queue.stuck_timeout_secs, 30);
        // untouched keys keep their defaults
        assert_eq!(config.queue.max_escalations, 3);
        assert_eq!(config.gas.bump_percent, 125);
        assert_eq!(config.gas.max_fee_cap, Some(500_000_000_000));
        assert_eq!(config.chains.len(), 1);
        assert_eq!(config.chains[0].settings.chain_id, 80001);
        assert_eq!(config.chains[0].settings.confirmations, 2);
        assert!(config.chains[0].settings.eip1559);
        assert_eq!(config.wallets.private_keys.len(), 1);
    }

    #[test]
    fn optional_sections_default() {
        let config = parse("server: {}\nredis:\n  url: redis://localhost\n");

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.log_format, LogFormat::Pretty);
        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert!(config.chains.is_empty());
        assert!(config.wallets.private_keys.is_empty());
    }

    #[test]
    fn rejects_unknown_environments() {
        assert!(Environment::try_from("staging".to_string()).is_err());
        assert_eq!(
            Environment::try_from("Production".to_string()).unwrap().as_str(),
            "production"
        );
    }
}
