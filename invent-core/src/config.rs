use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8767";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct InventConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub flows: FlowsConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Generation endpoint settings.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GenerationConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
    /// Reconnect attempts; only failures to reach the server are retried.
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub auto_save: bool,
    pub auto_enable: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BACKEND_URL.to_string(),
            timeout_seconds: 60,
            max_retries: 2,
            retry_delay_ms: 250,
            auto_save: false,
            auto_enable: false,
        }
    }
}

/// Flows API settings.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FlowsConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    /// Display name used by "create from scratch".
    pub untitled_name: String,
}

impl Default for FlowsConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BACKEND_URL.to_string(),
            api_key: None,
            timeout_seconds: 30,
            max_retries: 2,
            retry_delay_ms: 250,
            untitled_name: "Untitled".to_string(),
        }
    }
}

/// Listen address of the development server.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8767,
        }
    }
}

impl InventConfig {
    /// Load from an optional TOML file, then `INVENT__SECTION__KEY` env vars.
    /// `INVENT_API_KEY` fills `flows.api_key` when nothing else set it.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("INVENT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let mut config: Self = s.try_deserialize()?;

        if config.flows.api_key.is_none() {
            config.flows.api_key = std::env::var("INVENT_API_KEY").ok().filter(|k| !k.is_empty());
        }

        Ok(config)
    }

    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        s.try_deserialize()
    }
}
