use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "gatetally.toml";

// ---------------------------------------------------------------------------
// Environment override tracking
// ---------------------------------------------------------------------------

/// Tracks which configuration settings are overridden by environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    overrides: BTreeMap<String, String>,
}

impl EnvOverrides {
    /// `(setting key, env var)` pairs in key order, e.g.
    /// `("server.port", "GATETALLY_SERVER_PORT")`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.overrides.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn record(&mut self, key: &str, env_var: &str) {
        self.overrides.insert(key.to_string(), env_var.to_string());
    }
}

// ---------------------------------------------------------------------------
// Main configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Env var overrides are not serialized to TOML.
    #[serde(skip)]
    pub env_overrides: EnvOverrides,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Connection settings for the Portkey gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_url")]
    pub base_url: String,
    /// Never serialized back out; `Debug` prints it redacted.
    #[serde(default, skip_serializing)]
    pub api_key: Option<SecretString>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Completion token cap sent with every chat request.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Provider assumed for models missing from `models`.
    #[serde(default = "default_provider")]
    pub default_provider: String,
    /// Ask the gateway for its model list instead of using `models` only.
    #[serde(default = "default_true")]
    pub discover_models: bool,
    /// Model name -> provider name.
    #[serde(default = "default_model_providers")]
    pub models: BTreeMap<String, String>,
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_gateway_url(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
            max_tokens: default_max_tokens(),
            system_prompt: default_system_prompt(),
            default_provider: default_provider(),
            discover_models: true,
            models: default_model_providers(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PricingConfig {
    /// Flat USD rate per 1k total tokens for models without their own entry.
    #[serde(default = "default_per_1k_tokens")]
    pub default_per_1k_tokens: f64,
    #[serde(default)]
    pub models: Vec<ModelPriceConfig>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            default_per_1k_tokens: default_per_1k_tokens(),
            models: Vec::new(),
        }
    }
}

/// Per-model price, USD per 1M tokens.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ModelPriceConfig {
    pub model: String,
    pub input_per_million: f64,
    pub output_per_million: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalyticsConfig {
    /// How long analytics query results may be served from cache.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,
}

impl AnalyticsConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            max_page_size: default_max_page_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    /// Persist prompt and response text with each usage record.
    #[serde(default)]
    pub log_content: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            log_content: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

const fn default_port() -> u16 {
    8410
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("gatetally.db")
}
const fn default_true() -> bool {
    true
}
fn default_gateway_url() -> String {
    "https://api.portkey.ai/v1".to_string()
}
const fn default_timeout_secs() -> u64 {
    60
}
const fn default_max_tokens() -> u32 {
    2048
}
fn default_system_prompt() -> String {
    "You are a helpful assistant.".to_string()
}
fn default_provider() -> String {
    "openai".to_string()
}
fn default_model_providers() -> BTreeMap<String, String> {
    [
        ("@first-integrati-600395/gemini-2.5-pro", "google"),
        ("gpt-4", "openai"),
        ("gpt-3.5-turbo", "openai"),
        ("claude-3-opus-20240229", "anthropic"),
    ]
    .into_iter()
    .map(|(model, provider)| (model.to_string(), provider.to_string()))
    .collect()
}
const fn default_per_1k_tokens() -> f64 {
    0.002
}
const fn default_cache_ttl_secs() -> u64 {
    300
}
const fn default_max_page_size() -> u32 {
    500
}
fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Config loading and env overrides
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a TOML file, then apply environment variable
    /// overrides. Any setting prefixed with `GATETALLY_` takes precedence over
    /// the file value and is tracked in `env_overrides`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            config
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Reject settings that would produce invalid usage records.
    pub fn validate(&self) -> anyhow::Result<()> {
        let flat = self.pricing.default_per_1k_tokens;
        anyhow::ensure!(
            flat.is_finite() && flat >= 0.0,
            "pricing.default_per_1k_tokens must be a non-negative number, got {flat}"
        );
        for price in &self.pricing.models {
            anyhow::ensure!(
                price.input_per_million.is_finite()
                    && price.input_per_million >= 0.0
                    && price.output_per_million.is_finite()
                    && price.output_per_million >= 0.0,
                "pricing for model `{}` must be non-negative",
                price.model
            );
        }
        anyhow::ensure!(
            self.analytics.max_page_size > 0,
            "analytics.max_page_size must be at least 1"
        );
        Ok(())
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// When set, the env var value replaces the file/default value and the
    /// setting key is recorded in `env_overrides`.
    fn apply_env_overrides(&mut self) {
        let mut ov = EnvOverrides::default();

        macro_rules! env_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = val;
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_bool {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_parse {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    if let Ok(parsed) = val.parse() {
                        $field = parsed;
                        ov.record($key, $env);
                    } else {
                        tracing::warn!(env = $env, value = %val, "Ignoring unparsable env override");
                    }
                }
            };
        }

        // -- Server --
        env_str!("server.host", "GATETALLY_SERVER_HOST", self.server.host);
        env_parse!("server.port", "GATETALLY_SERVER_PORT", self.server.port);
        if let Ok(val) = std::env::var("GATETALLY_SERVER_CORS_ORIGINS") {
            self.server.cors_origins = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            ov.record("server.cors_origins", "GATETALLY_SERVER_CORS_ORIGINS");
        }

        // -- Database --
        if let Ok(val) = std::env::var("GATETALLY_DATABASE_PATH") {
            self.database.path = PathBuf::from(val);
            ov.record("database.path", "GATETALLY_DATABASE_PATH");
        }

        // -- Gateway --
        env_str!("gateway.base_url", "GATETALLY_GATEWAY_BASE_URL", self.gateway.base_url);
        for env in ["GATETALLY_GATEWAY_API_KEY", "PORTKEY_API_KEY"] {
            if let Ok(val) = std::env::var(env) {
                self.gateway.api_key = (!val.is_empty()).then(|| SecretString::from(val));
                ov.record("gateway.api_key", env);
                break;
            }
        }
        env_parse!(
            "gateway.timeout_secs",
            "GATETALLY_GATEWAY_TIMEOUT_SECS",
            self.gateway.timeout_secs
        );
        env_parse!(
            "gateway.max_tokens",
            "GATETALLY_GATEWAY_MAX_TOKENS",
            self.gateway.max_tokens
        );
        env_str!(
            "gateway.system_prompt",
            "GATETALLY_GATEWAY_SYSTEM_PROMPT",
            self.gateway.system_prompt
        );
        env_str!(
            "gateway.default_provider",
            "GATETALLY_GATEWAY_DEFAULT_PROVIDER",
            self.gateway.default_provider
        );
        env_bool!(
            "gateway.discover_models",
            "GATETALLY_GATEWAY_DISCOVER_MODELS",
            self.gateway.discover_models
        );

        // -- Pricing --
        env_parse!(
            "pricing.default_per_1k_tokens",
            "GATETALLY_PRICING_DEFAULT_PER_1K",
            self.pricing.default_per_1k_tokens
        );

        // -- Analytics --
        env_parse!(
            "analytics.cache_ttl_secs",
            "GATETALLY_ANALYTICS_CACHE_TTL_SECS",
            self.analytics.cache_ttl_secs
        );
        env_parse!(
            "analytics.max_page_size",
            "GATETALLY_ANALYTICS_MAX_PAGE_SIZE",
            self.analytics.max_page_size
        );

        // -- Logging --
        env_str!("logging.level", "GATETALLY_LOG_LEVEL", self.logging.level);
        env_bool!("logging.json", "GATETALLY_LOG_JSON", self.logging.json);
        env_bool!(
            "logging.log_content",
            "GATETALLY_LOG_CONTENT",
            self.logging.log_content
        );

        self.env_overrides = ov;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
