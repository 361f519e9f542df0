use std::env;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 20;
// Gateway tokens are advertised at 60 minutes; hold them conservatively.
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 55 * 60;
const DEFAULT_TOKEN_SAFETY_MARGIN_SECS: u64 = 60;

const DEFAULT_POLL_INTERVAL_MS: u64 = 2_500;
const DEFAULT_POLL_MAX_ATTEMPTS: u32 = 120;
const DEFAULT_POLL_MAX_TRANSPORT_ERRORS: u32 = 10;

const DEFAULT_OTP_TTL_SECS: u64 = 300;

/// Payment gateway connection settings.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct GatewayConfig {
    /// Label recorded on orders and payment attempts (e.g. "qrpay")
    #[serde(default = "default_gateway_name")]
    pub name: String,

    /// Gateway API base URL
    #[serde(default = "default_gateway_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub client_secret: String,

    /// Per-call timeout for gateway HTTP requests (seconds)
    #[serde(default = "default_gateway_timeout_secs")]
    pub request_timeout_secs: u64,

    /// How long an acquired token is trusted, held below the gateway's own expiry
    #[serde(default = "default_token_lifetime_secs")]
    pub token_lifetime_secs: u64,

    /// Refresh this far before the trusted lifetime ends
    #[serde(default = "default_token_safety_margin_secs")]
    pub token_safety_margin_secs: u64,

    /// Optional shared secret for best-effort webhook signature checks
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            name: default_gateway_name(),
            base_url: default_gateway_base_url(),
            client_id: String::new(),
            client_secret: String::new(),
            request_timeout_secs: DEFAULT_GATEWAY_TIMEOUT_SECS,
            token_lifetime_secs: DEFAULT_TOKEN_LIFETIME_SECS,
            token_safety_margin_secs: DEFAULT_TOKEN_SAFETY_MARGIN_SECS,
            webhook_secret: None,
        }
    }
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn token_lifetime(&self) -> Duration {
        Duration::from_secs(self.token_lifetime_secs)
    }

    pub fn token_safety_margin(&self) -> Duration {
        Duration::from_secs(self.token_safety_margin_secs)
    }
}

/// Bounds for the COD-QR payment status poll loop.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,

    /// Hard cap on status checks per poll session
    #[serde(default = "default_poll_max_attempts")]
    pub max_attempts: u32,

    /// Consecutive transport failures before the loop gives up
    #[serde(default = "default_poll_max_transport_errors")]
    pub max_transport_errors: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_attempts: DEFAULT_POLL_MAX_ATTEMPTS,
            max_transport_errors: DEFAULT_POLL_MAX_TRANSPORT_ERRORS,
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Application configuration, layered from defaults, `config/{env}.toml`
/// and `APP_`-prefixed environment variables.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_env")]
    pub environment: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    #[serde(default)]
    #[validate]
    pub gateway: GatewayConfig,

    #[serde(default)]
    #[validate]
    pub polling: PollingConfig,

    /// Lifetime of a delivery-confirmation OTP (seconds)
    #[serde(default = "default_otp_ttl_secs")]
    pub otp_ttl_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_env(),
            log_level: default_log_level(),
            log_json: false,
            gateway: GatewayConfig::default(),
            polling: PollingConfig::default(),
            otp_ttl_secs: DEFAULT_OTP_TTL_SECS,
        }
    }
}

fn default_gateway_name() -> String {
    "qrpay".to_string()
}
fn default_gateway_base_url() -> String {
    "https://api.qrpay.example".to_string()
}
fn default_gateway_timeout_secs() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_SECS
}
fn default_token_lifetime_secs() -> u64 {
    DEFAULT_TOKEN_LIFETIME_SECS
}
fn default_token_safety_margin_secs() -> u64 {
    DEFAULT_TOKEN_SAFETY_MARGIN_SECS
}
fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}
fn default_poll_max_attempts() -> u32 {
    DEFAULT_POLL_MAX_ATTEMPTS
}
fn default_poll_max_transport_errors() -> u32 {
    DEFAULT_POLL_MAX_TRANSPORT_ERRORS
}
fn default_otp_ttl_secs() -> u64 {
    DEFAULT_OTP_TTL_SECS
}
fn default_host() -> String {
    DEFAULT_HOST.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_env() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

/// Loads configuration: `config/default.toml` then `config/{RUN_ENV}.toml`
/// (both optional), then `APP_*` environment variables (`APP_GATEWAY__BASE_URL`
/// style nesting).
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_env = env::var("RUN_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let cfg: AppConfig = Config::builder()
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?
        .try_deserialize()?;

    cfg.validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {}", e)))?;

    Ok(cfg)
}

/// Installs the global tracing subscriber.
pub fn init_tracing(log_level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
