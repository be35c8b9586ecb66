use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEV_DEFAULT_HASH_SECRET: &str = "SOLESTORE_DEVELOPMENT_HASH_SECRET";

/// Settings for the hosted payment page (VNPay-style redirect gateway).
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PaymentGatewayConfig {
    /// Merchant terminal code issued by the gateway
    #[validate(length(min = 1))]
    pub tmn_code: String,

    /// Shared secret for HMAC-SHA512 signatures
    #[validate(length(min = 8))]
    pub hash_secret: String,

    /// Hosted payment page the buyer is redirected to
    #[validate(url)]
    pub payment_url: String,

    /// Where the gateway sends the buyer back after paying
    #[validate(url)]
    pub return_url: String,

    #[serde(default = "default_gateway_version")]
    pub version: String,

    #[serde(default = "default_gateway_command")]
    pub command: String,

    #[serde(default = "default_gateway_currency")]
    pub currency: String,

    #[serde(default = "default_gateway_locale")]
    pub locale: String,

    #[serde(default = "default_gateway_order_type")]
    pub order_type: String,

    /// Offset applied to `vnp_CreateDate` / `vnp_ExpireDate` (gateway expects local time)
    #[serde(default = "default_gateway_utc_offset_hours")]
    #[validate(range(min = -12, max = 14))]
    pub utc_offset_hours: i32,

    /// Minutes until the payment link expires
    #[serde(default = "default_gateway_expire_minutes")]
    #[validate(range(min = 1, max = 1440))]
    pub expire_minutes: i64,
}

impl Default for PaymentGatewayConfig {
    fn default() -> Self {
        Self {
            tmn_code: "SOLESTORE".to_string(),
            hash_secret: DEV_DEFAULT_HASH_SECRET.to_string(),
            payment_url: "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html".to_string(),
            return_url: "http://localhost:8080/api/v1/payments/vnpay/return".to_string(),
            version: default_gateway_version(),
            command: default_gateway_command(),
            currency: default_gateway_currency(),
            locale: default_gateway_locale(),
            order_type: default_gateway_order_type(),
            utc_offset_hours: default_gateway_utc_offset_hours(),
            expire_minutes: default_gateway_expire_minutes(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port (1024-65535)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// How long a checkout waits on a row lock before giving up (milliseconds)
    #[serde(default = "default_db_lock_timeout_ms")]
    #[validate(range(min = 100, max = 60000))]
    pub db_lock_timeout_ms: u64,

    /// Online orders still awaiting payment after this many minutes are cancelled
    #[serde(default = "default_pending_payment_timeout_minutes")]
    #[validate(range(min = 1))]
    pub pending_payment_timeout_minutes: i64,

    /// How often the stale payment sweeper runs (seconds), 0 = disabled
    #[serde(default = "default_payment_sweep_interval_secs")]
    pub payment_sweep_interval_secs: u64,

    /// Capacity of the domain event channel
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Per-request timeout (seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Payment gateway settings
    #[serde(default)]
    #[validate]
    pub payment_gateway: PaymentGatewayConfig,
}

impl AppConfig {
    /// Gets database URL reference
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Creates a new configuration
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            db_lock_timeout_ms: default_db_lock_timeout_ms(),
            pending_payment_timeout_minutes: default_pending_payment_timeout_minutes(),
            payment_sweep_interval_secs: default_payment_sweep_interval_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            request_timeout_secs: default_request_timeout_secs(),
            payment_gateway: PaymentGatewayConfig::default(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_ref()
            .map(|origins| origins.split(',').any(|o| !o.trim().is_empty()))
            .unwrap_or(false)
    }

    /// Permissive CORS is allowed in development or when explicitly opted into
    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.db_lock_timeout_ms)
    }

    pub fn pending_payment_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.pending_payment_timeout_minutes)
    }

    /// `None` when the sweeper is disabled
    pub fn payment_sweep_interval(&self) -> Option<Duration> {
        (self.payment_sweep_interval_secs > 0)
            .then(|| Duration::from_secs(self.payment_sweep_interval_secs))
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS for non-development environments or explicitly opt-in via APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if !self.is_development() && self.payment_gateway.hash_secret == DEV_DEFAULT_HASH_SECRET {
            let mut err = ValidationError::new("hash_secret_default_dev");
            err.message = Some(
                "The bundled development gateway secret must not be used outside development. Set APP__PAYMENT_GATEWAY__HASH_SECRET."
                    .into(),
            );
            errors.add("payment_gateway", err);
        }

        if self.db_min_connections > self.db_max_connections {
            let mut err = ValidationError::new("db_pool_bounds");
            err.message = Some("db_min_connections must not exceed db_max_connections".into());
            errors.add("db_min_connections", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    20
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    10
}
fn default_db_idle_timeout_secs() -> u64 {
    300
}
fn default_db_acquire_timeout_secs() -> u64 {
    10
}
fn default_db_lock_timeout_ms() -> u64 {
    5000
}

fn default_pending_payment_timeout_minutes() -> i64 {
    30
}

fn default_payment_sweep_interval_secs() -> u64 {
    300
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_gateway_version() -> String {
    "2.1.0".to_string()
}
fn default_gateway_command() -> String {
    "pay".to_string()
}
fn default_gateway_currency() -> String {
    "VND".to_string()
}
fn default_gateway_locale() -> String {
    "vn".to_string()
}
fn default_gateway_order_type() -> String {
    "other".to_string()
}
fn default_gateway_utc_offset_hours() -> i32 {
    7
}
fn default_gateway_expire_minutes() -> i64 {
    15
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => {
            let mut err = ValidationError::new("invalid_log_level");
            err.message = Some("log_level must be one of trace, debug, info, warn, error".into());
            Err(err)
        }
    }
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 || capacity > 100_000 {
        let mut err = ValidationError::new("invalid_event_channel_capacity");
        err.message = Some("event_channel_capacity must be between 1 and 100000".into());
        return Err(err);
    }
    Ok(())
}

/// Installs the global tracing subscriber. `RUST_LOG` wins over `level`.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("solestore_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Layers built-in defaults, `config/default`, `config/<env>` and `APP__*`
/// environment variables, then validates the result.
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://solestore.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "127.0.0.1".into(),
            8080,
            "production".into(),
        )
    }

    #[test]
    fn non_dev_requires_cors_origins() {
        let mut cfg = base_config();
        cfg.payment_gateway.hash_secret = "prod-secret-value".into();
        assert!(cfg.validate_additional_constraints().is_err());

        cfg.cors_allowed_origins = Some("https://solestore.vn".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn non_dev_rejects_bundled_gateway_secret() {
        let mut cfg = base_config();
        cfg.cors_allow_any_origin = true;
        let errors = cfg.validate_additional_constraints().unwrap_err();
        assert!(errors.errors().contains_key("payment_gateway"));
    }

    #[test]
    fn development_defaults_pass_validation() {
        let mut cfg = base_config();
        cfg.environment = "development".into();
        assert!(cfg.validate().is_ok());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn gateway_defaults_match_hosted_page_protocol() {
        let gateway = PaymentGatewayConfig::default();
        assert_eq!(gateway.version, "2.1.0");
        assert_eq!(gateway.command, "pay");
        assert_eq!(gateway.currency, "VND");
        assert_eq!(gateway.utc_offset_hours, 7);
    }

    #[test]
    fn zero_sweep_interval_disables_sweeper() {
        let mut cfg = base_config();
        cfg.payment_sweep_interval_secs = 0;
        assert!(cfg.payment_sweep_interval().is_none());
        cfg.payment_sweep_interval_secs = 60;
        assert_eq!(cfg.payment_sweep_interval(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn event_channel_capacity_must_be_bounded() {
        let mut cfg = base_config();
        cfg.environment = "development".into();
        cfg.event_channel_capacity = 0;
        let errors = cfg.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("event_channel_capacity"));

        cfg.event_channel_capacity = 100_001;
        assert!(cfg.validate().is_err());
        cfg.event_channel_capacity = 1;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let mut cfg = base_config();
        cfg.log_level = "verbose".into();
        assert!(cfg.validate().is_err());
    }
}
