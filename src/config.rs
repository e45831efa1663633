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
const DEFAULT_RESERVATION_TTL_SECS: u64 = 15 * 60;
const DEFAULT_METADATA_FIELD_MAX_LEN: usize = 500;
const DEFAULT_GATEWAY_API_BASE: &str = "https://api.stripe.com";
const DEFAULT_PAYMENT_METHOD_TYPES: &str = "card";

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    #[validate(range(min = 1))]
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

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    #[validate(range(min = 1))]
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

    // ========== Checkout ==========
    /// Lifetime of a pending stock reservation in seconds
    #[serde(default = "default_reservation_ttl_secs")]
    #[validate(range(min = 60, max = 86400))]
    pub reservation_ttl_secs: u64,

    /// Interval of the housekeeping job that marks stale reservations as expired
    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,

    /// ISO currency code sent to the payment gateway (lowercase)
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub currency: String,

    /// Maximum length of a single gateway metadata value
    #[serde(default = "default_metadata_field_max_len")]
    #[validate(range(min = 64, max = 500))]
    pub metadata_field_max_len: usize,

    /// SMS notification surcharge charged once per seller in the cart
    #[serde(default = "default_sms_fee_cents_per_seller")]
    pub sms_fee_cents_per_seller: i64,

    /// Delivery fee used when coordinates are not available
    #[serde(default = "default_fallback_delivery_fee_cents")]
    pub fallback_delivery_fee_cents: i64,

    /// Processor surcharge: proportional part in basis points
    #[serde(default = "default_processor_fee_basis_points")]
    #[validate(range(max = 10000))]
    pub processor_fee_basis_points: i64,

    /// Processor surcharge: fixed part
    #[serde(default = "default_processor_fee_fixed_cents")]
    pub processor_fee_fixed_cents: i64,

    // ========== Payment gateway ==========
    /// Base URL of the payment gateway REST API
    #[serde(default = "default_gateway_api_base")]
    pub gateway_api_base: String,

    /// Secret API key for the payment gateway
    #[serde(default)]
    pub gateway_secret_key: Option<String>,

    /// Redirect after a successful payment; may contain `{CHECKOUT_SESSION_ID}`
    #[serde(default = "default_success_url")]
    pub checkout_success_url: String,

    /// Redirect after an abandoned payment
    #[serde(default = "default_cancel_url")]
    pub checkout_cancel_url: String,

    /// Comma-separated list of accepted payment method types
    #[serde(default = "default_payment_method_types")]
    pub payment_method_types: String,

    /// Optional override of `payment_method_types` (APP__PAYMENT_METHOD_TYPES_OVERRIDE)
    #[serde(default)]
    pub payment_method_types_override: Option<String>,

    // ========== Delivery availability ==========
    /// Endpoint of the delivery availability service; feasibility is unknown when unset
    #[serde(default)]
    pub delivery_availability_url: Option<String>,

    /// Timeout for outbound calls (seconds)
    #[serde(default = "default_external_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub external_timeout_secs: u64,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything except the connection and environment
    pub fn new(database_url: String, environment: String) -> Self {
        Self {
            database_url,
            host: "127.0.0.1".to_string(),
            port: default_port(),
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            reservation_ttl_secs: default_reservation_ttl_secs(),
            reaper_interval_secs: default_reaper_interval_secs(),
            currency: default_currency(),
            metadata_field_max_len: default_metadata_field_max_len(),
            sms_fee_cents_per_seller: default_sms_fee_cents_per_seller(),
            fallback_delivery_fee_cents: default_fallback_delivery_fee_cents(),
            processor_fee_basis_points: default_processor_fee_basis_points(),
            processor_fee_fixed_cents: default_processor_fee_fixed_cents(),
            gateway_api_base: default_gateway_api_base(),
            gateway_secret_key: None,
            checkout_success_url: default_success_url(),
            checkout_cancel_url: default_cancel_url(),
            payment_method_types: default_payment_method_types(),
            payment_method_types_override: None,
            delivery_availability_url: None,
            external_timeout_secs: default_external_timeout_secs(),
        }
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn reservation_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reservation_ttl_secs as i64)
    }

    pub fn external_timeout(&self) -> Duration {
        Duration::from_secs(self.external_timeout_secs)
    }

    /// Accepted payment method types; the override list wins when it has any entry.
    pub fn accepted_payment_method_types(&self) -> Vec<String> {
        let parse = |raw: &str| -> Vec<String> {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        };

        self.payment_method_types_override
            .as_deref()
            .map(parse)
            .filter(|types| !types.is_empty())
            .unwrap_or_else(|| parse(&self.payment_method_types))
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.is_production()
            && self
                .gateway_secret_key
                .as_deref()
                .map_or(true, |key| key.trim().is_empty())
        {
            let mut err = ValidationError::new("gateway_secret_key_required");
            err.message = Some("Set APP__GATEWAY_SECRET_KEY in production".into());
            errors.add("gateway_secret_key", err);
        }

        if self.accepted_payment_method_types().is_empty() {
            let mut err = ValidationError::new("payment_method_types_empty");
            err.message = Some("At least one payment method type must be accepted".into());
            errors.add("payment_method_types", err);
        }

        if self.sms_fee_cents_per_seller < 0
            || self.fallback_delivery_fee_cents < 0
            || self.processor_fee_basis_points < 0
            || self.processor_fee_fixed_cents < 0
        {
            let mut err = ValidationError::new("negative_fee");
            err.message = Some("Fee settings must not be negative".into());
            errors.add("fees", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
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

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_reservation_ttl_secs() -> u64 {
    DEFAULT_RESERVATION_TTL_SECS
}

fn default_reaper_interval_secs() -> u64 {
    300
}

fn default_currency() -> String {
    "eur".to_string()
}

fn default_metadata_field_max_len() -> usize {
    DEFAULT_METADATA_FIELD_MAX_LEN
}

fn default_sms_fee_cents_per_seller() -> i64 {
    15
}

fn default_fallback_delivery_fee_cents() -> i64 {
    499
}

fn default_processor_fee_basis_points() -> i64 {
    150 // 1.5%
}

fn default_processor_fee_fixed_cents() -> i64 {
    25
}

fn default_gateway_api_base() -> String {
    DEFAULT_GATEWAY_API_BASE.to_string()
}

fn default_success_url() -> String {
    "http://localhost:3000/checkout/success?session_id={CHECKOUT_SESSION_ID}".to_string()
}

fn default_cancel_url() -> String {
    "http://localhost:3000/cart".to_string()
}

fn default_payment_method_types() -> String {
    DEFAULT_PAYMENT_METHOD_TYPES.to_string()
}

fn default_external_timeout_secs() -> u64 {
    10
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("marketplace_checkout={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
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
        .set_default("database_url", "sqlite://checkout.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("environment", run_env.as_str())?
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
        error!("Configuration constraint validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
