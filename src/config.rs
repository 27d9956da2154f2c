use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

/// Application configuration, merged from `config/default.toml`, an optional
/// `config/{environment}.toml` overlay, and `APP__`-prefixed environment
/// variables (e.g. `APP__DATABASE_URL`, `APP__GATEWAY__KEY_SECRET`).
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    /// `development`, `staging` or `production`. Production disables the
    /// relaxed payment/refund behaviors regardless of other flags.
    pub environment: String,
    pub log_level: String,
    pub log_json: bool,
    pub jwt_secret: String,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_connect_timeout_secs: u64,
    pub cors_allowed_origins: Vec<String>,
    /// Run embedded migrations at startup.
    pub auto_migrate: bool,
    pub gateway: GatewayConfig,
    pub payments: PaymentConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub base_url: String,
    pub key_id: String,
    pub key_secret: String,
    pub webhook_secret: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    pub currency: String,
    /// Tax applied to the item subtotal, e.g. 0.05 for 5% GST.
    pub tax_rate: f64,
    /// When set, refunds are also accepted for `pending`/`processing`
    /// payments and non-gateway refund requests are auto-approved.
    /// Ignored (forced off) when `environment = "production"`.
    pub relaxed_refunds: Option<bool>,
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Relaxed refund handling: explicit flag wins, otherwise enabled in
    /// every non-production environment. Never enabled in production.
    pub fn relaxed_refunds(&self) -> bool {
        if self.is_production() {
            return false;
        }
        self.payments.relaxed_refunds.unwrap_or(true)
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.is_empty() {
            return Err(ConfigError::Message("jwt_secret must not be empty".into()));
        }
        if self.database_url.is_empty() {
            return Err(ConfigError::Message(
                "database_url must not be empty".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.payments.tax_rate) {
            return Err(ConfigError::Message(
                "payments.tax_rate must be in [0, 1)".into(),
            ));
        }
        Ok(())
    }
}

/// Load configuration. `CONFIG_DIR` overrides the default `config` directory,
/// `APP_ENV` selects the overlay file.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
    let app_env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

    let config = Config::builder()
        .set_default("host", "0.0.0.0")?
        .set_default("port", 8080_i64)?
        .set_default("environment", app_env.clone())?
        .set_default("log_level", "info")?
        .set_default("log_json", false)?
        .set_default("db_max_connections", 20_i64)?
        .set_default("db_min_connections", 2_i64)?
        .set_default("db_connect_timeout_secs", 10_i64)?
        .set_default("cors_allowed_origins", Vec::<String>::new())?
        .set_default("auto_migrate", true)?
        .set_default("gateway.timeout_secs", 10_i64)?
        .set_default("payments.currency", "INR")?
        .set_default("payments.tax_rate", 0.05)?
        .add_source(File::with_name(&format!("{}/default", config_dir)).required(false))
        .add_source(File::with_name(&format!("{}/{}", config_dir, app_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let config: AppConfig = config.try_deserialize()?;
    config.validate()?;
    Ok(config)
}

/// Initialize the tracing subscriber. `RUST_LOG` overrides the configured
/// level when set.
pub fn init_tracing(config: &AppConfig) {
    let default_directive = format!(
        "meallink_api={level},tower_http=debug,sea_orm=warn",
        level = config.log_level
    );
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    if config.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            database_url: "sqlite::memory:".into(),
            host: "127.0.0.1".into(),
            port: 8080,
            environment: "development".into(),
            log_level: "info".into(),
            log_json: false,
            jwt_secret: "test-secret".into(),
            db_max_connections: 5,
            db_min_connections: 1,
            db_connect_timeout_secs: 5,
            cors_allowed_origins: vec![],
            auto_migrate: true,
            gateway: GatewayConfig {
                base_url: "http://localhost:9000".into(),
                key_id: "key".into(),
                key_secret: "secret".into(),
                webhook_secret: "whsec".into(),
                timeout_secs: 5,
            },
            payments: PaymentConfig {
                currency: "INR".into(),
                tax_rate: 0.05,
                relaxed_refunds: None,
            },
        }
    }

    #[test]
    fn relaxed_refunds_defaults_outside_production() {
        let mut config = base_config();
        assert!(config.relaxed_refunds());

        config.environment = "production".into();
        assert!(!config.relaxed_refunds());

        // explicit flag cannot override production
        config.payments.relaxed_refunds = Some(true);
        assert!(!config.relaxed_refunds());

        config.environment = "staging".into();
        config.payments.relaxed_refunds = Some(false);
        assert!(!config.relaxed_refunds());
    }

    #[test]
    fn validate_rejects_empty_jwt_secret() {
        let mut config = base_config();
        config.jwt_secret = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_tax_rate() {
        let mut config = base_config();
        config.payments.tax_rate = 1.5;
        assert!(config.validate().is_err());
    }
}
