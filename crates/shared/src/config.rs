//! Application configuration management.

use serde::Deserialize;

/// Application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Approval workflow configuration.
    #[serde(default)]
    pub approval: ApprovalConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Approval workflow configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ApprovalConfig {
    /// How long an issued OTP stays valid, in seconds.
    #[serde(default = "default_otp_ttl_secs")]
    pub otp_ttl_secs: u64,
    /// Number of digits in an issued OTP.
    #[serde(default = "default_otp_length")]
    pub otp_length: usize,
    /// Whether a rejection must carry a non-blank remark.
    #[serde(default = "default_require_remark_on_reject")]
    pub require_remark_on_reject: bool,
}

fn default_otp_ttl_secs() -> u64 {
    300 // 5 minutes
}

fn default_otp_length() -> usize {
    6
}

fn default_require_remark_on_reject() -> bool {
    true
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            otp_ttl_secs: default_otp_ttl_secs(),
            otp_length: default_otp_length(),
            require_remark_on_reject: default_require_remark_on_reject(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_log_filter() -> String {
    "procura=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from environment and config files.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(
                config::Environment::with_prefix("PROCURA")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
