use alloy::primitives::U256;
use eyre::{eyre, Result, WrapErr};
use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::chains::{self, ChainSettings};

/// Main configuration for the relayer
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub relayer: RelayerConfig,
    pub watcher: WatcherConfig,
    pub processor: ProcessorConfig,
    pub monitor: MonitorConfig,
    pub api: ApiConfig,
    pub alerts: AlertConfig,
    pub log_format: LogFormat,
    /// Preset and custom chain settings; incomplete ones are dropped by the registry
    pub chains: Vec<ChainSettings>,
}

/// Database configuration
#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Custom Debug that redacts the database URL (may contain credentials).
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Signing identity
#[derive(Clone)]
pub struct RelayerConfig {
    pub private_key: String,
}

impl fmt::Debug for RelayerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayerConfig")
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Event watcher timing and range limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherConfig {
    pub sweep_interval_ms: u64,
    pub max_block_range: u64,
    /// How far behind the safe head the first sweep of a chain starts
    pub initial_lookback_blocks: u64,
}

impl WatcherConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: default_sweep_interval(),
            max_block_range: default_max_block_range(),
            initial_lookback_blocks: default_initial_lookback(),
        }
    }
}

/// Settlement processor timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorConfig {
    pub processing_interval_ms: u64,
    pub submission_delay_ms: u64,
}

impl ProcessorConfig {
    pub fn processing_interval(&self) -> Duration {
        Duration::from_millis(self.processing_interval_ms)
    }

    pub fn submission_delay(&self) -> Duration {
        Duration::from_millis(self.submission_delay_ms)
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            processing_interval_ms: default_processing_interval(),
            submission_delay_ms: default_submission_delay(),
        }
    }
}

/// Health, balance and reporting tasks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub health_check_interval_secs: u64,
    pub balance_check_interval_secs: u64,
    pub daily_report_interval_secs: u64,
    pub low_balance_threshold_wei: U256,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: default_health_check_interval(),
            balance_check_interval_secs: default_balance_check_interval(),
            daily_report_interval_secs: default_daily_report_interval(),
            low_balance_threshold_wei: default_low_balance_threshold(),
        }
    }
}

/// HTTP API configuration
#[derive(Clone)]
pub struct ApiConfig {
    pub bind_address: String,
    pub port: u16,
    /// Bearer token for admin routes; admin routes are disabled when unset
    pub admin_token: Option<String>,
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("bind_address", &self.bind_address)
            .field("port", &self.port)
            .field("admin_token", &self.admin_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Webhook alert channels. Every field is optional.
#[derive(Clone, Default)]
pub struct AlertConfig {
    pub discord_webhook_url: Option<String>,
    pub slack_webhook_url: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
}

impl AlertConfig {
    pub fn telegram_enabled(&self) -> bool {
        self.telegram_bot_token.is_some() && self.telegram_chat_id.is_some()
    }

    pub fn any_enabled(&self) -> bool {
        self.discord_webhook_url.is_some() || self.slack_webhook_url.is_some() || self.telegram_enabled()
    }
}

/// Webhook URLs and bot tokens are credentials.
impl fmt::Debug for AlertConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("AlertConfig")
            .field("discord_webhook_url", &redact(&self.discord_webhook_url))
            .field("slack_webhook_url", &redact(&self.slack_webhook_url))
            .field("telegram_bot_token", &redact(&self.telegram_bot_token))
            .field("telegram_chat_id", &self.telegram_chat_id)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" | "" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(eyre!("LOG_FORMAT must be 'text' or 'json', got '{}'", other)),
        }
    }
}

fn default_max_connections() -> u32 {
    10
}

fn default_processing_interval() -> u64 {
    30_000
}

fn default_submission_delay() -> u64 {
    1_000
}

fn default_sweep_interval() -> u64 {
    30_000
}

fn default_max_block_range() -> u64 {
    1_000
}

fn default_initial_lookback() -> u64 {
    1_000
}

fn default_health_check_interval() -> u64 {
    300
}

fn default_balance_check_interval() -> u64 {
    3_600
}

fn default_daily_report_interval() -> u64 {
    86_400
}

/// 0.1 of the native token
fn default_low_balance_threshold() -> U256 {
    U256::from(100_000_000_000_000_000u128)
}

fn default_api_port() -> u16 {
    3000
}

/// Parse an optional env var, falling back to a default when unset.
/// A set-but-invalid value is an error rather than a silent default.
fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse()
            .map_err(|_| eyre!("{} has an invalid value: {}", key, v)),
        _ => Ok(default),
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Self> {
        let database = DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| eyre!("DATABASE_URL environment variable is required"))?,
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", default_max_connections())?,
        };

        let relayer = RelayerConfig {
            private_key: env::var("RELAYER_PRIVATE_KEY")
                .map_err(|_| eyre!("RELAYER_PRIVATE_KEY environment variable is required"))?,
        };

        let watcher = WatcherConfig {
            sweep_interval_ms: env_or("SWEEP_INTERVAL_MS", default_sweep_interval())?,
            max_block_range: env_or("MAX_BLOCK_RANGE", default_max_block_range())?,
            initial_lookback_blocks: env_or("INITIAL_LOOKBACK_BLOCKS", default_initial_lookback())?,
        };

        let processor = ProcessorConfig {
            processing_interval_ms: env_or("PROCESSING_INTERVAL_MS", default_processing_interval())?,
            submission_delay_ms: env_or("SUBMISSION_DELAY_MS", default_submission_delay())?,
        };

        let low_balance_threshold_wei = match env_opt("LOW_BALANCE_THRESHOLD_WEI") {
            Some(v) => U256::from_str_radix(v.trim(), 10)
                .map_err(|_| eyre!("LOW_BALANCE_THRESHOLD_WEI must be an integer amount of wei"))?,
            None => default_low_balance_threshold(),
        };
        let monitor = MonitorConfig {
            health_check_interval_secs: env_or(
                "HEALTH_CHECK_INTERVAL_SECS",
                default_health_check_interval(),
            )?,
            balance_check_interval_secs: env_or(
                "BALANCE_CHECK_INTERVAL_SECS",
                default_balance_check_interval(),
            )?,
            daily_report_interval_secs: env_or(
                "DAILY_REPORT_INTERVAL_SECS",
                default_daily_report_interval(),
            )?,
            low_balance_threshold_wei,
        };

        let api = ApiConfig {
            bind_address: env_opt("API_BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env_or("API_PORT", default_api_port())?,
            admin_token: env_opt("ADMIN_API_TOKEN"),
        };

        let alerts = AlertConfig {
            discord_webhook_url: env_opt("DISCORD_WEBHOOK_URL"),
            slack_webhook_url: env_opt("SLACK_WEBHOOK_URL"),
            telegram_bot_token: env_opt("TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: env_opt("TELEGRAM_CHAT_ID"),
        };

        let log_format = env_opt("LOG_FORMAT")
            .map(|v| v.parse())
            .transpose()?
            .unwrap_or_default();

        let config = Config {
            database,
            relayer,
            watcher,
            processor,
            monitor,
            api,
            alerts,
            log_format,
            chains: chains::load_from_env()?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(eyre!("database.url cannot be empty"));
        }
        if self.database.max_connections == 0 {
            return Err(eyre!("database.max_connections must be at least 1"));
        }

        let key = self.relayer.private_key.trim();
        let digits = key.strip_prefix("0x").unwrap_or(key);
        if digits.len() != 64 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(eyre!(
                "relayer.private_key must be 32 bytes of hex (64 chars, optional 0x prefix)"
            ));
        }

        if self.watcher.max_block_range == 0 {
            return Err(eyre!("watcher.max_block_range must be at least 1"));
        }
        if self.watcher.sweep_interval_ms == 0 {
            return Err(eyre!("watcher.sweep_interval_ms must be positive"));
        }
        if self.processor.processing_interval_ms == 0 {
            return Err(eyre!("processor.processing_interval_ms must be positive"));
        }
        if self.monitor.health_check_interval_secs == 0
            || self.monitor.balance_check_interval_secs == 0
            || self.monitor.daily_report_interval_secs == 0
        {
            return Err(eyre!("monitor intervals must be positive"));
        }

        if self.alerts.telegram_bot_token.is_some() != self.alerts.telegram_chat_id.is_some() {
            return Err(eyre!(
                "TELEGRAM_BOT_TOKEN and TELEGRAM_CHAT_ID must be set together"
            ));
        }

        Ok(())
    }

    pub fn api_bind_address(&self) -> String {
        format!("{}:{}", self.api.bind_address, self.api.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEY: &str = "0x0000000000000000000000000000000000000000000000000000000000000001";

    fn config() -> Config {
        Config {
            database: DatabaseConfig {
                url: "postgres://localhost/test".to_string(),
                max_connections: 5,
            },
            relayer: RelayerConfig {
                private_key: KEY.to_string(),
            },
            watcher: WatcherConfig::default(),
            processor: ProcessorConfig::default(),
            monitor: MonitorConfig::default(),
            api: ApiConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 3000,
                admin_token: Some("secret".to_string()),
            },
            alerts: AlertConfig::default(),
            log_format: LogFormat::Text,
            chains: vec![],
        }
    }

    #[test]
    fn test_defaults() {
        let watcher = WatcherConfig::default();
        assert_eq!(watcher.sweep_interval(), Duration::from_secs(30));
        assert_eq!(watcher.max_block_range, 1000);

        let processor = ProcessorConfig::default();
        assert_eq!(processor.processing_interval(), Duration::from_secs(30));
        assert_eq!(processor.submission_delay(), Duration::from_secs(1));

        let monitor = MonitorConfig::default();
        assert_eq!(monitor.health_check_interval_secs, 300);
        assert_eq!(
            monitor.low_balance_threshold_wei.to_string(),
            "100000000000000000"
        );
    }

    #[test]
    fn test_private_key_validation() {
        let mut config = config();
        assert!(config.validate().is_ok());

        config.relayer.private_key = KEY.trim_start_matches("0x").to_string();
        assert!(config.validate().is_ok());

        config.relayer.private_key = "0x1234".to_string();
        assert!(config.validate().is_err());

        config.relayer.private_key = format!("0x{}", "zz".repeat(32));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_telegram_requires_both_fields() {
        let mut config = config();
        config.alerts.telegram_bot_token = Some("token".to_string());
        assert!(config.validate().is_err());
        config.alerts.telegram_chat_id = Some("42".to_string());
        assert!(config.validate().is_ok());
        assert!(config.alerts.telegram_enabled());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut config = config();
        config.alerts.discord_webhook_url = Some("https://discord.example/hook".to_string());
        let debug = format!("{:?}", config);
        assert!(!debug.contains(KEY));
        assert!(!debug.contains("postgres://"));
        assert!(!debug.contains("secret"));
        assert!(!debug.contains("discord.example"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("TEXT".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    #[serial]
    fn test_load_from_env() {
        env::set_var("DATABASE_URL", "postgres://localhost/relayer");
        env::set_var("RELAYER_PRIVATE_KEY", KEY);
        env::set_var("MAX_BLOCK_RANGE", "250");
        env::set_var("BSC_RPC_URL", "http://localhost:8545");
        env::set_var(
            "BSC_BRIDGE_ADDRESS",
            "0x0000000000000000000000000000000000000001",
        );

        let config = Config::load_from_env().unwrap();
        assert_eq!(config.watcher.max_block_range, 250);
        assert_eq!(config.processor.submission_delay_ms, 1000);
        let bsc = config.chains.iter().find(|c| c.chain_id == 56).unwrap();
        assert_eq!(bsc.rpc_url.as_deref(), Some("http://localhost:8545"));

        env::set_var("MAX_BLOCK_RANGE", "lots");
        assert!(Config::load_from_env().is_err());

        for key in [
            "DATABASE_URL",
            "RELAYER_PRIVATE_KEY",
            "MAX_BLOCK_RANGE",
            "BSC_RPC_URL",
            "BSC_BRIDGE_ADDRESS",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_missing_database_url() {
        env::remove_var("DATABASE_URL");
        let err = Config::load_from_env().unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }
}
