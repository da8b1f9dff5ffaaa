use std::path::Path;
use std::time::Duration;

use error_stack::{Report, ResultExt};
use serde::Deserialize;

use crate::error::ConfigError;

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

fn default_data_dir() -> String {
    "./data".into()
}

fn default_interval_secs() -> u64 {
    30
}

fn default_history_capacity() -> usize {
    20
}

fn default_symbol() -> String {
    "BTC".into()
}

fn default_quote_currency() -> String {
    "USD".into()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_requests_per_minute() -> u32 {
    30
}

fn default_send_timeout_secs() -> u64 {
    10
}

fn default_smtp_port() -> u16 {
    587
}

fn default_telegram_api() -> String {
    "https://api.telegram.org".into()
}

fn default_push_server() -> String {
    "https://ntfy.sh".into()
}

fn default_whatsapp_api() -> String {
    "https://graph.facebook.com/v19.0".into()
}

fn default_template_name() -> String {
    "price_alert".into()
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Accepted values: `"text"` | `"json"`
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            history_capacity: default_history_capacity(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default = "default_quote_currency")]
    pub quote_currency: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    pub binance_base_url: Option<String>,
    pub coinbase_base_url: Option<String>,
    pub coingecko_base_url: Option<String>,
}

impl ProvidersConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            quote_currency: default_quote_currency(),
            request_timeout_secs: default_request_timeout_secs(),
            requests_per_minute: default_requests_per_minute(),
            binance_base_url: None,
            coinbase_base_url: None,
            coingecko_base_url: None,
        }
    }
}

/// Global channel switches and credentials. A missing section disables the channel.
#[derive(Debug, Deserialize)]
pub struct ChannelsConfig {
    /// Upper bound on a single send, for every network channel.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    pub email: Option<EmailConfig>,
    pub telegram: Option<TelegramConfig>,
    pub push: Option<PushConfig>,
    pub whatsapp: Option<WhatsAppConfig>,
    pub terminal: Option<TerminalConfig>,
}

impl ChannelsConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            send_timeout_secs: default_send_timeout_secs(),
            email: None,
            telegram: None,
            push: None,
            whatsapp: None,
            terminal: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub enabled: bool,
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    pub bot_token: Option<String>,
    #[serde(default = "default_telegram_api")]
    pub api_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_push_server")]
    pub server_url: String,
    pub topic: Option<String>,
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhatsAppConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_whatsapp_api")]
    pub api_base_url: String,
    pub phone_number_id: Option<String>,
    pub access_token: Option<String>,
    #[serde(default = "default_template_name")]
    pub template_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TerminalConfig {
    #[serde(default)]
    pub enabled: bool,
}

/// Load and validate an `AppConfig` from a TOML file at `path`.
pub fn load(path: &Path) -> Result<AppConfig, Report<ConfigError>> {
    let content = std::fs::read_to_string(path)
        .change_context(ConfigError::ReadFile)
        .attach_with(|| format!("path: {}", path.display()))?;

    let config: AppConfig = toml::from_str(&content).change_context(ConfigError::Parse {
        reason: "invalid TOML syntax or schema mismatch".into(),
    })?;

    validate(&config)?;

    Ok(config)
}

const VALID_LOG_FORMATS: &[&str] = &["text", "json"];

fn validate(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    validate_general(config)?;
    validate_monitor(config)?;
    validate_providers(config)?;
    validate_channels(config)?;
    Ok(())
}

fn validate_general(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    if !VALID_LOG_FORMATS.contains(&config.general.log_format.as_str()) {
        return Err(Report::new(ConfigError::Validation {
            field: format!(
                "general.log_format \"{}\" is not one of {:?}",
                config.general.log_format, VALID_LOG_FORMATS
            ),
        }));
    }
    Ok(())
}

fn validate_monitor(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    if config.monitor.interval_secs == 0 {
        return Err(Report::new(ConfigError::Validation {
            field: "monitor.interval_secs must be greater than zero".into(),
        }));
    }
    if config.monitor.history_capacity == 0 {
        return Err(Report::new(ConfigError::Validation {
            field: "monitor.history_capacity must be greater than zero".into(),
        }));
    }
    Ok(())
}

fn validate_providers(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    let providers = &config.providers;
    if providers.symbol.trim().is_empty() {
        return Err(Report::new(ConfigError::Validation {
            field: "providers.symbol must not be empty".into(),
        }));
    }
    if providers.quote_currency.trim().is_empty() {
        return Err(Report::new(ConfigError::Validation {
            field: "providers.quote_currency must not be empty".into(),
        }));
    }
    if providers.request_timeout_secs == 0 {
        return Err(Report::new(ConfigError::Validation {
            field: "providers.request_timeout_secs must be greater than zero".into(),
        }));
    }
    if providers.requests_per_minute == 0 {
        return Err(Report::new(ConfigError::Validation {
            field: "providers.requests_per_minute must be greater than zero".into(),
        }));
    }
    Ok(())
}

fn validate_channels(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    if config.channels.send_timeout_secs == 0 {
        return Err(Report::new(ConfigError::Validation {
            field: "channels.send_timeout_secs must be greater than zero".into(),
        }));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn parse(toml: &str) -> AppConfig {
        toml::from_str(toml).expect("parse failed")
    }

    #[test]
    fn valid_full_config_parses() {
        let toml = r#"
[general]
log_level = "debug"
log_format = "json"
data_dir = "/tmp/data"

[monitor]
interval_secs = 15
history_capacity = 50

[providers]
symbol = "ETH"
quote_currency = "EUR"
request_timeout_secs = 5
requests_per_minute = 12
coinbase_base_url = "http://localhost:9000"

[channels.email]
enabled = true
smtp_host = "smtp.example.com"
from_address = "alerts@example.com"

[channels.telegram]
enabled = true
bot_token = "123:abc"

[channels.push]
enabled = false
topic = "btc-alerts"

[channels.whatsapp]
enabled = true
phone_number_id = "1055"
access_token = "token"
"#;
        let config = parse(toml);
        assert!(validate(&config).is_ok());
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.monitor.interval(), Duration::from_secs(15));
        assert_eq!(config.monitor.history_capacity, 50);
        assert_eq!(config.providers.symbol, "ETH");
        assert_eq!(
            config.providers.coinbase_base_url.as_deref(),
            Some("http://localhost:9000")
        );

        let email = config.channels.email.expect("email section");
        assert!(email.enabled);
        assert_eq!(email.smtp_port, 587);

        let telegram = config.channels.telegram.expect("telegram section");
        assert_eq!(telegram.api_base_url, "https://api.telegram.org");

        let whatsapp = config.channels.whatsapp.expect("whatsapp section");
        assert_eq!(whatsapp.template_name, "price_alert");
        assert!(config.channels.terminal.is_none());
    }

    #[test]
    fn defaults_applied_when_fields_omitted() {
        let config = parse("");
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.general.log_format, "text");
        assert_eq!(config.general.data_dir, "./data");
        assert_eq!(config.monitor.interval_secs, 30);
        assert_eq!(config.monitor.history_capacity, 20);
        assert_eq!(config.providers.symbol, "BTC");
        assert_eq!(config.providers.quote_currency, "USD");
        assert_eq!(config.providers.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.channels.send_timeout(), Duration::from_secs(10));
        assert!(config.channels.email.is_none());
        assert!(config.channels.push.is_none());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn zero_interval_rejected() {
        let config = parse(
            r#"
[monitor]
interval_secs = 0
"#,
        );
        assert!(validate(&config).is_err());
    }

    #[test]
    fn zero_send_timeout_rejected() {
        let config = parse(
            r#"
[channels]
send_timeout_secs = 0
"#,
        );
        assert!(validate(&config).is_err());
    }

    #[test]
    fn zero_history_capacity_rejected() {
        let config = parse(
            r#"
[monitor]
history_capacity = 0
"#,
        );
        assert!(validate(&config).is_err());
    }

    #[test]
    fn unknown_log_format_rejected() {
        let config = parse(
            r#"
[general]
log_format = "xml"
"#,
        );
        assert!(validate(&config).is_err());
    }

    #[test]
    fn enabled_channel_without_credentials_is_not_a_config_error() {
        let config = parse(
            r#"
[channels.telegram]
enabled = true
"#,
        );
        assert!(validate(&config).is_ok());
        assert!(config.channels.telegram.expect("telegram").bot_token.is_none());
    }

    #[test]
    fn load_reads_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[monitor]\ninterval_secs = 7").expect("write");
        let config = load(file.path()).expect("load");
        assert_eq!(config.monitor.interval_secs, 7);
    }

    #[test]
    fn load_missing_file_fails() {
        let result = load(Path::new("/definitely/not/here.toml"));
        assert!(result.is_err());
    }
}
