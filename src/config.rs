use lettre::message::Mailbox;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Environment variable consulted when `portal.password` is not in the file.
pub const PORTAL_PASSWORD_ENV: &str = "HOMECASE_PASSWORD";
/// Environment variable consulted when `smtp.password` is not in the file.
pub const SMTP_PASSWORD_ENV: &str = "SMTP_PASSWORD";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub portal: PortalConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PortalConfig {
    #[serde(default)]
    pub login_url: String,
    #[serde(default)]
    pub messages_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Minimum pause between two successive portal requests.
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default = "default_portal_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_message_limit")]
    pub message_limit: usize,
    #[serde(default = "default_max_activities")]
    pub max_activities: usize,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            login_url: String::new(),
            messages_url: String::new(),
            username: String::new(),
            password: String::new(),
            request_delay_ms: default_request_delay_ms(),
            timeout_secs: default_portal_timeout_secs(),
            message_limit: default_message_limit(),
            max_activities: default_max_activities(),
        }
    }
}

fn default_request_delay_ms() -> u64 {
    500
}
fn default_portal_timeout_secs() -> u64 {
    10
}
fn default_message_limit() -> usize {
    24
}
fn default_max_activities() -> usize {
    40
}

impl PortalConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// `sqlite:<path>` or `postgres://...`.
    #[serde(default)]
    pub url: String,
    /// PostgreSQL schema holding the messages table. Ignored for SQLite.
    #[serde(default = "default_schema")]
    pub schema: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            schema: default_schema(),
        }
    }
}

fn default_schema() -> String {
    "public".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SmtpConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_smtp_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            timeout_secs: default_smtp_timeout_secs(),
        }
    }
}

fn default_smtp_port() -> u16 {
    587
}
fn default_smtp_timeout_secs() -> u64 {
    30
}

impl SmtpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmailConfig {
    /// Sender address. Falls back to `smtp.username` when empty.
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default = "default_greeting")]
    pub greeting: String,
    #[serde(default)]
    pub signature: Option<String>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            from: String::new(),
            to: Vec::new(),
            cc: Vec::new(),
            greeting: default_greeting(),
            signature: None,
        }
    }
}

fn default_greeting() -> String {
    "Liebe Mieterin".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Parse a TOML document without validating it.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Fill secrets that were left out of the file from the environment.
    pub fn apply_env(&mut self) {
        if self.portal.password.is_empty() {
            if let Ok(pw) = std::env::var(PORTAL_PASSWORD_ENV) {
                self.portal.password = pw;
            }
        }
        if self.smtp.password.is_empty() {
            if let Ok(pw) = std::env::var(SMTP_PASSWORD_ENV) {
                self.smtp.password = pw;
            }
        }
    }

    /// The address mails are sent from.
    pub fn sender(&self) -> &str {
        if self.email.from.is_empty() {
            &self.smtp.username
        } else {
            &self.email.from
        }
    }

    /// Check every required value and report all missing ones at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("portal.login_url", &self.portal.login_url),
            ("portal.messages_url", &self.portal.messages_url),
            ("portal.username", &self.portal.username),
            ("portal.password", &self.portal.password),
            ("store.url", &self.store.url),
            ("smtp.host", &self.smtp.host),
            ("smtp.username", &self.smtp.username),
            ("smtp.password", &self.smtp.password),
        ];

        let mut missing: Vec<String> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| name.to_string())
            .collect();
        if self.email.to.iter().all(|addr| addr.trim().is_empty()) {
            missing.push("email.to".to_string());
        }
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        for url in [&self.portal.login_url, &self.portal.messages_url] {
            reqwest::Url::parse(url)
                .map_err(|e| ConfigError::Invalid(format!("'{}' is not a valid URL: {}", url, e)))?;
        }

        if !is_plain_identifier(&self.store.schema) {
            return Err(ConfigError::Invalid(format!(
                "store.schema '{}' must contain only letters, digits and underscores",
                self.store.schema
            )));
        }

        if self.portal.message_limit == 0 {
            return Err(ConfigError::Invalid(
                "portal.message_limit must be >= 1".to_string(),
            ));
        }
        if self.portal.timeout_secs == 0 || self.smtp.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "timeouts must be >= 1 second".to_string(),
            ));
        }

        let addresses = std::iter::once(self.sender())
            .chain(self.email.to.iter().map(String::as_str))
            .chain(self.email.cc.iter().map(String::as_str));
        for address in addresses {
            address.trim().parse::<Mailbox>().map_err(|e| {
                ConfigError::Invalid(format!("'{}' is not a valid mail address: {}", address, e))
            })?;
        }

        Ok(())
    }
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Read and parse the config file, then fill secrets from the environment.
///
/// Does not validate; call [`Config::validate`] once logging is set up.
pub fn read_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let mut config = Config::from_toml_str(&content)?;
    config.apply_env();
    Ok(config)
}

/// Read, parse and validate the config file.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let config = read_config(path)?;
    config.validate()?;
    Ok(config)
}
