//! Configuration types.
//!
//! Every key resolves as environment variable > JSON config file > default.
//! `IMAP_USER`, `IMAP_PASSWORD` and `IMAP_HOST` have no default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;
use tracing::{debug, error};

use crate::error::ConfigError;

/// Default config file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// IMAP session configuration.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub user: String,
    pub password: SecretString,
    pub host: String,
    pub port: u16,
    /// Implicit TLS (IMAPS) when true, plain TCP otherwise.
    pub tls: bool,
    /// Mailbox to read from.
    pub mailbox: String,
    /// Only keep subjects starting with this. Empty disables the filter.
    pub match_prefix: String,
    /// How many of the most recent messages to fetch.
    pub fetch_limit: u32,
    /// Drop messages that are already `\Seen`.
    pub only_unread: bool,
    /// Per-operation timeout. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl ImapConfig {
    /// Config with defaults for everything but credentials and host.
    pub fn new(user: impl Into<String>, password: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: SecretString::from(password.into()),
            host: host.into(),
            port: 993,
            tls: true,
            mailbox: "INBOX".to_string(),
            match_prefix: String::new(),
            fetch_limit: 5,
            only_unread: false,
            timeout: None,
        }
    }

    /// Build config from the process environment and the config file.
    ///
    /// The file is `IMAP_CONFIG_PATH`, or `config.json` in the working
    /// directory. A broken file is logged and ignored.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = std::env::var("IMAP_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));

        let file = match FileConfig::load(&path) {
            Ok(file) => file.unwrap_or_default(),
            Err(e) => {
                error!(path = %path.display(), "Error loading config file: {e}");
                FileConfig::default()
            }
        };

        Self::resolve(|key| std::env::var(key).ok(), &file)
    }

    /// Resolve every key from `lookup` (environment) then `file`.
    pub fn resolve<F>(lookup: F, file: &FileConfig) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let or_file = |key: &str, file_value: &Option<String>| {
            env(key).or_else(|| file_value.clone().filter(|v| !v.is_empty()))
        };

        let user = or_file("IMAP_USER", &file.user);
        let password = or_file("IMAP_PASSWORD", &file.password);
        let host = or_file("IMAP_HOST", &file.host);

        let missing: Vec<&str> = [
            ("IMAP_USER", user.is_none()),
            ("IMAP_PASSWORD", password.is_none()),
            ("IMAP_HOST", host.is_none()),
        ]
        .iter()
        .filter(|(_, absent)| *absent)
        .map(|(key, _)| *key)
        .collect();
        if !missing.is_empty() {
            return Err(ConfigError::MissingRequired {
                key: missing.join(", "),
                hint: "Set the environment variables or add them to the config file.".into(),
            });
        }

        let mut config = Self::new(
            user.unwrap_or_default(),
            password.unwrap_or_default(),
            host.unwrap_or_default(),
        );

        if let Some(port) = env("IMAP_PORT").or_else(|| file.port.as_ref().map(PortValue::to_string)) {
            config.port = parse_value("IMAP_PORT", &port)?;
        }

        config.tls = match env("IMAP_TLS") {
            Some(v) => v != "false",
            None => file.tls.unwrap_or(true),
        };

        if let Some(mailbox) = or_file("IMAP_MAILBOX", &file.mailbox) {
            config.mailbox = mailbox;
        }

        if let Some(prefix) = or_file("IMAP_MATCH_PREFIX", &file.match_prefix) {
            config.match_prefix = prefix;
        }

        if let Some(limit) = env("IMAP_FETCH_LIMIT") {
            config.fetch_limit = parse_value("IMAP_FETCH_LIMIT", &limit)?;
        } else if let Some(limit) = file.fetch_limit {
            config.fetch_limit = limit;
        }
        if config.fetch_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: "IMAP_FETCH_LIMIT".into(),
                message: "must be at least 1".into(),
            });
        }

        config.only_unread = match env("IMAP_ONLY_UNREAD") {
            Some(v) => !is_false(&v),
            None => file.only_unread.unwrap_or(false),
        };

        let timeout_secs: Option<u64> = match env("IMAP_TIMEOUT_SECS") {
            Some(v) => Some(parse_value("IMAP_TIMEOUT_SECS", &v)?),
            None => file.timeout_secs,
        };
        config.timeout = timeout_secs.filter(|s| *s > 0).map(Duration::from_secs);

        debug!(
            host = %config.host,
            port = config.port,
            tls = config.tls,
            mailbox = %config.mailbox,
            "Resolved IMAP configuration"
        );
        Ok(config)
    }
}

/// Optional settings read from the JSON config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConfig {
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: Option<String>,
    pub port: Option<PortValue>,
    pub tls: Option<bool>,
    pub mailbox: Option<String>,
    pub match_prefix: Option<String>,
    pub fetch_limit: Option<u32>,
    pub only_unread: Option<bool>,
    pub timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Read `path`. A missing file is `Ok(None)`.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))
    }
}

/// The port may be written as a number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PortValue {
    Number(u16),
    Text(String),
}

impl std::fmt::Display for PortValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortValue::Number(n) => write!(f, "{n}"),
            PortValue::Text(s) => f.write_str(s.trim()),
        }
    }
}

fn is_false(v: &str) -> bool {
    matches!(v.trim().to_ascii_lowercase().as_str(), "false" | "0" | "no" | "off")
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{raw:?}: {e}"),
    })
}
