use crate::error::{NullmailError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_HOSTNAME: &str = "temp-smtp.local";
pub const DEFAULT_LISTEN_ADDR: &str = ":2525";
pub const MAX_MESSAGE_SIZE: i64 = 25_000_000;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub smtp: SmtpConfig,
    pub store: StoreConfig,
    pub validation: ValidationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub hostname: String,
    pub listen_addr: String,
    pub health_port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub max_message_size: i64,
    /// Opt into RFC 5321 sequencing replies (503) instead of the lenient
    /// profile that accepts MAIL/RCPT/DATA in any order.
    pub strict_sequencing: bool,
    pub enable_tls: bool,
    pub tls_cert_path: String,
    pub tls_key_path: String,
    /// Substrings that mark a VRFY argument as local to this service.
    pub local_domains: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub redis_addr: String,
    pub redis_password: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub allow_utf8: bool,
    pub require_tld: bool,
    pub allow_ip_domains: bool,
    pub valid_domains: Vec<String>,
    pub invalid_domains: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub debug: bool,
    pub json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: DEFAULT_HOSTNAME.to_string(),
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            health_port: 8080,
        }
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            max_message_size: MAX_MESSAGE_SIZE,
            strict_sequencing: false,
            enable_tls: true,
            tls_cert_path: "server.crt".to_string(),
            tls_key_path: "server.key".to_string(),
            local_domains: vec![
                "@nullmail.local".to_string(),
                "@nullmail.nitin.sh".to_string(),
            ],
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_addr: "localhost:6379".to_string(),
            redis_password: "dev123".to_string(),
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            allow_utf8: true,
            require_tld: true,
            allow_ip_domains: false,
            valid_domains: Vec::new(),
            invalid_domains: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            debug: false,
            json: false,
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| NullmailError::Config(e.to_string()))?;

        toml::from_str(&content).map_err(|e| NullmailError::Config(e.to_string()))
    }

    /// Layer environment overrides on top of the current values.
    pub fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("REDIS_ADDR") {
            if !addr.is_empty() {
                self.store.redis_addr = addr;
            }
        }
        if let Ok(password) = std::env::var("REDIS_PASSWORD") {
            if !password.is_empty() {
                self.store.redis_password = password;
            }
        }
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(port) = port.parse() {
                self.server.health_port = port;
            }
        }
        if std::env::var("DEBUG").as_deref() == Ok("true") {
            self.logging.debug = true;
        }
        if std::env::var("ENV").as_deref() == Ok("production") {
            self.logging.json = true;
        }
    }
}

/// Expand a bare `:port` listen suffix into a bindable address.
pub fn normalize_listen_addr(addr: &str) -> String {
    if let Some(port) = addr.strip_prefix(':') {
        format!("0.0.0.0:{port}")
    } else {
        addr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.hostname, "temp-smtp.local");
        assert_eq!(config.server.listen_addr, ":2525");
        assert_eq!(config.smtp.max_message_size, 25_000_000);
        assert!(!config.smtp.strict_sequencing);
        assert!(config.validation.allow_utf8);
        assert!(config.validation.require_tld);
        assert!(!config.validation.allow_ip_domains);
    }

    #[test]
    fn test_normalize_listen_addr() {
        assert_eq!(normalize_listen_addr(":2525"), "0.0.0.0:2525");
        assert_eq!(normalize_listen_addr("127.0.0.1:2525"), "127.0.0.1:2525");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str("[smtp]\nstrict_sequencing = true\n").unwrap();
        assert!(config.smtp.strict_sequencing);
        assert_eq!(config.server.hostname, "temp-smtp.local");
        assert_eq!(config.store.redis_addr, "localhost:6379");
    }
}
