//! Gateway configuration.
//!
//! Read once at startup from a JSON file and immutable afterwards.
//! Durations are carried as integer milliseconds in the file form.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::Method;
use crate::error::{Error, Result};

fn default_listen_host() -> String {
    "127.0.0.1".into()
}

fn default_listen_port() -> u16 {
    1080
}

fn default_method() -> String {
    "aes-256-cfb".into()
}

fn default_protocol() -> String {
    "origin".into()
}

fn default_obfs() -> String {
    "plain".into()
}

fn default_idle_timeout_ms() -> u64 {
    300_000
}

/// Gateway configuration, read-only after startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Local SOCKS5 listen host.
    #[serde(default = "default_listen_host")]
    pub listen_host: String,
    /// Local SOCKS5 listen port.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Remote SSR server host (IP literal or hostname).
    pub remote_host: String,
    /// Remote SSR server port.
    pub remote_port: u16,
    /// Shared password the cipher key is derived from.
    #[serde(default)]
    pub password: String,
    /// Cipher method name.
    #[serde(default = "default_method")]
    pub method: String,
    /// Protocol plugin name.
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Protocol plugin parameter.
    #[serde(default)]
    pub protocol_param: Option<String>,
    /// Obfs plugin name.
    #[serde(default = "default_obfs")]
    pub obfs: String,
    /// Obfs plugin parameter.
    #[serde(default)]
    pub obfs_param: Option<String>,
    /// Idle timeout in milliseconds; an idle socket tears its tunnel down.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Whether UDP ASSOCIATE requests are acknowledged as allowed.
    #[serde(default)]
    pub udp: bool,
}

impl Config {
    /// Parse a configuration from its JSON file form.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Config =
            serde_json::from_str(text).map_err(|e| Error::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// The local listen address in `host:port` form.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }

    /// The idle timeout as a duration.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.listen_host.is_empty() {
            return Err(Error::config("listen_host cannot be empty"));
        }
        if self.remote_host.is_empty() {
            return Err(Error::config("remote_host cannot be empty"));
        }
        if self.remote_port == 0 {
            return Err(Error::config("remote_port cannot be 0"));
        }
        if self.idle_timeout_ms == 0 {
            return Err(Error::config("idle_timeout_ms cannot be 0"));
        }
        let method = Method::from_name(&self.method)
            .ok_or_else(|| Error::UnknownMethod(self.method.clone()))?;
        if method.is_stream() && self.password.is_empty() {
            return Err(Error::config("password cannot be empty for a real cipher"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_json() -> &'static str {
        r#"{
            "remote_host": "ssr.example.net",
            "remote_port": 8388,
            "password": "barfoo!"
        }"#
    }

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_json(minimal_json()).unwrap();
        assert_eq!(config.listen_addr(), "127.0.0.1:1080");
        assert_eq!(config.method, "aes-256-cfb");
        assert_eq!(config.protocol, "origin");
        assert_eq!(config.obfs, "plain");
        assert_eq!(config.idle_timeout(), Duration::from_secs(300));
        assert!(!config.udp);
    }

    #[test]
    fn test_full_config() {
        let config = Config::from_json(
            r#"{
                "listen_host": "127.0.0.1",
                "listen_port": 1081,
                "remote_host": "203.0.113.5",
                "remote_port": 443,
                "password": "pw",
                "method": "rc4-md5",
                "protocol": "auth_aes128_sha1",
                "protocol_param": "17:secret",
                "obfs": "http_simple",
                "obfs_param": "cdn.example.org",
                "idle_timeout_ms": 60000,
                "udp": true
            }"#,
        )
        .unwrap();
        assert_eq!(config.listen_port, 1081);
        assert_eq!(config.protocol_param.as_deref(), Some("17:secret"));
        assert!(config.udp);
    }

    #[test]
    fn test_missing_remote_rejected() {
        assert!(Config::from_json(r#"{"password": "x"}"#).is_err());
    }

    #[test]
    fn test_unknown_method_rejected() {
        let json = r#"{
            "remote_host": "h", "remote_port": 1, "password": "x",
            "method": "rot13"
        }"#;
        assert!(matches!(
            Config::from_json(json),
            Err(Error::UnknownMethod(_))
        ));
    }

    #[test]
    fn test_empty_password_rejected_for_stream_cipher() {
        let json = r#"{"remote_host": "h", "remote_port": 1}"#;
        assert!(Config::from_json(json).is_err());

        // but fine for the none cipher
        let json = r#"{"remote_host": "h", "remote_port": 1, "method": "none"}"#;
        assert!(Config::from_json(json).is_ok());
    }
}
