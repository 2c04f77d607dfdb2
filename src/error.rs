//! Error types for the SSR local gateway.

use thiserror::Error;

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a tunnel or its cipher pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// Symmetric cipher stage failed (wrong password or corrupted stream)
    #[error("invalid password or corrupted cipher stream")]
    InvalidPassword,

    /// Obfuscation decoder rejected inbound data
    #[error("obfuscation decode failed")]
    ClientDecode,

    /// Protocol post-decrypt rejected an inbound frame
    #[error("protocol frame verification failed")]
    ClientPostDecrypt,

    /// SOCKS5 parser rejected client input
    #[error("SOCKS5 error: {0}")]
    Socks5(String),

    /// Upstream hostname did not resolve
    #[error("could not resolve {0}")]
    Resolve(String),

    /// Upstream TCP connect failed or was refused
    #[error("upstream connect failed: {0}")]
    Connect(std::io::Error),

    /// Idle timer expired
    #[error("idle timeout expired")]
    Timeout,

    /// Underlying read/write error other than EOF
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    /// Cipher method name not in the built-in table
    #[error("unknown cipher method: {0}")]
    UnknownMethod(String),

    /// Protocol or obfs plugin name not in the registry
    #[error("unsupported plugin: {0}")]
    UnknownPlugin(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Reassembly buffer exceeded its hard cap
    #[error("buffer limit exceeded: {0} bytes")]
    BufferLimit(usize),
}

impl Error {
    /// Create a new SOCKS5 parse error.
    pub fn socks5(msg: impl Into<String>) -> Self {
        Error::Socks5(msg.into())
    }

    /// Create a new configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Whether this error came out of the cipher pipeline.
    pub fn is_pipeline_failure(&self) -> bool {
        matches!(
            self,
            Error::InvalidPassword | Error::ClientDecode | Error::ClientPostDecrypt
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidPassword;
        assert_eq!(err.to_string(), "invalid password or corrupted cipher stream");

        let err = Error::UnknownMethod("aes-1-cfb".into());
        assert_eq!(err.to_string(), "unknown cipher method: aes-1-cfb");
    }

    #[test]
    fn test_pipeline_failure() {
        assert!(Error::ClientDecode.is_pipeline_failure());
        assert!(Error::ClientPostDecrypt.is_pipeline_failure());
        assert!(!Error::Timeout.is_pipeline_failure());
    }
}
