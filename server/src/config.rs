//! Server configuration.
//!
//! Loaded once from a TOML file at startup and shared immutably across
//! workers.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// TCP port to listen on.
    pub port: u16,

    /// Bind address; all interfaces when unset.
    #[serde(default)]
    pub address: Option<String>,

    /// Document root.
    #[serde(default = "default_htdocs")]
    pub htdocs: String,

    /// Number of worker event loops.
    #[serde(default = "default_num_worker")]
    pub num_worker: usize,

    /// Seconds a stream may sit idle waiting for request bytes.
    #[serde(default = "default_stream_timeout")]
    pub stream_read_timeout: f64,

    /// Seconds a stream may sit blocked by flow control.
    #[serde(default = "default_stream_timeout")]
    pub stream_write_timeout: f64,

    /// Pad octets added to each padded-capable frame.
    #[serde(default)]
    pub padding: u8,

    /// SETTINGS_HEADER_TABLE_SIZE to advertise; codec default when unset.
    #[serde(default)]
    pub header_table_size: Option<u32>,

    /// Serve plain TCP instead of TLS.
    #[serde(default)]
    pub no_tls: bool,

    /// Request a client certificate, but accept anything (test only).
    #[serde(default)]
    pub verify_client: bool,

    /// gzip-encode synthesized error bodies.
    #[serde(default)]
    pub error_gzip: bool,

    /// Respond as soon as request headers are complete, ignoring the body.
    #[serde(default)]
    pub early_response: bool,

    /// TLS key material; required unless `no_tls`.
    #[serde(default)]
    pub tls: Option<TlsFiles>,

    /// Static trailer fields appended to every file response.
    #[serde(default)]
    pub trailer: Vec<TrailerField>,

    /// Map from request path to the paths pushed alongside it.
    #[serde(default)]
    pub push: HashMap<String, Vec<String>>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// TLS certificate and key locations (PEM).
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsFiles {
    pub cert_file: String,
    pub private_key_file: String,
}

/// One static trailer field.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrailerField {
    pub name: String,
    pub value: String,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level filter, e.g. "info" or "h2d=debug".
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_htdocs() -> String {
    ".".to_string()
}

fn default_num_worker() -> usize {
    1
}

fn default_stream_timeout() -> f64 {
    60.0
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn parse(contents: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if !self.no_tls && self.tls.is_none() {
            return Err("TLS is enabled but [tls] cert_file/private_key_file are missing \
                        (set no_tls = true to serve cleartext)"
                .into());
        }
        if self.stream_read_timeout <= 0.0 || self.stream_write_timeout <= 0.0 {
            return Err("stream timeouts must be positive".into());
        }
        if self.num_worker == 0 {
            return Err("num_worker must be at least 1".into());
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.stream_read_timeout)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.stream_write_timeout)
    }

    /// `:scheme` for pushed requests and redirects.
    pub fn scheme(&self) -> &'static str {
        if self.no_tls { "http" } else { "https" }
    }
}
