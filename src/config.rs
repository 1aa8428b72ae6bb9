use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::parser::BodyPolicy;

/// Configuration for the server and the bundled file handlers.
///
/// Loaded from a `.env` file, an optional `trellis` config file and
/// environment variables with the "TRELLIS_" prefix, in increasing priority.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server host address. Defaults to "0.0.0.0".
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port number. Defaults to 4221.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory the `/files` routes read from and write to. Defaults to ".".
    #[serde(default = "default_directory")]
    pub directory: PathBuf,
    /// Seconds an idle connection worker waits before exiting. Defaults to 6.
    #[serde(default = "default_keep_alive_secs")]
    pub worker_keep_alive_secs: u64,
    /// Reject requests with unframeable bodies instead of dropping the body.
    #[serde(default)]
    pub strict_body: bool,
    /// Gzip level from 0 to 9. Defaults to 6.
    #[serde(default = "default_gzip_level")]
    pub gzip_level: u32,
}

/// Implements conversion from the config crate's Config type to ServerConfig.
impl TryFrom<config::Config> for ServerConfig {
    type Error = config::ConfigError;

    fn try_from(config: config::Config) -> Result<Self, Self::Error> {
        config.try_deserialize()
    }
}

impl ServerConfig {
    /// Creates a new ServerConfig instance from environment variables and config file.
    ///
    /// This method will:
    /// 1. Load environment variables from a .env file if present
    /// 2. Load configuration from a "trellis" file (if it exists)
    /// 3. Override with environment variables prefixed with "TRELLIS_"
    ///
    /// # Errors
    /// Returns a ConfigError if configuration loading or parsing fails.
    pub fn new() -> Result<Self, config::ConfigError> {
        dotenv::dotenv().ok();

        let builder = config::Config::builder()
            .add_source(config::File::with_name("trellis").required(false))
            .add_source(config::Environment::with_prefix("TRELLIS"));

        builder.build()?.try_into()
    }

    pub fn worker_keep_alive(&self) -> Duration {
        Duration::from_secs(self.worker_keep_alive_secs)
    }

    /// `host:port` suitable for binding.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn body_policy(&self) -> BodyPolicy {
        if self.strict_body {
            BodyPolicy::Strict
        } else {
            BodyPolicy::Lenient
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    4221
}

fn default_directory() -> PathBuf {
    PathBuf::from(".")
}

fn default_keep_alive_secs() -> u64 {
    6
}

fn default_gzip_level() -> u32 {
    6
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            directory: default_directory(),
            worker_keep_alive_secs: default_keep_alive_secs(),
            strict_body: false,
            gzip_level: default_gzip_level(),
        }
    }
}
