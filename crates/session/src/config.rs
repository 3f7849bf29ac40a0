//! Pipeline configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Authentication timing
pub struct AuthConfig;

impl AuthConfig {
    /// How often the proactive timer checks the held credential
    pub const PROACTIVE_TICK: Duration = Duration::from_secs(30);

    /// Credentials expiring within this many seconds are refreshed proactively
    pub const NEARING_EXPIRY_SECS: i64 = 60;

    /// Clock-skew buffer: credentials expiring within this many seconds count as expired
    pub const EXPIRY_BUFFER_SECS: i64 = 30;

    /// Delays before the second and third refresh attempts
    pub const REFRESH_BACKOFF: [Duration; 2] =
        [Duration::from_millis(200), Duration::from_millis(500)];
}

/// Submission watching timing
pub struct WatchConfig;

impl WatchConfig {
    /// Interval between status polls
    pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

    /// Push subscription lifetime for ephemeral runs
    pub const RUN_PUSH_TIMEOUT: Duration = Duration::from_secs(30);

    /// Push silence tolerated for graded submissions before relying on polls alone
    pub const SUBMIT_PUSH_SILENCE: Duration = Duration::from_secs(6);
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Environment-supplied endpoints and transport settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Base URL of the REST API
    pub api_base_url: String,

    /// Push channel URL; derived from the API URL when unset
    #[serde(default)]
    pub socket_url: Option<String>,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,

    /// File used to carry the access credential between invocations; off when unset
    #[serde(default)]
    pub session_cache: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000/api".to_string(),
            socket_url: None,
            request_timeout_secs: 30,
            session_cache: None,
        }
    }
}

impl PipelineConfig {
    /// Load configuration: defaults, then an optional file, then `CODELAB_*` variables
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or a value has the wrong type
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let mut builder = config::Config::builder()
            .set_default("api_base_url", defaults.api_base_url)?
            .set_default("request_timeout_secs", defaults.request_timeout_secs)?;

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let settings = builder
            .add_source(config::Environment::with_prefix("CODELAB").try_parsing(true))
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.api_base_url)
            .map_err(|e| ConfigError::Invalid(format!("api_base_url: {e}")))?;
        if let Some(socket_url) = &self.socket_url {
            url::Url::parse(socket_url)
                .map_err(|e| ConfigError::Invalid(format!("socket_url: {e}")))?;
        }
        Ok(())
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Push channel URL, falling back to the API origin with a websocket scheme
    ///
    /// # Errors
    ///
    /// Returns an error if the API URL has no host
    pub fn resolved_socket_url(&self) -> Result<String, ConfigError> {
        if let Some(socket_url) = &self.socket_url {
            return Ok(socket_url.clone());
        }

        let mut url = url::Url::parse(&self.api_base_url)
            .map_err(|e| ConfigError::Invalid(format!("api_base_url: {e}")))?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|()| ConfigError::Invalid("cannot derive socket url".into()))?;
        url.set_path("/ws");
        url.set_query(None);
        Ok(url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_defaults_without_file() {
        let config = PipelineConfig::load(None).unwrap();
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "api_base_url = \"https://codelab.example/api\"\nrequest_timeout_secs = 5"
        )
        .unwrap();

        let config = PipelineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.api_base_url, "https://codelab.example/api");
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(
            config.resolved_socket_url().unwrap(),
            "wss://codelab.example/ws"
        );
    }

    #[test]
    fn test_explicit_socket_url_wins() {
        let config = PipelineConfig {
            socket_url: Some("ws://push.local:4000/socket".into()),
            ..PipelineConfig::default()
        };
        assert_eq!(
            config.resolved_socket_url().unwrap(),
            "ws://push.local:4000/socket"
        );
    }
}
