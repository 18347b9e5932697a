//! Mock server configuration.

use crate::types::{duration_ms, ConfigError, ResponseData};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Mode selected when a server starts unless `defaultMode` says otherwise.
pub const DEFAULT_MODE: &str = "default";

/// Everything a [`MockServer`](crate::MockServer) needs to start.
///
/// ```yaml
/// host: localhost
/// port: 18080
/// channelSize: 5
/// responses:
///   default:
///     - uri: /text
///       method: POST
///       status: 200
///       body: hello
///       headers:
///         content-type: ["text/plain; charset=utf-8"]
///       waitMs: 250
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    pub host: String,
    /// Port to listen on, 0 lets the OS pick one.
    #[serde(default)]
    pub port: u16,
    /// Capacity of the captured-request queue.
    #[serde(default = "default_channel_size")]
    pub channel_size: usize,
    /// Stubs grouped by mode name. Order matters: the first match wins.
    #[serde(default)]
    pub responses: HashMap<String, Vec<ResponseData>>,
    /// Mode active before the first `set_mode` call.
    #[serde(default = "default_mode")]
    pub default_mode: String,
    /// How long a handler waits for room in a full capture queue before
    /// dropping the capture.
    #[serde(
        default = "default_capture_timeout",
        rename = "captureTimeoutMs",
        with = "duration_ms"
    )]
    pub capture_timeout: Duration,
    /// Grace period given to in-flight connections on close.
    #[serde(
        default = "default_shutdown_timeout",
        rename = "shutdownTimeoutMs",
        with = "duration_ms"
    )]
    pub shutdown_timeout: Duration,
}

fn default_channel_size() -> usize {
    16
}

fn default_mode() -> String {
    DEFAULT_MODE.to_string()
}

fn default_capture_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            channel_size: default_channel_size(),
            responses: HashMap::new(),
            default_mode: default_mode(),
            capture_timeout: default_capture_timeout(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl Configuration {
    pub fn new(host: impl Into<String>, port: u16, channel_size: usize) -> Self {
        Self {
            host: host.into(),
            port,
            channel_size,
            ..Default::default()
        }
    }

    /// Register `responses` under `mode`, replacing any previous list.
    pub fn with_mode(mut self, mode: impl Into<String>, responses: Vec<ResponseData>) -> Self {
        self.responses.insert(mode.into(), responses);
        self
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Configuration = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Configuration = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file. `.json` files are parsed as JSON, anything else as YAML.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            Self::from_json_str(&contents)
        } else {
            Self::from_yaml_str(&contents)
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }

        if self.channel_size == 0 {
            return Err(ConfigError::ZeroChannelSize);
        }

        for (mode, responses) in &self.responses {
            for response in responses {
                if hyper::Method::from_bytes(response.method.as_bytes()).is_err() {
                    return Err(ConfigError::InvalidMethod {
                        mode: mode.clone(),
                        method: response.method.clone(),
                    });
                }

                if !response.uri.starts_with('/') {
                    return Err(ConfigError::InvalidUri {
                        mode: mode.clone(),
                        uri: response.uri.clone(),
                    });
                }

                if hyper::StatusCode::from_u16(response.status).is_err() {
                    return Err(ConfigError::InvalidStatus {
                        mode: mode.clone(),
                        method: response.method.clone(),
                        uri: response.uri.clone(),
                        status: response.status,
                    });
                }
            }
        }

        Ok(())
    }
}
