//! Configuration for the MQTT client
//!
//! Loaded from TOML. Every field has a default, so an empty file is a valid
//! configuration. Credentials are never stored in the file: it names the
//! environment variables that hold them.

use crate::identity::{FixedIdSource, IdentityError, IdentitySource, MachineIdSource};
use crate::session::SessionSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Smallest usable rx/tx buffer
const MIN_BUFFER_SIZE: usize = 128;

/// Smallest keepalive `rumqttc` accepts
const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// Main client configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub identity: IdentitySection,
}

/// Session timing, buffers and broker access
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSection {
    /// Default broker host (`host`, `host:port` or `mqtt://host:port`)
    pub broker: Option<String>,
    /// How long each connect/publish/disconnect waits for its outcome
    #[serde(default = "default_response_timeout")]
    pub response_timeout_secs: u64,
    /// Liveness driver cadence in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Receive and transmit buffer size in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
}

fn default_response_timeout() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    100
}

fn default_buffer_size() -> usize {
    2048
}

fn default_keep_alive() -> u64 {
    60
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            broker: None,
            response_timeout_secs: default_response_timeout(),
            poll_interval_ms: default_poll_interval(),
            buffer_size: default_buffer_size(),
            keep_alive_secs: default_keep_alive(),
            username_env: None,
            password_env: None,
        }
    }
}

/// Where the device id comes from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentitySection {
    /// Fixed hex device id; takes precedence over the machine id file
    pub device_id: Option<String>,
    #[serde(default = "default_machine_id_path")]
    pub machine_id_path: PathBuf,
}

fn default_machine_id_path() -> PathBuf {
    PathBuf::from(crate::identity::DEFAULT_MACHINE_ID_PATH)
}

impl Default for IdentitySection {
    fn default() -> Self {
        Self {
            device_id: None,
            machine_id_path: default_machine_id_path(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ClientConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges and field consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        let client = &self.client;

        if client.response_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "response_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if client.poll_interval_ms == 0
            || client.poll_interval_ms >= client.response_timeout_secs.saturating_mul(1000)
        {
            return Err(ConfigError::InvalidConfig(format!(
                "poll_interval_ms must be between 1 and {} (the response timeout)",
                client.response_timeout_secs.saturating_mul(1000) - 1
            )));
        }
        if client.buffer_size < MIN_BUFFER_SIZE {
            return Err(ConfigError::InvalidConfig(format!(
                "buffer_size must be at least {MIN_BUFFER_SIZE} bytes"
            )));
        }
        if client.keep_alive_secs < MIN_KEEP_ALIVE_SECS {
            return Err(ConfigError::InvalidConfig(format!(
                "keep_alive_secs must be at least {MIN_KEEP_ALIVE_SECS}"
            )));
        }
        if client.password_env.is_some() && client.username_env.is_none() {
            return Err(ConfigError::InvalidConfig(
                "password_env requires username_env".to_string(),
            ));
        }
        if let Some(device_id) = &self.identity.device_id {
            FixedIdSource::from_hex(device_id).map_err(|e| {
                ConfigError::InvalidConfig(format!("identity.device_id: {e}"))
            })?;
        }

        Ok(())
    }

    /// Helper method to get environment variable with consistent error handling
    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// Get MQTT username from environment variable
    pub fn get_mqtt_username(&self) -> Option<String> {
        Self::get_env_var_optional(self.client.username_env.as_ref())
    }

    /// Get MQTT password from environment variable
    pub fn get_mqtt_password(&self) -> Option<String> {
        Self::get_env_var_optional(self.client.password_env.as_ref())
    }

    /// Username/password pair; a missing password becomes empty
    pub fn credentials(&self) -> Option<(String, String)> {
        let username = self.get_mqtt_username()?;
        Some((username, self.get_mqtt_password().unwrap_or_default()))
    }

    /// Device id source selected by the `[identity]` section
    pub fn identity_source(&self) -> Result<Box<dyn IdentitySource>, IdentityError> {
        match &self.identity.device_id {
            Some(device_id) => Ok(Box::new(FixedIdSource::from_hex(device_id)?)),
            None => Ok(Box::new(MachineIdSource::new(&self.identity.machine_id_path))),
        }
    }

    /// Session settings with credentials resolved from the environment
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            response_timeout: Duration::from_secs(self.client.response_timeout_secs),
            poll_interval: Duration::from_millis(self.client.poll_interval_ms),
            buffer_size: self.client.buffer_size,
            keep_alive: Duration::from_secs(self.client.keep_alive_secs),
            credentials: self.credentials(),
        }
    }
}
