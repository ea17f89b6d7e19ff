//! Configuration loading for the TASKGRID client.
//!
//! All fields are required unless explicitly marked optional. No defaults.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use taskgrid_core::{CurrentUser, UserId};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub realtime_endpoint: String,
    pub notify_function_url: String,
    pub auth: AuthConfig,
    pub user: UserConfig,
    pub request_timeout_ms: u64,
    pub write_debounce_ms: u64,
    pub state_path: PathBuf,
    /// `tracing` filter directive; `RUST_LOG` takes precedence.
    pub log_filter: Option<String>,
    pub reconnect: ReconnectConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    pub anon_key: String,
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserConfig {
    pub id: uuid::Uuid,
    pub email: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconnectConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
    pub jitter_ms: u64,
}

impl ReconnectConfig {
    /// Delay before the attempt following one that waited `previous_ms`.
    pub fn next_backoff(&self, previous_ms: u64) -> u64 {
        let next = (previous_ms as f64 * self.multiplier) as u64;
        next.clamp(self.initial_ms, self.max_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or TASKGRID_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}

impl ClientConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        let config = Self::from_path(&path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_base_url.trim().is_empty() {
            return Err(invalid("api_base_url", "must not be empty"));
        }
        if !self.realtime_endpoint.starts_with("ws://")
            && !self.realtime_endpoint.starts_with("wss://")
        {
            return Err(invalid("realtime_endpoint", "must be a ws:// or wss:// URL"));
        }
        if self.notify_function_url.trim().is_empty() {
            return Err(invalid("notify_function_url", "must not be empty"));
        }
        if self.auth.anon_key.trim().is_empty() {
            return Err(invalid("auth.anon_key", "must not be empty"));
        }
        if !self.user.email.contains('@') {
            return Err(invalid("user.email", "must be an email address"));
        }
        if self.request_timeout_ms == 0 {
            return Err(invalid("request_timeout_ms", "must be > 0"));
        }
        if self.write_debounce_ms == 0 {
            return Err(invalid("write_debounce_ms", "must be > 0"));
        }
        if self.state_path.as_os_str().is_empty() {
            return Err(invalid("state_path", "must not be empty"));
        }
        if self.reconnect.initial_ms == 0 {
            return Err(invalid("reconnect.initial_ms", "must be > 0"));
        }
        if self.reconnect.max_ms < self.reconnect.initial_ms {
            return Err(invalid("reconnect.max_ms", "must be >= initial_ms"));
        }
        if self.reconnect.multiplier < 1.0 {
            return Err(invalid("reconnect.multiplier", "must be >= 1.0"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn write_debounce(&self) -> Duration {
        Duration::from_millis(self.write_debounce_ms)
    }

    /// Bearer token for requests: the user's access token, else the anon key.
    pub fn bearer_token(&self) -> &str {
        self.auth
            .access_token
            .as_deref()
            .unwrap_or(&self.auth.anon_key)
    }

    pub fn current_user(&self) -> CurrentUser {
        let user = CurrentUser::new(UserId::from(self.user.id), self.user.email.clone());
        match &self.user.display_name {
            Some(name) => user.with_display_name(name.clone()),
            None => user,
        }
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var("TASKGRID_CONFIG").ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}
