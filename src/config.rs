//! Configuration loading and management.
//!
//! Loads configuration from embedded config.toml with environment variable overrides.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;

use crate::auth::Credentials;
use crate::error::ConfigError;

/// Embedded configuration file content.
const CONFIG_TOML: &str = include_str!("../config.toml");

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub portal: PortalConfig,
    pub login: LoginConfig,
    pub retry: RetryConfig,
    pub paths: PathsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortalConfig {
    pub api_base_url: String,
    /// Public status checker page, opened for manual login.
    pub status_checker_url: String,
    pub subscription_key: String,
    pub timeout_seconds: u64,
    pub connect_timeout_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginMode {
    Command,
    Manual,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginConfig {
    pub mode: LoginMode,
    /// Helper program for `LoginMode::Command`.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    pub schools_file: String,
    pub state_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    /// Load configuration from embedded config.toml with environment variable overrides.
    pub fn load() -> Result<Self> {
        Self::load_with(|key| env::var(key).ok())
    }

    /// Same as [`Config::load`], reading overrides through `lookup`.
    pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config: Config =
            toml::from_str(CONFIG_TOML).context("Failed to parse embedded config.toml")?;

        if let Some(path) = lookup("LSAC_SCHOOLS_FILE") {
            config.paths.schools_file = path;
        }

        if let Some(dir) = lookup("LSAC_STATE_DIR") {
            config.paths.state_dir = dir;
        }

        if let Some(command) = lookup("LSAC_LOGIN_COMMAND") {
            config.login.mode = LoginMode::Command;
            config.login.command = command;
        }

        if let Some(url) = lookup("LSAC_API_BASE_URL") {
            config.portal.api_base_url = url;
        }

        if let Some(log_level) = lookup("RUST_LOG") {
            config.logging.level = log_level;
        }

        config.validate()?;

        Ok(config)
    }

    /// Validate that required configuration is present.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.portal.api_base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("portal.api_base_url is empty".into()));
        }

        if self.portal.subscription_key.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "portal.subscription_key is empty".into(),
            ));
        }

        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::Invalid(
                "retry.initial_backoff_ms exceeds retry.max_backoff_ms".into(),
            ));
        }

        if self.paths.schools_file.trim().is_empty() {
            return Err(ConfigError::Invalid("paths.schools_file is empty".into()));
        }

        Ok(())
    }

    /// The login helper command, once a helper is actually needed.
    pub fn login_command(&self) -> Result<&str, ConfigError> {
        match self.login.command.trim() {
            "" => Err(ConfigError::Invalid(
                "login.mode is \"command\" but no command is set. Set LSAC_LOGIN_COMMAND \
                 or use login.mode = \"manual\""
                    .into(),
            )),
            command => Ok(command),
        }
    }
}

/// Read portal credentials from the environment for the given login mode.
pub fn credentials(mode: LoginMode) -> Result<Credentials, ConfigError> {
    credentials_for(mode, |key| env::var(key).ok())
}

/// Credentials are required only when a login helper signs in on the user's behalf.
///
/// Manual sign-in happens in the user's own browser, so missing values are left empty.
pub fn credentials_for(
    mode: LoginMode,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Credentials, ConfigError> {
    match mode {
        LoginMode::Command => credentials_from(lookup),
        LoginMode::Manual => {
            Ok(credentials_from(lookup).unwrap_or_else(|_| Credentials::new("", "")))
        }
    }
}

/// Read portal credentials through `lookup`. Both values must be non-empty.
pub fn credentials_from(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Credentials, ConfigError> {
    let required = |key: &'static str| {
        lookup(key)
            .filter(|value| !value.trim().is_empty())
            .ok_or(ConfigError::MissingCredential(key))
    };

    let username = required("LSAC_USERNAME")?;
    let password = required("LSAC_PASSWORD")?;
    Ok(Credentials::new(username.trim(), password))
}
