//! Configuration settings management
//!
//! This module handles loading configuration from the config file and the
//! environment, validation, and persistence.

use crate::error::{Result, StornetError};
use crate::network_rules::StorageAccountId;
use crate::utils::retry::RetryOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tabled::Tabled;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tabled)]
#[serde(default)]
pub struct Config {
    #[tabled(rename = "Debug")]
    pub debug: bool,
    #[tabled(rename = "Subscription ID")]
    pub subscription_id: String,
    #[tabled(rename = "Tenant ID")]
    pub tenant_id: String,
    #[tabled(rename = "Default Resource Group")]
    pub default_resource_group: String,
    #[tabled(rename = "JSON Output")]
    pub output_json: bool,
    #[tabled(rename = "No Color")]
    pub no_color: bool,
    /// Seconds to wait for an account lock; 0 waits forever
    #[tabled(rename = "Lock Timeout (s)")]
    pub lock_timeout_secs: u64,
    #[tabled(skip)]
    pub max_retries: usize,
    #[tabled(skip)]
    pub retry_initial_interval_ms: u64,
    #[tabled(skip)]
    pub retry_max_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let retry = RetryOptions::default();
        Self {
            debug: false,
            subscription_id: String::new(),
            tenant_id: String::new(),
            default_resource_group: String::new(),
            output_json: false,
            no_color: false,
            lock_timeout_secs: 0,
            max_retries: retry.max_retries,
            retry_initial_interval_ms: retry.initial_interval.as_millis() as u64,
            retry_max_interval_ms: retry.max_interval.as_millis() as u64,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.subscription_id.is_empty() {
            return Err(StornetError::config(
                "Subscription ID is required (set subscription_id or AZURE_SUBSCRIPTION_ID)",
            ));
        }

        if !self.tenant_id.is_empty() && uuid::Uuid::parse_str(&self.tenant_id).is_err() {
            return Err(StornetError::config(format!(
                "Tenant ID '{}' is not a valid UUID",
                self.tenant_id
            )));
        }

        if self.retry_initial_interval_ms > self.retry_max_interval_ms {
            return Err(StornetError::config(
                "retry_initial_interval_ms must not exceed retry_max_interval_ms",
            ));
        }

        Ok(())
    }

    pub fn get_config_path() -> Result<PathBuf> {
        // XDG layout on Linux and macOS, platform config dir elsewhere
        #[cfg(any(target_os = "linux", target_os = "macos"))]
        {
            use std::env;
            let config_dir = if let Ok(xdg_config_home) = env::var("XDG_CONFIG_HOME") {
                PathBuf::from(xdg_config_home)
            } else {
                let home_dir = env::var("HOME")
                    .map_err(|_| StornetError::config("HOME environment variable not set"))?;
                PathBuf::from(home_dir).join(".config")
            };
            Ok(config_dir.join("stornet").join("stornet.toml"))
        }

        #[cfg(not(any(target_os = "linux", target_os = "macos")))]
        {
            let config_dir = dirs::config_dir()
                .ok_or_else(|| StornetError::config("Unable to determine config directory"))?;
            Ok(config_dir.join("stornet").join("stornet.toml"))
        }
    }

    pub async fn load() -> Result<Self> {
        load_config().await
    }

    pub async fn save(&self) -> Result<()> {
        save_config(self).await
    }

    /// Lock acquisition timeout, if one is configured
    pub fn lock_timeout(&self) -> Option<Duration> {
        (self.lock_timeout_secs > 0).then(|| Duration::from_secs(self.lock_timeout_secs))
    }

    pub fn retry_options(&self) -> RetryOptions {
        RetryOptions {
            max_retries: self.max_retries,
            initial_interval: Duration::from_millis(self.retry_initial_interval_ms),
            max_interval: Duration::from_millis(self.retry_max_interval_ms),
            ..RetryOptions::default()
        }
    }

    /// Tenant used for private link rules that don't name one
    pub fn default_tenant(&self) -> Option<&str> {
        (!self.tenant_id.is_empty()).then_some(self.tenant_id.as_str())
    }

    /// Resolve the target storage account.
    /// Priority: full resource ID > account name with resource group argument > config default group
    pub fn resolve_account(
        &self,
        account: Option<&str>,
        resource_group: Option<&str>,
        id: Option<&str>,
    ) -> Result<StorageAccountId> {
        if let Some(id) = id {
            return StorageAccountId::parse(id);
        }

        let account = account.filter(|a| !a.is_empty()).ok_or_else(|| {
            StornetError::invalid_argument("No storage account specified. Use --account or --id")
        })?;

        let resource_group = match resource_group.filter(|rg| !rg.is_empty()) {
            Some(rg) => rg.to_string(),
            None if !self.default_resource_group.is_empty() => self.default_resource_group.clone(),
            None => {
                return Err(StornetError::config(
                    "No resource group specified. Use --resource-group or configure default_resource_group",
                ))
            }
        };

        if self.subscription_id.is_empty() {
            return Err(StornetError::config("No subscription ID specified"));
        }

        Ok(StorageAccountId::new(
            self.subscription_id.clone(),
            resource_group,
            account,
        ))
    }
}

/// Load configuration from multiple sources with priority order:
/// 1. Command-line flags (handled by clap)
/// 2. Environment variables
/// 3. Configuration file
/// 4. Default values
pub async fn load_config() -> Result<Config> {
    let config = load_config_no_validation().await?;

    config.validate()?;

    Ok(config)
}

/// Load configuration without validation (for init and config commands)
pub async fn load_config_no_validation() -> Result<Config> {
    let mut config = Config::default();

    let config_path = Config::get_config_path()?;
    if config_path.exists() {
        config = load_from_file(&config_path).await?;
    }

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

pub async fn load_from_file(path: &Path) -> Result<Config> {
    let contents = tokio::fs::read_to_string(path).await?;
    let config = toml::from_str::<Config>(&contents)?;
    Ok(config)
}

/// Apply environment overrides using `lookup` to read variables
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup("DEBUG") {
        config.debug = is_truthy(&value);
    }

    if let Some(value) = lookup("AZURE_SUBSCRIPTION_ID") {
        config.subscription_id = value;
    }

    if let Some(value) = lookup("AZURE_TENANT_ID") {
        config.tenant_id = value;
    }

    if let Some(value) = lookup("STORNET_RESOURCE_GROUP") {
        config.default_resource_group = value;
    }

    if let Some(value) = lookup("STORNET_LOCK_TIMEOUT") {
        if let Ok(seconds) = value.parse::<u64>() {
            config.lock_timeout_secs = seconds;
        }
    }

    // Any value disables colors, see no-color.org
    if lookup("NO_COLOR").is_some_and(|value| !value.is_empty()) {
        config.no_color = true;
    }
}

fn is_truthy(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}

pub async fn save_config(config: &Config) -> Result<()> {
    let config_path = Config::get_config_path()?;
    save_config_to(config, &config_path).await
}

pub async fn save_config_to(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let contents =
        toml::to_string_pretty(config).map_err(|e| StornetError::serialization(e.to_string()))?;

    tokio::fs::write(path, contents).await?;

    Ok(())
}

/// Write a default configuration file; returns false if one already exists
pub async fn init_default_config() -> Result<bool> {
    let config_path = Config::get_config_path()?;

    // Don't overwrite existing configuration
    if config_path.exists() {
        return Ok(false);
    }

    save_config_to(&Config::default(), &config_path).await?;

    Ok(true)
}
