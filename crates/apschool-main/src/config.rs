// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of APSchool Bridge.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

use anyhow::{Context, Result};
use apschool_client::{BASE_URL, Credential};
use apschool_core::{
    DEFAULT_SCAN_INTERVAL_MINUTES, MAX_SCAN_INTERVAL_MINUTES, MIN_SCAN_INTERVAL_MINUTES,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// APSchool portal login
    pub account: AccountConfig,

    /// Adjustable options
    #[serde(default)]
    pub options: OptionsConfig,

    /// System configuration
    #[serde(default)]
    pub system: SystemConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,
}

impl fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionsConfig {
    /// Minutes between fetch cycles; values below the minimum are raised to it,
    /// values above one week are rejected
    #[serde(default = "default_scan_interval")]
    pub scan_interval: u64,
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            scan_interval: default_scan_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Log level (debug, info, warn, error), overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Where to write the published sensor states as JSON
    #[serde(default)]
    pub state_file: Option<String>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            state_file: None,
        }
    }
}

fn default_base_url() -> String {
    BASE_URL.to_string()
}

fn default_scan_interval() -> u64 {
    DEFAULT_SCAN_INTERVAL_MINUTES
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            account: AccountConfig {
                base_url: default_base_url(),
                username: String::new(),
                password: String::new(),
            },
            options: OptionsConfig::default(),
            system: SystemConfig::default(),
        }
    }
}

/// Where the configuration was read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    AddonOptions,
    File(String),
    Environment,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddonOptions => write!(f, "add-on options"),
            Self::File(path) => write!(f, "{path}"),
            Self::Environment => write!(f, "defaults with environment overrides"),
        }
    }
}

const ADDON_OPTIONS_PATH: &str = "/data/options.json";

impl AppConfig {
    /// Load configuration from add-on options, a config file, or the environment.
    ///
    /// Runs before logging is set up, so the source is returned instead of logged.
    pub fn load() -> Result<(Self, ConfigSource)> {
        if Path::new(ADDON_OPTIONS_PATH).exists() {
            let config = Self::load_from(ADDON_OPTIONS_PATH)?;
            return Ok((config, ConfigSource::AddonOptions));
        }

        for candidate in ["config.toml", "config.json"] {
            if Path::new(candidate).exists() {
                let config = Self::load_from(candidate)?;
                return Ok((config, ConfigSource::File(candidate.to_string())));
            }
        }

        let config = Self::from_env();
        config.validate()?;
        Ok((config, ConfigSource::Environment))
    }

    /// Load and validate a TOML or JSON file (chosen by extension)
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let config: AppConfig = if path.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables (development/testing)
    fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("APSCHOOL_BASE_URL") {
            config.account.base_url = url;
        }
        if let Some(username) = lookup("APSCHOOL_USERNAME") {
            config.account.username = username;
        }
        if let Some(password) = lookup("APSCHOOL_PASSWORD") {
            config.account.password = password;
        }
        if let Some(interval) = lookup("APSCHOOL_SCAN_INTERVAL")
            && let Ok(minutes) = interval.parse::<u64>()
        {
            config.options.scan_interval = minutes;
        }
        if let Some(path) = lookup("APSCHOOL_STATE_FILE")
            && !path.trim().is_empty()
        {
            config.system.state_file = Some(path);
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            config.system.log_level = level;
        }

        config
    }

    pub fn validate(&self) -> Result<()> {
        if self.account.username.trim().is_empty() {
            anyhow::bail!("account.username must be set (or APSCHOOL_USERNAME)");
        }
        if self.account.password.is_empty() {
            anyhow::bail!("account.password must be set (or APSCHOOL_PASSWORD)");
        }
        if self.options.scan_interval > MAX_SCAN_INTERVAL_MINUTES {
            anyhow::bail!(
                "options.scan_interval must be at most {} minutes (one week), got {}",
                MAX_SCAN_INTERVAL_MINUTES,
                self.options.scan_interval
            );
        }
        let base_url = self.account.base_url.trim();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            anyhow::bail!(
                "account.base_url must be an http(s) URL, got '{}'",
                self.account.base_url
            );
        }
        Ok(())
    }

    /// Save current configuration to a TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let toml_str = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), toml_str)
            .with_context(|| format!("Failed to write {}", path.as_ref().display()))?;
        Ok(())
    }

    /// Polling interval, clamped to the minimum
    pub fn scan_interval(&self) -> Duration {
        apschool_core::scan_interval(self.options.scan_interval)
    }

    /// Whether the configured interval had to be raised
    pub fn scan_interval_clamped(&self) -> bool {
        self.options.scan_interval < MIN_SCAN_INTERVAL_MINUTES
    }

    pub fn credential(&self) -> Credential {
        Credential::new(
            self.account.base_url.trim(),
            self.account.username.trim(),
            self.account.password.clone(),
        )
    }
}
