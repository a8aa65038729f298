//! Daemon configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML
//! file, then `OUTREACH__SECTION__KEY` environment variables.

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use directories::ProjectDirs;
use outreach_core::application::{
    CacheConfig, DriverConfig, DueSource, QueueConfig, RateLimitConfig, SendStepConfig,
    SequenceConfig, WaveConfig,
};
use outreach_core::application::queue::constants::EMAIL_QUEUE;
use outreach_core::error::{AppError, Result};
use outreach_infra_http::DEFAULT_TIMEOUT;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "OUTREACH";
const ENV_SEPARATOR: &str = "__";
const DEFAULT_DB_PATH: &str = "~/.outreach/sequences.db";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub database: DatabaseSection,
    pub logging: LoggingSection,
    pub cache: CacheSection,
    pub rate_limit: RateLimitSection,
    pub queue: QueueSection,
    pub sequence: SequenceSection,
    pub wave: WaveSection,
    pub driver: DriverSection,
    pub transport: TransportSection,
    pub crm: CrmSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub path: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: DEFAULT_DB_PATH.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub format: LogFormat,
    /// Also write a daily rolling file here
    pub directory: Option<String>,
}

/// Upstream API response cache (CRM searches)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub api_ttl_secs: u64,
    pub max_size: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            api_ttl_secs: 60,
            max_size: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    pub limit: u32,
    pub window_secs: u64,
    pub sender_identity: String,
    pub wait_on_limit: bool,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            limit: 100,
            window_secs: 100,
            sender_identity: "default".to_string(),
            wait_on_limit: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueSection {
    pub max_attempts: u32,
    pub processor_timeout_secs: Option<u64>,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            processor_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SequenceSection {
    pub default_delay_hours: u64,
    /// Per template set overrides
    pub delay_hours: HashMap<String, u64>,
    pub due_source: DueSource,
    pub due_batch_limit: usize,
}

impl Default for SequenceSection {
    fn default() -> Self {
        Self {
            default_delay_hours: 24,
            delay_hours: HashMap::new(),
            due_source: DueSource::Repository,
            due_batch_limit: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WaveSection {
    pub size: usize,
    pub delay_secs: u64,
    pub concurrency: usize,
}

impl Default for WaveSection {
    fn default() -> Self {
        Self {
            size: 75,
            delay_secs: 60,
            concurrency: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DriverSection {
    pub interval_secs: u64,
    pub housekeeping_interval_secs: u64,
    /// How long in-flight jobs get after Ctrl+C
    pub shutdown_grace_secs: u64,
}

impl Default for DriverSection {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            housekeeping_interval_secs: 3600,
            shutdown_grace_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    #[default]
    DryRun,
    AppsScript,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportSection {
    pub kind: TransportKind,
    pub apps_script_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            kind: TransportKind::DryRun,
            apps_script_url: None,
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrmKind {
    #[default]
    None,
    Hubspot,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrmSection {
    pub kind: CrmKind,
    pub hubspot_base_url: String,
    pub hubspot_token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for CrmSection {
    fn default() -> Self {
        Self {
            kind: CrmKind::None,
            hubspot_base_url: "https://api.hubapi.com".to_string(),
            hubspot_token: None,
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

/// `<config dir>/outreach.toml` for the current user
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "outreach").map(|dirs| dirs.config_dir().join("outreach.toml"))
}

impl DaemonConfig {
    /// Load from file (explicit path, else the default path if present) and environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        match path {
            Some(path) => builder = builder.add_source(File::from(path).required(true)),
            None => {
                if let Some(path) = default_config_path() {
                    builder = builder.add_source(File::from(path).required(false));
                }
            }
        }
        Self::from_builder(builder.add_source(env_source()))
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let config: DaemonConfig = builder
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| AppError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("wave.size", self.wave.size as u64),
            ("wave.concurrency", self.wave.concurrency as u64),
            ("rate_limit.limit", self.rate_limit.limit as u64),
            ("rate_limit.window_secs", self.rate_limit.window_secs),
            ("queue.max_attempts", self.queue.max_attempts as u64),
            ("cache.max_size", self.cache.max_size as u64),
            ("driver.interval_secs", self.driver.interval_secs),
            (
                "driver.housekeeping_interval_secs",
                self.driver.housekeeping_interval_secs,
            ),
        ];
        if let Some((key, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(AppError::Config(format!("{} must be greater than 0", key)));
        }

        if self.transport.kind == TransportKind::AppsScript
            && blank(self.transport.apps_script_url.as_deref())
        {
            return Err(AppError::Config(
                "transport.apps_script_url is required for the apps_script transport".to_string(),
            ));
        }
        if self.crm.kind == CrmKind::Hubspot && blank(self.crm.hubspot_token.as_deref()) {
            return Err(AppError::Config(
                "crm.hubspot_token is required for the hubspot crm".to_string(),
            ));
        }
        if self.sequence.due_source == DueSource::Crm && self.crm.kind == CrmKind::None {
            return Err(AppError::Config(
                "sequence.due_source = crm needs a crm configured".to_string(),
            ));
        }
        Ok(())
    }

    /// Database path with `~` expanded
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.database.path).into_owned())
    }

    pub fn log_directory(&self) -> Option<PathBuf> {
        self.logging
            .directory
            .as_deref()
            .map(|dir| PathBuf::from(shellexpand::tilde(dir).into_owned()))
    }

    pub fn api_cache_config(&self) -> CacheConfig {
        CacheConfig {
            default_ttl: Duration::from_secs(self.cache.api_ttl_secs),
            max_size: self.cache.max_size,
        }
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            limit: self.rate_limit.limit,
            window: Duration::from_secs(self.rate_limit.window_secs),
        }
    }

    pub fn send_step_config(&self) -> SendStepConfig {
        SendStepConfig {
            sender_identity: self.rate_limit.sender_identity.clone(),
            wait_on_limit: self.rate_limit.wait_on_limit,
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            name: EMAIL_QUEUE.to_string(),
            max_attempts: self.queue.max_attempts,
            processor_timeout: self.queue.processor_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn sequence_config(&self) -> SequenceConfig {
        SequenceConfig {
            default_delay_hours: self.sequence.default_delay_hours,
            delay_hours: self.sequence.delay_hours.clone(),
        }
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            due_source: self.sequence.due_source,
            due_batch_limit: self.sequence.due_batch_limit,
        }
    }

    pub fn wave_config(&self) -> WaveConfig {
        WaveConfig {
            size: self.wave.size,
            delay: Duration::from_secs(self.wave.delay_secs),
            concurrency: self.wave.concurrency,
        }
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
}

fn blank(value: Option<&str>) -> bool {
    value.map(str::trim).map_or(true, str::is_empty)
}
