pub mod api;
pub mod auth;
pub mod deploy;
pub mod error;
pub mod executor;
pub mod logging;
pub mod maintenance;
pub mod orchestrator;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use auth::Credential;
use deploy::Stage;
use error::ControlError;
use maintenance::{Maintenance, is_identifier};
use orchestrator::DeployOrchestrator;

const DEFAULT_REMOTE: &str = "origin";
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 120;
const DEFAULT_INSTALL_TIMEOUT_SECS: u64 = 900;
const DEFAULT_RESTART_TIMEOUT_SECS: u64 = 60;
/// Upper bound for any single stage
pub const MAX_STAGE_TIMEOUT_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Deserialize, Clone)]
pub struct ControlConfig {
    pub deploy: DeployConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where and how the service redeploys itself
#[derive(Debug, Deserialize, Clone)]
pub struct DeployConfig {
    /// Working copy of the service's own source tree
    pub repo_path: PathBuf,
    #[serde(default = "default_remote")]
    pub remote: String,
    /// Passed to git as GIT_SSH_COMMAND during FETCH
    pub git_ssh_command: Option<String>,
    /// Dependency refresh commands, run in order inside `repo_path`
    #[serde(default)]
    pub install: Vec<String>,
    /// Hands the restart to the service manager
    pub restart: String,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_install_timeout")]
    pub install_timeout_secs: u64,
    #[serde(default = "default_restart_timeout")]
    pub restart_timeout_secs: u64,
}

impl DeployConfig {
    pub fn stage_timeout(&self, stage: Stage) -> Duration {
        let secs = match stage {
            Stage::Fetch => self.fetch_timeout_secs,
            Stage::Install => self.install_timeout_secs,
            Stage::Restart => self.restart_timeout_secs,
        };
        Duration::from_secs(secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    /// Tables `DELETE /database` may wipe
    #[serde(default)]
    pub tables: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Daily rolling log files go here; console only when unset
    pub directory: Option<PathBuf>,
}

fn default_remote() -> String {
    DEFAULT_REMOTE.to_string()
}

fn default_fetch_timeout() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

fn default_install_timeout() -> u64 {
    DEFAULT_INSTALL_TIMEOUT_SECS
}

fn default_restart_timeout() -> u64 {
    DEFAULT_RESTART_TIMEOUT_SECS
}

impl ControlConfig {
    /// Parse and validate configuration text
    pub fn from_toml(text: &str) -> Result<Self, ControlError> {
        let config: ControlConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ControlError> {
        let deploy = &self.deploy;
        if deploy.repo_path.as_os_str().is_empty() {
            return Err(ControlError::ConfigError(
                "deploy.repo_path must not be empty".to_string(),
            ));
        }
        if deploy.remote.is_empty()
            || deploy.remote.starts_with('-')
            || !deploy
                .remote
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(ControlError::ConfigError(format!(
                "deploy.remote '{}' is not a valid remote name",
                deploy.remote
            )));
        }
        if deploy.restart.trim().is_empty() {
            return Err(ControlError::ConfigError(
                "deploy.restart must not be empty".to_string(),
            ));
        }
        if deploy.install.iter().any(|cmd| cmd.trim().is_empty()) {
            return Err(ControlError::ConfigError(
                "deploy.install must not contain empty commands".to_string(),
            ));
        }
        for stage in Stage::ALL {
            let timeout = deploy.stage_timeout(stage);
            if timeout.is_zero() {
                return Err(ControlError::ConfigError(format!(
                    "{} timeout must be greater than zero",
                    stage
                )));
            }
            if timeout > Duration::from_secs(MAX_STAGE_TIMEOUT_SECS) {
                return Err(ControlError::ConfigError(format!(
                    "{} timeout must be at most {}s",
                    stage, MAX_STAGE_TIMEOUT_SECS
                )));
            }
        }

        let tables = &self.database.tables;
        for (idx, table) in tables.iter().enumerate() {
            if !is_identifier(table) {
                return Err(ControlError::ConfigError(format!(
                    "database.tables entry '{}' is not a plain SQL identifier",
                    table
                )));
            }
            if tables[..idx].contains(table) {
                return Err(ControlError::ConfigError(format!(
                    "database.tables lists '{}' more than once",
                    table
                )));
            }
        }
        Ok(())
    }
}

/// Load and parse the configuration file
pub fn load_config(path: impl AsRef<Path>) -> Result<ControlConfig, ControlError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| {
        ControlError::ConfigError(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;
    ControlConfig::from_toml(&text).map_err(|e| {
        ControlError::ConfigError(format!(
            "Failed to load config file '{}': {}",
            path.display(),
            e
        ))
    })
}

pub struct AppState {
    pub credential: Credential,
    pub orchestrator: DeployOrchestrator,
    pub maintenance: Maintenance,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        credential: Credential,
        orchestrator: DeployOrchestrator,
        maintenance: Maintenance,
    ) -> Self {
        Self {
            credential,
            orchestrator,
            maintenance,
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<AppState>;
