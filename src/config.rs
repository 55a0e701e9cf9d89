//! Engine configuration.
//!
//! Read from a TOML file; every field has a default so an empty or missing
//! file yields the standard thresholds.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;
use crate::heatmap::DEFAULT_WINDOW_DAYS;
use crate::performance::DEFAULT_CONSISTENCY_WINDOW_DAYS;
use crate::risk::DEFAULT_INACTIVITY_DAYS;

/// Environment variable naming a config file when `--config` is not given.
pub const CONFIG_ENV: &str = "COHORT_ANALYTICS_CONFIG";

const MAX_WINDOW_DAYS: i64 = 366;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Trailing days the consistency score looks at.
    pub consistency_window_days: u32,
    /// Days without a login before a learner counts as stagnating.
    pub inactivity_days: i64,
    pub heatmap_window_days: i64,
    /// Board used when a school board has no curriculum of its own.
    pub default_board: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            consistency_window_days: DEFAULT_CONSISTENCY_WINDOW_DAYS,
            inactivity_days: DEFAULT_INACTIVITY_DAYS,
            heatmap_window_days: DEFAULT_WINDOW_DAYS,
            default_board: Some("CBSE".to_string()),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content, path)?;
        info!(path = %path.display(), "loaded engine config");
        Ok(config)
    }

    /// Loads `explicit` if given, else the file named by `COHORT_ANALYTICS_CONFIG`,
    /// else the defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        match path {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_WINDOW_DAYS).contains(&i64::from(self.consistency_window_days)) {
            return Err(ConfigError::Invalid {
                field: "consistency_window_days",
                reason: format!("must be between 1 and {MAX_WINDOW_DAYS}"),
            });
        }
        if !(1..=MAX_WINDOW_DAYS).contains(&self.heatmap_window_days) {
            return Err(ConfigError::Invalid {
                field: "heatmap_window_days",
                reason: format!("must be between 1 and {MAX_WINDOW_DAYS}"),
            });
        }
        if self.inactivity_days < 0 {
            return Err(ConfigError::Invalid {
                field: "inactivity_days",
                reason: "must not be negative".to_string(),
            });
        }
        if matches!(&self.default_board, Some(board) if board.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                field: "default_board",
                reason: "must not be blank".to_string(),
            });
        }
        Ok(())
    }
}
