use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::reconciler::{EngineContext, ReconcilerOptions};
use crate::scope::ScopeContext;
use crate::store::fs::DEFAULT_DEBOUNCE_MS;
use crate::trend::DEFAULT_LOOKBACK_DAYS;

/// Configuration stored in ~/.taskpulse/config.json
///
/// Every field is optional on disk. Command-line flags override file values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Directory holding `personnel.json`, `tasks.json` and `companies/`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
    #[serde(default)]
    pub is_manager: bool,
    #[serde(default = "default_trend_lookback")]
    pub trend_lookback_days: u32,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_trend_lookback() -> u32 {
    DEFAULT_LOOKBACK_DAYS
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            company_id: None,
            branch_id: None,
            is_manager: false,
            trend_lookback_days: default_trend_lookback(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl EngineConfig {
    pub fn scope(&self) -> ScopeContext {
        ScopeContext {
            branch_id: self.branch_id.clone(),
            is_manager: self.is_manager,
        }
    }

    pub fn context(&self) -> EngineContext {
        EngineContext {
            company_id: self.company_id.clone(),
            scope: self.scope(),
        }
    }

    pub fn reconciler_options(&self) -> ReconcilerOptions {
        ReconcilerOptions {
            trend_lookback_days: self.trend_lookback_days,
        }
    }

    /// Configured data dir, or ~/.taskpulse/data.
    pub fn resolved_data_dir(&self) -> Result<PathBuf, EngineError> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(state_dir()?.join("data")),
        }
    }
}

/// Get the state directory (~/.taskpulse)
fn state_dir() -> Result<PathBuf, EngineError> {
    let home = dirs::home_dir().ok_or_else(|| {
        EngineError::ConfigurationError("Could not find home directory".to_string())
    })?;
    Ok(home.join(".taskpulse"))
}

/// Get the canonical config file path (~/.taskpulse/config.json)
pub fn config_path() -> Result<PathBuf, EngineError> {
    Ok(state_dir()?.join("config.json"))
}

/// Load configuration from `path`. A missing file yields defaults.
pub fn load_config(path: &Path) -> Result<EngineConfig, EngineError> {
    if !path.exists() {
        log::debug!("Config: {} not found, using defaults", path.display());
        return Ok(EngineConfig::default());
    }

    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| EngineError::ConfigurationError(format!(
        "Failed to parse {}: {}",
        path.display(),
        e
    )))
}
