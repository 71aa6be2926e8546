use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_derive::{Deserialize, Serialize};

use crate::core::policy::CallPolicies;

/// Scheduler-level retry knobs for a failed run slot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RunRetrySettings {
    pub base_delay_secs: u64,
    pub multiplier: f64,
    pub max_attempts: u32,
    pub jitter: f64,
}

impl Default for RunRetrySettings {
    fn default() -> Self {
        Self {
            base_delay_secs: 30,
            multiplier: 2.0,
            max_attempts: 3,
            jitter: 0.2,
        }
    }
}

/// Process-wide settings, loaded from `settings.toml` in the data dir.
/// Everything has a default; a missing file is not an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub calls: CallPolicies,
    pub run_retry: RunRetrySettings,
}

impl Settings {
    pub fn load(data_dir: &Path) -> Result<Settings> {
        let path = Self::path(data_dir);
        if !path.exists() {
            return Ok(Settings::default());
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn path(data_dir: &Path) -> PathBuf {
        data_dir.join("settings.toml")
    }
}
