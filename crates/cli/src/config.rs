//! TOML configuration for the `enrichflow` binary.
//!
//! Every section is optional; a missing file or section means defaults.
//!
//! ```toml
//! [executor]
//! step_timeout_secs = 30
//! halt_policy = "dependents"   # or "all"
//!
//! [validation]
//! max_bytes = 5242880
//! allowed_mime_types = ["image/jpeg", "image/png", "application/pdf"]
//!
//! [search]
//! text_weight = 0.5
//! limit = 10
//!
//! [server]
//! bind = "0.0.0.0:8080"
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use engine::{ExecutorConfig, HaltPolicy};
use serde::Deserialize;
use steps::enrichment::ValidationPolicy;
use store::SearchConfig;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub executor: ExecutorSection,
    pub validation: ValidationPolicy,
    pub search: SearchConfig,
    pub server: ServerSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExecutorSection {
    /// Default per-step timeout. Unset means no timeout.
    pub step_timeout_secs: Option<u64>,
    pub halt_policy: HaltPolicy,
}

impl ExecutorSection {
    pub fn to_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            step_timeout: self.step_timeout_secs.map(Duration::from_secs),
            halt_policy: self.halt_policy,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".into(),
        }
    }
}

impl AppConfig {
    /// Load from `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.search.validate()?;
        ensure!(self.validation.max_bytes > 0, "validation.max_bytes must be positive");
        ensure!(
            !self.validation.allowed_mime_types.is_empty(),
            "validation.allowed_mime_types must not be empty"
        );
        ensure!(self.executor.step_timeout_secs != Some(0), "executor.step_timeout_secs must be positive");
        Ok(())
    }
}
