//! The CLI's own run-configuration file (TOML), distinct from the
//! engine's `EngineConfig`: this is what a human hand-edits before a
//! run, merged into an `EngineConfig` at startup (SPEC_FULL.md
//! "Configuration").

use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RunOptions {
    pub default_tolerance: Option<f64>,
    pub continue_on_period_failure: Option<bool>,
    pub parallel: Option<bool>,
}

impl RunOptions {
    pub fn apply(&self, config: &mut fiscaldag_engine::EngineConfig) {
        if let Some(tolerance) = self.default_tolerance {
            config.default_tolerance = tolerance;
        }
        if let Some(continue_on_failure) = self.continue_on_period_failure {
            config.continue_on_period_failure = continue_on_failure;
        }
        if let Some(parallel) = self.parallel {
            config.parallel = parallel;
        }
    }
}
