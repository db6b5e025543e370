//! Engine configuration: worker roster, role models, loop budgets, gates.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Model parameters for one worker role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Model identifier passed through to the `ModelClient`.
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Dollars per 1k tokens, for cost accounting.
    #[serde(default)]
    pub cost_per_1k_tokens: f64,
}

fn default_max_tokens() -> u64 {
    4096
}

fn default_temperature() -> f32 {
    0.2
}

impl ModelSpec {
    pub fn cost_of(&self, tokens: u64) -> f64 {
        self.cost_per_1k_tokens * tokens as f64 / 1000.0
    }
}

/// One rung of the escalation ladder: a named capability descriptor.
///
/// The roster is an ordered list of these, cheapest first; nothing about a
/// tier is hard-coded so the ladder can be unit-tested with mock clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierSpec {
    pub name: String,
    #[serde(flatten)]
    pub model: ModelSpec,
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    /// Minimum quality score a reviewer must award for a pass.
    pub quality_threshold: f64,
    /// Require both reviewer seats to pass. When false only the primary
    /// seat gates acceptance; the secondary still runs and is recorded.
    pub consensus_required: bool,
    /// Outer implement→review rounds before a task locks.
    pub max_outer_rounds: u32,
    pub cleanup_enabled: bool,
    /// Inspector/surgeon cycles per sweep.
    pub max_cleanup_cycles: u32,
    /// Surgeon fixes larger than this many lines are flagged for the
    /// worker roster instead of auto-applied.
    pub max_fix_lines: usize,
    /// Build/test verification command each tier must pass.
    pub verify_command: String,
    /// Parent directory for isolated workspaces.
    pub workspace_base: PathBuf,
    /// Ordered worker roster, tried cheapest first.
    pub roster: Vec<TierSpec>,
    pub foreman: ModelSpec,
    pub inspector: ModelSpec,
    pub surgeon: ModelSpec,
    pub reviewer: ModelSpec,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        let support = ModelSpec {
            model: "forge-support-14b".into(),
            max_tokens: 4096,
            temperature: 0.1,
            cost_per_1k_tokens: 0.0005,
        };
        Self {
            quality_threshold: 85.0,
            consensus_required: true,
            max_outer_rounds: 3,
            cleanup_enabled: true,
            max_cleanup_cycles: 3,
            max_fix_lines: 20,
            verify_command: "cargo test --quiet".into(),
            workspace_base: PathBuf::from("/tmp/forgecrew-ws"),
            roster: vec![
                TierSpec {
                    name: "alpha".into(),
                    model: ModelSpec {
                        model: "forge-coder-14b".into(),
                        max_tokens: 8192,
                        temperature: 0.2,
                        cost_per_1k_tokens: 0.0005,
                    },
                },
                TierSpec {
                    name: "beta".into(),
                    model: ModelSpec {
                        model: "forge-coder-72b".into(),
                        max_tokens: 8192,
                        temperature: 0.2,
                        cost_per_1k_tokens: 0.003,
                    },
                },
                TierSpec {
                    name: "gamma".into(),
                    model: ModelSpec {
                        model: "forge-frontier".into(),
                        max_tokens: 16384,
                        temperature: 0.3,
                        cost_per_1k_tokens: 0.015,
                    },
                },
            ],
            foreman: ModelSpec {
                model: "forge-frontier".into(),
                max_tokens: 8192,
                temperature: 0.3,
                cost_per_1k_tokens: 0.015,
            },
            inspector: support.clone(),
            surgeon: support.clone(),
            reviewer: support,
        }
    }
}

impl ForgeConfig {
    /// Load from a TOML file; missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.roster.is_empty() {
            return Err(ConfigError::Invalid("roster must not be empty".into()));
        }
        let mut names: Vec<&str> = self.roster.iter().map(|t| t.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.roster.len() {
            return Err(ConfigError::Invalid("roster tier names must be unique".into()));
        }
        if !(0.0..=100.0).contains(&self.quality_threshold) {
            return Err(ConfigError::Invalid(format!(
                "quality_threshold must be in [0,100], got {}",
                self.quality_threshold
            )));
        }
        if self.max_outer_rounds == 0 {
            return Err(ConfigError::Invalid("max_outer_rounds must be >= 1".into()));
        }
        if self.max_cleanup_cycles == 0 {
            return Err(ConfigError::Invalid("max_cleanup_cycles must be >= 1".into()));
        }
        if self.verify_command.trim().is_empty() {
            return Err(ConfigError::Invalid("verify_command must not be empty".into()));
        }
        Ok(())
    }
}
