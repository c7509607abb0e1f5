// Engine configuration: languages, limits, pool sizing and classifier table
use anyhow::{bail, Context, Result};
use arbiter_common::types::LanguageTag;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::classifier::Signature;
use crate::registry;
use crate::sandbox::Limits;

pub const DEFAULT_CONFIG_PATH: &str = "config/arbiter.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub cpu_time_ms: u64,
    pub wall_clock_ms: u64,
    #[serde(default = "default_max_output_kb")]
    pub max_output_kb: u64,
    #[serde(default = "default_max_processes")]
    pub max_processes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub name: String,
    /// Key into the runner table, e.g. `python` or `cpp`.
    pub runner: String,
    pub image: String,
    #[serde(default)]
    pub version: String,
    pub memory_limit_mb: u64,
    pub cpu_limit: f64,
    pub limits: LimitsConfig,
    pub compile_limits: LimitsConfig,
}

impl LanguageConfig {
    pub fn tag(&self) -> LanguageTag {
        LanguageTag::new(&self.name)
    }

    pub fn run_limits(&self) -> Limits {
        self.to_limits(&self.limits)
    }

    pub fn build_limits(&self) -> Limits {
        self.to_limits(&self.compile_limits)
    }

    fn to_limits(&self, limits: &LimitsConfig) -> Limits {
        Limits::new(
            limits.cpu_time_ms,
            limits.wall_clock_ms,
            self.memory_limit_mb * 1024 * 1024,
        )
        .with_cpu_share(self.cpu_limit)
        .with_output_bytes(limits.max_output_kb * 1024)
        .with_max_processes(limits.max_processes)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_partial_factor")]
    pub partial_factor: f64,
    #[serde(default = "default_max_parallel_cases")]
    pub max_parallel_cases: usize,
    #[serde(default = "default_system_retries")]
    pub system_retries: u32,
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
    #[serde(default = "default_audit_capacity")]
    pub audit_capacity: usize,
    #[serde(default = "default_language")]
    pub default_language: String,
    /// Ordered signature table; the built-in table is used when omitted.
    #[serde(default)]
    pub classifier: Option<Vec<Signature>>,
    pub languages: Vec<LanguageConfig>,
}

fn default_pool_size() -> usize {
    4
}

fn default_partial_factor() -> f64 {
    0.5
}

fn default_max_parallel_cases() -> usize {
    1
}

fn default_system_retries() -> u32 {
    2
}

fn default_kill_grace_ms() -> u64 {
    2000
}

fn default_audit_capacity() -> usize {
    1024
}

fn default_language() -> String {
    LanguageTag::UNKNOWN.to_string()
}

fn default_max_output_kb() -> u64 {
    1024
}

fn default_max_processes() -> i64 {
    64
}

impl EngineConfig {
    /// Load and validate configuration from a JSON file
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Engine config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        Self::from_json(&content)
            .with_context(|| format!("Invalid engine config {}", config_path.display()))
    }

    /// Load from `ARBITER_CONFIG`, falling back to config/arbiter.json
    pub fn load_default() -> Result<Self> {
        let path = std::env::var("ARBITER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load(Path::new(&path))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_json::from_str(content).context("Failed to parse engine config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            bail!("pool_size must be at least 1");
        }
        if self.max_parallel_cases == 0 {
            bail!("max_parallel_cases must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.partial_factor) {
            bail!("partial_factor must be within [0, 1], got {}", self.partial_factor);
        }
        if self.languages.is_empty() {
            bail!("No languages configured");
        }

        let mut seen = HashSet::new();
        for lang in &self.languages {
            let tag = lang.tag();
            if tag.is_unknown() || tag.as_str().is_empty() {
                bail!("Invalid language name '{}'", lang.name);
            }
            if !seen.insert(tag.clone()) {
                bail!("Language '{}' configured twice", tag);
            }
            if !registry::is_known_runner(&lang.runner) {
                bail!(
                    "Language '{}' uses unknown runner '{}' (known: {})",
                    tag,
                    lang.runner,
                    registry::known_runners().join(", ")
                );
            }
            if lang.memory_limit_mb == 0 || lang.cpu_limit <= 0.0 {
                bail!("Language '{}' needs positive memory and cpu limits", tag);
            }
            for (what, limits) in [("limits", &lang.limits), ("compile_limits", &lang.compile_limits)] {
                if limits.cpu_time_ms == 0
                    || limits.wall_clock_ms == 0
                    || limits.max_output_kb == 0
                    || limits.max_processes <= 0
                {
                    bail!("Language '{}' has non-positive {}", tag, what);
                }
            }
        }

        if let Some(signatures) = &self.classifier {
            for signature in signatures {
                if signature.all_of.is_empty() && signature.any_of.is_empty() {
                    bail!(
                        "Classifier signature for '{}' has no positive markers",
                        signature.language
                    );
                }
            }
        }

        Ok(())
    }

    /// Override pool size from `ARBITER_POOL_SIZE` if set
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(raw) = std::env::var("ARBITER_POOL_SIZE") {
            let size: usize = raw
                .parse()
                .with_context(|| format!("ARBITER_POOL_SIZE is not a number: {}", raw))?;
            if size == 0 {
                bail!("ARBITER_POOL_SIZE must be at least 1");
            }
            self.pool_size = size;
        }
        Ok(())
    }

    pub fn default_language(&self) -> LanguageTag {
        LanguageTag::new(&self.default_language)
    }

    /// List all configured languages
    pub fn list_languages(&self) -> Vec<String> {
        self.languages.iter().map(|l| l.tag().to_string()).collect()
    }
}
