use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

/// How hyphenated words split across whitespace are rejoined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hyphenation {
    /// Never join.
    None,
    /// Join only when the intervening whitespace contains a line break.
    #[default]
    FilterLinebreak,
    /// Join across any intervening whitespace.
    FilterAll,
}

impl Hyphenation {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::FilterLinebreak => "filter_linebreak",
            Self::FilterAll => "filter_all",
        }
    }
}

impl std::str::FromStr for Hyphenation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "filter_linebreak" | "linebreak" => Ok(Self::FilterLinebreak),
            "filter_all" | "all" => Ok(Self::FilterAll),
            other => Err(format!("unknown hyphenation mode '{other}'")),
        }
    }
}

/// Per-set normalization rules applied during tokenization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollatorConfig {
    #[serde(default = "default_true")]
    pub filter_whitespace: bool,
    #[serde(default = "default_true")]
    pub filter_punctuation: bool,
    #[serde(default = "default_true")]
    pub filter_case: bool,
    #[serde(default)]
    pub hyphenation: Hyphenation,
}

impl Default for CollatorConfig {
    fn default() -> Self {
        Self {
            filter_whitespace: default_true(),
            filter_punctuation: default_true(),
            filter_case: default_true(),
            hyphenation: Hyphenation::default(),
        }
    }
}

/// Engine-wide tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_batch_size")]
    pub tokenization_batch_size: usize,
    #[serde(default = "default_batch_size")]
    pub collation_batch_size: usize,
    #[serde(default = "default_apparatus_batch_size")]
    pub apparatus_batch_size: usize,
    /// Characters of context fetched each side of an insertion point.
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_task_expiry_secs")]
    pub task_expiry_secs: u64,
    #[serde(default = "default_cache_lifespan_secs")]
    pub cache_lifespan_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tokenization_batch_size: default_batch_size(),
            collation_batch_size: default_batch_size(),
            apparatus_batch_size: default_apparatus_batch_size(),
            context_window: default_context_window(),
            workers: default_workers(),
            task_expiry_secs: default_task_expiry_secs(),
            cache_lifespan_secs: default_cache_lifespan_secs(),
        }
    }
}

impl EngineConfig {
    /// Reject settings that would stall the pipeline.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("tokenization_batch_size", self.tokenization_batch_size),
            ("collation_batch_size", self.collation_batch_size),
            ("apparatus_batch_size", self.apparatus_batch_size),
            ("workers", self.workers),
        ] {
            if value == 0 {
                bail!("{name} must be greater than zero");
            }
        }
        Ok(())
    }

    fn apply_overrides(
        mut self,
        workers: Option<String>,
        context_window: Option<String>,
    ) -> Result<Self> {
        if let Some(raw) = workers {
            self.workers = raw
                .trim()
                .parse()
                .with_context(|| format!("VARIANCE_WORKERS is not a number: '{raw}'"))?;
        }
        if let Some(raw) = context_window {
            self.context_window = raw
                .trim()
                .parse()
                .with_context(|| format!("VARIANCE_CONTEXT_WINDOW is not a number: '{raw}'"))?;
        }
        Ok(self)
    }
}

/// Read `<project_root>/.variance/config.toml`, if present.
pub fn load_project_config(project_root: &Path) -> Result<Option<EngineConfig>> {
    load_file(&project_root.join(".variance/config.toml"))
}

/// Read `<config_dir>/variance/config.toml`, if present.
pub fn load_user_config() -> Result<Option<EngineConfig>> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(None);
    };
    load_file(&config_dir.join("variance/config.toml"))
}

/// Project file, else user file, else defaults; then environment overrides.
pub fn resolve_config(project_root: &Path) -> Result<EngineConfig> {
    let base = match load_project_config(project_root)? {
        Some(config) => config,
        None => load_user_config()?.unwrap_or_default(),
    };

    let config = base.apply_overrides(
        env::var("VARIANCE_WORKERS").ok(),
        env::var("VARIANCE_CONTEXT_WINDOW").ok(),
    )?;
    config.validate()?;
    Ok(config)
}

fn load_file(path: &Path) -> Result<Option<EngineConfig>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<EngineConfig>(&content)
        .map(Some)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

const fn default_true() -> bool {
    true
}

const fn default_batch_size() -> usize {
    5000
}

const fn default_apparatus_batch_size() -> usize {
    1000
}

const fn default_context_window() -> usize {
    40
}

const fn default_workers() -> usize {
    2
}

const fn default_task_expiry_secs() -> u64 {
    30 * 60
}

const fn default_cache_lifespan_secs() -> u64 {
    24 * 60 * 60
}
