use anyhow::Context;
use chrono::Datelike;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::Error;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub enhancement: EnhancementConfig,
    #[serde(default)]
    pub years: YearsConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub naming: NamingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub run: RunConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// Scan leading pages/sections when the fast sources are weak.
    #[serde(default = "default_true")]
    pub advanced: bool,
    #[serde(default = "default_content_pages")]
    pub content_pages: usize,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_true")]
    pub recursive: bool,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            advanced: true,
            content_pages: default_content_pages(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            recursive: true,
            follow_symlinks: false,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_content_pages() -> usize {
    3
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.pdf".to_string(), "**/*.epub".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnhancementConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Name of the environment variable holding the API credential.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for EnhancementConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_endpoint(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            threshold: default_threshold(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            timeout_secs: default_timeout_secs(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_endpoint() -> String {
    "https://api.perplexity.ai/chat/completions".to_string()
}
fn default_model() -> String {
    "sonar".to_string()
}
fn default_api_key_env() -> String {
    "PERPLEXITY_API_KEY".to_string()
}
fn default_threshold() -> f64 {
    0.7
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_temperature() -> f64 {
    0.1
}
fn default_max_tokens() -> u32 {
    500
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct YearsConfig {
    #[serde(default = "default_min_year")]
    pub min: i32,
    #[serde(default = "default_max_year")]
    pub max: i32,
}

impl Default for YearsConfig {
    fn default() -> Self {
        Self {
            min: default_min_year(),
            max: default_max_year(),
        }
    }
}

impl YearsConfig {
    pub fn contains(&self, year: i32) -> bool {
        (self.min..=self.max).contains(&year)
    }
}

fn default_min_year() -> i32 {
    1500
}
fn default_max_year() -> i32 {
    chrono::Utc::now().year()
}

/// Confidence weights. Full credit per field plus an agreement bonus.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct ScoringConfig {
    #[serde(default = "default_author_weight")]
    pub author: f64,
    #[serde(default = "default_title_weight")]
    pub title: f64,
    #[serde(default = "default_year_weight")]
    pub year: f64,
    #[serde(default = "default_agreement_weight")]
    pub agreement: f64,
    /// Credit for a field that is present but fails its plausibility check.
    #[serde(default = "default_partial_credit")]
    pub partial: f64,
    #[serde(default = "default_min_title_len")]
    pub min_title_len: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            author: default_author_weight(),
            title: default_title_weight(),
            year: default_year_weight(),
            agreement: default_agreement_weight(),
            partial: default_partial_credit(),
            min_title_len: default_min_title_len(),
        }
    }
}

fn default_author_weight() -> f64 {
    0.30
}
fn default_title_weight() -> f64 {
    0.30
}
fn default_year_weight() -> f64 {
    0.20
}
fn default_agreement_weight() -> f64 {
    0.20
}
fn default_partial_credit() -> f64 {
    0.10
}
fn default_min_title_len() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NamingStyle {
    /// `Author_Title_Year.ext`
    #[default]
    Friendly,
    /// `Author - Title (Year).ext`
    Display,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NamingConfig {
    #[serde(default)]
    pub style: NamingStyle,
    #[serde(default = "default_unknown_author")]
    pub unknown_author: String,
    #[serde(default = "default_unknown_title")]
    pub unknown_title: String,
    /// Empty means "omit the year".
    #[serde(default)]
    pub unknown_year: String,
    /// Maximum filename length in bytes, extension included.
    #[serde(default = "default_max_len")]
    pub max_len: usize,
    #[serde(default = "default_collision_budget")]
    pub collision_budget: u32,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            style: NamingStyle::Friendly,
            unknown_author: default_unknown_author(),
            unknown_title: default_unknown_title(),
            unknown_year: String::new(),
            max_len: default_max_len(),
            collision_budget: default_collision_budget(),
        }
    }
}

fn default_unknown_author() -> String {
    "Unknown Author".to_string()
}
fn default_unknown_title() -> String {
    "Untitled".to_string()
}
fn default_max_len() -> usize {
    255
}
fn default_collision_budget() -> u32 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_cache_path(),
        }
    }
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("~/.shelfname/cache.sqlite")
}

/// Expand `~` at the start of a path to `home` (the current directory when
/// no home is known).
pub fn expand_tilde(path: &Path, home: Option<&Path>) -> PathBuf {
    let s = path.to_string_lossy();
    if s == "~" || s.starts_with("~/") {
        let home = home.unwrap_or_else(|| Path::new("."));
        return home.join(s.strip_prefix("~/").unwrap_or(""));
    }
    path.to_path_buf()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RunConfig {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            max_concurrent: default_max_concurrent(),
        }
    }
}

fn default_max_concurrent() -> usize {
    10
}

impl Config {
    /// Defaults for every section; used when no config file exists.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Check cross-field constraints. Called after file load and again after
    /// CLI overrides are applied.
    pub fn validate(&self) -> Result<(), Error> {
        let e = &self.enhancement;
        if !(0.0..=1.0).contains(&e.threshold) {
            return Err(Error::Configuration(format!(
                "enhancement.threshold must be in [0.0, 1.0], got {}",
                e.threshold
            )));
        }
        if e.enabled && e.model.trim().is_empty() {
            return Err(Error::Configuration(
                "enhancement.model must be set when enhancement is enabled".to_string(),
            ));
        }
        if e.enabled && e.api_key_env.trim().is_empty() {
            return Err(Error::Configuration(
                "enhancement.api_key_env must name an environment variable".to_string(),
            ));
        }

        if self.years.min > self.years.max {
            return Err(Error::Configuration(format!(
                "years.min ({}) must be <= years.max ({})",
                self.years.min, self.years.max
            )));
        }

        let s = &self.scoring;
        let weights = [s.author, s.title, s.year, s.agreement, s.partial];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(Error::Configuration(
                "scoring weights must be finite and non-negative".to_string(),
            ));
        }
        if s.author + s.title + s.year + s.agreement > 1.0 + 1e-9 {
            return Err(Error::Configuration(
                "scoring.author + title + year + agreement must not exceed 1.0".to_string(),
            ));
        }
        if s.partial > s.author.min(s.title) {
            return Err(Error::Configuration(
                "scoring.partial must not exceed the author or title weight".to_string(),
            ));
        }

        if self.naming.max_len < 16 {
            return Err(Error::Configuration(
                "naming.max_len must be >= 16".to_string(),
            ));
        }
        if self.run.max_concurrent == 0 {
            return Err(Error::Configuration(
                "run.max_concurrent must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load configuration from a TOML file. A missing file yields
/// [`Config::minimal`]; a malformed one is an error.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(Config::minimal());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}
