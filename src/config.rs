//! TOML configuration.
//!
//! Every section and key has a default so an absent or partial file still
//! yields a runnable configuration. [`load_config`] validates the values the
//! pipeline depends on.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_llm_timeout(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_llm_timeout() -> u64 {
    120
}
fn default_temperature() -> f32 {
    0.1
}
fn default_max_tokens() -> u32 {
    2048
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_rpm")]
    pub requests_per_minute: u32,
    #[serde(default = "default_rpd")]
    pub requests_per_day: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_rpm(),
            requests_per_day: default_rpd(),
        }
    }
}

fn default_rpm() -> u32 {
    60
}
fn default_rpd() -> u32 {
    10_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_relationships_dir")]
    pub relationships_dir: PathBuf,
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: u64,
    /// Key remote project summaries by URL alone instead of content hash.
    #[serde(default)]
    pub url_keyed_projects: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_cache_dir(),
            relationships_dir: default_relationships_dir(),
            ttl_hours: default_ttl_hours(),
            url_keyed_projects: false,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_hours * 3600)
    }
}

fn default_true() -> bool {
    true
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from(".rex-cache/summaries")
}
fn default_relationships_dir() -> PathBuf {
    PathBuf::from(".rex-cache/relationships")
}
fn default_ttl_hours() -> u64 {
    168
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrawlerConfig {
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Extension-less files accepted by name (lowercase).
    #[serde(default = "default_file_names")]
    pub file_names: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_true")]
    pub respect_gitignore: bool,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            extensions: default_extensions(),
            file_names: default_file_names(),
            exclude_globs: Vec::new(),
            respect_gitignore: true,
            follow_symlinks: false,
        }
    }
}

fn default_max_file_size() -> u64 {
    1_048_576
}

fn default_extensions() -> Vec<String> {
    [
        "rs", "go", "py", "js", "jsx", "ts", "tsx", "mjs", "cjs", "java", "kt", "kts", "scala",
        "rb", "php", "cs", "fs", "c", "h", "cc", "cpp", "hpp", "swift", "m", "dart", "ex", "exs",
        "erl", "clj", "hs", "ml", "lua", "sh", "bash", "zsh", "ps1", "sql", "proto", "graphql",
        "gql", "vue", "svelte", "html", "css", "scss", "md", "yaml", "yml", "json", "toml", "xml",
        "gradle", "tf", "hcl", "mod", "work", "txt",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_file_names() -> Vec<String> {
    ["dockerfile", "makefile", "procfile", "gemfile", "jenkinsfile", "rakefile", "vagrantfile"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_chunk_tokens(),
        }
    }
}

fn default_chunk_tokens() -> usize {
    6000
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Size of the map-stage worker pool.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Emit a map progress event every this many completions.
    #[serde(default = "default_progress_every")]
    pub progress_every: usize,
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
    #[serde(default = "default_important_file_bytes")]
    pub important_file_bytes: usize,
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
    #[serde(default = "default_service_content_bytes")]
    pub max_service_content_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            progress_every: default_progress_every(),
            deadline_secs: default_deadline_secs(),
            important_file_bytes: default_important_file_bytes(),
            bus_capacity: default_bus_capacity(),
            max_service_content_bytes: default_service_content_bytes(),
        }
    }
}

impl PipelineConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

fn default_workers() -> usize {
    5
}
fn default_progress_every() -> usize {
    5
}
fn default_deadline_secs() -> u64 {
    30 * 60
}
fn default_important_file_bytes() -> usize {
    2048
}
fn default_bus_capacity() -> usize {
    64
}
fn default_service_content_bytes() -> usize {
    8192
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitConfig {
    #[serde(default = "default_clone_dir")]
    pub clone_dir: PathBuf,
    #[serde(default = "default_true")]
    pub shallow: bool,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            clone_dir: default_clone_dir(),
            shallow: true,
        }
    }
}

fn default_clone_dir() -> PathBuf {
    PathBuf::from(".rex-cache/repos")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7400".to_string()
}

/// Load and validate a config file. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        Config::default()
    };
    validate(&config)?;
    Ok(config)
}

/// Parse and validate config from a TOML string.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.pipeline.workers == 0 {
        anyhow::bail!("pipeline.workers must be >= 1");
    }
    if config.pipeline.progress_every == 0 {
        anyhow::bail!("pipeline.progress_every must be >= 1");
    }
    if config.pipeline.bus_capacity == 0 {
        anyhow::bail!("pipeline.bus_capacity must be >= 1");
    }
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if !(0.0..=0.1).contains(&config.llm.temperature) {
        anyhow::bail!("llm.temperature must be in [0.0, 0.1]");
    }
    let rl = &config.rate_limit;
    if rl.requests_per_minute == 0 || rl.requests_per_day == 0 {
        anyhow::bail!("rate_limit capacities must be >= 1");
    }
    if rl.requests_per_day < rl.requests_per_minute {
        anyhow::bail!("rate_limit.requests_per_day must be >= requests_per_minute");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.pipeline.workers, 5);
        assert_eq!(config.pipeline.deadline(), Duration::from_secs(1800));
        assert!(config.cache.enabled);
        assert!(config.crawler.extensions.contains(&"sql".to_string()));
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config = parse_config(
            r#"
            [rate_limit]
            requests_per_minute = 3

            [cache]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(config.rate_limit.requests_per_minute, 3);
        assert_eq!(config.rate_limit.requests_per_day, 10_000);
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.ttl_hours, 168);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(parse_config("[pipeline]\nworkers = 0").is_err());
        assert!(parse_config("[llm]\ntemperature = 0.7").is_err());
        assert!(parse_config(
            "[rate_limit]\nrequests_per_minute = 100\nrequests_per_day = 10"
        )
        .is_err());
    }

    #[test]
    fn example_config_parses() {
        let config = parse_config(include_str!("../config/rex.example.toml")).unwrap();
        assert_eq!(config.crawler.exclude_globs.len(), 2);
        assert!(!config.cache.url_keyed_projects);
    }

    #[test]
    fn missing_file_is_default() {
        let config = load_config(Path::new("/definitely/not/here/rex.toml")).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:7400");
    }
}
