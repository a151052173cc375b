//! Application configuration for the opengov pipeline.
//!
//! User config lives at `~/.opengov/opengov.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{OpenGovError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "opengov.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".opengov";

// ---------------------------------------------------------------------------
// Config structs (matching opengov.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Upstream registry API settings.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// AI analyzer settings.
    #[serde(default)]
    pub analyzer: AnalyzerConfig,

    /// Batch sizes and concurrency for the pipeline stages.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Database location.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// `[registry]` section — the Federal Register API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Base API URL.
    #[serde(default = "default_registry_url")]
    pub base_url: String,

    /// Documents per page when paging through results.
    #[serde(default = "default_per_page")]
    pub per_page: u32,

    /// Hard cap on pages fetched per run.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Lookback window in days for the publication-date filter.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,

    /// Per-request timeout in seconds.
    #[serde(default = "default_registry_timeout")]
    pub timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: default_registry_url(),
            per_page: default_per_page(),
            max_pages: default_max_pages(),
            lookback_days: default_lookback_days(),
            timeout_secs: default_registry_timeout(),
        }
    }
}

fn default_registry_url() -> String {
    "https://www.federalregister.gov/api/v1".into()
}
fn default_per_page() -> u32 {
    100
}
fn default_max_pages() -> u32 {
    10
}
fn default_lookback_days() -> u32 {
    7
}
fn default_registry_timeout() -> u64 {
    30
}

/// `[analyzer]` section — the AI enrichment API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// OpenAI-compatible chat completions endpoint base.
    #[serde(default = "default_analyzer_url")]
    pub base_url: String,

    /// Model identifier.
    #[serde(default = "default_model")]
    pub model: String,

    /// Per-call timeout in seconds. On exceeding it the document is simply
    /// deferred to the next run.
    #[serde(default = "default_analyzer_timeout")]
    pub timeout_secs: u64,

    /// Use the deterministic mock analyzer instead of the real API.
    #[serde(default)]
    pub mock: bool,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_analyzer_url(),
            model: default_model(),
            timeout_secs: default_analyzer_timeout(),
            mock: false,
        }
    }
}

fn default_api_key_env() -> String {
    "XAI_API_KEY".into()
}
fn default_analyzer_url() -> String {
    "https://api.x.ai/v1".into()
}
fn default_model() -> String {
    "grok-4-fast".into()
}
fn default_analyzer_timeout() -> u64 {
    45
}

/// `[pipeline]` section — stage batch sizes and worker-pool width.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Canonicalization batch size.
    #[serde(default = "default_canonicalize_batch")]
    pub canonicalize_batch: u32,

    /// Enrichment batch size.
    #[serde(default = "default_enrich_batch")]
    pub enrich_batch: u32,

    /// Concurrent analyzer calls within one enrichment batch.
    #[serde(default = "default_enrich_concurrency")]
    pub enrich_concurrency: u32,

    /// Materialization batch size.
    #[serde(default = "default_materialize_batch")]
    pub materialize_batch: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            canonicalize_batch: default_canonicalize_batch(),
            enrich_batch: default_enrich_batch(),
            enrich_concurrency: default_enrich_concurrency(),
            materialize_batch: default_materialize_batch(),
        }
    }
}

fn default_canonicalize_batch() -> u32 {
    200
}
fn default_enrich_batch() -> u32 {
    200
}
fn default_enrich_concurrency() -> u32 {
    4
}
fn default_materialize_batch() -> u32 {
    500
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the libSQL database file. `~` expands to the home directory.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.opengov/opengov.db".into()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.opengov/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| OpenGovError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.opengov/opengov.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| OpenGovError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| OpenGovError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| OpenGovError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| OpenGovError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| OpenGovError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~` in a configured path to the user's home directory.
pub fn expand_path(path: &str) -> Result<PathBuf> {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| OpenGovError::config("could not determine home directory"))?;
        Ok(home.join(rest))
    } else {
        Ok(PathBuf::from(path))
    }
}

/// Check that the analyzer API key env var is set and non-empty.
///
/// Skipped when the mock analyzer is configured.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    if config.analyzer.mock {
        return Ok(());
    }

    let var_name = &config.analyzer.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(()),
        _ => Err(OpenGovError::config(format!(
            "analyzer API key not found. Set the {var_name} environment variable, \
             or set analyzer.mock = true to run without an API key."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("federalregister.gov"));
        assert!(toml_str.contains("XAI_API_KEY"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.registry.lookback_days, 7);
        assert_eq!(parsed.pipeline.enrich_concurrency, 4);
        assert_eq!(parsed.analyzer.api_key_env, "XAI_API_KEY");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[registry]
lookback_days = 30

[analyzer]
mock = true
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.registry.lookback_days, 30);
        assert_eq!(config.registry.per_page, 100);
        assert!(config.analyzer.mock);
        assert_eq!(config.pipeline.materialize_batch, 500);
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.analyzer.api_key_env = "OPENGOV_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));

        config.analyzer.mock = true;
        assert!(validate_api_key(&config).is_ok());
    }

    #[test]
    fn tilde_expansion() {
        let expanded = expand_path("~/.opengov/opengov.db").expect("expand");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().ends_with(".opengov/opengov.db"));

        let absolute = expand_path("/tmp/test.db").expect("absolute");
        assert_eq!(absolute, PathBuf::from("/tmp/test.db"));
    }
}
