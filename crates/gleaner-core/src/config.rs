use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_EXTRACT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_GENERATE_TIMEOUT_SECS: u64 = 600; // QA generation can take minutes
pub const DEFAULT_STORE_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_SEGMENTS: usize = 500;
pub const DEFAULT_MAX_PAIRS: usize = 20;
pub const DEFAULT_MAX_INPUT_CHARS: usize = 24_000;

/// Top-level config (gleaner.toml + GLEANER_* env overrides).
///
/// Nested keys are separated by a double underscore in env vars, e.g.
/// `GLEANER_PIPELINE__GENERATE_TIMEOUT_SECS=900`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GleanerConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often `serve` re-reads the schedule table to pick up edits made
    /// by other processes. 0 disables the sync.
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: default_sync_interval(),
        }
    }
}

/// Upper bounds for the three blocking pipeline steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_extract_timeout")]
    pub extract_timeout_secs: u64,
    #[serde(default = "default_generate_timeout")]
    pub generate_timeout_secs: u64,
    #[serde(default = "default_store_timeout")]
    pub store_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            extract_timeout_secs: DEFAULT_EXTRACT_TIMEOUT_SECS,
            generate_timeout_secs: DEFAULT_GENERATE_TIMEOUT_SECS,
            store_timeout_secs: DEFAULT_STORE_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Per-request HTTP timeout. Should stay below `pipeline.extract_timeout_secs`.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_segments")]
    pub max_segments: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout(),
            max_segments: DEFAULT_MAX_SEGMENTS,
        }
    }
}

/// OpenAI-compatible chat completions endpoint used for QA generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    /// Falls back to the `OPENAI_API_KEY` env var when unset.
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_pairs")]
    pub max_pairs: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            api_key: None,
            model: default_model(),
            max_pairs: DEFAULT_MAX_PAIRS,
            max_tokens: default_max_tokens(),
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: String,
    /// Prefix for artifact URLs, e.g. a CDN in front of `root`.
    /// When unset, artifacts get `file://` URLs.
    pub public_base_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            public_base_url: None,
        }
    }
}

fn default_sync_interval() -> u64 {
    30
}
fn default_extract_timeout() -> u64 {
    DEFAULT_EXTRACT_TIMEOUT_SECS
}
fn default_generate_timeout() -> u64 {
    DEFAULT_GENERATE_TIMEOUT_SECS
}
fn default_store_timeout() -> u64 {
    DEFAULT_STORE_TIMEOUT_SECS
}
fn default_user_agent() -> String {
    format!("gleaner/{}", env!("CARGO_PKG_VERSION"))
}
fn default_request_timeout() -> u64 {
    30
}
fn default_max_segments() -> usize {
    DEFAULT_MAX_SEGMENTS
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_max_pairs() -> usize {
    DEFAULT_MAX_PAIRS
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_max_input_chars() -> usize {
    DEFAULT_MAX_INPUT_CHARS
}
fn default_db_path() -> String {
    format!("{}/gleaner.db", gleaner_home())
}
fn default_storage_root() -> String {
    format!("{}/artifacts", gleaner_home())
}

fn gleaner_home() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.gleaner", home)
}

impl GleanerConfig {
    /// Load config from a TOML file with GLEANER_* env var overrides.
    ///
    /// A missing file is not an error: every section has defaults.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::from_figment(
            Figment::new()
                .merge(Toml::file(&path))
                .merge(Env::prefixed("GLEANER_").split("__")),
        )
    }

    fn from_figment(figment: Figment) -> crate::error::Result<Self> {
        figment
            .extract()
            .map_err(|e| crate::error::GleanerError::Config(e.to_string()))
    }
}

fn default_config_path() -> String {
    format!("{}/gleaner.toml", gleaner_home())
}
