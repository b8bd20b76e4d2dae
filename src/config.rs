//! Configuration for podscribe.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (PODSCRIBE_HOME, PODSCRIBE_STORAGE)
//! 2. Config file (.podscribe/config.yaml)
//! 3. Defaults (~/.podscribe)
//!
//! Config file discovery:
//! - Searches current directory and parents for .podscribe/config.yaml
//! - `paths.home` is relative to the .podscribe/ directory, `paths.storage`
//!   to the project root

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::UploadPolicy;
use crate::worker::RetryPolicy;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const CONFIG_DIR: &str = ".podscribe";
const HOME_ENV: &str = "PODSCRIBE_HOME";
const STORAGE_ENV: &str = "PODSCRIBE_STORAGE";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub upload: UploadPolicy,
    #[serde(default)]
    pub transcription: TranscriptionConfig,
    #[serde(default)]
    pub article: ArticleConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to .podscribe/)
    pub home: Option<String>,
    /// Artifact storage root (relative to the project root)
    pub storage: Option<String>,
}

/// Speech-to-text settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Prefix of engine task names (`{prefix}{job_id}`)
    #[serde(default = "default_task_prefix")]
    pub task_prefix: String,

    /// Language hint passed to the engine
    #[serde(default = "default_language")]
    pub language: String,

    /// Whisper binary
    #[serde(default = "default_whisper_path")]
    pub whisper_path: String,

    /// Whisper model name
    #[serde(default = "default_whisper_model")]
    pub model: String,

    #[serde(default = "default_transcription_timeout")]
    pub timeout_seconds: u64,
}

fn default_task_prefix() -> String {
    "podscribe-".to_string()
}
fn default_language() -> String {
    "fr-FR".to_string()
}
fn default_whisper_path() -> String {
    std::env::var("WHISPER_PATH").unwrap_or_else(|_| "whisper".to_string())
}
fn default_whisper_model() -> String {
    "base".to_string()
}
fn default_transcription_timeout() -> u64 {
    3600
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            task_prefix: default_task_prefix(),
            language: default_language(),
            whisper_path: default_whisper_path(),
            model: default_whisper_model(),
            timeout_seconds: default_transcription_timeout(),
        }
    }
}

impl TranscriptionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Text generation backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    #[default]
    Anthropic,
    Fabric,
}

/// Article generation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleConfig {
    #[serde(default)]
    pub adapter: AdapterKind,

    /// Model for the Anthropic backend (and `-m` for Fabric, if set)
    #[serde(default = "default_model")]
    pub model: String,

    /// Pattern for the Fabric backend
    #[serde(default = "default_pattern")]
    pub pattern: String,

    #[serde(default = "default_fabric_path")]
    pub fabric_path: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Transcript characters included in the prompt
    #[serde(default = "default_transcript_char_limit")]
    pub transcript_char_limit: usize,

    #[serde(default = "default_generation_timeout")]
    pub timeout_seconds: u64,

    /// Pause between queue drains in `podscribe work`
    #[serde(default = "default_worker_interval")]
    pub worker_interval_ms: u64,

    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_model() -> String {
    "claude-3-5-sonnet-20241022".to_string()
}
fn default_pattern() -> String {
    "write_article".to_string()
}
fn default_fabric_path() -> String {
    "fabric".to_string()
}
fn default_max_tokens() -> u32 {
    4000
}
fn default_transcript_char_limit() -> usize {
    50_000
}
fn default_generation_timeout() -> u64 {
    300
}
fn default_worker_interval() -> u64 {
    5000
}

impl Default for ArticleConfig {
    fn default() -> Self {
        Self {
            adapter: AdapterKind::default(),
            model: default_model(),
            pattern: default_pattern(),
            fabric_path: default_fabric_path(),
            max_tokens: default_max_tokens(),
            transcript_char_limit: default_transcript_char_limit(),
            timeout_seconds: default_generation_timeout(),
            worker_interval_ms: default_worker_interval(),
            retry: RetryPolicy::default(),
        }
    }
}

impl ArticleConfig {
    /// Backend-specific action passed to the adapter
    pub fn action(&self) -> &str {
        match self.adapter {
            AdapterKind::Anthropic => &self.model,
            AdapterKind::Fabric => &self.pattern,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn worker_interval(&self) -> Duration {
        Duration::from_millis(self.worker_interval_ms)
    }
}

/// Status polling settings for `submit --follow`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval() -> u64 {
    3000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl ClientConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Engine state (job database, journal, article queue)
    pub home: PathBuf,
    /// Artifact storage root
    pub storage: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub upload: UploadPolicy,
    pub transcription: TranscriptionConfig,
    pub article: ArticleConfig,
    pub client: ClientConfig,
}

impl ResolvedConfig {
    /// Defaults rooted at `home`
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            storage: home.join("storage"),
            home,
            config_file: None,
            upload: UploadPolicy::default(),
            transcription: TranscriptionConfig::default(),
            article: ArticleConfig::default(),
            client: ClientConfig::default(),
        }
    }

    /// SQLite job database
    pub fn database_path(&self) -> PathBuf {
        self.home.join("jobs.db")
    }

    /// Transition journal
    pub fn journal_path(&self) -> PathBuf {
        self.home.join("job_events.jsonl")
    }

    /// Article queue log
    pub fn queue_path(&self) -> PathBuf {
        self.home.join("article_queue.jsonl")
    }
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Combine a config file, environment overrides and defaults
fn resolve(
    found: Option<(PathBuf, ConfigFile)>,
    env: impl Fn(&str) -> Option<String>,
    default_home: PathBuf,
) -> ResolvedConfig {
    let (config_file, file) = match found {
        Some((path, file)) => (Some(path), file),
        None => (None, ConfigFile::default()),
    };

    let config_dir = config_file
        .as_deref()
        .and_then(Path::parent)
        .unwrap_or(Path::new("."));
    let project_root = config_dir.parent().unwrap_or(Path::new("."));

    let home = if let Some(env_home) = env(HOME_ENV) {
        PathBuf::from(env_home)
    } else if let (Some(home_path), Some(_)) = (&file.paths.home, &config_file) {
        resolve_path(config_dir, home_path)
    } else {
        default_home
    };

    let storage = if let Some(env_storage) = env(STORAGE_ENV) {
        PathBuf::from(env_storage)
    } else if let (Some(storage_path), Some(_)) = (&file.paths.storage, &config_file) {
        resolve_path(project_root, storage_path)
    } else {
        home.join("storage")
    };

    ResolvedConfig {
        home,
        storage,
        config_file,
        upload: file.upload,
        transcription: file.transcription,
        article: file.article,
        client: file.client,
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(CONFIG_DIR);

    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    let found = match find_config_file(&cwd) {
        Some(path) => {
            let file = load_config_file(&path)?;
            Some((path, file))
        }
        None => None,
    };

    Ok(resolve(found, |key| std::env::var(key).ok(), default_home))
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}
