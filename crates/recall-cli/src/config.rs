//! Configuration Vault – reads/writes `~/.recall/config.toml`.

use recall_memory::persistence::StorageBackend;
use recall_memory::store::{
    DEFAULT_IDENTICAL_SIMILARITY, DEFAULT_SEARCH_LIMIT, DEFAULT_SEARCH_THRESHOLD,
    DEFAULT_SIMILAR_SIMILARITY,
};
use recall_memory::MemoryConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use zeroize::Zeroize;

/// Supported model-server flavours.  Both speak the OpenAI wire format; the
/// choice only changes defaults and whether Ollama discovery runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    #[default]
    Ollama,
    OpenAI,
}

impl std::fmt::Display for AiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AiProvider::Ollama => write!(f, "ollama"),
            AiProvider::OpenAI => write!(f, "openai"),
        }
    }
}

impl AiProvider {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ollama" => Some(AiProvider::Ollama),
            "openai" => Some(AiProvider::OpenAI),
            _ => None,
        }
    }

    pub fn default_url(self) -> &'static str {
        match self {
            AiProvider::Ollama => "http://localhost:11434",
            AiProvider::OpenAI => "https://api.openai.com",
        }
    }

    pub fn default_chat_model(self) -> &'static str {
        match self {
            AiProvider::Ollama => "llama3",
            AiProvider::OpenAI => "gpt-4o-mini",
        }
    }

    pub fn default_embedding_model(self) -> &'static str {
        match self {
            AiProvider::Ollama => recall_runtime::DEFAULT_EMBEDDING_MODEL,
            AiProvider::OpenAI => "text-embedding-3-small",
        }
    }
}

/// Persisted user configuration stored in `~/.recall/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ai_provider: AiProvider,

    /// Base URL of the OpenAI-compatible server.
    #[serde(default = "default_llm_url")]
    pub llm_url: String,

    /// Model used to merge similar facts.
    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    /// Model used to embed facts and queries.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Bearer token for hosted providers (plain text; the file is 0600).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,

    /// Snapshot location: a file prefix, or the database file for `sqlite`.
    #[serde(default = "default_memory_path")]
    pub memory_path: PathBuf,

    #[serde(default)]
    pub backend: StorageBackend,

    #[serde(default = "default_identical")]
    pub identical_similarity: f32,
    #[serde(default = "default_similar")]
    pub similar_similarity: f32,
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
    #[serde(default = "default_search_threshold")]
    pub search_threshold: f32,

    /// `/cleanup` default: forget facts older than this many days …
    #[serde(default = "default_cleanup_days")]
    pub cleanup_max_age_days: i64,
    /// … that were retrieved fewer than this many times.
    #[serde(default = "default_cleanup_min_access")]
    pub cleanup_min_access: u64,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("ai_provider", &self.ai_provider)
            .field("llm_url", &self.llm_url)
            .field("chat_model", &self.chat_model)
            .field("embedding_model", &self.embedding_model)
            .field(
                "api_key",
                if self.api_key.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("memory_path", &self.memory_path)
            .field("backend", &self.backend)
            .field("identical_similarity", &self.identical_similarity)
            .field("similar_similarity", &self.similar_similarity)
            .field("search_limit", &self.search_limit)
            .field("search_threshold", &self.search_threshold)
            .field("cleanup_max_age_days", &self.cleanup_max_age_days)
            .field("cleanup_min_access", &self.cleanup_min_access)
            .finish()
    }
}

impl Drop for Config {
    fn drop(&mut self) {
        self.api_key.zeroize();
    }
}

fn default_llm_url() -> String {
    AiProvider::Ollama.default_url().to_string()
}
fn default_chat_model() -> String {
    AiProvider::Ollama.default_chat_model().to_string()
}
fn default_embedding_model() -> String {
    AiProvider::Ollama.default_embedding_model().to_string()
}
fn default_memory_path() -> PathBuf {
    recall_dir_for_home(&home_dir()).join("memory")
}
fn default_identical() -> f32 {
    DEFAULT_IDENTICAL_SIMILARITY
}
fn default_similar() -> f32 {
    DEFAULT_SIMILAR_SIMILARITY
}
fn default_search_limit() -> usize {
    DEFAULT_SEARCH_LIMIT
}
fn default_search_threshold() -> f32 {
    DEFAULT_SEARCH_THRESHOLD
}
fn default_cleanup_days() -> i64 {
    30
}
fn default_cleanup_min_access() -> u64 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self::for_provider(AiProvider::default())
    }
}

impl Config {
    /// Defaults with URL and model names suited to `provider`.
    pub fn for_provider(provider: AiProvider) -> Self {
        Self {
            ai_provider: provider,
            llm_url: provider.default_url().to_string(),
            chat_model: provider.default_chat_model().to_string(),
            embedding_model: provider.default_embedding_model().to_string(),
            api_key: String::new(),
            memory_path: default_memory_path(),
            backend: StorageBackend::default(),
            identical_similarity: default_identical(),
            similar_similarity: default_similar(),
            search_limit: default_search_limit(),
            search_threshold: default_search_threshold(),
            cleanup_max_age_days: default_cleanup_days(),
            cleanup_min_access: default_cleanup_min_access(),
        }
    }

    /// The memory store settings carried by this config.
    /// Reject retention settings `/cleanup` cannot act on.
    pub fn validate(&self) -> Result<(), String> {
        if self.cleanup_max_age_days < 0 {
            return Err(format!(
                "cleanup_max_age_days must not be negative, got {}",
                self.cleanup_max_age_days
            ));
        }
        Ok(())
    }

    pub fn memory_config(&self) -> MemoryConfig {
        MemoryConfig {
            storage_path: self.memory_path.clone(),
            backend: self.backend,
            identical_similarity: self.identical_similarity,
            similar_similarity: self.similar_similarity,
            search_limit: self.search_limit,
            search_threshold: self.search_threshold,
        }
    }
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

fn recall_dir_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".recall")
}

/// Return the path to `~/.recall/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home_dir())
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    recall_dir_for_home(home).join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

/// Load the config from a specific path.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    cfg.validate()?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `RECALL_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `RECALL_LLM_URL` | `llm_url` |
/// | `RECALL_CHAT_MODEL` | `chat_model` |
/// | `RECALL_EMBEDDING_MODEL` | `embedding_model` |
/// | `RECALL_MEMORY_PATH` | `memory_path` |
/// | `RECALL_API_KEY` | `api_key` |
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides_with(cfg, |name| std::env::var(name).ok());
}

fn apply_overrides_with(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let set = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
    if let Some(v) = set("RECALL_LLM_URL") {
        cfg.llm_url = v;
    }
    if let Some(v) = set("RECALL_CHAT_MODEL") {
        cfg.chat_model = v;
    }
    if let Some(v) = set("RECALL_EMBEDDING_MODEL") {
        cfg.embedding_model = v;
    }
    if let Some(v) = set("RECALL_MEMORY_PATH") {
        cfg.memory_path = PathBuf::from(v);
    }
    if let Some(v) = set("RECALL_API_KEY") {
        cfg.api_key = v;
    }
}

/// Save the config to disk, creating `~/.recall/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Owner only (rwx------).
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    // Owner read/write only (rw-------).
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
