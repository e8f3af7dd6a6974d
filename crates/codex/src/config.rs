//
// config.rs
//
// Workspace configuration for indexing and rename
//

use std::path::{Path, PathBuf};

use anyhow::Context;

/// Workspace configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodexConfig {
    /// File suffixes (without the dot) picked up by a full reindex
    pub source_suffixes: Vec<String>,
    /// Directory names skipped by a full reindex
    pub ignored_dirs: Vec<String>,
    /// Maximum number of pending reindex requests per project
    pub max_queue_size: usize,
    /// Capacity of the shared resolution cache
    pub resolution_cache_capacity: usize,
    /// Whether rename saves the files other than the one being edited
    pub save_other_files_after_rename: bool,
    /// Where project symbol stores are persisted; in memory only when unset
    pub store_dir: Option<PathBuf>,
}

impl Default for CodexConfig {
    fn default() -> Self {
        Self {
            source_suffixes: ["java", "scala", "kt", "rs", "ts", "py"]
                .into_iter()
                .map(String::from)
                .collect(),
            ignored_dirs: [".git", "target", "node_modules", "build"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_queue_size: 500,
            resolution_cache_capacity: 1000,
            save_other_files_after_rename: true,
            store_dir: None,
        }
    }
}

impl CodexConfig {
    /// Reads a JSON settings file. A file without a `codex` section yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let settings: serde_json::Value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(parse_codex_config(&settings).unwrap_or_default())
    }
}

fn string_list(value: &serde_json::Value) -> Option<Vec<String>> {
    value.as_array().map(|items| {
        items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim_start_matches('.').to_string())
            .collect()
    })
}

/// Builds a config from the `codex` section of a settings object.
///
/// Returns `None` when there is no such section. Missing or mistyped keys
/// keep their defaults.
///
/// ```
/// let settings = serde_json::json!({
///     "codex": { "maxQueueSize": 50, "storeDir": "/tmp/codex" }
/// });
/// let cfg = codex::config::parse_codex_config(&settings).unwrap();
/// assert_eq!(cfg.max_queue_size, 50);
/// assert!(cfg.save_other_files_after_rename);
/// ```
pub fn parse_codex_config(settings: &serde_json::Value) -> Option<CodexConfig> {
    let codex = settings.get("codex")?;
    let mut config = CodexConfig::default();

    if let Some(v) = codex.get("sourceSuffixes").and_then(string_list) {
        config.source_suffixes = v;
    }
    if let Some(v) = codex.get("ignoredDirs").and_then(string_list) {
        config.ignored_dirs = v;
    }
    if let Some(v) = codex.get("maxQueueSize").and_then(|v| v.as_u64()) {
        config.max_queue_size = v as usize;
    }
    if let Some(v) = codex
        .get("resolutionCacheCapacity")
        .and_then(|v| v.as_u64())
    {
        config.resolution_cache_capacity = v as usize;
    }
    if let Some(v) = codex
        .get("saveOtherFilesAfterRename")
        .and_then(|v| v.as_bool())
    {
        config.save_other_files_after_rename = v;
    }
    if let Some(v) = codex.get("storeDir").and_then(|v| v.as_str()) {
        config.store_dir = Some(PathBuf::from(v));
    }

    log::trace!("Parsed codex config: {:?}", config);
    Some(config)
}
