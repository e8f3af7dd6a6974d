//
// store.rs
//
// Compilation unit handles and their conversion to editor URLs
//

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

/// Separator between the archive path and the entry path in `jar:` URLs.
const ENTRY_SEPARATOR: &str = "!/";

/// Handle to a compilation unit: a file on disk or an entry inside an archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Store {
    File(PathBuf),
    Entry { archive: PathBuf, entry: String },
}

impl Store {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Store::File(path.into())
    }

    pub fn entry(archive: impl Into<PathBuf>, entry: impl Into<String>) -> Self {
        Store::Entry {
            archive: archive.into(),
            entry: entry.into(),
        }
    }

    /// Simple file name, used in user-facing messages.
    pub fn name(&self) -> &str {
        match self {
            Store::File(path) => path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default(),
            Store::Entry { entry, .. } => entry.rsplit('/').next().unwrap_or(entry),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Store::File(path) => Some(path),
            Store::Entry { .. } => None,
        }
    }

    pub fn has_suffix(&self, suffixes: &[String]) -> bool {
        let name = self.name();
        suffixes
            .iter()
            .any(|suffix| name.rsplit_once('.').is_some_and(|(_, ext)| ext == suffix))
    }

    /// Converts to the URL form the editor uses for open buffers.
    ///
    /// Returns `None` for relative paths, which have no URL form.
    pub fn to_url(&self) -> Option<Url> {
        match self {
            Store::File(path) => Url::from_file_path(path).ok(),
            Store::Entry { archive, entry } => {
                let archive = Url::from_file_path(archive).ok()?;
                Url::parse(&format!("jar:{archive}{ENTRY_SEPARATOR}{entry}")).ok()
            }
        }
    }

    pub fn from_url(url: &Url) -> Option<Self> {
        match url.scheme() {
            "file" => url.to_file_path().ok().map(Store::File),
            "jar" | "zip" => {
                let (archive, entry) = url.path().split_once(ENTRY_SEPARATOR)?;
                let archive = Url::parse(archive).ok()?.to_file_path().ok()?;
                Some(Store::entry(archive, entry))
            }
            other => {
                log::trace!("No store for URL scheme '{}': {}", other, url);
                None
            }
        }
    }
}

impl std::fmt::Display for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Store::File(path) => write!(f, "{}", path.display()),
            Store::Entry { archive, entry } => {
                write!(f, "{}{}{}", archive.display(), ENTRY_SEPARATOR, entry)
            }
        }
    }
}

/// Hash of a source text, used to skip re-extraction of unchanged stores.
pub fn content_hash(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}
