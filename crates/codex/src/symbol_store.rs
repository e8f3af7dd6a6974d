//
// symbol_store.rs
//
// Queryable element database for one project
//

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::element::{Definition, Element, Extraction, Kind, Ref, Use};
use crate::store::Store;

/// Identity of a symbol store; two handles with the same key are the same store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreKey(String);

impl StoreKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name/kind query over a store's definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub name: String,
    pub prefix: bool,
    /// Accepted kinds; empty accepts every kind.
    pub kinds: Vec<Kind>,
    pub public_only: bool,
}

impl Query {
    pub fn exact(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: false,
            kinds: Vec::new(),
            public_only: false,
        }
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: true,
            ..Self::exact(prefix)
        }
    }

    pub fn kind(mut self, kind: Kind) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn public_only(mut self) -> Self {
        self.public_only = true;
        self
    }

    fn accepts(&self, elem: &Element) -> bool {
        (self.kinds.is_empty() || self.kinds.contains(&elem.kind))
            && (!self.public_only || elem.is_public)
    }
}

/// A project's element database.
///
/// Updates replace all data recorded for one [`Store`] at once; readers see
/// either the old or the new data for that store, never a mix.
pub trait SymbolStore: Send + Sync {
    fn key(&self) -> &StoreKey;

    /// Replaces everything recorded for `store` with `extraction`.
    fn update(&self, store: &Store, extraction: &Extraction);

    fn remove(&self, store: &Store);

    fn lookup(&self, target: &Ref) -> Option<Definition>;

    /// Definitions matching `query`, ordered by name.
    fn find(&self, query: &Query) -> Vec<Definition>;

    /// Recorded uses of `target`, ordered by store then offset.
    fn uses(&self, target: &Ref) -> Vec<(Store, Use)>;

    fn stores(&self) -> Vec<Store>;

    /// Releases the store when its project hibernates.
    fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FileEntry {
    elements: Vec<Element>,
    uses: Vec<Use>,
}

#[derive(Debug, Clone, Default)]
struct StoreData {
    files: HashMap<Store, FileEntry>,
    /// Ref -> defining store -> index into that store's elements
    defs: HashMap<Ref, BTreeMap<Store, usize>>,
    /// Name -> refs, for exact and prefix queries
    names: BTreeMap<String, Vec<Ref>>,
    uses: HashMap<Ref, BTreeMap<Store, Vec<Use>>>,
}

impl StoreData {
    fn replace(&mut self, store: &Store, entry: Option<FileEntry>) {
        if let Some(old) = self.files.remove(store) {
            self.unlink(store, &old);
        }
        if let Some(entry) = entry {
            self.link(store, &entry);
            self.files.insert(store.clone(), entry);
        }
    }

    fn link(&mut self, store: &Store, entry: &FileEntry) {
        for (i, elem) in entry.elements.iter().enumerate() {
            let r = elem.to_ref();
            let defs = self.defs.entry(r.clone()).or_default();
            if defs.is_empty() {
                self.names.entry(elem.name.clone()).or_default().push(r);
            }
            defs.entry(store.clone()).or_insert(i);
        }
        for u in &entry.uses {
            self.uses
                .entry(u.target.clone())
                .or_default()
                .entry(store.clone())
                .or_default()
                .push(u.clone());
        }
    }

    fn unlink(&mut self, store: &Store, entry: &FileEntry) {
        for elem in &entry.elements {
            let r = elem.to_ref();
            let Some(defs) = self.defs.get_mut(&r) else {
                continue;
            };
            defs.remove(store);
            if defs.is_empty() {
                self.defs.remove(&r);
                if let Some(refs) = self.names.get_mut(&elem.name) {
                    refs.retain(|other| *other != r);
                    if refs.is_empty() {
                        self.names.remove(&elem.name);
                    }
                }
            }
        }
        for u in &entry.uses {
            if let Some(by_store) = self.uses.get_mut(&u.target) {
                by_store.remove(store);
                if by_store.is_empty() {
                    self.uses.remove(&u.target);
                }
            }
        }
    }

    fn definition(&self, key: &StoreKey, target: &Ref) -> Option<Definition> {
        let (store, &i) = self.defs.get(target)?.iter().next()?;
        let element = self.files.get(store)?.elements.get(i)?.clone();
        Some(Definition {
            store: store.clone(),
            origin: key.clone(),
            element,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct Persisted {
    key: StoreKey,
    files: Vec<(Store, FileEntry)>,
}

/// In-memory symbol store with copy-on-write snapshots.
///
/// Writers clone the shared data only when a reader still holds the previous
/// snapshot. Optionally persisted as JSON when closed.
pub struct MemoryStore {
    key: StoreKey,
    inner: RwLock<Arc<StoreData>>,
    persist_path: Option<PathBuf>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    pub fn new(key: StoreKey) -> Self {
        Self {
            key,
            inner: RwLock::new(Arc::new(StoreData::default())),
            persist_path: None,
        }
    }

    /// Opens a store persisted at `path`, or an empty one if nothing is there yet.
    /// The store is written back to `path` when closed.
    pub fn persistent(key: StoreKey, path: PathBuf) -> anyhow::Result<Self> {
        let mut store = if path.exists() {
            Self::load(&path)?
        } else {
            Self::new(key.clone())
        };
        if store.key != key {
            log::warn!(
                "Store file {} belongs to '{}', expected '{}'; starting empty",
                path.display(),
                store.key,
                key
            );
            store = Self::new(key);
        }
        store.persist_path = Some(path);
        Ok(store)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let persisted: Persisted = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse symbol store {}", path.display()))?;

        let mut data = StoreData::default();
        for (store, entry) in persisted.files {
            data.replace(&store, Some(entry));
        }
        log::debug!(
            "Loaded symbol store '{}' ({} files) from {}",
            persisted.key,
            data.files.len(),
            path.display()
        );
        Ok(Self {
            key: persisted.key,
            inner: RwLock::new(Arc::new(data)),
            persist_path: None,
        })
    }

    pub fn persist_to(&self, path: &Path) -> anyhow::Result<()> {
        let data = self.snapshot();
        let mut files: Vec<(Store, FileEntry)> = data
            .files
            .iter()
            .map(|(store, entry)| (store.clone(), entry.clone()))
            .collect();
        files.sort_by(|a, b| a.0.cmp(&b.0));
        let persisted = Persisted {
            key: self.key.clone(),
            files,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file =
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
        serde_json::to_writer(BufWriter::new(file), &persisted)
            .with_context(|| format!("Failed to write symbol store {}", path.display()))?;
        Ok(())
    }

    fn snapshot(&self) -> Arc<StoreData> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn modify(&self, f: impl FnOnce(&mut StoreData)) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(Arc::make_mut(&mut guard));
    }
}

impl SymbolStore for MemoryStore {
    fn key(&self) -> &StoreKey {
        &self.key
    }

    fn update(&self, store: &Store, extraction: &Extraction) {
        let entry = FileEntry {
            elements: extraction.elements.clone(),
            uses: extraction.uses.clone(),
        };
        self.modify(|data| data.replace(store, Some(entry)));
    }

    fn remove(&self, store: &Store) {
        self.modify(|data| data.replace(store, None));
    }

    fn lookup(&self, target: &Ref) -> Option<Definition> {
        self.snapshot().definition(&self.key, target)
    }

    fn find(&self, query: &Query) -> Vec<Definition> {
        let data = self.snapshot();
        let names: Box<dyn Iterator<Item = (&String, &Vec<Ref>)>> = if query.prefix {
            Box::new(
                data.names
                    .range(query.name.clone()..)
                    .take_while(|(name, _)| name.starts_with(&query.name)),
            )
        } else {
            Box::new(data.names.get_key_value(&query.name).into_iter())
        };

        names
            .flat_map(|(_, refs)| refs.iter())
            .filter_map(|r| data.definition(&self.key, r))
            .filter(|def| query.accepts(&def.element))
            .collect()
    }

    fn uses(&self, target: &Ref) -> Vec<(Store, Use)> {
        let data = self.snapshot();
        let Some(by_store) = data.uses.get(target) else {
            return Vec::new();
        };
        by_store
            .iter()
            .flat_map(|(store, uses)| {
                let mut uses = uses.clone();
                uses.sort_by_key(|u| u.offset);
                uses.into_iter().map(move |u| (store.clone(), u))
            })
            .collect()
    }

    fn stores(&self) -> Vec<Store> {
        let mut stores: Vec<Store> = self.snapshot().files.keys().cloned().collect();
        stores.sort();
        stores
    }

    fn close(&self) -> anyhow::Result<()> {
        if let Some(path) = &self.persist_path {
            self.persist_to(path)?;
            log::info!("Persisted symbol store '{}' to {}", self.key, path.display());
        }
        Ok(())
    }
}
