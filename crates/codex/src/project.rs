//
// project.rs
//
// Projects, their dependencies and the workspace collaborators that supply them
//

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::symbol_store::{StoreKey, SymbolStore};

/// Identity of a project: its root directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectId(PathBuf);

impl ProjectId {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self(root.into())
    }

    pub fn root(&self) -> &Path {
        &self.0
    }

    /// Key of the project's own symbol store.
    pub fn store_key(&self) -> StoreKey {
        StoreKey::new(self.0.to_string_lossy())
    }
}

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Declared dependency identifier, e.g. `org.example:util:1.2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Depend(String);

impl Depend {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Depend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A live project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    /// Selects the extractor; see `Registry::register_extractor`.
    pub kind: String,
    /// Directories scanned by a full reindex; the root when empty.
    pub source_dirs: Vec<PathBuf>,
    pub depends: Vec<Depend>,
}

impl Project {
    pub fn new(root: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            id: ProjectId::new(root),
            name: name.into(),
            kind: String::new(),
            source_dirs: Vec::new(),
            depends: Vec::new(),
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_depends<I, S>(mut self, depends: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends = depends.into_iter().map(Depend::new).collect();
        self
    }

    pub fn with_source_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.source_dirs = dirs;
        self
    }

    pub fn source_roots(&self) -> Vec<PathBuf> {
        if self.source_dirs.is_empty() {
            vec![self.id.root().to_path_buf()]
        } else {
            self.source_dirs.clone()
        }
    }
}

/// A top-level project known to the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectInfo {
    pub id: ProjectId,
    pub name: String,
}

/// The workspace's view of its projects.
pub trait ProjectSpace: Send + Sync {
    /// Top-level projects in a stable order.
    fn top_level(&self) -> Vec<ProjectInfo>;

    fn project(&self, id: &ProjectId) -> Option<Arc<Project>>;
}

/// Maps a declared dependency to the project that provides it, if any.
pub trait DependencyResolver: Send + Sync {
    fn resolve(&self, depend: &Depend) -> Option<ProjectId>;
}

/// Supplies stores for dependencies that are not projects, e.g. prebuilt archives.
pub trait ExternalStoreResolver: Send + Sync {
    fn store_for(&self, depend: &Depend) -> Option<Arc<dyn SymbolStore>>;
}

/// Resolver for workspaces without non-project dependency stores.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoExternalStores;

impl ExternalStoreResolver for NoExternalStores {
    fn store_for(&self, _depend: &Depend) -> Option<Arc<dyn SymbolStore>> {
        None
    }
}

/// In-memory workspace: an ordered list of projects plus a dependency table.
#[derive(Debug, Default)]
pub struct StaticSpace {
    projects: RwLock<Vec<Arc<Project>>>,
    provides: RwLock<HashMap<Depend, ProjectId>>,
}

impl StaticSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, project: Project) -> Arc<Project> {
        let project = Arc::new(project);
        let mut projects = self.projects.write().unwrap_or_else(PoisonError::into_inner);
        projects.retain(|p| p.id != project.id);
        projects.push(project.clone());
        project
    }

    pub fn remove(&self, id: &ProjectId) {
        self.projects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|p| p.id != *id);
    }

    /// Records that `depend` is provided by the project `id`.
    pub fn provide(&self, depend: impl Into<String>, id: ProjectId) {
        self.provides
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(Depend::new(depend), id);
    }
}

impl ProjectSpace for StaticSpace {
    fn top_level(&self) -> Vec<ProjectInfo> {
        self.projects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|p| ProjectInfo {
                id: p.id.clone(),
                name: p.name.clone(),
            })
            .collect()
    }

    fn project(&self, id: &ProjectId) -> Option<Arc<Project>> {
        self.projects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|p| p.id == *id)
            .cloned()
    }
}

impl DependencyResolver for StaticSpace {
    fn resolve(&self, depend: &Depend) -> Option<ProjectId> {
        self.provides
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(depend)
            .cloned()
    }
}
