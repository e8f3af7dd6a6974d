//
// registry.rs
//
// Per-workspace owner of symbol stores, index queues and shared caches
//

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use indexmap::IndexMap;
use tokio::sync::broadcast;

use crate::config::CodexConfig;
use crate::element::{Definition, Ref};
use crate::extract::{Extractor, FsReader, NoopExtractor, SourceReader};
use crate::index_queue::{IndexQueue, QueueDeps};
use crate::interaction::Interaction;
use crate::line_index::Location;
use crate::navigation;
use crate::project::{
    Depend, DependencyResolver, ExternalStoreResolver, NoExternalStores, Project, ProjectId,
    ProjectSpace,
};
use crate::rename::{Buffers, RenameEngine, RenameError, RenameOutcome};
use crate::source_index::SourceIndex;
use crate::store::{content_hash, Store};
use crate::store_set::{ResolutionCache, StoreContext, StoreSet};
use crate::symbol_store::{MemoryStore, SymbolStore};
use crate::uses;

/// Everything the workspace shares between projects.
///
/// Created when the workspace opens and torn down with [`Registry::close`].
/// Stores and queues are created lazily the first time a project needs them.
pub struct Registry {
    config: CodexConfig,
    space: Arc<dyn ProjectSpace>,
    dependencies: Arc<dyn DependencyResolver>,
    external: Arc<dyn ExternalStoreResolver>,
    reader: Arc<dyn SourceReader>,
    extractors: DashMap<String, Arc<dyn Extractor>>,
    stores: DashMap<ProjectId, Arc<dyn SymbolStore>>,
    queues: DashMap<ProjectId, Arc<IndexQueue>>,
    /// Dependency id -> providing project, `None` when no project provides it
    resolved: DashMap<Depend, Option<ProjectId>>,
    cache: Arc<ResolutionCache>,
    renamer: RenameEngine,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("stores", &self.stores.len())
            .field("queues", &self.queues.len())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl Registry {
    pub fn new(
        config: CodexConfig,
        space: Arc<dyn ProjectSpace>,
        dependencies: Arc<dyn DependencyResolver>,
    ) -> Self {
        log::info!("Opening workspace registry");
        Self {
            cache: Arc::new(ResolutionCache::with_capacity(
                config.resolution_cache_capacity,
            )),
            renamer: RenameEngine::new(config.save_other_files_after_rename),
            config,
            space,
            dependencies,
            external: Arc::new(NoExternalStores),
            reader: Arc::new(FsReader),
            extractors: DashMap::new(),
            stores: DashMap::new(),
            queues: DashMap::new(),
            resolved: DashMap::new(),
        }
    }

    pub fn with_external_stores(mut self, external: Arc<dyn ExternalStoreResolver>) -> Self {
        self.external = external;
        self
    }

    pub fn with_reader(mut self, reader: Arc<dyn SourceReader>) -> Self {
        self.reader = reader;
        self
    }

    pub fn config(&self) -> &CodexConfig {
        &self.config
    }

    pub fn cache(&self) -> &ResolutionCache {
        &self.cache
    }

    /// Uses `extractor` for projects of `kind`. Queues that already exist keep
    /// their extractor until the project hibernates.
    pub fn register_extractor(&self, kind: impl Into<String>, extractor: Arc<dyn Extractor>) {
        self.extractors.insert(kind.into(), extractor);
    }

    fn extractor_for(&self, kind: &str) -> Arc<dyn Extractor> {
        match self.extractors.get(kind) {
            Some(extractor) => extractor.value().clone(),
            None => {
                log::debug!("No extractor for project kind '{}', indexing disabled", kind);
                Arc::new(NoopExtractor)
            }
        }
    }

    fn open_store(&self, project: &Project) -> Arc<dyn SymbolStore> {
        let key = project.id.store_key();
        let Some(dir) = &self.config.store_dir else {
            return Arc::new(MemoryStore::new(key));
        };
        let path = dir.join(format!("{:016x}.json", content_hash(key.as_str())));
        match MemoryStore::persistent(key.clone(), path) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                log::warn!("Failed to open persisted store for {}: {:#}", project.name, e);
                Arc::new(MemoryStore::new(key))
            }
        }
    }

    /// The project's index queue, started on first use. Must be called inside a tokio runtime.
    pub fn queue(&self, project: &Arc<Project>) -> Arc<IndexQueue> {
        if let Some(queue) = self.queues.get(&project.id) {
            return queue.value().clone();
        }
        let deps = QueueDeps {
            symbols: self.store_of(project),
            extractor: self.extractor_for(&project.kind),
            reader: self.reader.clone(),
            cache: Some(self.cache.clone()),
        };
        self.queues
            .entry(project.id.clone())
            .or_insert_with(|| Arc::new(IndexQueue::new(project.clone(), deps, self.config.clone())))
            .value()
            .clone()
    }

    pub fn reindex(&self, project: &Arc<Project>, store: Store, full: bool) {
        self.queue(project).queue_reindex(store, full);
    }

    pub fn subscribe(&self, project: &Arc<Project>) -> broadcast::Receiver<Arc<SourceIndex>> {
        self.queue(project).subscribe()
    }

    pub fn index_of(&self, project: &ProjectId, store: &Store) -> Option<Arc<SourceIndex>> {
        self.queues.get(project)?.index_of(store)
    }

    pub fn store_set(&self, project: &Project) -> StoreSet {
        StoreSet::resolve(project, self)
    }

    /// Resolves `target` as seen from `project`, through the shared cache.
    pub fn resolve_ref(&self, project: &Project, target: &Ref) -> Option<Definition> {
        self.cache.resolve(&self.store_set(project), target)
    }

    pub fn definition_at(
        &self,
        project: &Project,
        store: &Store,
        loc: Location,
    ) -> Option<Definition> {
        let index = self.index_of(&project.id, store)?;
        let elem = index.element_at(loc)?;
        self.resolve_ref(project, &elem.to_ref())
    }

    pub fn encloser_at(&self, project: &Project, store: &Store, offset: usize) -> Option<Definition> {
        let index = self.index_of(&project.id, store)?;
        navigation::encloser_at(&index, &self.store_set(project), offset)
    }

    pub fn find_uses(&self, project: &Project, def: &Definition) -> IndexMap<Store, BTreeSet<usize>> {
        uses::find_uses(&self.store_set(project), def)
    }

    pub fn rename(
        &self,
        project: &Project,
        def: &Definition,
        new_name: &str,
        initiating: &Store,
        buffers: &mut dyn Buffers,
        ui: &dyn Interaction,
    ) -> Result<RenameOutcome, RenameError> {
        let set = self.store_set(project);
        self.renamer
            .rename(&set, def, new_name, initiating, buffers, ui)
    }

    /// Forgets cached dependency resolutions, e.g. after build files change.
    pub fn forget_dependencies(&self) {
        self.resolved.clear();
        self.cache.invalidate_all();
    }

    /// Stops the project's queue and releases its store.
    pub fn hibernate(&self, id: &ProjectId) {
        if let Some((_, queue)) = self.queues.remove(id) {
            queue.shutdown();
        }
        if let Some((_, store)) = self.stores.remove(id) {
            if let Err(e) = store.close() {
                log::warn!("Failed to close store for {}: {:#}", id, e);
            }
        }
        self.cache.invalidate_all();
        log::info!("Hibernated project {}", id);
    }

    /// Hibernates every project.
    pub fn close(&self) {
        let mut ids: BTreeSet<ProjectId> = self.queues.iter().map(|e| e.key().clone()).collect();
        ids.extend(self.stores.iter().map(|e| e.key().clone()));
        for id in &ids {
            self.hibernate(id);
        }
        self.resolved.clear();
        log::info!("Closed workspace registry ({} projects)", ids.len());
    }
}

impl StoreContext for Registry {
    fn space(&self) -> &dyn ProjectSpace {
        self.space.as_ref()
    }

    fn resolve_depend(&self, depend: &Depend) -> Option<Arc<Project>> {
        let id = match self.resolved.get(depend) {
            Some(entry) => entry.value().clone(),
            None => {
                let id = self.dependencies.resolve(depend);
                self.resolved.insert(depend.clone(), id.clone());
                id
            }
        }?;
        self.space.project(&id)
    }

    fn external_store(&self, depend: &Depend) -> Option<Arc<dyn SymbolStore>> {
        self.external.store_for(depend)
    }

    fn store_of(&self, project: &Project) -> Arc<dyn SymbolStore> {
        if let Some(store) = self.stores.get(&project.id) {
            return store.value().clone();
        }
        let store = self.open_store(project);
        self.stores
            .entry(project.id.clone())
            .or_insert(store)
            .value()
            .clone()
    }
}
