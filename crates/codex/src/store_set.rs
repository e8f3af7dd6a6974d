//
// store_set.rs
//
// Ordered set of symbol stores visible from a project, and reference resolution over it
//

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use indexmap::IndexMap;
use lru::LruCache;

use crate::element::{Definition, Kind, Ref};
use crate::project::{Depend, Project, ProjectSpace};
use crate::symbol_store::{Query, StoreKey, SymbolStore};

/// What store-set resolution needs from the workspace.
pub trait StoreContext {
    fn space(&self) -> &dyn ProjectSpace;

    /// Project providing `depend`, if the dependency is a project.
    fn resolve_depend(&self, depend: &Depend) -> Option<Arc<Project>>;

    /// Store for a dependency that is not a project.
    fn external_store(&self, depend: &Depend) -> Option<Arc<dyn SymbolStore>>;

    fn store_of(&self, project: &Project) -> Arc<dyn SymbolStore>;
}

/// Ordered, deduplicated symbol stores. Lookups return the first match in order.
#[derive(Clone, Default)]
pub struct StoreSet {
    stores: IndexMap<StoreKey, Arc<dyn SymbolStore>>,
}

impl std::fmt::Debug for StoreSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.stores.keys()).finish()
    }
}

impl StoreSet {
    /// Stores visible from `project`: its own, every other top-level project's,
    /// then those of its declared dependencies.
    ///
    /// Only the project's own declared dependencies are consulted, never the
    /// dependencies of those dependencies, so dependency cycles are harmless.
    pub fn resolve(project: &Project, ctx: &dyn StoreContext) -> Self {
        let mut set = Self::default();
        set.push(ctx.store_of(project));

        for info in ctx.space().top_level() {
            if info.id == project.id {
                continue;
            }
            match ctx.space().project(&info.id) {
                Some(sibling) => set.push(ctx.store_of(&sibling)),
                None => log::trace!("Top-level project {} is not live, skipping", info.id),
            }
        }

        for depend in &project.depends {
            if let Some(dep) = ctx.resolve_depend(depend) {
                set.push(ctx.store_of(&dep));
            } else if let Some(store) = ctx.external_store(depend) {
                set.push(store);
            } else {
                log::trace!("No store for dependency {} of {}", depend, project.name);
            }
        }

        log::trace!("Store set for {}: {:?}", project.name, set);
        set
    }

    pub fn from_stores(stores: impl IntoIterator<Item = Arc<dyn SymbolStore>>) -> Self {
        let mut set = Self::default();
        for store in stores {
            set.push(store);
        }
        set
    }

    /// Appends `store` unless a store with the same key is already present.
    pub fn push(&mut self, store: Arc<dyn SymbolStore>) {
        self.stores.entry(store.key().clone()).or_insert(store);
    }

    pub fn keys(&self) -> impl Iterator<Item = &StoreKey> {
        self.stores.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn SymbolStore>> {
        self.stores.values()
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Key of the first store, the one the set was resolved for.
    pub fn root(&self) -> Option<&StoreKey> {
        self.stores.keys().next()
    }

    /// First definition of `target` in store order.
    pub fn resolve_ref(&self, target: &Ref) -> Option<Definition> {
        self.stores.values().find_map(|store| store.lookup(target))
    }

    /// Every match from every store, in store order.
    pub fn find(&self, query: &Query) -> Vec<Definition> {
        self.stores
            .values()
            .flat_map(|store| store.find(query))
            .collect()
    }

    /// Completion candidates for `prefix`; a definition shadowed by an earlier
    /// store is left out.
    pub fn complete(&self, prefix: &str, kinds: &[Kind]) -> Vec<Definition> {
        let mut query = Query::prefix(prefix);
        query.kinds = kinds.to_vec();
        let mut seen = HashSet::new();
        self.find(&query)
            .into_iter()
            .filter(|def| seen.insert(def.to_ref()))
            .collect()
    }

    /// Enclosing definition of `def`; `None` for top-level definitions.
    pub fn parent(&self, def: &Definition) -> Option<Definition> {
        self.resolve_ref(&def.to_ref().parent()?)
    }
}

/// Default capacity for the resolution cache
const DEFAULT_RESOLUTION_CACHE_CAPACITY: usize = 1000;

/// Resolution results keyed by the requesting store set's root.
///
/// Cleared whenever any project publishes a new index. Uses `peek()` for
/// reads so lookups only take the read lock.
pub struct ResolutionCache {
    inner: RwLock<LruCache<(StoreKey, Ref), Option<Definition>>>,
    /// Bumped by every invalidation; a lookup that straddles one is not cached
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for ResolutionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolutionCache")
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for ResolutionCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_RESOLUTION_CACHE_CAPACITY)
    }
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        let cap = NonZeroUsize::new(cap).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: RwLock::new(LruCache::new(cap)),
            generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn resolve(&self, set: &StoreSet, target: &Ref) -> Option<Definition> {
        let root = set.root()?;
        let key = (root.clone(), target.clone());

        if let Some(cached) = self.inner.read().ok().and_then(|g| g.peek(&key).cloned()) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            log::trace!("Resolution cache hit for {} from {}", target, root);
            return cached;
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let generation = self.generation.load(Ordering::Acquire);
        let resolved = set.resolve_ref(target);
        if let Ok(mut guard) = self.inner.write() {
            // checked under the write lock so a concurrent clear cannot interleave
            if self.generation.load(Ordering::Acquire) == generation {
                guard.push(key, resolved.clone());
            } else {
                log::trace!("Not caching {} from {}, invalidated during lookup", target, root);
            }
        }
        resolved
    }

    pub fn invalidate_all(&self) {
        if let Ok(mut guard) = self.inner.write() {
            self.generation.fetch_add(1, Ordering::AcqRel);
            guard.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Element, Extraction};
    use crate::project::{DependencyResolver, ProjectId, StaticSpace};
    use crate::store::Store;
    use crate::symbol_store::MemoryStore;
    use std::collections::HashMap;

    struct Fixture {
        space: StaticSpace,
        stores: HashMap<ProjectId, Arc<dyn SymbolStore>>,
        external: HashMap<Depend, Arc<dyn SymbolStore>>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                space: StaticSpace::new(),
                stores: HashMap::new(),
                external: HashMap::new(),
            }
        }

        fn add(&mut self, project: Project, elements: Vec<Element>) -> Arc<Project> {
            let store = MemoryStore::new(project.id.store_key());
            let file = Store::file(project.id.root().join("Main.java"));
            store.update(
                &file,
                &Extraction {
                    elements,
                    uses: Vec::new(),
                },
            );
            self.stores.insert(project.id.clone(), Arc::new(store));
            self.space.add(project)
        }
    }

    impl StoreContext for Fixture {
        fn space(&self) -> &dyn ProjectSpace {
            &self.space
        }

        fn resolve_depend(&self, depend: &Depend) -> Option<Arc<Project>> {
            self.space.project(&self.space.resolve(depend)?)
        }

        fn external_store(&self, depend: &Depend) -> Option<Arc<dyn SymbolStore>> {
            self.external.get(depend).cloned()
        }

        fn store_of(&self, project: &Project) -> Arc<dyn SymbolStore> {
            self.stores[&project.id].clone()
        }
    }

    fn keys(set: &StoreSet) -> Vec<String> {
        set.keys().map(|k| k.as_str().to_string()).collect()
    }

    #[test]
    fn test_own_store_first_then_siblings_then_dependencies() {
        let mut fx = Fixture::new();
        fx.add(Project::new("/ws/a", "a"), vec![]);
        let b = fx.add(
            Project::new("/ws/b", "b").with_depends(["lib:x", "lib:ext", "lib:missing"]),
            vec![],
        );
        fx.add(Project::new("/ws/c", "c"), vec![]);
        fx.external.insert(
            Depend::new("lib:ext"),
            Arc::new(MemoryStore::new(StoreKey::new("ext.jar"))),
        );
        // lib:x is provided by sibling a, already in the set
        fx.space.provide("lib:x", ProjectId::new("/ws/a"));

        let set = StoreSet::resolve(&b, &fx);
        assert_eq!(keys(&set), vec!["/ws/b", "/ws/a", "/ws/c", "ext.jar"]);
        assert_eq!(set.root(), Some(&StoreKey::new("/ws/b")));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let mut fx = Fixture::new();
        fx.add(Project::new("/ws/a", "a"), vec![]);
        let b = fx.add(Project::new("/ws/b", "b"), vec![]);
        let first = keys(&StoreSet::resolve(&b, &fx));
        let second = keys(&StoreSet::resolve(&b, &fx));
        assert_eq!(first, second);
    }

    #[test]
    fn test_cyclic_dependencies_terminate() {
        let mut fx = Fixture::new();
        let app = fx.add(Project::new("/app", "app").with_depends(["dep"]), vec![]);
        let dep = fx.add(Project::new("/dep", "dep").with_depends(["app"]), vec![]);
        fx.space.provide("dep", dep.id.clone());
        fx.space.provide("app", app.id.clone());

        assert_eq!(keys(&StoreSet::resolve(&app, &fx)), vec!["/app", "/dep"]);
        assert_eq!(keys(&StoreSet::resolve(&dep, &fx)), vec!["/dep", "/app"]);
    }

    #[test]
    fn test_first_store_wins_and_order_matters() {
        let mut fx = Fixture::new();
        let shared = || vec![Element::new(Kind::Func, "util", 0)];
        let a = fx.add(Project::new("/ws/a", "a"), shared());
        let b = fx.add(Project::new("/ws/b", "b"), shared());
        let target = Ref::new(["util"]);

        let from_a = StoreSet::resolve(&a, &fx).resolve_ref(&target).unwrap();
        let from_b = StoreSet::resolve(&b, &fx).resolve_ref(&target).unwrap();
        assert_eq!(from_a.origin, StoreKey::new("/ws/a"));
        assert_eq!(from_b.origin, StoreKey::new("/ws/b"));
    }

    #[test]
    fn test_resolution_miss_is_none() {
        let mut fx = Fixture::new();
        let a = fx.add(Project::new("/ws/a", "a"), vec![]);
        assert!(StoreSet::resolve(&a, &fx)
            .resolve_ref(&Ref::new(["nothing"]))
            .is_none());
    }

    #[test]
    fn test_complete_skips_shadowed_definitions() {
        let mut fx = Fixture::new();
        let a = fx.add(
            Project::new("/ws/a", "a"),
            vec![
                Element::new(Kind::Func, "parse", 0),
                Element::new(Kind::Type, "Parser", 10),
            ],
        );
        fx.add(
            Project::new("/ws/b", "b"),
            vec![
                Element::new(Kind::Func, "parse", 0),
                Element::new(Kind::Func, "partition", 10),
            ],
        );

        let set = StoreSet::resolve(&a, &fx);
        let found: Vec<_> = set
            .complete("par", &[Kind::Func])
            .into_iter()
            .map(|d| (d.element.name, d.origin.as_str().to_string()))
            .collect();
        assert_eq!(
            found,
            vec![
                ("parse".to_string(), "/ws/a".to_string()),
                ("partition".to_string(), "/ws/b".to_string()),
            ]
        );
    }

    #[test]
    fn test_parent_walks_path() {
        let mut fx = Fixture::new();
        let a = fx.add(
            Project::new("/ws/a", "a"),
            vec![
                Element::new(Kind::Type, "Foo", 0),
                Element::new(Kind::Func, "bar", 10).within(["Foo"]),
            ],
        );
        let set = StoreSet::resolve(&a, &fx);
        let bar = set.resolve_ref(&Ref::new(["bar", "Foo"])).unwrap();
        let foo = set.parent(&bar).unwrap();
        assert_eq!(foo.element.name, "Foo");
        assert!(set.parent(&foo).is_none());
    }

    #[test]
    fn test_cache_hits_until_invalidated() {
        let mut fx = Fixture::new();
        let a = fx.add(
            Project::new("/ws/a", "a"),
            vec![Element::new(Kind::Func, "run", 0)],
        );
        let set = StoreSet::resolve(&a, &fx);
        let cache = ResolutionCache::with_capacity(8);
        let target = Ref::new(["run"]);

        assert!(cache.resolve(&set, &target).is_some());
        assert!(cache.resolve(&set, &target).is_some());
        assert_eq!((cache.hits(), cache.misses()), (1, 1));

        cache.invalidate_all();
        assert!(cache.is_empty());
        cache.resolve(&set, &target);
        assert_eq!(cache.misses(), 2);
    }

    /// Store whose first lookup races with a publication of the definition.
    struct RacingStore {
        inner: MemoryStore,
        cache: Arc<ResolutionCache>,
        published: std::sync::atomic::AtomicBool,
    }

    impl SymbolStore for RacingStore {
        fn key(&self) -> &StoreKey {
            self.inner.key()
        }

        fn update(&self, store: &Store, extraction: &Extraction) {
            self.inner.update(store, extraction)
        }

        fn remove(&self, store: &Store) {
            self.inner.remove(store)
        }

        fn lookup(&self, target: &Ref) -> Option<Definition> {
            let found = self.inner.lookup(target);
            if !self.published.swap(true, Ordering::SeqCst) {
                self.inner.update(
                    &Store::file("/ws/a/Main.java"),
                    &Extraction {
                        elements: vec![Element::new(Kind::Func, "run", 0)],
                        uses: Vec::new(),
                    },
                );
                self.cache.invalidate_all();
            }
            found
        }

        fn find(&self, query: &Query) -> Vec<Definition> {
            self.inner.find(query)
        }

        fn uses(&self, target: &Ref) -> Vec<(Store, crate::element::Use)> {
            self.inner.uses(target)
        }

        fn stores(&self) -> Vec<Store> {
            self.inner.stores()
        }
    }

    #[test]
    fn test_lookup_racing_invalidation_is_not_cached() {
        let cache = Arc::new(ResolutionCache::with_capacity(8));
        let store = RacingStore {
            inner: MemoryStore::new(StoreKey::new("/ws/a")),
            cache: cache.clone(),
            published: Default::default(),
        };
        let set = StoreSet::from_stores([Arc::new(store) as Arc<dyn SymbolStore>]);
        let target = Ref::new(["run"]);

        // first lookup read the store before the publication landed
        assert!(cache.resolve(&set, &target).is_none());
        assert!(cache.is_empty());
        assert!(cache.resolve(&set, &target).is_some());
        assert!(cache.resolve(&set, &target).is_some());
        assert_eq!(cache.hits(), 1);
    }
}
