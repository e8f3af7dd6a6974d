//! Per-project reindex queue.
//!
//! Reindex requests for one project run strictly one after another on a
//! single background worker, so two passes over the same store can never race
//! or publish out of order. Different projects have independent queues.
//!
//! # Design
//! - Requests for a store that is already queued are coalesced (a `full`
//!   request upgrades the queued one)
//! - Each job runs in its own task; extractor failures and panics are logged
//!   and the queue moves on to the next request
//! - Completed indexes are broadcast to subscribers, who drain the channel on
//!   their own event loop
//! - A non-`full` request skips extraction when the text is unchanged since
//!   the store's last successful index
//! - Results are applied to the symbol store by the worker, never after
//!   [`IndexQueue::shutdown`] has returned

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use anyhow::Context;
use dashmap::DashMap;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::config::CodexConfig;
use crate::element::Extraction;
use crate::extract::{Extractor, SourceReader};
use crate::line_index::LineIndex;
use crate::project::Project;
use crate::source_index::SourceIndex;
use crate::store::{content_hash, Store};
use crate::store_set::ResolutionCache;
use crate::symbol_store::SymbolStore;

/// Capacity of the `indexed` broadcast channel; slower subscribers see `Lagged`.
const INDEXED_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    Reindexing,
}

/// A pending reindex request
#[derive(Debug, Clone)]
pub struct IndexTask {
    pub store: Store,
    pub full: bool,
    pub submitted_at: Instant,
}

/// Collaborators a queue needs to run jobs.
#[derive(Clone)]
pub struct QueueDeps {
    pub symbols: Arc<dyn SymbolStore>,
    pub extractor: Arc<dyn Extractor>,
    pub reader: Arc<dyn SourceReader>,
    /// Invalidated before every publication
    pub cache: Option<Arc<ResolutionCache>>,
}

struct Job {
    deps: QueueDeps,
    /// Content hash of each store's last successful index
    hashes: Mutex<HashMap<Store, u64>>,
    latest: DashMap<Store, Arc<SourceIndex>>,
    indexed: broadcast::Sender<Arc<SourceIndex>>,
    /// Held while a result is applied; shutdown takes it to wait one out
    applying: Mutex<()>,
}

/// Extraction output not yet applied to the symbol store
struct Extracted {
    hash: u64,
    lines: LineIndex,
    extraction: Extraction,
}

/// Aborts the task when dropped, so an aborted worker takes its job with it.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl Job {
    async fn extract(&self, task: &IndexTask) -> anyhow::Result<Option<Extracted>> {
        let text = self.deps.reader.read(&task.store).await?;
        let hash = content_hash(&text);
        if !task.full && self.last_hash(&task.store) == Some(hash) {
            return Ok(None);
        }

        let lines = LineIndex::from_text(&text);
        let extraction = self
            .deps
            .extractor
            .extract(&task.store, &text)
            .await
            .with_context(|| format!("Extraction failed for {}", task.store))?;

        Ok(Some(Extracted {
            hash,
            lines,
            extraction,
        }))
    }

    /// Records `extracted` and publishes its index, unless the queue was shut down.
    fn apply(
        &self,
        store: &Store,
        extracted: Extracted,
        token: &CancellationToken,
    ) -> Option<Arc<SourceIndex>> {
        let _applying = self.applying.lock().unwrap_or_else(PoisonError::into_inner);
        if token.is_cancelled() {
            return None;
        }

        self.deps.symbols.update(store, &extracted.extraction);
        self.hashes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(store.clone(), extracted.hash);

        let index = Arc::new(SourceIndex::build(
            store.clone(),
            extracted.lines,
            extracted.extraction.elements,
        ));
        self.publish(index.clone());
        Some(index)
    }

    fn last_hash(&self, store: &Store) -> Option<u64> {
        self.hashes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(store)
            .copied()
    }

    fn publish(&self, index: Arc<SourceIndex>) {
        self.latest.insert(index.store().clone(), index.clone());
        if let Some(cache) = &self.deps.cache {
            cache.invalidate_all();
        }
        if self.indexed.send(index).is_err() {
            log::trace!("No subscribers for index publication");
        }
    }
}

/// Sequential background reindexing for one project.
pub struct IndexQueue {
    project: Arc<Project>,
    config: CodexConfig,
    job: Arc<Job>,
    tasks: Arc<Mutex<VecDeque<IndexTask>>>,
    wake: Arc<Notify>,
    /// Queued plus in-flight requests
    outstanding: Arc<watch::Sender<usize>>,
    cancellation_token: CancellationToken,
    worker_handle: Mutex<Option<JoinHandle<()>>>,
}

impl IndexQueue {
    /// Creates the queue and starts its worker. Must be called inside a tokio runtime.
    pub fn new(project: Arc<Project>, deps: QueueDeps, config: CodexConfig) -> Self {
        let (indexed, _) = broadcast::channel(INDEXED_CHANNEL_CAPACITY);
        let (outstanding, _) = watch::channel(0usize);
        let queue = Self {
            project,
            config,
            job: Arc::new(Job {
                deps,
                hashes: Mutex::new(HashMap::new()),
                latest: DashMap::new(),
                indexed,
                applying: Mutex::new(()),
            }),
            tasks: Arc::new(Mutex::new(VecDeque::new())),
            wake: Arc::new(Notify::new()),
            outstanding: Arc::new(outstanding),
            cancellation_token: CancellationToken::new(),
            worker_handle: Mutex::new(None),
        };
        queue.start_worker();
        queue
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    /// Receives every index this queue publishes from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<SourceIndex>> {
        self.job.indexed.subscribe()
    }

    /// Most recently published index for `store`.
    pub fn index_of(&self, store: &Store) -> Option<Arc<SourceIndex>> {
        self.job.latest.get(store).map(|entry| entry.value().clone())
    }

    pub fn state(&self) -> QueueState {
        if *self.outstanding.borrow() > 0 {
            QueueState::Reindexing
        } else {
            QueueState::Idle
        }
    }

    /// Number of queued requests not yet started.
    pub fn pending(&self) -> usize {
        self.lock_tasks().len()
    }

    /// Waits until every request submitted so far has finished.
    pub async fn wait_idle(&self) {
        let mut rx = self.outstanding.subscribe();
        // the sender lives as long as the queue, so this cannot fail
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Queues a reindex of `store`.
    ///
    /// A request for a store that is already waiting is merged into it.
    /// Requests beyond `maxQueueSize` are dropped.
    pub fn queue_reindex(&self, store: Store, full: bool) {
        let mut tasks = self.lock_tasks();
        if self.enqueue(&mut tasks, store, full, true) {
            drop(tasks);
            self.wake.notify_one();
        }
    }

    /// Queues a full reindex of every source file under the project's source roots.
    ///
    /// Not bound by `maxQueueSize`: every file found is queued. Returns the
    /// number of files found.
    pub fn queue_reindex_all(&self) -> usize {
        let paths: Vec<_> = self
            .project
            .source_roots()
            .iter()
            .flat_map(|root| source_files(root, &self.config))
            .collect();

        let mut tasks = self.lock_tasks();
        let mut added = 0;
        for path in &paths {
            if self.enqueue(&mut tasks, Store::File(path.clone()), true, false) {
                added += 1;
            }
        }
        drop(tasks);
        if added > 0 {
            self.wake.notify_one();
        }

        log::info!(
            "Queued full reindex of {} files in {} ({} already queued)",
            paths.len(),
            self.project.name,
            paths.len() - added
        );
        paths.len()
    }

    /// Adds or merges a request. Returns whether a new task was queued.
    fn enqueue(
        &self,
        tasks: &mut VecDeque<IndexTask>,
        store: Store,
        full: bool,
        capped: bool,
    ) -> bool {
        if let Some(queued) = tasks.iter_mut().find(|t| t.store == store) {
            queued.full |= full;
            log::trace!("Coalesced reindex request for {}", store);
            return false;
        }

        if capped && tasks.len() >= self.config.max_queue_size {
            log::warn!(
                "Reindex queue for {} full, dropping request for {} ({}/{})",
                self.project.name,
                store,
                tasks.len(),
                self.config.max_queue_size
            );
            return false;
        }

        log::trace!(
            "Queued reindex of {} (full={}, queue_size={})",
            store,
            full,
            tasks.len() + 1
        );
        tasks.push_back(IndexTask {
            store,
            full,
            submitted_at: Instant::now(),
        });
        self.outstanding.send_modify(|n| *n += 1);
        true
    }

    /// Drops everything known about a store that no longer exists.
    pub fn forget(&self, store: &Store) {
        let removed = {
            let mut tasks = self.lock_tasks();
            let before = tasks.len();
            tasks.retain(|t| t.store != *store);
            before - tasks.len()
        };
        if removed > 0 {
            self.outstanding.send_modify(|n| *n = n.saturating_sub(removed));
        }
        self.job.latest.remove(store);
        self.job
            .hashes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(store);
        self.job.deps.symbols.remove(store);
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, VecDeque<IndexTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start_worker(&self) {
        let job = self.job.clone();
        let tasks = self.tasks.clone();
        let wake = self.wake.clone();
        let outstanding = self.outstanding.clone();
        let token = self.cancellation_token.clone();
        let name = self.project.name.clone();

        let handle = tokio::spawn(async move {
            log::info!("Index queue worker started for {}", name);

            loop {
                if token.is_cancelled() {
                    break;
                }
                let next = tasks
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .pop_front();

                match next {
                    Some(task) => {
                        Self::process_task(job.clone(), task, &token).await;
                        outstanding.send_modify(|n| *n = n.saturating_sub(1));
                    }
                    None => {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = wake.notified() => {}
                        }
                    }
                }
            }

            log::info!("Index queue worker stopped for {}", name);
        });

        *self
            .worker_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    async fn process_task(job: Arc<Job>, task: IndexTask, token: &CancellationToken) {
        let start_time = Instant::now();
        let store = task.store.clone();
        let runner = job.clone();

        let mut handle = AbortOnDrop(tokio::spawn(async move { runner.extract(&task).await }));
        match (&mut handle.0).await {
            Ok(Ok(Some(extracted))) => match job.apply(&store, extracted, token) {
                Some(index) => log::info!(
                    "Reindexed {} in {:?} ({} elements)",
                    store,
                    start_time.elapsed(),
                    index.element_count()
                ),
                None => log::debug!("Discarded reindex of {} after shutdown", store),
            },
            Ok(Ok(None)) => log::trace!("Skipped reindex of unchanged {}", store),
            Ok(Err(e)) => log::warn!("Failed to reindex {}: {:#}", store, e),
            Err(e) => log::warn!("Reindex job for {} aborted: {}", store, e),
        }
    }

    /// Stops the worker. Queued requests are discarded.
    pub fn shutdown(&self) {
        self.cancellation_token.cancel();
        // a result being applied right now finishes before the worker goes
        drop(self.job.applying.lock().unwrap_or_else(PoisonError::into_inner));
        if let Some(handle) = self
            .worker_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        let dropped = std::mem::take(&mut *self.lock_tasks()).len();
        if dropped > 0 {
            log::debug!(
                "Discarded {} queued reindex requests for {}",
                dropped,
                self.project.name
            );
        }
        self.outstanding.send_replace(0);
    }
}

impl Drop for IndexQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Source files under `root` with a configured suffix, skipping ignored directories.
fn source_files(root: &Path, config: &CodexConfig) -> Vec<std::path::PathBuf> {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !config
                    .ignored_dirs
                    .iter()
                    .any(|dir| entry.file_name() == dir.as_str())
        })
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                log::debug!("Skipping unreadable entry under {}: {}", root.display(), e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| Store::File(path.clone()).has_suffix(&config.source_suffixes))
        .collect()
}
