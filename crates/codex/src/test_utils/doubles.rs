//! In-memory stand-ins for the collaborators the core consumes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};

use crate::element::{Element, Extraction, Use};
use crate::extract::{Extractor, SourceReader};
use crate::interaction::Interaction;
use crate::line_index::Location;
use crate::store::Store;

/// Source texts keyed by store.
#[derive(Debug, Default)]
pub struct MemoryReader {
    texts: Mutex<HashMap<Store, String>>,
}

impl MemoryReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, store: Store, text: impl Into<String>) {
        self.texts.lock().unwrap().insert(store, text.into());
    }
}

#[async_trait]
impl SourceReader for MemoryReader {
    async fn read(&self, store: &Store) -> anyhow::Result<String> {
        self.texts
            .lock()
            .unwrap()
            .get(store)
            .cloned()
            .ok_or_else(|| anyhow!("No text for {}", store))
    }
}

#[derive(Debug, Clone)]
enum Script {
    Extract(Extraction),
    Fail,
    Panic,
}

/// Extractor returning canned results per store.
///
/// Stores without a script extract to nothing. Tracks call counts and the
/// highest number of extractions that ran at once.
#[derive(Debug, Default)]
pub struct ScriptedExtractor {
    scripts: Mutex<HashMap<Store, Script>>,
    calls: Mutex<HashMap<Store, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Option<Duration>,
    gate: Option<Arc<Semaphore>>,
    started: Notify,
}

impl ScriptedExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps this long in every extraction.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every extraction takes one permit from `gate` before finishing.
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn set(&self, store: &Store, elements: Vec<Element>, uses: Vec<Use>) {
        self.scripts.lock().unwrap().insert(
            store.clone(),
            Script::Extract(Extraction { elements, uses }),
        );
    }

    pub fn fail(&self, store: &Store) {
        self.scripts
            .lock()
            .unwrap()
            .insert(store.clone(), Script::Fail);
    }

    pub fn panic_on(&self, store: &Store) {
        self.scripts
            .lock()
            .unwrap()
            .insert(store.clone(), Script::Panic);
    }

    pub fn calls(&self, store: &Store) -> usize {
        self.calls.lock().unwrap().get(store).copied().unwrap_or(0)
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Resolves once an extraction has started.
    pub async fn started(&self) {
        self.started.notified().await;
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn extract(&self, store: &Store, _text: &str) -> anyhow::Result<Extraction> {
        *self.calls.lock().unwrap().entry(store.clone()).or_default() += 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.started.notify_one();

        if let Some(gate) = &self.gate {
            gate.acquire().await?.forget();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let script = self.scripts.lock().unwrap().get(store).cloned();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match script {
            None => Ok(Extraction::default()),
            Some(Script::Extract(extraction)) => Ok(extraction),
            Some(Script::Fail) => Err(anyhow!("scripted failure for {}", store)),
            Some(Script::Panic) => panic!("scripted panic for {}", store),
        }
    }
}

/// Records every interaction; answers confirmations with a fixed reply.
#[derive(Debug)]
pub struct RecordingUi {
    answer: bool,
    questions: Mutex<Vec<String>>,
    statuses: Mutex<Vec<String>>,
    visits: Mutex<Vec<(Store, Location)>>,
    offset_visits: Mutex<Vec<(Store, usize)>>,
}

impl Default for RecordingUi {
    fn default() -> Self {
        Self {
            answer: true,
            questions: Mutex::new(Vec::new()),
            statuses: Mutex::new(Vec::new()),
            visits: Mutex::new(Vec::new()),
            offset_visits: Mutex::new(Vec::new()),
        }
    }
}

impl RecordingUi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answering(mut self, answer: bool) -> Self {
        self.answer = answer;
        self
    }

    pub fn questions(&self) -> Vec<String> {
        self.questions.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn visits(&self) -> Vec<(Store, Location)> {
        self.visits.lock().unwrap().clone()
    }

    pub fn offset_visits(&self) -> Vec<(Store, usize)> {
        self.offset_visits.lock().unwrap().clone()
    }
}

impl Interaction for RecordingUi {
    fn confirm(&self, question: &str) -> bool {
        self.questions.lock().unwrap().push(question.to_string());
        self.answer
    }

    fn status(&self, message: &str) {
        self.statuses.lock().unwrap().push(message.to_string());
    }

    fn visit(&self, store: &Store, location: Location) {
        self.visits.lock().unwrap().push((store.clone(), location));
    }

    fn visit_offset(&self, store: &Store, offset: usize) {
        self.offset_visits
            .lock()
            .unwrap()
            .push((store.clone(), offset));
    }
}
