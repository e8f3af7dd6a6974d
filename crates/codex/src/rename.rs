//! Multi-file rename.
//!
//! A rename is planned and validated against live buffer content for every
//! affected store before any buffer is touched. Edits are then applied from
//! the end of each buffer backward so the locations of edits not yet applied
//! stay valid.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use anyhow::{anyhow, Context};
use ropey::Rope;
use thiserror::Error;

use crate::element::{Definition, Kind};
use crate::interaction::Interaction;
use crate::line_index::{LineIndex, Location};
use crate::store::Store;
use crate::store_set::StoreSet;
use crate::uses::find_uses;

/// One open text buffer.
pub trait Buffer {
    fn store(&self) -> &Store;

    /// Row table of the buffer's current content.
    fn lines(&self) -> &LineIndex;

    /// `len` characters starting at `location`, or `None` if that runs past the end.
    fn slice(&self, location: Location, len: usize) -> Option<String>;

    fn replace(&mut self, location: Location, len: usize, text: &str) -> anyhow::Result<()>;

    fn save(&mut self) -> anyhow::Result<()>;
}

/// Access to buffers by store, opening them as needed.
pub trait Buffers {
    fn buffer(&mut self, store: &Store) -> anyhow::Result<&mut dyn Buffer>;
}

/// Rope-backed buffer, optionally bound to a file on disk.
#[derive(Debug, Clone)]
pub struct RopeBuffer {
    store: Store,
    contents: Rope,
    lines: LineIndex,
    path: Option<PathBuf>,
    dirty: bool,
    saves: usize,
}

impl RopeBuffer {
    /// Buffer not bound to any file; saving only clears the dirty flag.
    pub fn detached(store: Store, text: &str) -> Self {
        Self {
            store,
            contents: Rope::from_str(text),
            lines: LineIndex::from_text(text),
            path: None,
            dirty: false,
            saves: 0,
        }
    }

    /// Opens the file behind `store`.
    pub fn open(store: Store) -> anyhow::Result<Self> {
        let path = store
            .path()
            .ok_or_else(|| anyhow!("{} is not an editable file", store))?
            .to_path_buf();
        let file =
            File::open(&path).with_context(|| format!("Failed to open {}", path.display()))?;
        let contents = Rope::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let lines = LineIndex::from_chars(contents.chars());
        Ok(Self {
            store,
            contents,
            lines,
            path: Some(path),
            dirty: false,
            saves: 0,
        })
    }

    pub fn text(&self) -> String {
        self.contents.to_string()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Number of times the buffer has been saved.
    pub fn save_count(&self) -> usize {
        self.saves
    }

    fn char_range(&self, location: Location, len: usize) -> Option<std::ops::Range<usize>> {
        let start = self.lines.offset_of(location)?;
        let end = start + len;
        (end <= self.contents.len_chars()).then_some(start..end)
    }
}

impl Buffer for RopeBuffer {
    fn store(&self) -> &Store {
        &self.store
    }

    fn lines(&self) -> &LineIndex {
        &self.lines
    }

    fn slice(&self, location: Location, len: usize) -> Option<String> {
        let range = self.char_range(location, len)?;
        Some(self.contents.slice(range).to_string())
    }

    fn replace(&mut self, location: Location, len: usize, text: &str) -> anyhow::Result<()> {
        let range = self
            .char_range(location, len)
            .ok_or_else(|| anyhow!("{}:{} is outside the buffer", self.store, location))?;
        let start = range.start;
        self.contents.remove(range);
        self.contents.insert(start, text);
        self.lines = LineIndex::from_chars(self.contents.chars());
        self.dirty = true;
        Ok(())
    }

    fn save(&mut self) -> anyhow::Result<()> {
        if let Some(path) = &self.path {
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            self.contents
                .write_to(&mut writer)
                .and_then(|_| writer.flush())
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        self.dirty = false;
        self.saves += 1;
        Ok(())
    }
}

/// Buffers held in memory; files are opened on first access.
#[derive(Debug, Default)]
pub struct BufferSet {
    buffers: HashMap<Store, RopeBuffer>,
}

impl BufferSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, buffer: RopeBuffer) {
        self.buffers.insert(buffer.store.clone(), buffer);
    }

    pub fn get(&self, store: &Store) -> Option<&RopeBuffer> {
        self.buffers.get(store)
    }
}

impl Buffers for BufferSet {
    fn buffer(&mut self, store: &Store) -> anyhow::Result<&mut dyn Buffer> {
        let buffer = match self.buffers.entry(store.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(RopeBuffer::open(store.clone())?),
        };
        Ok(buffer)
    }
}

#[derive(Debug, Error)]
pub enum RenameError {
    #[error("cannot rename {name}: {kind:?} definitions are not renamable")]
    UnsupportedKind { name: String, kind: Kind },
    #[error("no uses of {0} found")]
    NoUses(String),
    #[error("index is out of date at {store}:{location}: expected '{expected}', found '{found}'")]
    StaleIndex {
        store: Store,
        location: Location,
        expected: String,
        found: String,
    },
    #[error("buffer error: {0:#}")]
    Buffer(anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenameOutcome {
    Renamed {
        /// Stores edited, initiating store included
        files: usize,
        edits: usize,
        saved: Vec<Store>,
    },
    /// The user declined to edit other files
    Cancelled,
}

/// Validated edits for one store, locations descending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEdits {
    pub store: Store,
    pub locations: Vec<Location>,
}

/// Locations of `offsets` in `lines`, last first.
///
/// Offsets past the end of the text map to locations on the last row that
/// no buffer slice can satisfy.
pub fn plan_edits(lines: &LineIndex, offsets: &BTreeSet<usize>) -> Vec<Location> {
    offsets
        .iter()
        .rev()
        .map(|&offset| {
            lines.location_of(offset).unwrap_or_else(|| {
                let row = lines.rows() - 1;
                let start = lines.row_start(row).unwrap_or(0);
                Location::new(row, offset - start)
            })
        })
        .collect()
}

/// Applies renames. Only one rename runs at a time.
#[derive(Debug)]
pub struct RenameEngine {
    lock: Mutex<()>,
    save_other_files: bool,
}

impl Default for RenameEngine {
    fn default() -> Self {
        Self::new(true)
    }
}

impl RenameEngine {
    pub fn new(save_other_files: bool) -> Self {
        Self {
            lock: Mutex::new(()),
            save_other_files,
        }
    }

    /// Renames `def` and all its uses to `new_name`.
    ///
    /// `initiating` is the store the user is editing; other affected stores
    /// need confirmation and are saved afterwards.
    pub fn rename(
        &self,
        set: &StoreSet,
        def: &Definition,
        new_name: &str,
        initiating: &Store,
        buffers: &mut dyn Buffers,
        ui: &dyn Interaction,
    ) -> Result<RenameOutcome, RenameError> {
        if !def.kind().is_renamable() {
            return Err(RenameError::UnsupportedKind {
                name: def.name().to_string(),
                kind: def.kind(),
            });
        }

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut uses = find_uses(set, def);
        if uses.is_empty() {
            return Err(RenameError::NoUses(def.name().to_string()));
        }
        uses.entry(def.store.clone())
            .or_default()
            .insert(def.element.offset);

        let old_name = def.name();
        let old_len = old_name.chars().count();

        let mut plan = Vec::with_capacity(uses.len());
        for (store, offsets) in &uses {
            let buffer = buffers.buffer(store).map_err(RenameError::Buffer)?;
            let locations = plan_edits(buffer.lines(), offsets);
            for &location in &locations {
                let found = buffer.slice(location, old_len);
                if found.as_deref() != Some(old_name) {
                    log::debug!(
                        "Rename of {} aborted, {}:{} holds {:?}",
                        old_name,
                        store,
                        location,
                        found
                    );
                    return Err(RenameError::StaleIndex {
                        store: store.clone(),
                        location,
                        expected: old_name.to_string(),
                        found: found.unwrap_or_default(),
                    });
                }
            }
            plan.push(StoreEdits {
                store: store.clone(),
                locations,
            });
        }

        let others = plan.iter().filter(|p| p.store != *initiating).count();
        if others > 0
            && !ui.confirm(&format!(
                "Rename {} to {} in {} other file(s)?",
                old_name, new_name, others
            ))
        {
            log::debug!("Rename of {} cancelled", old_name);
            return Ok(RenameOutcome::Cancelled);
        }

        let mut edits = 0;
        let mut saved = Vec::new();
        for store_edits in &plan {
            let buffer = buffers
                .buffer(&store_edits.store)
                .map_err(RenameError::Buffer)?;
            for &location in &store_edits.locations {
                buffer
                    .replace(location, old_len, new_name)
                    .map_err(RenameError::Buffer)?;
                edits += 1;
            }

            if self.save_other_files && store_edits.store != *initiating {
                match buffer.save() {
                    Ok(()) => saved.push(store_edits.store.clone()),
                    Err(e) => {
                        log::warn!("Failed to save {}: {:#}", store_edits.store, e);
                        ui.status(&format!("Could not save {}", store_edits.store));
                    }
                }
            }
        }

        log::info!(
            "Renamed {} to {} ({} edits in {} files)",
            old_name,
            new_name,
            edits,
            plan.len()
        );
        ui.status(&format!(
            "Renamed {} to {} in {} file(s)",
            old_name,
            new_name,
            plan.len()
        ));
        Ok(RenameOutcome::Renamed {
            files: plan.len(),
            edits,
            saved,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Element, Extraction, Use};
    use crate::symbol_store::{MemoryStore, StoreKey, SymbolStore};
    use crate::test_utils::RecordingUi;
    use proptest::prelude::*;
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    fn use_at(def: &Element, offset: usize) -> Use {
        Use {
            target: def.to_ref(),
            kind: def.kind,
            offset,
            length: def.name.chars().count(),
        }
    }

    /// A store set with `def` declared in `def_store` and used at `uses`.
    fn set_with(def: &Element, def_store: &Store, uses: &[(Store, usize)]) -> (StoreSet, Definition) {
        let symbols = MemoryStore::new(StoreKey::new("app"));
        let mut by_store: HashMap<Store, Extraction> = HashMap::new();
        by_store
            .entry(def_store.clone())
            .or_default()
            .elements
            .push(def.clone());
        for (store, offset) in uses {
            by_store
                .entry(store.clone())
                .or_default()
                .uses
                .push(use_at(def, *offset));
        }
        for (store, extraction) in &by_store {
            symbols.update(store, extraction);
        }
        let set = StoreSet::from_stores([Arc::new(symbols) as Arc<dyn SymbolStore>]);
        let found = set.resolve_ref(&def.to_ref()).unwrap();
        (set, found)
    }

    fn file(name: &str) -> Store {
        Store::file(format!("/ws/{name}"))
    }

    /// Holds its first confirmation open until released.
    struct HeldConfirm {
        entered: mpsc::Sender<()>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl Interaction for HeldConfirm {
        fn confirm(&self, _question: &str) -> bool {
            self.entered.send(()).unwrap();
            self.release.lock().unwrap().recv().unwrap();
            true
        }

        fn status(&self, _message: &str) {}

        fn visit(&self, _store: &Store, _location: Location) {}

        fn visit_offset(&self, _store: &Store, _offset: usize) {}
    }

    fn two_file_buffers(a: &Store, b: &Store) -> BufferSet {
        let mut buffers = BufferSet::new();
        buffers.insert(RopeBuffer::detached(a.clone(), "foo();"));
        buffers.insert(RopeBuffer::detached(b.clone(), "foo();"));
        buffers
    }

    #[test]
    fn test_second_rename_waits_for_the_first() {
        let def = Element::new(Kind::Func, "foo", 0);
        let a = file("A.java");
        let b = file("B.java");
        let (set, found) = set_with(&def, &a, &[(b.clone(), 0)]);
        let engine = RenameEngine::new(false);
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let held = HeldConfirm {
            entered: entered_tx,
            release: Mutex::new(release_rx),
        };
        let finished = Mutex::new(Vec::new());

        std::thread::scope(|scope| {
            scope.spawn(|| {
                let mut buffers = two_file_buffers(&a, &b);
                engine
                    .rename(&set, &found, "bar", &a, &mut buffers, &held)
                    .unwrap();
                finished.lock().unwrap().push("first");
            });
            entered_rx.recv().unwrap();

            let second = scope.spawn(|| {
                let mut buffers = two_file_buffers(&a, &b);
                engine
                    .rename(&set, &found, "baz", &a, &mut buffers, &RecordingUi::new())
                    .unwrap();
                finished.lock().unwrap().push("second");
            });
            std::thread::sleep(Duration::from_millis(50));
            let second_ran_early = second.is_finished() || !finished.lock().unwrap().is_empty();
            release_tx.send(()).unwrap();
            assert!(!second_ran_early);
        });

        assert_eq!(*finished.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_descending_edits_keep_earlier_offsets_valid() {
        // uses at cols 5, 20, 40 on one row
        let mut text: Vec<char> = ".".repeat(50).chars().collect();
        for col in [5, 20, 40] {
            text.splice(col..col + 3, "abc".chars());
        }
        let text: String = text.into_iter().collect();
        let def = Element::new(Kind::Func, "abc", 5);
        let a = file("A.java");
        let (set, found) = set_with(&def, &a, &[(a.clone(), 20), (a.clone(), 40)]);

        let mut buffers = BufferSet::new();
        buffers.insert(RopeBuffer::detached(a.clone(), &text));
        let ui = RecordingUi::new();
        let outcome = RenameEngine::default()
            .rename(&set, &found, "abcdefg", &a, &mut buffers, &ui)
            .unwrap();

        assert!(matches!(outcome, RenameOutcome::Renamed { edits: 3, .. }));
        let result = buffers.get(&a).unwrap().text();
        assert_eq!(&result[5..12], "abcdefg");
        assert_eq!(&result[24..31], "abcdefg");
        assert_eq!(&result[48..55], "abcdefg");
        assert_eq!(result.chars().count(), 50 + 3 * 4);
        assert!(ui.questions().is_empty());
    }

    #[test]
    fn test_unsupported_kind() {
        let def = Element::new(Kind::Type, "Foo", 6);
        let a = file("A.java");
        let (set, found) = set_with(&def, &a, &[(a.clone(), 30)]);
        let mut buffers = BufferSet::new();
        let err = RenameEngine::default()
            .rename(&set, &found, "Bar", &a, &mut buffers, &RecordingUi::new())
            .unwrap_err();
        assert!(matches!(err, RenameError::UnsupportedKind { kind: Kind::Type, .. }));
    }

    #[test]
    fn test_no_uses_is_an_error() {
        let def = Element::new(Kind::Term, "x", 4);
        let a = file("A.java");
        let (set, found) = set_with(&def, &a, &[]);
        let mut buffers = BufferSet::new();
        buffers.insert(RopeBuffer::detached(a.clone(), "int x = 1;"));
        let err = RenameEngine::default()
            .rename(&set, &found, "y", &a, &mut buffers, &RecordingUi::new())
            .unwrap_err();
        assert!(matches!(err, RenameError::NoUses(ref name) if name == "x"));
        assert!(!buffers.get(&a).unwrap().is_dirty());
    }

    #[test]
    fn test_stale_store_aborts_every_edit() {
        let def = Element::new(Kind::Func, "foo", 0);
        let a = file("A.java");
        let b = file("B.java");
        let c = file("C.java");
        let (set, found) = set_with(&def, &a, &[(a.clone(), 10), (b.clone(), 0), (c.clone(), 5)]);

        let mut buffers = BufferSet::new();
        buffers.insert(RopeBuffer::detached(a.clone(), "foo();    foo();"));
        buffers.insert(RopeBuffer::detached(b.clone(), "foo();"));
        // C was edited since it was indexed
        buffers.insert(RopeBuffer::detached(c.clone(), "\nx = fob();"));

        let ui = RecordingUi::new();
        let err = RenameEngine::default()
            .rename(&set, &found, "bar", &a, &mut buffers, &ui)
            .unwrap_err();

        match err {
            RenameError::StaleIndex {
                store,
                location,
                expected,
                found,
            } => {
                assert_eq!(store, c);
                assert_eq!(location, Location::new(1, 4));
                assert_eq!(expected, "foo");
                assert_eq!(found, "fob");
            }
            other => panic!("unexpected error: {other}"),
        }
        for store in [&a, &b, &c] {
            assert!(!buffers.get(store).unwrap().is_dirty());
        }
        assert!(ui.questions().is_empty());
    }

    #[test]
    fn test_declining_confirmation_changes_nothing() {
        let def = Element::new(Kind::Func, "foo", 0);
        let a = file("A.java");
        let b = file("B.java");
        let (set, found) = set_with(&def, &a, &[(b.clone(), 0)]);
        let mut buffers = BufferSet::new();
        buffers.insert(RopeBuffer::detached(a.clone(), "foo"));
        buffers.insert(RopeBuffer::detached(b.clone(), "foo"));

        let ui = RecordingUi::new().answering(false);
        let outcome = RenameEngine::default()
            .rename(&set, &found, "bar", &a, &mut buffers, &ui)
            .unwrap();

        assert_eq!(outcome, RenameOutcome::Cancelled);
        assert_eq!(ui.questions(), vec!["Rename foo to bar in 1 other file(s)?"]);
        assert_eq!(buffers.get(&b).unwrap().text(), "foo");
    }

    #[test]
    fn test_other_files_saved_only_when_configured() {
        let def = Element::new(Kind::Func, "foo", 0);
        let a = file("A.java");
        let b = file("B.java");
        let (set, found) = set_with(&def, &a, &[(b.clone(), 0)]);
        let mut buffers = BufferSet::new();
        buffers.insert(RopeBuffer::detached(a.clone(), "foo"));
        buffers.insert(RopeBuffer::detached(b.clone(), "foo"));

        let outcome = RenameEngine::new(false)
            .rename(&set, &found, "bar", &a, &mut buffers, &RecordingUi::new())
            .unwrap();

        assert_eq!(
            outcome,
            RenameOutcome::Renamed {
                files: 2,
                edits: 2,
                saved: vec![]
            }
        );
        assert!(buffers.get(&b).unwrap().is_dirty());
        assert_eq!(buffers.get(&b).unwrap().save_count(), 0);
    }

    #[test]
    fn test_file_buffers_are_written_on_save() {
        let dir = tempfile::tempdir().unwrap();
        let path_a = dir.path().join("A.java");
        let path_b = dir.path().join("B.java");
        std::fs::write(&path_a, "void foo() {}\n").unwrap();
        std::fs::write(&path_b, "class B {\n  int x = foo();\n}\n").unwrap();
        let a = Store::file(&path_a);
        let b = Store::file(&path_b);

        let def = Element::new(Kind::Func, "foo", 5);
        let (set, found) = set_with(&def, &a, &[(b.clone(), 20)]);

        let mut buffers = BufferSet::new();
        RenameEngine::default()
            .rename(&set, &found, "bar", &a, &mut buffers, &RecordingUi::new())
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(&path_b).unwrap(),
            "class B {\n  int x = bar();\n}\n"
        );
        // the initiating file is edited in its buffer but left unsaved
        assert_eq!(std::fs::read_to_string(&path_a).unwrap(), "void foo() {}\n");
        assert_eq!(buffers.get(&a).unwrap().text(), "void bar() {}\n");
    }

    #[test]
    fn test_plan_edits_descending() {
        let lines = LineIndex::from_text("ab\ncd\nef");
        let offsets: BTreeSet<usize> = [0, 4, 6].into_iter().collect();
        assert_eq!(
            plan_edits(&lines, &offsets),
            vec![Location::new(2, 0), Location::new(1, 1), Location::new(0, 0)]
        );
    }

    #[test]
    fn test_offset_past_end_is_stale() {
        let lines = LineIndex::from_text("ab\ncd");
        let offsets: BTreeSet<usize> = [9].into_iter().collect();
        let locations = plan_edits(&lines, &offsets);
        assert_eq!(locations, vec![Location::new(1, 6)]);
        let buffer = RopeBuffer::detached(file("A.java"), "ab\ncd");
        assert_eq!(buffer.slice(locations[0], 1), None);
    }

    proptest! {
        #[test]
        fn prop_descending_application_matches_direct_rewrite(
            gaps in prop::collection::vec(0usize..6, 1..8),
            new_name in "[a-z]{1,9}",
        ) {
            // "foo" separated by gaps of '-' and newlines
            let mut text = String::new();
            let mut offsets = BTreeSet::new();
            for (i, gap) in gaps.iter().enumerate() {
                text.push_str(&"-".repeat(*gap));
                if i % 2 == 1 {
                    text.push('\n');
                }
                offsets.insert(text.chars().count());
                text.push_str("foo");
            }

            let mut buffer = RopeBuffer::detached(file("A.java"), &text);
            let locations = plan_edits(buffer.lines(), &offsets);
            for location in locations {
                let sliced = buffer.slice(location, 3);
                prop_assert_eq!(sliced.as_deref(), Some("foo"));
                buffer.replace(location, 3, &new_name).unwrap();
            }
            prop_assert_eq!(buffer.text(), text.replace("foo", &new_name));
        }
    }
}
