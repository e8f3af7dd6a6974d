//
// error_ring.rs
//
// Wrap-around cursor over located diagnostics
//

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::interaction::Interaction;
use crate::line_index::Location;
use crate::store::Store;

/// Anything the ring can navigate to.
pub trait Located {
    fn store(&self) -> Store;
    fn location(&self) -> Location;
    fn description(&self) -> &str;
}

/// A compiler error or test failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub path: PathBuf,
    pub location: Location,
    pub description: String,
}

impl Located for Diagnostic {
    fn store(&self) -> Store {
        Store::File(self.path.clone())
    }

    fn location(&self) -> Location {
        self.location
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Result of moving the ring's cursor.
#[derive(Debug, PartialEq, Eq)]
pub enum RingStep<'a, T> {
    Empty,
    Visit(&'a T),
    /// Moved past the last entry; the cursor is reset
    AtLast,
    /// Moved before the first entry; the cursor is reset
    AtFirst,
}

/// Ordered diagnostics with a cursor that stops at either end before wrapping.
///
/// The cursor starts unset. Stepping past either end reports the boundary
/// and unsets it again, so the next step in the same direction starts over.
#[derive(Debug, Clone)]
pub struct ErrorRing<T> {
    entries: Vec<T>,
    cursor: Option<usize>,
}

impl<T> Default for ErrorRing<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<T> ErrorRing<T> {
    pub fn new(entries: Vec<T>) -> Self {
        Self {
            entries,
            cursor: None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[T] {
        &self.entries
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn step_next(&mut self) -> RingStep<'_, T> {
        if self.entries.is_empty() {
            return RingStep::Empty;
        }
        let next = self.cursor.map_or(0, |i| i + 1);
        if next < self.entries.len() {
            self.cursor = Some(next);
            RingStep::Visit(&self.entries[next])
        } else {
            self.cursor = None;
            RingStep::AtLast
        }
    }

    pub fn step_prev(&mut self) -> RingStep<'_, T> {
        if self.entries.is_empty() {
            return RingStep::Empty;
        }
        match self.cursor {
            None => {
                let last = self.entries.len() - 1;
                self.cursor = Some(last);
                RingStep::Visit(&self.entries[last])
            }
            Some(0) => {
                self.cursor = None;
                RingStep::AtFirst
            }
            Some(i) => {
                self.cursor = Some(i - 1);
                RingStep::Visit(&self.entries[i - 1])
            }
        }
    }
}

impl<T: Located> ErrorRing<T> {
    pub fn visit_next(&mut self, ui: &dyn Interaction) {
        let step = self.step_next();
        Self::show(step, ui);
    }

    pub fn visit_prev(&mut self, ui: &dyn Interaction) {
        let step = self.step_prev();
        Self::show(step, ui);
    }

    fn show(step: RingStep<'_, T>, ui: &dyn Interaction) {
        match step {
            RingStep::Empty => ui.status("No errors"),
            RingStep::Visit(entry) => {
                ui.visit(&entry.store(), entry.location());
                ui.status(entry.description());
            }
            RingStep::AtLast => ui.status("At last error, repeat to wrap"),
            RingStep::AtFirst => ui.status("At first error, repeat to wrap"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RecordingUi;

    fn ring() -> ErrorRing<&'static str> {
        ErrorRing::new(vec!["e0", "e1", "e2"])
    }

    fn next(ring: &mut ErrorRing<&'static str>) -> Option<&'static str> {
        match ring.step_next() {
            RingStep::Visit(e) => Some(*e),
            _ => None,
        }
    }

    fn prev(ring: &mut ErrorRing<&'static str>) -> Option<&'static str> {
        match ring.step_prev() {
            RingStep::Visit(e) => Some(*e),
            _ => None,
        }
    }

    #[test]
    fn test_next_stops_at_end_then_wraps() {
        let mut ring = ring();
        let seen: Vec<_> = (0..5).map(|_| next(&mut ring)).collect();
        assert_eq!(
            seen,
            vec![Some("e0"), Some("e1"), Some("e2"), None, Some("e0")]
        );
    }

    #[test]
    fn test_prev_from_unset_starts_at_last() {
        let mut ring = ring();
        let seen: Vec<_> = (0..5).map(|_| prev(&mut ring)).collect();
        assert_eq!(
            seen,
            vec![Some("e2"), Some("e1"), Some("e0"), None, Some("e2")]
        );
    }

    #[test]
    fn test_boundaries_reset_cursor() {
        let mut ring = ring();
        next(&mut ring);
        assert_eq!(ring.step_prev(), RingStep::AtFirst);
        assert_eq!(ring.cursor(), None);

        for _ in 0..3 {
            next(&mut ring);
        }
        assert_eq!(ring.step_next(), RingStep::AtLast);
        assert_eq!(ring.cursor(), None);
    }

    #[test]
    fn test_empty_ring() {
        let mut ring: ErrorRing<&str> = ErrorRing::default();
        assert_eq!(ring.step_next(), RingStep::Empty);
        assert_eq!(ring.step_prev(), RingStep::Empty);
    }

    #[test]
    fn test_visit_navigates_and_reports() {
        let diagnostics = vec![
            Diagnostic {
                path: PathBuf::from("/p/src/A.java"),
                location: Location::new(3, 4),
                description: "cannot find symbol".into(),
            },
            Diagnostic {
                path: PathBuf::from("/p/src/B.java"),
                location: Location::new(0, 0),
                description: "missing return".into(),
            },
        ];
        let mut ring = ErrorRing::new(diagnostics);
        let ui = RecordingUi::new();

        ring.visit_next(&ui);
        ring.visit_next(&ui);
        ring.visit_next(&ui);

        assert_eq!(
            ui.visits(),
            vec![
                (Store::file("/p/src/A.java"), Location::new(3, 4)),
                (Store::file("/p/src/B.java"), Location::new(0, 0)),
            ]
        );
        assert_eq!(
            ui.statuses(),
            vec![
                "cannot find symbol",
                "missing return",
                "At last error, repeat to wrap"
            ]
        );
        ErrorRing::<Diagnostic>::default().visit_prev(&ui);
        assert_eq!(ui.statuses().last().map(String::as_str), Some("No errors"));
    }
}
