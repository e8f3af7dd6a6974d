//
// source_index.rs
//
// Per-file positional index of semantic elements
//

use std::collections::BTreeMap;

use crate::element::Element;
use crate::line_index::{LineIndex, Location};
use crate::store::Store;

/// Elements starting on one row, keyed by start column.
#[derive(Debug, Clone, Default)]
pub struct Row {
    columns: BTreeMap<usize, Element>,
}

impl Row {
    /// Element with the greatest start column at or before `col`.
    pub fn nearest_at_or_before(&self, col: usize) -> Option<(usize, &Element)> {
        self.columns
            .range(..=col)
            .next_back()
            .map(|(&start, elem)| (start, elem))
    }

    /// Element whose span covers `col`, or ends exactly at it.
    ///
    /// Several elements can start on one row, so the floor entry only counts
    /// when its span reaches the column.
    pub fn element_at(&self, col: usize) -> Option<&Element> {
        let (start, elem) = self.nearest_at_or_before(col)?;
        (start + elem.length >= col).then_some(elem)
    }

    pub fn elements(&self) -> impl Iterator<Item = (usize, &Element)> {
        self.columns.iter().map(|(&col, elem)| (col, elem))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Immutable index of the elements of one store.
///
/// Rebuilt from scratch on every reindex; never updated in place.
#[derive(Debug, Clone)]
pub struct SourceIndex {
    store: Store,
    lines: LineIndex,
    rows: Vec<Option<Row>>,
}

impl SourceIndex {
    /// Builds the index from an unordered element stream.
    ///
    /// Elements whose offset falls outside the text are dropped with a
    /// warning; they indicate an extractor bug and never fail the build.
    pub fn build(
        store: Store,
        lines: LineIndex,
        elements: impl IntoIterator<Item = Element>,
    ) -> Self {
        let mut rows: Vec<Option<Row>> = vec![None; lines.rows()];

        for elem in elements {
            let Some(row) = lines.row_of(elem.offset) else {
                log::warn!(
                    "{}: no row for element '{}' at offset {} (text has {} chars), dropping",
                    store,
                    elem.name,
                    elem.offset,
                    lines.len()
                );
                continue;
            };
            let col = elem.offset - lines.row_start(row).unwrap_or_default();
            rows[row]
                .get_or_insert_with(Row::default)
                .columns
                .insert(col, elem);
        }

        Self { store, lines, rows }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn lines(&self) -> &LineIndex {
        &self.lines
    }

    pub fn row(&self, row: usize) -> Option<&Row> {
        self.rows.get(row).and_then(Option::as_ref)
    }

    pub fn element_at(&self, loc: Location) -> Option<&Element> {
        self.row(loc.row)?.element_at(loc.col)
    }

    pub fn element_at_offset(&self, offset: usize) -> Option<&Element> {
        self.element_at(self.lines.location_of(offset)?)
    }

    /// Nearest element starting at or before `loc`, searching earlier rows
    /// when the row of `loc` has nothing before the column.
    pub fn nearest_at_or_before(&self, loc: Location) -> Option<&Element> {
        if let Some((_, elem)) = self.row(loc.row).and_then(|r| r.nearest_at_or_before(loc.col)) {
            return Some(elem);
        }
        self.rows
            .get(..loc.row.min(self.rows.len()))?
            .iter()
            .rev()
            .flatten()
            .find_map(|row| row.columns.values().next_back())
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.rows
            .iter()
            .flatten()
            .flat_map(|row| row.columns.values())
    }

    pub fn element_count(&self) -> usize {
        self.rows.iter().flatten().map(Row::len).sum()
    }
}
