//
// line_index.rs
//
// Offset to row lookup table for a source text
//

use std::io::BufRead;

use serde::{Deserialize, Serialize};

/// A zero-based (row, column) position, columns counted in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
    pub row: usize,
    pub col: usize,
}

impl Location {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.row + 1, self.col + 1)
    }
}

/// Sorted table of row start offsets.
///
/// A new row starts at the first character after a `\n` that is not a `\r`,
/// so `\r\n` and `\n` both count as a single boundary. The table always has
/// an entry for offset 0, even for empty input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineIndex {
    starts: Vec<usize>,
    len: usize,
}

impl Default for LineIndex {
    fn default() -> Self {
        Self::from_text("")
    }
}

impl LineIndex {
    pub fn from_text(text: &str) -> Self {
        Self::from_chars(text.chars())
    }

    /// Builds the table by consuming a character stream from its start.
    pub fn from_chars(chars: impl IntoIterator<Item = char>) -> Self {
        let mut starts = vec![0];
        let mut pending = false;
        let mut len = 0;

        for (offset, c) in chars.into_iter().enumerate() {
            if pending && c != '\r' {
                starts.push(offset);
                pending = false;
            }
            if c == '\n' {
                pending = true;
            }
            len = offset + 1;
        }

        Self { starts, len }
    }

    /// Reads a whole stream. The reader must be positioned at the start of the source.
    pub fn from_reader<R: BufRead>(mut reader: R) -> std::io::Result<Self> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        Ok(Self::from_text(&text))
    }

    /// Number of rows; never zero.
    pub fn rows(&self) -> usize {
        self.starts.len()
    }

    /// Length of the indexed text in characters.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Row containing `offset` (floor lookup).
    ///
    /// Offsets past the end of the text have no row; the end offset itself
    /// belongs to the last row.
    pub fn row_of(&self, offset: usize) -> Option<usize> {
        if offset > self.len {
            return None;
        }
        Some(self.starts.partition_point(|&start| start <= offset) - 1)
    }

    pub fn row_start(&self, row: usize) -> Option<usize> {
        self.starts.get(row).copied()
    }

    pub fn location_of(&self, offset: usize) -> Option<Location> {
        let row = self.row_of(offset)?;
        Some(Location::new(row, offset - self.starts[row]))
    }

    pub fn offset_of(&self, loc: Location) -> Option<usize> {
        let offset = self.row_start(loc.row)? + loc.col;
        (offset <= self.len).then_some(offset)
    }
}
