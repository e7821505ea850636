//! Scrollback buffer implementation
//!
//! The scrollback buffer stores lines that have scrolled off the top of the
//! primary screen. It's a bounded ring: once full, each new line evicts the
//! oldest one.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::cell::Cell;

/// A line that left the visible grid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    pub cells: Vec<Cell>,
}

impl Line {
    pub fn from_cells(cells: Vec<Cell>) -> Self {
        Self { cells }
    }

    /// Extract text content from the line, trailing spaces trimmed
    pub fn text(&self) -> String {
        let s: String = self.cells.iter().map(|c| c.ch).collect();
        s.trim_end().to_string()
    }
}

/// Ring buffer for scrollback lines
#[derive(Debug, Clone, Default)]
pub struct Scrollback {
    lines: VecDeque<Line>,
    capacity: usize,
}

impl Scrollback {
    /// Create a new scrollback buffer with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            // Don't pre-allocate too much
            lines: VecDeque::with_capacity(capacity.min(1000)),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Push a line into the scrollback buffer, evicting the oldest when full
    pub fn push(&mut self, line: Line) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// Get a line by index (0 = oldest line in scrollback)
    pub fn get(&self, index: usize) -> Option<&Line> {
        self.lines.get(index)
    }

    /// Get a line by index from the end (0 = most recent line)
    pub fn get_from_end(&self, index: usize) -> Option<&Line> {
        self.len()
            .checked_sub(index + 1)
            .and_then(|i| self.lines.get(i))
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// Iterate over all lines from oldest to newest
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &Line> {
        self.lines.iter()
    }
}
