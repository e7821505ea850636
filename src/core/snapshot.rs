//! Screen snapshots
//!
//! A snapshot is a full copy of the visible state handed to the renderer (or
//! a test) so the screen can keep changing underneath. Snapshots serialize to
//! JSON for golden comparisons and debugging.

use serde::{Deserialize, Serialize};

use super::cell::Cell;
use super::damage::DirtyRect;
use super::screen::{Modes, Screen};

/// A complete copy of the visible terminal state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub cols: usize,
    pub rows: usize,
    /// Visible grid content, row-major
    pub cells: Vec<Cell>,
    pub cursor: CursorSnapshot,
    pub scroll_top: usize,
    pub scroll_bottom: usize,
    pub modes: Modes,
    /// Cells changed since the previous snapshot
    pub damage: Option<DirtyRect>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    pub scrollback_lines: usize,
}

/// Snapshot of cursor state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorSnapshot {
    pub row: usize,
    pub col: usize,
    pub visible: bool,
    pub pending_wrap: bool,
}

impl Snapshot {
    /// Copy the current screen state. Does not clear damage; see
    /// [`Screen::snapshot`] for that.
    pub fn from_screen(screen: &Screen) -> Self {
        let cursor = screen.cursor();
        Snapshot {
            cols: screen.cols(),
            rows: screen.rows(),
            cells: screen.grid().cells().to_vec(),
            cursor: CursorSnapshot {
                row: cursor.row,
                col: cursor.col,
                visible: cursor.visible,
                pending_wrap: cursor.pending_wrap,
            },
            scroll_top: screen.scroll_top(),
            scroll_bottom: screen.scroll_bottom(),
            modes: screen.modes.clone(),
            damage: screen.damage(),
            title: String::new(),
            scrollback_lines: screen.scrollback().len(),
        }
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&Cell> {
        if row < self.rows && col < self.cols {
            self.cells.get(row * self.cols + col)
        } else {
            None
        }
    }

    /// Text of one row with trailing spaces trimmed
    pub fn row_text(&self, row: usize) -> String {
        if row >= self.rows {
            return String::new();
        }
        let start = row * self.cols;
        let s: String = self.cells[start..start + self.cols].iter().map(|c| c.ch).collect();
        s.trim_end().to_string()
    }

    /// Convert snapshot to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse snapshot from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Get a simple text representation of the screen (for debugging)
    pub fn to_text(&self) -> String {
        let mut result = String::new();
        for row in 0..self.rows {
            result.push_str(&self.row_text(row));
            result.push('\n');
        }

        // Remove trailing empty lines
        while result.ends_with("\n\n") {
            result.pop();
        }
        result
    }

    /// Compare grid contents and cursor, ignoring damage and metadata
    pub fn content_equals(&self, other: &Snapshot) -> bool {
        self.cols == other.cols
            && self.rows == other.rows
            && self.cells == other.cells
            && self.cursor == other.cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Color;
    use crate::parser::AttrChange;

    #[test]
    fn test_snapshot_from_screen() {
        let mut screen = Screen::new(10, 3);
        screen.print("Hi");

        let snapshot = screen.snapshot();

        assert_eq!(snapshot.cols, 10);
        assert_eq!(snapshot.rows, 3);
        assert_eq!(snapshot.cell(0, 0).unwrap().ch, 'H');
        assert_eq!(snapshot.cell(0, 1).unwrap().ch, 'i');
        assert_eq!(snapshot.cursor.col, 2);
        assert_eq!(snapshot.cursor.row, 0);
        assert_eq!(snapshot.damage, Some(DirtyRect { top: 0, left: 0, bottom: 0, right: 1 }));
        assert!(snapshot.cell(3, 0).is_none());
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let mut screen = Screen::new(10, 3);
        screen.print("A");
        let before = screen.snapshot();
        screen.print("B");
        assert_eq!(before.row_text(0), "A");
        assert_eq!(screen.row_text(0), "AB");
    }

    #[test]
    fn test_snapshot_to_text() {
        let mut screen = Screen::new(10, 3);
        screen.print("AB");
        screen.linefeed();
        screen.print("C");

        let text = screen.snapshot().to_text();
        assert_eq!(text, "AB\nC\n");
    }

    #[test]
    fn test_snapshot_json_roundtrip() {
        let mut screen = Screen::new(10, 3);
        screen.set_attr(AttrChange::Foreground(Color::GREEN));
        screen.print("ok");

        let snapshot = screen.snapshot();
        let json = snapshot.to_json().unwrap();
        let restored = Snapshot::from_json(&json).unwrap();
        assert_eq!(snapshot, restored);
        assert_eq!(restored.cell(0, 0).unwrap().fg, Color::GREEN);
    }

    #[test]
    fn test_content_equals_ignores_damage() {
        let mut a = Screen::new(5, 2);
        let mut b = Screen::new(5, 2);
        a.print("x");
        b.print("x");
        let first = a.snapshot();
        b.take_damage();
        let second = Snapshot::from_screen(&b);
        assert_ne!(first.damage, second.damage);
        assert!(first.content_equals(&second));
    }
}
