//! Cursor state management
//!
//! The cursor tracks position, visibility and the pen used for new cells. Its
//! column may equal the grid width: that is the pending-wrap position reached
//! after printing into the last column, and the wrap happens only when the
//! next printable arrives.

use serde::{Deserialize, Serialize};

use super::Pen;

/// Cursor state including position, visibility, and current pen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Column position (0-indexed, `cols` while a wrap is pending)
    pub col: usize,
    /// Row position (0-indexed)
    pub row: usize,
    /// Whether the cursor is visible (DECTCEM)
    pub visible: bool,
    /// Cursor sits past the right edge; the next printable wraps first
    pub pending_wrap: bool,
    /// Colours and attributes applied to new characters and erases
    pub pen: Pen,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            col: 0,
            row: 0,
            visible: true,
            pending_wrap: false,
            pen: Pen::default(),
        }
    }
}

/// Saved cursor state for DECSC/DECRC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SavedCursor {
    pub col: usize,
    pub row: usize,
    pub pending_wrap: bool,
    pub pen: Pen,
}

impl Cursor {
    /// Create a new cursor at the home position
    pub fn new() -> Self {
        Self::default()
    }

    /// Column the cursor addresses once a pending wrap is discarded
    pub fn effective_col(&self, cols: usize) -> usize {
        self.col.min(cols.saturating_sub(1))
    }

    /// Move cursor to absolute position, clamping to bounds
    pub fn move_to(&mut self, col: usize, row: usize, cols: usize, rows: usize) {
        self.col = col.min(cols.saturating_sub(1));
        self.row = row.min(rows.saturating_sub(1));
        self.pending_wrap = false;
    }

    /// Move by a signed row and column offset, clamping to the grid
    pub fn move_by(&mut self, rows_delta: i32, cols_delta: i32, cols: usize, rows: usize) {
        let row = offset(self.row, rows_delta);
        let col = offset(self.effective_col(cols), cols_delta);
        self.move_to(col, row, cols, rows);
    }

    /// Move cursor to column (0-indexed)
    pub fn set_col(&mut self, col: usize, cols: usize) {
        self.col = col.min(cols.saturating_sub(1));
        self.pending_wrap = false;
    }

    /// Carriage return - move to column 0
    pub fn carriage_return(&mut self) {
        self.col = 0;
        self.pending_wrap = false;
    }

    /// Backspace - one column left, never past column 0
    pub fn backspace(&mut self, cols: usize) {
        self.col = self.effective_col(cols).saturating_sub(1);
        self.pending_wrap = false;
    }

    /// Advance after writing a cell; reaching `cols` arms the pending wrap
    pub fn advance(&mut self, cols: usize) {
        self.col = (self.col + 1).min(cols);
        self.pending_wrap = self.col == cols;
    }

    /// Save cursor state
    pub fn save(&self) -> SavedCursor {
        SavedCursor {
            col: self.col,
            row: self.row,
            pending_wrap: self.pending_wrap,
            pen: self.pen,
        }
    }

    /// Restore cursor state, clamping the position into the current grid
    pub fn restore(&mut self, saved: &SavedCursor, cols: usize, rows: usize) {
        self.row = saved.row.min(rows.saturating_sub(1));
        self.col = saved.col.min(cols);
        self.pending_wrap = saved.pending_wrap && self.col == cols;
        if self.col == cols && !self.pending_wrap {
            self.col = cols.saturating_sub(1);
        }
        self.pen = saved.pen;
    }

    /// Pull the position back inside a grid of the given size
    pub fn clamp(&mut self, cols: usize, rows: usize) {
        self.row = self.row.min(rows.saturating_sub(1));
        if self.col >= cols {
            self.col = cols;
            self.pending_wrap = true;
        } else {
            self.pending_wrap = false;
        }
    }

    /// Reset cursor to default state
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

fn offset(base: usize, delta: i32) -> usize {
    if delta < 0 {
        base.saturating_sub(delta.unsigned_abs() as usize)
    } else {
        base.saturating_add(delta as usize)
    }
}
