//! Terminal Grid
//!
//! A dense row-major matrix of cells representing the visible terminal area.
//! All writes go through [`Grid::set`], which compares before writing so the
//! grid's damage is exactly the set of cells whose value changed.

use super::cell::Cell;
use super::damage::{Damage, DirtyRect};

/// The terminal grid - a 2D array of cells
#[derive(Debug, Clone)]
pub struct Grid {
    cells: Vec<Cell>,
    cols: usize,
    rows: usize,
    damage: Damage,
}

impl Grid {
    /// Create a blank grid; both dimensions are clamped to at least 1
    pub fn new(cols: usize, rows: usize) -> Self {
        let cols = cols.max(1);
        let rows = rows.max(1);
        Self {
            cells: vec![Cell::default(); cols * rows],
            cols,
            rows,
            damage: Damage::default(),
        }
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// All cells in row-major order
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Get a reference to a cell
    pub fn cell(&self, row: usize, col: usize) -> Option<&Cell> {
        if row < self.rows && col < self.cols {
            self.cells.get(row * self.cols + col)
        } else {
            None
        }
    }

    /// Get the cells of one row
    pub fn row(&self, row: usize) -> Option<&[Cell]> {
        if row < self.rows {
            let start = row * self.cols;
            Some(&self.cells[start..start + self.cols])
        } else {
            None
        }
    }

    /// Text of a row with trailing spaces trimmed
    pub fn row_text(&self, row: usize) -> String {
        self.row(row)
            .map(|cells| {
                let s: String = cells.iter().map(|c| c.ch).collect();
                s.trim_end().to_string()
            })
            .unwrap_or_default()
    }

    /// Write a cell, recording damage only if its value changes
    pub fn set(&mut self, row: usize, col: usize, cell: Cell) {
        if row >= self.rows || col >= self.cols {
            return;
        }
        let slot = &mut self.cells[row * self.cols + col];
        if *slot != cell {
            *slot = cell;
            self.damage.mark(row, col);
        }
    }

    /// Write `cell` into columns `start..end` of `row`
    pub fn fill(&mut self, row: usize, start: usize, end: usize, cell: Cell) {
        let end = end.min(self.cols);
        for col in start..end {
            self.set(row, col, cell);
        }
    }

    /// Write `cell` into every position of the grid
    pub fn fill_all(&mut self, cell: Cell) {
        for row in 0..self.rows {
            self.fill(row, 0, self.cols, cell);
        }
    }

    /// Scroll rows `top..=bottom` up by `n`. Returns the rows shifted out at
    /// the top, oldest first; `n` rows of `blank` enter at the bottom.
    pub fn scroll_up(&mut self, top: usize, bottom: usize, n: usize, blank: Cell) -> Vec<Vec<Cell>> {
        let bottom = bottom.min(self.rows - 1);
        if top > bottom || n == 0 {
            return Vec::new();
        }
        let n = n.min(bottom - top + 1);

        let discarded = (top..top + n)
            .filter_map(|r| self.row(r).map(<[Cell]>::to_vec))
            .collect();

        for dst in top..bottom + 1 - n {
            self.copy_row(dst + n, dst);
        }
        for row in bottom + 1 - n..=bottom {
            self.fill(row, 0, self.cols, blank);
        }
        discarded
    }

    /// Scroll rows `top..=bottom` down by `n`; rows pushed past `bottom` are
    /// dropped and `n` rows of `blank` enter at the top.
    pub fn scroll_down(&mut self, top: usize, bottom: usize, n: usize, blank: Cell) {
        let bottom = bottom.min(self.rows - 1);
        if top > bottom || n == 0 {
            return;
        }
        let n = n.min(bottom - top + 1);

        for dst in (top + n..=bottom).rev() {
            self.copy_row(dst - n, dst);
        }
        for row in top..top + n {
            self.fill(row, 0, self.cols, blank);
        }
    }

    fn copy_row(&mut self, src: usize, dst: usize) {
        for col in 0..self.cols {
            let cell = self.cells[src * self.cols + col];
            self.set(dst, col, cell);
        }
    }

    /// Build a grid of a new size holding the overlapping top-left content
    /// of this one. The whole new grid is marked dirty.
    pub fn resized(&self, cols: usize, rows: usize) -> Grid {
        let mut grid = Grid::new(cols, rows);
        let keep_cols = self.cols.min(grid.cols);
        for row in 0..self.rows.min(grid.rows) {
            let src = row * self.cols;
            let dst = row * grid.cols;
            grid.cells[dst..dst + keep_cols].copy_from_slice(&self.cells[src..src + keep_cols]);
        }
        grid.mark_all();
        grid
    }

    /// Mark every cell that differs from the same position in `other`
    pub fn mark_diff(&mut self, other: &Grid) {
        for row in 0..self.rows {
            for col in 0..self.cols {
                if other.cell(row, col) != self.cell(row, col) {
                    self.damage.mark(row, col);
                }
            }
        }
    }

    pub fn mark_all(&mut self) {
        self.damage.merge(Some(DirtyRect::full(self.cols, self.rows)));
    }

    /// Fold damage recorded elsewhere into this grid's damage
    pub fn merge_damage(&mut self, rect: Option<DirtyRect>) {
        self.damage.merge(rect);
    }

    pub fn damage(&self) -> Option<DirtyRect> {
        self.damage.get()
    }

    pub fn take_damage(&mut self) -> Option<DirtyRect> {
        self.damage.take()
    }
}
