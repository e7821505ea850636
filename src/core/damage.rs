//! Dirty-region tracking
//!
//! The renderer repaints only what changed since its last snapshot. Every
//! cell write that alters a cell grows a single bounding rectangle.

use serde::{Deserialize, Serialize};

/// Inclusive rectangle of grid positions, in (row, col) coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DirtyRect {
    pub top: usize,
    pub left: usize,
    pub bottom: usize,
    pub right: usize,
}

impl DirtyRect {
    /// A rectangle covering exactly one cell
    pub fn cell(row: usize, col: usize) -> Self {
        Self {
            top: row,
            left: col,
            bottom: row,
            right: col,
        }
    }

    /// A rectangle covering a whole `cols` x `rows` grid
    pub fn full(cols: usize, rows: usize) -> Self {
        Self {
            top: 0,
            left: 0,
            bottom: rows.saturating_sub(1),
            right: cols.saturating_sub(1),
        }
    }

    /// Grow to include the cell at (row, col)
    pub fn include(&mut self, row: usize, col: usize) {
        self.top = self.top.min(row);
        self.bottom = self.bottom.max(row);
        self.left = self.left.min(col);
        self.right = self.right.max(col);
    }

    /// Smallest rectangle covering both
    pub fn union(self, other: DirtyRect) -> DirtyRect {
        DirtyRect {
            top: self.top.min(other.top),
            left: self.left.min(other.left),
            bottom: self.bottom.max(other.bottom),
            right: self.right.max(other.right),
        }
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        (self.top..=self.bottom).contains(&row) && (self.left..=self.right).contains(&col)
    }

    pub fn width(&self) -> usize {
        self.right - self.left + 1
    }

    pub fn height(&self) -> usize {
        self.bottom - self.top + 1
    }
}

/// Accumulated damage since the last time it was taken
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Damage {
    rect: Option<DirtyRect>,
}

impl Damage {
    pub fn mark(&mut self, row: usize, col: usize) {
        match &mut self.rect {
            Some(rect) => rect.include(row, col),
            None => self.rect = Some(DirtyRect::cell(row, col)),
        }
    }

    pub fn merge(&mut self, other: Option<DirtyRect>) {
        if let Some(other) = other {
            self.rect = Some(match self.rect {
                Some(rect) => rect.union(other),
                None => other,
            });
        }
    }

    pub fn get(&self) -> Option<DirtyRect> {
        self.rect
    }

    pub fn take(&mut self) -> Option<DirtyRect> {
        self.rect.take()
    }

    pub fn is_clean(&self) -> bool {
        self.rect.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_damage_grows_to_bounding_box() {
        let mut damage = Damage::default();
        assert!(damage.is_clean());

        damage.mark(3, 10);
        damage.mark(1, 12);
        damage.mark(5, 2);

        let rect = damage.get().unwrap();
        assert_eq!(
            rect,
            DirtyRect {
                top: 1,
                left: 2,
                bottom: 5,
                right: 12
            }
        );
        assert_eq!(rect.width(), 11);
        assert_eq!(rect.height(), 5);
        assert!(rect.contains(3, 7));
        assert!(!rect.contains(0, 7));
    }

    #[test]
    fn test_take_clears() {
        let mut damage = Damage::default();
        damage.mark(0, 0);
        assert_eq!(damage.take(), Some(DirtyRect::cell(0, 0)));
        assert!(damage.is_clean());
        assert_eq!(damage.take(), None);
    }

    #[test]
    fn test_merge() {
        let mut damage = Damage::default();
        damage.merge(None);
        assert!(damage.is_clean());
        damage.merge(Some(DirtyRect::cell(2, 2)));
        damage.merge(Some(DirtyRect::full(4, 3)));
        assert_eq!(damage.get(), Some(DirtyRect::full(4, 3)));
    }
}
