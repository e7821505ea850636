//! Terminal Cell
//!
//! A single position in the grid: one scalar value plus the colours and
//! attribute bits it was written with. Every cell occupies exactly one column.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Rendition attributes carried by a cell (SGR 1/2/3/4/7)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Attrs: u8 {
        const BOLD = 1 << 0;
        const FAINT = 1 << 1;
        const ITALIC = 1 << 2;
        const UNDERLINE = 1 << 3;
        const INVERSE = 1 << 4;
    }
}

/// Colour of a cell's foreground or background
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Color {
    /// The renderer's default colour
    #[default]
    Default,
    /// One of the eight base ANSI colours (0-7)
    Palette(u8),
}

impl Color {
    pub const BLACK: Color = Color::Palette(0);
    pub const RED: Color = Color::Palette(1);
    pub const GREEN: Color = Color::Palette(2);
    pub const YELLOW: Color = Color::Palette(3);
    pub const BLUE: Color = Color::Palette(4);
    pub const MAGENTA: Color = Color::Palette(5);
    pub const CYAN: Color = Color::Palette(6);
    pub const WHITE: Color = Color::Palette(7);

    /// Build a palette colour, or `None` if the index is outside 0-7
    pub fn palette(index: u8) -> Option<Color> {
        (index < 8).then_some(Color::Palette(index))
    }
}

/// Pen used for writes and erases: the colours and attributes that the next
/// printed character will receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Pen {
    pub fg: Color,
    pub bg: Color,
    pub attrs: Attrs,
}

/// A single cell in the terminal grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub ch: char,
    pub fg: Color,
    pub bg: Color,
    pub attrs: Attrs,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            ch: ' ',
            fg: Color::Default,
            bg: Color::Default,
            attrs: Attrs::empty(),
        }
    }
}

impl Cell {
    /// Create a cell holding `ch` with default styling
    pub fn new(ch: char) -> Self {
        Self {
            ch,
            ..Default::default()
        }
    }

    /// Create a cell holding `ch` drawn with `pen`
    pub fn with_pen(ch: char, pen: Pen) -> Self {
        Self {
            ch,
            fg: pen.fg,
            bg: pen.bg,
            attrs: pen.attrs,
        }
    }

    /// The blank cell an erase leaves behind: a space in the pen's background
    pub fn blank(bg: Color) -> Self {
        Self {
            bg,
            ..Default::default()
        }
    }

    /// True for a space with default styling
    pub fn is_default(&self) -> bool {
        *self == Cell::default()
    }
}
