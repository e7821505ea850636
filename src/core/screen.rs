//! Screen model implementation
//!
//! The screen represents the visible terminal grid plus the cursor, scroll
//! region and mode flags. It owns both the primary and alternate grids and
//! applies decoded events to whichever is active. Out-of-range input is
//! always clamped; nothing here fails.

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::cell::{Cell, Pen};
use super::cursor::{Cursor, SavedCursor};
use super::damage::DirtyRect;
use super::grid::Grid;
use super::scrollback::{Line, Scrollback};
use super::snapshot::Snapshot;
use crate::parser::{AttrChange, DecMode, DisplayErase, Event, LineErase, C0};

const TAB_WIDTH: usize = 8;

/// Terminal mode flags
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Modes {
    /// Application cursor keys (DECCKM)
    pub application_cursor: bool,
    /// Bracketed paste mode (xterm)
    pub bracketed_paste: bool,
    /// Alternate screen active
    pub alternate_screen: bool,
    /// Line feed also returns the carriage (LNM)
    pub newline_mode: bool,
}

/// Construction options for a [`Screen`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenOptions {
    /// Scrollback capacity in lines
    pub scrollback: usize,
    /// Initial (and post-reset) value of [`Modes::newline_mode`]
    pub newline_mode: bool,
}

impl Default for ScreenOptions {
    fn default() -> Self {
        Self {
            scrollback: 1000,
            newline_mode: true,
        }
    }
}

/// The main screen structure
#[derive(Debug, Clone)]
pub struct Screen {
    primary: Grid,
    alternate: Grid,
    on_alternate: bool,
    cursor: Cursor,
    /// Saved cursor for the primary screen (DECSC)
    primary_saved: Option<SavedCursor>,
    /// Saved cursor for the alternate screen
    alternate_saved: Option<SavedCursor>,
    /// Primary cursor put aside by mode 1049, kept apart from DECSC
    alt_screen_saved: Option<SavedCursor>,
    /// Scroll region top (0-indexed, inclusive)
    scroll_top: usize,
    /// Scroll region bottom (0-indexed, inclusive)
    scroll_bottom: usize,
    scrollback: Scrollback,
    pub modes: Modes,
    options: ScreenOptions,
}

impl Screen {
    /// Create a new screen with default options
    pub fn new(cols: usize, rows: usize) -> Self {
        Self::with_options(cols, rows, ScreenOptions::default())
    }

    /// Create a new screen; dimensions are clamped to at least 1x1
    pub fn with_options(cols: usize, rows: usize, options: ScreenOptions) -> Self {
        let primary = Grid::new(cols, rows);
        let alternate = Grid::new(cols, rows);
        let rows = primary.rows();
        Self {
            primary,
            alternate,
            on_alternate: false,
            cursor: Cursor::new(),
            primary_saved: None,
            alternate_saved: None,
            alt_screen_saved: None,
            scroll_top: 0,
            scroll_bottom: rows - 1,
            scrollback: Scrollback::new(options.scrollback),
            modes: Modes {
                newline_mode: options.newline_mode,
                ..Default::default()
            },
            options,
        }
    }

    pub fn cols(&self) -> usize {
        self.grid().cols()
    }

    pub fn rows(&self) -> usize {
        self.grid().rows()
    }

    /// The grid currently shown
    pub fn grid(&self) -> &Grid {
        if self.on_alternate {
            &self.alternate
        } else {
            &self.primary
        }
    }

    fn grid_mut(&mut self) -> &mut Grid {
        if self.on_alternate {
            &mut self.alternate
        } else {
            &mut self.primary
        }
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn scrollback(&self) -> &Scrollback {
        &self.scrollback
    }

    pub fn scroll_top(&self) -> usize {
        self.scroll_top
    }

    pub fn scroll_bottom(&self) -> usize {
        self.scroll_bottom
    }

    pub fn is_alternate(&self) -> bool {
        self.on_alternate
    }

    /// Get a cell of the visible grid
    pub fn cell(&self, row: usize, col: usize) -> Option<&Cell> {
        self.grid().cell(row, col)
    }

    /// Text of a visible row with trailing spaces trimmed
    pub fn row_text(&self, row: usize) -> String {
        self.grid().row_text(row)
    }

    /// Region changed since the last snapshot, if any
    pub fn damage(&self) -> Option<DirtyRect> {
        self.grid().damage()
    }

    /// Return and clear the damage without copying cells
    pub fn take_damage(&mut self) -> Option<DirtyRect> {
        self.grid_mut().take_damage()
    }

    /// Copy the visible state for the renderer and clear the damage
    pub fn snapshot(&mut self) -> Snapshot {
        let snapshot = Snapshot::from_screen(self);
        self.take_damage();
        snapshot
    }

    /// Apply one decoded event
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::Print(text) => self.print(text),
            Event::C0(c0) => self.execute(*c0),
            Event::CursorMove { row, col } => self.move_cursor_to(
                usize::from(*row).saturating_sub(1),
                usize::from(*col).saturating_sub(1),
            ),
            Event::CursorDelta { rows, cols } => self.move_cursor_by(*rows, *cols),
            Event::CursorLineDelta(n) => {
                self.move_cursor_by(*n, 0);
                self.cursor.carriage_return();
            }
            Event::CursorColumn(col) => {
                let cols = self.cols();
                self.cursor.set_col(usize::from(*col).saturating_sub(1), cols);
            }
            Event::EraseInLine(mode) => self.erase_in_line(*mode),
            Event::EraseInDisplay(mode) => self.erase_in_display(*mode),
            Event::ScrollUp(n) => self.scroll_up(usize::from(*n)),
            Event::ScrollDown(n) => self.scroll_down(usize::from(*n)),
            Event::SetScrollRegion { top, bottom } => {
                let top = top.map_or(0, |t| usize::from(t).saturating_sub(1));
                let bottom = bottom.map_or(self.rows() - 1, |b| usize::from(b).saturating_sub(1));
                self.set_scroll_region(top, bottom);
            }
            Event::SetAttr(change) => self.set_attr(*change),
            Event::SaveCursor => self.save_cursor(),
            Event::RestoreCursor => self.restore_cursor(),
            Event::Index => self.index(),
            Event::NextLine => self.next_line(),
            Event::ReverseIndex => self.reverse_index(),
            Event::FullReset => self.reset(),
            Event::ModeSet { mode, on } => self.set_mode(*mode, *on),
            Event::Resize { cols, rows } => self.resize(usize::from(*cols), usize::from(*rows)),
            Event::WindowOp(_) | Event::TitleSet(_) | Event::IconSet(_) | Event::Ignored(_) => {
                trace!(?event, "no grid effect");
            }
        }
    }

    /// Execute a C0 control. BEL has no grid effect.
    pub fn execute(&mut self, c0: C0) {
        match c0 {
            C0::Bs => self.backspace(),
            C0::Ht => self.tab(),
            C0::Lf | C0::Vt | C0::Ff => self.linefeed(),
            C0::Cr => self.carriage_return(),
            C0::Bel => {}
        }
    }

    /// Write text at the cursor, wrapping at the right edge
    pub fn print(&mut self, text: &str) {
        for ch in text.chars() {
            self.print_char(ch);
        }
    }

    /// Write a single character at the cursor position
    pub fn print_char(&mut self, ch: char) {
        if self.cursor.pending_wrap {
            self.cursor.carriage_return();
            self.index();
        }
        let cols = self.cols();
        let cell = Cell::with_pen(ch, self.cursor.pen);
        let (row, col) = (self.cursor.row, self.cursor.col);
        self.grid_mut().set(row, col, cell);
        self.cursor.advance(cols);
    }

    /// Handle linefeed (LF, VT, FF)
    pub fn linefeed(&mut self) {
        self.index();
        if self.modes.newline_mode {
            self.cursor.carriage_return();
        }
    }

    /// Handle carriage return (CR)
    pub fn carriage_return(&mut self) {
        self.cursor.carriage_return();
    }

    /// Handle backspace (BS)
    pub fn backspace(&mut self) {
        let cols = self.cols();
        self.cursor.backspace(cols);
    }

    /// Handle horizontal tab (HT): next multiple of 8, never past the last column
    pub fn tab(&mut self) {
        let cols = self.cols();
        let col = self.cursor.effective_col(cols);
        let next = (col / TAB_WIDTH + 1) * TAB_WIDTH;
        self.cursor.set_col(next, cols);
    }

    /// Handle index (IND) - move cursor down, scroll if at bottom margin
    pub fn index(&mut self) {
        let cols = self.cols();
        self.cursor.col = self.cursor.effective_col(cols);
        self.cursor.pending_wrap = false;

        let row = self.cursor.row;
        if row == self.scroll_bottom {
            self.scroll_up(1);
        } else if row + 1 < self.rows() {
            self.cursor.row += 1;
        }
    }

    /// Handle next line (NEL) - move to start of next line
    pub fn next_line(&mut self) {
        self.index();
        self.cursor.carriage_return();
    }

    /// Handle reverse index (RI) - move cursor up, scroll if at top margin
    pub fn reverse_index(&mut self) {
        let cols = self.cols();
        self.cursor.col = self.cursor.effective_col(cols);
        self.cursor.pending_wrap = false;

        let row = self.cursor.row;
        if row == self.scroll_top {
            self.scroll_down(1);
        } else if row > 0 {
            self.cursor.row -= 1;
        }
    }

    /// Scroll the region up by n lines (content moves up, blank lines at bottom)
    pub fn scroll_up(&mut self, n: usize) {
        let n = n.max(1);
        let (top, bottom) = (self.scroll_top, self.scroll_bottom);
        let blank = Cell::blank(self.cursor.pen.bg);
        let discarded = self.grid_mut().scroll_up(top, bottom, n, blank);

        // Only the primary screen feeds scrollback, and only for full-top regions
        if !self.on_alternate && top == 0 {
            for cells in discarded {
                self.scrollback.push(Line::from_cells(cells));
            }
        }
    }

    /// Scroll the region down by n lines (content moves down, blank lines at top)
    pub fn scroll_down(&mut self, n: usize) {
        let n = n.max(1);
        let (top, bottom) = (self.scroll_top, self.scroll_bottom);
        let blank = Cell::blank(self.cursor.pen.bg);
        self.grid_mut().scroll_down(top, bottom, n, blank);
    }

    /// Set scroll region (DECSTBM), 0-indexed and inclusive. Invalid
    /// regions are ignored; a valid one homes the cursor.
    pub fn set_scroll_region(&mut self, top: usize, bottom: usize) {
        let bottom = bottom.min(self.rows() - 1);
        if top >= bottom {
            return;
        }
        self.scroll_top = top;
        self.scroll_bottom = bottom;
        self.move_cursor_to(0, 0);
    }

    /// Erase in display (ED)
    pub fn erase_in_display(&mut self, mode: DisplayErase) {
        let blank = Cell::blank(self.cursor.pen.bg);
        let cols = self.cols();
        let rows = self.rows();
        let row = self.cursor.row;

        match mode {
            DisplayErase::Below => {
                self.erase_in_line(LineErase::ToEnd);
                for r in row + 1..rows {
                    self.grid_mut().fill(r, 0, cols, blank);
                }
            }
            DisplayErase::Above => {
                for r in 0..row {
                    self.grid_mut().fill(r, 0, cols, blank);
                }
                self.erase_in_line(LineErase::ToStart);
            }
            DisplayErase::All => self.grid_mut().fill_all(blank),
            DisplayErase::Scrollback => {
                self.grid_mut().fill_all(blank);
                self.scrollback.clear();
            }
        }
    }

    /// Erase in line (EL)
    pub fn erase_in_line(&mut self, mode: LineErase) {
        let blank = Cell::blank(self.cursor.pen.bg);
        let cols = self.cols();
        let row = self.cursor.row;
        let col = self.cursor.effective_col(cols);

        let (start, end) = match mode {
            LineErase::ToEnd => (col, cols),
            LineErase::ToStart => (0, col + 1),
            LineErase::All => (0, cols),
        };
        self.grid_mut().fill(row, start, end, blank);
    }

    /// Move cursor to absolute position (0-indexed)
    pub fn move_cursor_to(&mut self, row: usize, col: usize) {
        let (cols, rows) = (self.cols(), self.rows());
        self.cursor.move_to(col, row, cols, rows);
    }

    /// Move cursor by a signed offset
    pub fn move_cursor_by(&mut self, rows_delta: i32, cols_delta: i32) {
        let (cols, rows) = (self.cols(), self.rows());
        self.cursor.move_by(rows_delta, cols_delta, cols, rows);
    }

    /// Apply one SGR change to the current pen
    pub fn set_attr(&mut self, change: AttrChange) {
        let pen = &mut self.cursor.pen;
        match change {
            AttrChange::Reset => *pen = Pen::default(),
            AttrChange::Set(attrs) => pen.attrs.insert(attrs),
            AttrChange::Clear(attrs) => pen.attrs.remove(attrs),
            AttrChange::Foreground(color) => pen.fg = color,
            AttrChange::Background(color) => pen.bg = color,
        }
    }

    /// Save cursor state (DECSC)
    pub fn save_cursor(&mut self) {
        let saved = Some(self.cursor.save());
        if self.on_alternate {
            self.alternate_saved = saved;
        } else {
            self.primary_saved = saved;
        }
    }

    /// Restore cursor state (DECRC); a no-op if nothing was saved
    pub fn restore_cursor(&mut self) {
        let saved = if self.on_alternate {
            self.alternate_saved
        } else {
            self.primary_saved
        };
        if let Some(saved) = saved {
            let (cols, rows) = (self.cols(), self.rows());
            self.cursor.restore(&saved, cols, rows);
        }
    }

    /// Set or reset a DEC private mode
    pub fn set_mode(&mut self, mode: DecMode, on: bool) {
        match mode {
            DecMode::CursorKeys => self.modes.application_cursor = on,
            DecMode::CursorVisible => self.cursor.visible = on,
            DecMode::BracketedPaste => self.modes.bracketed_paste = on,
            DecMode::AltScreen if on => self.enter_alternate_screen(),
            DecMode::AltScreen => self.exit_alternate_screen(),
        }
    }

    /// Switch to the alternate screen, saving the cursor and clearing the grid.
    ///
    /// The cursor goes into its own slot, so a DECSC made on the primary
    /// screen is still there after [`exit_alternate_screen`](Self::exit_alternate_screen).
    pub fn enter_alternate_screen(&mut self) {
        if self.on_alternate {
            return;
        }
        self.alt_screen_saved = Some(self.cursor.save());
        // Cleared while hidden so only cells that differ on screen are dirty
        self.alternate.fill_all(Cell::default());
        self.switch_grid(true);
    }

    /// Switch back to the primary screen and restore the cursor it had
    pub fn exit_alternate_screen(&mut self) {
        if !self.on_alternate {
            return;
        }
        self.switch_grid(false);
        if let Some(saved) = self.alt_screen_saved.take() {
            let (cols, rows) = (self.cols(), self.rows());
            self.cursor.restore(&saved, cols, rows);
        }
    }

    fn switch_grid(&mut self, alternate: bool) {
        let pending = self.grid_mut().take_damage();
        self.on_alternate = alternate;
        self.modes.alternate_screen = alternate;

        let (shown, hidden) = if alternate {
            (&mut self.alternate, &self.primary)
        } else {
            (&mut self.primary, &self.alternate)
        };
        // Anything recorded while hidden was never on screen
        shown.take_damage();
        shown.mark_diff(hidden);
        shown.merge_damage(pending);
    }

    /// Resize both grids, keeping the overlapping top-left content
    pub fn resize(&mut self, cols: usize, rows: usize) {
        let cols = cols.max(1);
        let rows = rows.max(1);
        let (old_cols, old_rows) = (self.cols(), self.rows());
        if cols == old_cols && rows == old_rows {
            return;
        }

        self.primary = self.primary.resized(cols, rows);
        self.alternate = self.alternate.resized(cols, rows);

        let full_region = self.scroll_top == 0 && self.scroll_bottom == old_rows - 1;
        self.scroll_top = self.scroll_top.min(rows - 1);
        self.scroll_bottom = self.scroll_bottom.min(rows - 1);
        // A region squeezed to nothing falls back to the whole screen
        if full_region || self.scroll_top >= self.scroll_bottom {
            self.scroll_top = 0;
            self.scroll_bottom = rows - 1;
        }

        self.cursor.clamp(cols, rows);
        trace!(cols, rows, "screen resized");
    }

    /// Reset the terminal to initial state (RIS)
    pub fn reset(&mut self) {
        if self.on_alternate {
            self.switch_grid(false);
        }
        let (cols, rows) = (self.cols(), self.rows());
        self.primary.fill_all(Cell::default());
        self.alternate = Grid::new(cols, rows);
        self.cursor.reset();
        self.primary_saved = None;
        self.alternate_saved = None;
        self.alt_screen_saved = None;
        self.scroll_top = 0;
        self.scroll_bottom = rows - 1;
        self.scrollback.clear();
        self.modes = Modes {
            newline_mode: self.options.newline_mode,
            ..Default::default()
        };
    }
}
