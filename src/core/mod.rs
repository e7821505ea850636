//! Terminal Core Module
//!
//! Platform-independent terminal state management. This module contains:
//! - Cell representation with attributes
//! - Cursor state and positioning
//! - The grid and its damage tracking
//! - Screen model (primary and alternate grids)
//! - Scrollback buffer
//! - Snapshots for the renderer
//!
//! The core is deterministic: given the same sequence of events, it always
//! produces the same state.

mod cell;
mod cursor;
mod damage;
mod grid;
mod screen;
mod scrollback;
mod snapshot;

pub use cell::{Attrs, Cell, Color, Pen};
pub use cursor::{Cursor, SavedCursor};
pub use damage::{Damage, DirtyRect};
pub use grid::Grid;
pub use screen::{Modes, Screen, ScreenOptions};
pub use scrollback::{Line, Scrollback};
pub use snapshot::{CursorSnapshot, Snapshot};
