//! Terminal events produced by the decoder
//!
//! The decoder turns bytes into these; the screen model consumes them. Every
//! byte of input ends up either inside one of these events or inside an
//! [`Event::Ignored`], never silently re-interpreted as text.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::{Attrs, Color};

/// A decoded terminal event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// Printable text; never contains control characters
    Print(String),
    /// One of the executed C0 controls
    C0(C0),
    /// Absolute cursor position, 1-based (CUP/HVP)
    CursorMove { row: u16, col: u16 },
    /// Signed relative motion (CUU/CUD/CUF/CUB)
    CursorDelta { rows: i32, cols: i32 },
    /// Move by whole lines and return to column 0 (CNL/CPL)
    CursorLineDelta(i32),
    /// Absolute column, 1-based (CHA)
    CursorColumn(u16),
    EraseInLine(LineErase),
    EraseInDisplay(DisplayErase),
    ScrollUp(u16),
    ScrollDown(u16),
    /// DECSTBM, 1-based; `None` means the screen edge
    SetScrollRegion { top: Option<u16>, bottom: Option<u16> },
    SetAttr(AttrChange),
    SaveCursor,
    RestoreCursor,
    /// IND: down one row, scrolling at the bottom margin
    Index,
    /// NEL: IND plus carriage return
    NextLine,
    /// RI: up one row, scrolling at the top margin
    ReverseIndex,
    /// RIS
    FullReset,
    ModeSet { mode: DecMode, on: bool },
    WindowOp(WindowOp),
    TitleSet(String),
    IconSet(String),
    /// Grid resize; only ever produced by the host, never by the byte stream
    Resize { cols: u16, rows: u16 },
    /// A sequence that was consumed but has no effect
    Ignored(Unhandled),
}

/// Executed C0 control characters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum C0 {
    Bs,
    Ht,
    Lf,
    Cr,
    Bel,
    Ff,
    Vt,
}

impl C0 {
    /// Map a control byte to its event, if it is one the screen executes
    pub fn from_byte(byte: u8) -> Option<C0> {
        match byte {
            0x07 => Some(C0::Bel),
            0x08 => Some(C0::Bs),
            0x09 => Some(C0::Ht),
            0x0A => Some(C0::Lf),
            0x0B => Some(C0::Vt),
            0x0C => Some(C0::Ff),
            0x0D => Some(C0::Cr),
            _ => None,
        }
    }
}

/// EL parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LineErase {
    /// Cursor to end of line (0)
    ToEnd,
    /// Start of line through cursor (1)
    ToStart,
    /// Whole line (2)
    All,
}

impl LineErase {
    pub fn from_param(param: u16) -> Option<LineErase> {
        match param {
            0 => Some(LineErase::ToEnd),
            1 => Some(LineErase::ToStart),
            2 => Some(LineErase::All),
            _ => None,
        }
    }
}

/// ED parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisplayErase {
    /// Cursor to end of screen (0)
    Below,
    /// Start of screen through cursor (1)
    Above,
    /// Whole screen (2)
    All,
    /// Whole screen and scrollback (3)
    Scrollback,
}

impl DisplayErase {
    pub fn from_param(param: u16) -> Option<DisplayErase> {
        match param {
            0 => Some(DisplayErase::Below),
            1 => Some(DisplayErase::Above),
            2 => Some(DisplayErase::All),
            3 => Some(DisplayErase::Scrollback),
            _ => None,
        }
    }
}

/// One SGR parameter's effect on the current pen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrChange {
    Reset,
    Set(Attrs),
    Clear(Attrs),
    Foreground(Color),
    Background(Color),
}

/// DEC private modes the screen understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecMode {
    /// DECCKM (1), advisory for the key encoder
    CursorKeys,
    /// DECTCEM (25)
    CursorVisible,
    /// Alternate screen with saved cursor (1049)
    AltScreen,
    /// Bracketed paste (2004), advisory for the paste handler
    BracketedPaste,
}

impl DecMode {
    pub fn from_param(param: u16) -> Option<DecMode> {
        match param {
            1 => Some(DecMode::CursorKeys),
            25 => Some(DecMode::CursorVisible),
            1049 => Some(DecMode::AltScreen),
            2004 => Some(DecMode::BracketedPaste),
            _ => None,
        }
    }

    pub fn code(self) -> u16 {
        match self {
            DecMode::CursorKeys => 1,
            DecMode::CursorVisible => 25,
            DecMode::AltScreen => 1049,
            DecMode::BracketedPaste => 2004,
        }
    }
}

/// Which strings a title-stack operation applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TitleTarget {
    Both,
    Icon,
    Title,
}

/// Window manipulation requests (CSI t)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WindowOp {
    PushTitle(TitleTarget),
    PopTitle(TitleTarget),
    /// Resize to a size in cells; 0 keeps the current dimension
    ResizeChars { rows: u16, cols: u16 },
    /// Resize to a size in pixels; advisory only
    ResizePixels { height: u16, width: u16 },
}

/// Why a sequence was consumed without effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IgnoreReason {
    /// Well-formed but not something this terminal implements
    Unsupported,
    /// Aborted by CAN, SUB or a new ESC
    Cancelled,
    /// Longer than the decoder's sanity cap
    Overflow,
    /// Byte that cannot start or continue any known sequence
    Malformed,
}

/// Diagnostic payload of an ignored sequence
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unhandled {
    pub reason: IgnoreReason,
    pub bytes: Vec<u8>,
}

impl Unhandled {
    pub fn new(reason: IgnoreReason, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            reason,
            bytes: bytes.into(),
        }
    }
}

impl fmt::Debug for Unhandled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unhandled")
            .field("reason", &self.reason)
            .field("bytes", &String::from_utf8_lossy(&self.bytes).escape_debug().to_string())
            .finish()
    }
}

impl Event {
    /// Shorthand for an ignored sequence
    pub fn ignored(reason: IgnoreReason, bytes: impl Into<Vec<u8>>) -> Event {
        Event::Ignored(Unhandled::new(reason, bytes))
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, Event::Ignored(_))
    }
}
