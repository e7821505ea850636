//! Terminal escape sequence parser
//!
//! A stateful parser that converts bytes into terminal events.
//! Based on the VT500-series parser model from <https://vt100.net/emu/dec_ansi_parser>

mod event;
mod params;
mod state;
mod utf8;

pub use event::{
    AttrChange, DecMode, DisplayErase, Event, IgnoreReason, LineErase, TitleTarget, Unhandled,
    WindowOp, C0,
};
pub use params::{Param, Params, MAX_PARAMS};
pub use state::{Parser, DEFAULT_MAX_SEQUENCE_LEN};
pub use utf8::{Utf8Decoder, Utf8Result};
