//! Parser State Machine
//!
//! A VT500-style state machine that turns a byte stream into [`Event`]s. The
//! parser keeps all of its state between calls, so input may be split at any
//! byte boundary and each byte is looked at exactly once.
//!
//! States:
//! - Ground: printable text (UTF-8) and C0 controls
//! - Escape: after ESC, waiting for the next byte
//! - EscapeIntermediate: ESC followed by an intermediate (charset designators)
//! - Csi: collecting parameters, intermediates and the final byte
//! - String: OSC, DCS, SOS, PM or APC payload up to BEL or ST
//! - StringEscape: ESC seen inside a string, waiting for the `\` of ST
//!
//! Reference: <https://vt100.net/emu/dec_ansi_parser>

use tracing::{trace, warn};

use super::event::{
    AttrChange, C0, DecMode, DisplayErase, Event, IgnoreReason, LineErase, TitleTarget, WindowOp,
};
use super::params::{Param, Params, MAX_PARAMS};
use super::utf8::{Utf8Decoder, Utf8Result};
use crate::core::{Attrs, Color};

const ESC: u8 = 0x1B;
const CAN: u8 = 0x18;
const SUB: u8 = 0x1A;
const BEL: u8 = 0x07;
const DEL: u8 = 0x7F;

/// Default cap on the length of a single escape sequence
pub const DEFAULT_MAX_SEQUENCE_LEN: usize = 4096;

/// Parser state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ground,
    Escape,
    EscapeIntermediate,
    Csi,
    String(StringKind),
    StringEscape(StringKind),
}

/// Which control string is being collected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StringKind {
    Osc,
    Dcs,
    Sos,
    Pm,
    Apc,
}

/// The terminal parser
#[derive(Debug, Clone)]
pub struct Parser {
    state: State,
    utf8: Utf8Decoder,
    /// Printable text not yet emitted
    text: String,
    /// Raw bytes of the sequence in progress, starting with ESC
    seq: Vec<u8>,
    /// CSI parameter bytes
    params: Vec<u8>,
    param_count: usize,
    /// CSI private marker (`?`, `>`, `=` or `<`)
    private: Option<u8>,
    /// CSI or ESC intermediate bytes
    intermediates: Vec<u8>,
    /// CSI structure was invalid; consume to the final byte and ignore
    malformed: bool,
    /// Sequence exceeded the cap; swallow it silently to its end
    overflowed: bool,
    max_len: usize,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    /// Create a new parser in the ground state
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_SEQUENCE_LEN)
    }

    /// Create a parser whose sequences may be at most `max_len` bytes long
    pub fn with_limit(max_len: usize) -> Self {
        Self {
            state: State::Ground,
            utf8: Utf8Decoder::new(),
            text: String::new(),
            seq: Vec::with_capacity(64),
            params: Vec::with_capacity(16),
            param_count: 0,
            private: None,
            intermediates: Vec::with_capacity(4),
            malformed: false,
            overflowed: false,
            max_len: max_len.max(16),
        }
    }

    /// Reset the parser to initial state, discarding any partial input
    pub fn reset(&mut self) {
        self.state = State::Ground;
        self.utf8.reset();
        self.text.clear();
        self.clear_sequence();
    }

    /// True when no partial sequence or character is buffered
    pub fn is_ground(&self) -> bool {
        self.state == State::Ground && !self.utf8.is_pending()
    }

    /// Process a chunk of bytes, returning events
    pub fn feed(&mut self, data: &[u8]) -> Vec<Event> {
        let mut events = Vec::new();
        self.feed_into(data, &mut events);
        events
    }

    /// Process a chunk of bytes, appending events to `out`. Buffered text is
    /// flushed at the end of the chunk; a partial sequence is retained.
    pub fn feed_into(&mut self, data: &[u8], out: &mut Vec<Event>) {
        for &byte in data {
            self.advance(byte, out);
        }
        self.flush_text(out);
    }

    fn clear_sequence(&mut self) {
        self.seq.clear();
        self.params.clear();
        self.param_count = 0;
        self.private = None;
        self.intermediates.clear();
        self.malformed = false;
        self.overflowed = false;
    }

    fn flush_text(&mut self, out: &mut Vec<Event>) {
        if !self.text.is_empty() {
            out.push(Event::Print(std::mem::take(&mut self.text)));
        }
    }

    /// Process a single byte
    fn advance(&mut self, byte: u8, out: &mut Vec<Event>) {
        match self.state {
            State::Ground => self.ground(byte, out),
            State::Escape => self.escape(byte, out),
            State::EscapeIntermediate => self.escape_intermediate(byte, out),
            State::Csi => self.csi(byte, out),
            State::String(kind) => self.string(kind, byte, out),
            State::StringEscape(kind) => self.string_escape(kind, byte, out),
        }
    }

    fn ground(&mut self, byte: u8, out: &mut Vec<Event>) {
        if byte >= 0x80 || self.utf8.is_pending() {
            self.ground_utf8(byte, out);
            return;
        }
        match byte {
            0x20..=0x7E => self.text.push(char::from(byte)),
            DEL => {}
            ESC => {
                self.flush_text(out);
                self.enter_escape();
            }
            _ => {
                self.flush_text(out);
                self.control(byte, out);
            }
        }
    }

    fn ground_utf8(&mut self, byte: u8, out: &mut Vec<Event>) {
        match self.utf8.feed(byte) {
            Utf8Result::Pending => {}
            Utf8Result::Char(c) => self.push_char(c),
            Utf8Result::Invalid => self.text.push(Utf8Decoder::REPLACEMENT),
            Utf8Result::Interrupted => {
                self.text.push(Utf8Decoder::REPLACEMENT);
                self.ground(byte, out);
            }
        }
    }

    fn push_char(&mut self, c: char) {
        // C1 controls arriving as UTF-8 are not executed
        if !c.is_control() {
            self.text.push(c);
        }
    }

    /// A C0 control outside of a string. CAN, SUB and ESC are handled by
    /// the caller.
    fn control(&mut self, byte: u8, out: &mut Vec<Event>) {
        match C0::from_byte(byte) {
            Some(c0) => out.push(Event::C0(c0)),
            None => out.push(Event::ignored(IgnoreReason::Unsupported, [byte])),
        }
    }

    fn enter_escape(&mut self) {
        self.clear_sequence();
        self.seq.push(ESC);
        self.state = State::Escape;
    }

    /// Abort the sequence in progress. Returns to ground.
    fn cancel(&mut self, out: &mut Vec<Event>) {
        if !self.overflowed {
            out.push(Event::ignored(IgnoreReason::Cancelled, std::mem::take(&mut self.seq)));
        }
        self.clear_sequence();
        self.state = State::Ground;
    }

    /// Finish the sequence in progress with `event` (suppressed after an
    /// overflow, which already reported it) and return to ground
    fn finish(&mut self, event: Option<Event>, out: &mut Vec<Event>) {
        if !self.overflowed {
            out.extend(event);
        }
        self.clear_sequence();
        self.state = State::Ground;
    }

    fn ignore(&mut self, reason: IgnoreReason, out: &mut Vec<Event>) {
        trace!(?reason, bytes = ?String::from_utf8_lossy(&self.seq), "ignoring sequence");
        let event = Event::ignored(reason, self.seq.clone());
        self.finish(Some(event), out);
    }

    /// Record a byte of the current sequence, enforcing the length cap
    fn record(&mut self, byte: u8, out: &mut Vec<Event>) -> bool {
        if self.overflowed {
            return false;
        }
        if self.seq.len() >= self.max_len {
            warn!(len = self.seq.len(), "escape sequence exceeds limit, discarding");
            out.push(Event::ignored(IgnoreReason::Overflow, std::mem::take(&mut self.seq)));
            self.overflowed = true;
            return false;
        }
        self.seq.push(byte);
        true
    }

    /// Handling shared by the escape and CSI states for bytes below 0x20.
    /// Returns true if the byte was consumed.
    fn sequence_control(&mut self, byte: u8, out: &mut Vec<Event>) -> bool {
        match byte {
            CAN | SUB => self.cancel(out),
            ESC => {
                self.cancel(out);
                self.enter_escape();
            }
            0x00..=0x1F => self.control(byte, out),
            DEL => {}
            _ => return false,
        }
        true
    }

    fn escape(&mut self, byte: u8, out: &mut Vec<Event>) {
        if self.sequence_control(byte, out) {
            return;
        }
        self.seq.push(byte);
        match byte {
            b'[' => self.state = State::Csi,
            b']' => self.state = State::String(StringKind::Osc),
            b'P' => self.state = State::String(StringKind::Dcs),
            b'X' => self.state = State::String(StringKind::Sos),
            b'^' => self.state = State::String(StringKind::Pm),
            b'_' => self.state = State::String(StringKind::Apc),
            0x20..=0x2F => {
                self.intermediates.push(byte);
                self.state = State::EscapeIntermediate;
            }
            b'7' => self.finish(Some(Event::SaveCursor), out),
            b'8' => self.finish(Some(Event::RestoreCursor), out),
            b'D' => self.finish(Some(Event::Index), out),
            b'E' => self.finish(Some(Event::NextLine), out),
            b'M' => self.finish(Some(Event::ReverseIndex), out),
            b'c' => {
                self.finish(Some(Event::FullReset), out);
                self.reset();
            }
            // Keypad modes, single shifts, stray ST and the rest
            0x30..=0x7E => self.ignore(IgnoreReason::Unsupported, out),
            _ => self.ignore(IgnoreReason::Malformed, out),
        }
    }

    fn escape_intermediate(&mut self, byte: u8, out: &mut Vec<Event>) {
        if self.sequence_control(byte, out) {
            return;
        }
        // Charset designators and friends take exactly one more byte
        self.seq.push(byte);
        self.ignore(IgnoreReason::Unsupported, out);
    }

    fn csi(&mut self, byte: u8, out: &mut Vec<Event>) {
        if self.sequence_control(byte, out) {
            return;
        }
        if byte >= 0x80 {
            if self.record(byte, out) {
                self.ignore(IgnoreReason::Malformed, out);
            } else {
                self.finish(None, out);
            }
            return;
        }
        self.record(byte, out);

        match byte {
            b'0'..=b'9' | b':' => self.csi_param(byte),
            b';' => {
                self.param_count += 1;
                if self.param_count >= MAX_PARAMS && !self.overflowed {
                    warn!("too many CSI parameters, discarding sequence");
                    out.push(Event::ignored(IgnoreReason::Overflow, std::mem::take(&mut self.seq)));
                    self.overflowed = true;
                }
                self.csi_param(byte);
            }
            b'<'..=b'?' => {
                if self.seq.len() == 3 && self.private.is_none() {
                    self.private = Some(byte);
                } else {
                    self.malformed = true;
                }
            }
            0x20..=0x2F => self.intermediates.push(byte),
            0x40..=0x7E => {
                if self.overflowed {
                    self.finish(None, out);
                } else if self.malformed {
                    self.ignore(IgnoreReason::Malformed, out);
                } else {
                    self.dispatch_csi(byte, out);
                }
            }
            _ => {}
        }
    }

    fn csi_param(&mut self, byte: u8) {
        if !self.intermediates.is_empty() {
            self.malformed = true;
        } else if !self.overflowed {
            self.params.push(byte);
        }
    }

    fn dispatch_csi(&mut self, final_byte: u8, out: &mut Vec<Event>) {
        if !self.intermediates.is_empty() {
            self.ignore(IgnoreReason::Unsupported, out);
            return;
        }
        let params = Params::parse(&self.params);

        let event = match (self.private, final_byte) {
            (None, b'A') => cursor_delta(-i32::from(params.count(0)), 0),
            (None, b'B') => cursor_delta(i32::from(params.count(0)), 0),
            (None, b'C') => cursor_delta(0, i32::from(params.count(0))),
            (None, b'D') => cursor_delta(0, -i32::from(params.count(0))),
            (None, b'E') => Some(Event::CursorLineDelta(i32::from(params.count(0)))),
            (None, b'F') => Some(Event::CursorLineDelta(-i32::from(params.count(0)))),
            (None, b'G') => Some(Event::CursorColumn(params.count(0))),
            (None, b'H') | (None, b'f') => Some(Event::CursorMove {
                row: params.count(0),
                col: params.count(1),
            }),
            (None, b'J') => DisplayErase::from_param(params.get_or(0, 0)).map(Event::EraseInDisplay),
            (None, b'K') => LineErase::from_param(params.get_or(0, 0)).map(Event::EraseInLine),
            (None, b'S') => Some(Event::ScrollUp(params.count(0))),
            (None, b'T') if params.len() <= 1 => Some(Event::ScrollDown(params.count(0))),
            (None, b'r') if params.len() <= 2 => Some(Event::SetScrollRegion {
                top: params.get(0).filter(|&v| v > 0),
                bottom: params.get(1).filter(|&v| v > 0),
            }),
            (None, b's') if params.is_empty() => Some(Event::SaveCursor),
            (None, b'u') if params.is_empty() => Some(Event::RestoreCursor),
            (None, b'm') => {
                self.dispatch_sgr(&params, out);
                return;
            }
            (None, b't') => window_op(&params).map(Event::WindowOp),
            (Some(b'?'), b'h') | (Some(b'?'), b'l') => {
                self.dispatch_dec_modes(&params, final_byte == b'h', out);
                return;
            }
            _ => None,
        };

        match event {
            Some(event) => {
                trace!(?event, "csi");
                self.finish(Some(event), out);
            }
            None => self.ignore(IgnoreReason::Unsupported, out),
        }
    }

    fn dispatch_dec_modes(&mut self, params: &Params, on: bool, out: &mut Vec<Event>) {
        if params.is_empty() {
            self.ignore(IgnoreReason::Unsupported, out);
            return;
        }
        let events: Vec<Event> = params
            .iter()
            .map(|p| match p.value.and_then(DecMode::from_param) {
                Some(mode) => Event::ModeSet { mode, on },
                None => Event::ignored(IgnoreReason::Unsupported, self.seq.clone()),
            })
            .collect();
        out.extend(events);
        self.finish(None, out);
    }

    fn dispatch_sgr(&mut self, params: &Params, out: &mut Vec<Event>) {
        if params.is_empty() {
            self.finish(Some(Event::SetAttr(AttrChange::Reset)), out);
            return;
        }

        let mut skipped = false;
        let groups = params.as_slice();
        let mut i = 0;
        while i < groups.len() {
            let Param { value, subparams } = &groups[i];
            let value = value.unwrap_or(0);
            i += 1;
            let change = match value {
                0 => Some(AttrChange::Reset),
                1 => Some(AttrChange::Set(Attrs::BOLD)),
                2 => Some(AttrChange::Set(Attrs::FAINT)),
                3 => Some(AttrChange::Set(Attrs::ITALIC)),
                // 4:0 is "no underline" in the colon form
                4 if subparams.first() == Some(&Some(0)) => Some(AttrChange::Clear(Attrs::UNDERLINE)),
                4 => Some(AttrChange::Set(Attrs::UNDERLINE)),
                7 => Some(AttrChange::Set(Attrs::INVERSE)),
                22 => Some(AttrChange::Clear(Attrs::BOLD | Attrs::FAINT)),
                23 => Some(AttrChange::Clear(Attrs::ITALIC)),
                24 => Some(AttrChange::Clear(Attrs::UNDERLINE)),
                27 => Some(AttrChange::Clear(Attrs::INVERSE)),
                30..=37 => Color::palette((value - 30) as u8).map(AttrChange::Foreground),
                39 => Some(AttrChange::Foreground(Color::Default)),
                40..=47 => Color::palette((value - 40) as u8).map(AttrChange::Background),
                49 => Some(AttrChange::Background(Color::Default)),
                38 | 48 | 58 => {
                    // Extended colours: skip the whole group so its
                    // arguments are not read as attributes
                    if subparams.is_empty() {
                        i += match groups.get(i).and_then(|p| p.value) {
                            Some(5) => 2,
                            Some(2) => 4,
                            _ => 0,
                        };
                        i = i.min(groups.len());
                    }
                    None
                }
                _ => None,
            };
            match change {
                Some(change) => out.push(Event::SetAttr(change)),
                None => {
                    trace!(value, "unsupported SGR parameter");
                    skipped = true;
                }
            }
        }

        if skipped {
            self.ignore(IgnoreReason::Unsupported, out);
        } else {
            self.finish(None, out);
        }
    }

    fn string(&mut self, kind: StringKind, byte: u8, out: &mut Vec<Event>) {
        match byte {
            BEL => self.terminate_string(kind, out),
            ESC => self.state = State::StringEscape(kind),
            CAN | SUB => self.cancel(out),
            // C0 and DEL inside a control string are dropped
            0x00..=0x1F | DEL => {}
            _ => {
                self.record(byte, out);
            }
        }
    }

    fn string_escape(&mut self, kind: StringKind, byte: u8, out: &mut Vec<Event>) {
        if byte == b'\\' {
            self.terminate_string(kind, out);
        } else {
            // Any other byte aborts the string and starts a new escape
            self.cancel(out);
            self.enter_escape();
            self.escape(byte, out);
        }
    }

    fn terminate_string(&mut self, kind: StringKind, out: &mut Vec<Event>) {
        if self.overflowed {
            self.finish(None, out);
            return;
        }
        match kind {
            StringKind::Osc => self.dispatch_osc(out),
            _ => self.ignore(IgnoreReason::Unsupported, out),
        }
    }

    fn dispatch_osc(&mut self, out: &mut Vec<Event>) {
        let Some((selector, text)) = split_osc(&self.seq[2..]) else {
            self.ignore(IgnoreReason::Malformed, out);
            return;
        };

        match selector {
            0 => {
                out.push(Event::IconSet(text.clone()));
                self.finish(Some(Event::TitleSet(text)), out);
            }
            1 => self.finish(Some(Event::IconSet(text)), out),
            2 => self.finish(Some(Event::TitleSet(text)), out),
            _ => self.ignore(IgnoreReason::Unsupported, out),
        }
    }
}

/// Split an OSC payload (without ESC ]) into its numeric selector and text.
/// Control characters are stripped from the text.
fn split_osc(payload: &[u8]) -> Option<(u16, String)> {
    let split = payload.iter().position(|&b| b == b';')?;
    let selector = &payload[..split];
    if selector.is_empty() || !selector.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let selector = std::str::from_utf8(selector).ok()?.parse::<u16>().ok()?;
    let text = String::from_utf8_lossy(&payload[split + 1..])
        .chars()
        .filter(|c| !c.is_control())
        .collect();
    Some((selector, text))
}

fn cursor_delta(rows: i32, cols: i32) -> Option<Event> {
    Some(Event::CursorDelta { rows, cols })
}

fn window_op(params: &Params) -> Option<WindowOp> {
    let target = || match params.get_or(1, 0) {
        0 => Some(TitleTarget::Both),
        1 => Some(TitleTarget::Icon),
        2 => Some(TitleTarget::Title),
        _ => None,
    };
    match params.get(0)? {
        22 => target().map(WindowOp::PushTitle),
        23 => target().map(WindowOp::PopTitle),
        8 => Some(WindowOp::ResizeChars {
            rows: params.get_or(1, 0),
            cols: params.get_or(2, 0),
        }),
        4 => Some(WindowOp::ResizePixels {
            height: params.get_or(1, 0),
            width: params.get_or(2, 0),
        }),
        _ => None,
    }
}
