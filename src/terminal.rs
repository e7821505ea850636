//! Terminal event applier
//!
//! Ties the decoder's events to the screen model and turns the ones with no
//! grid effect (bell, titles, resize requests) into notifications for the
//! embedding GUI.

use std::sync::mpsc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::config::{Config, DEFAULT_MAX_COLS, DEFAULT_MAX_ROWS};
use crate::core::{DirtyRect, Screen, ScreenOptions, Snapshot};
use crate::parser::{Event, IgnoreReason, Parser, TitleTarget, WindowOp, C0};
use crate::pty::{ExitStatus, WindowSize};

/// Saved title/icon pairs kept by `CSI 22 t`
pub const TITLE_STACK_DEPTH: usize = 16;

/// Notifications sent from the terminal to the GUI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalEvent {
    /// Cells inside the rectangle changed since the last notification
    Damaged(DirtyRect),
    Bell,
    TitleChanged(String),
    IconChanged(String),
    /// The child asked for a new size in cells
    ResizeRequested { cols: u16, rows: u16 },
    Resized { cols: u16, rows: u16 },
    ChildExited(ExitStatus),
    IoError(String),
}

/// One-way notification channel into the GUI
pub trait EventSink: Send {
    fn notify(&self, event: TerminalEvent);
}

impl EventSink for mpsc::Sender<TerminalEvent> {
    fn notify(&self, event: TerminalEvent) {
        if self.send(event).is_err() {
            trace!("event receiver dropped");
        }
    }
}

impl EventSink for mpsc::SyncSender<TerminalEvent> {
    /// Never blocks: the caller is usually the thread that drains the queue.
    fn notify(&self, event: TerminalEvent) {
        match self.try_send(event) {
            Ok(()) => {}
            Err(mpsc::TrySendError::Full(event)) => warn!(?event, "event queue full, dropping"),
            Err(mpsc::TrySendError::Disconnected(_)) => trace!("event receiver dropped"),
        }
    }
}

/// Discards every notification
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn notify(&self, _event: TerminalEvent) {}
}

#[derive(Debug, Clone, Default)]
struct SavedTitle {
    title: Option<String>,
    icon: Option<String>,
}

/// Screen plus the terminal state that lives outside the grid
#[derive(Debug, Clone)]
pub struct Terminal {
    screen: Screen,
    /// Decoder for [`Terminal::process`]; a session decodes on its reader
    /// thread instead
    parser: Parser,
    title: String,
    icon: String,
    title_stack: Vec<SavedTitle>,
    honor_resize_requests: bool,
    /// Bound on every resize and resize request
    max_size: WindowSize,
}

impl Terminal {
    /// Create a new terminal with the given dimensions
    pub fn new(cols: usize, rows: usize) -> Self {
        Self::with_options(cols, rows, ScreenOptions::default())
    }

    pub fn with_options(cols: usize, rows: usize, options: ScreenOptions) -> Self {
        Self {
            screen: Screen::with_options(cols, rows, options),
            parser: Parser::new(),
            title: String::new(),
            icon: String::new(),
            title_stack: Vec::new(),
            honor_resize_requests: true,
            max_size: WindowSize::new(DEFAULT_MAX_COLS, DEFAULT_MAX_ROWS),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let config = config.validated();
        let mut terminal = Self::with_options(
            usize::from(config.cols),
            usize::from(config.rows),
            config.screen_options(),
        );
        terminal.parser = Parser::with_limit(config.max_sequence_len);
        terminal.honor_resize_requests = config.honor_resize_requests;
        terminal.max_size = config.max_size();
        terminal
    }

    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    pub fn screen_mut(&mut self) -> &mut Screen {
        &mut self.screen
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn icon(&self) -> &str {
        &self.icon
    }

    /// Decode and apply bytes in one go, returning the notifications
    pub fn process(&mut self, data: &[u8]) -> Vec<TerminalEvent> {
        let events = self.parser.feed(data);
        let mut notices = Vec::new();
        for event in &events {
            self.apply(event, &mut notices);
        }
        notices
    }

    /// Apply one event, appending any notification it produces
    pub fn apply(&mut self, event: &Event, notices: &mut Vec<TerminalEvent>) {
        match event {
            Event::C0(C0::Bel) => notices.push(TerminalEvent::Bell),
            Event::TitleSet(title) => {
                self.title.clone_from(title);
                notices.push(TerminalEvent::TitleChanged(title.clone()));
            }
            Event::IconSet(icon) => {
                self.icon.clone_from(icon);
                notices.push(TerminalEvent::IconChanged(icon.clone()));
            }
            Event::WindowOp(op) => self.window_op(*op, notices),
            Event::Resize { cols, rows } => {
                notices.push(self.resize(usize::from(*cols), usize::from(*rows)));
            }
            Event::FullReset => {
                self.screen.reset();
                self.title_stack.clear();
            }
            Event::Ignored(unhandled) => match unhandled.reason {
                IgnoreReason::Overflow => warn!(len = unhandled.bytes.len(), "discarded oversized sequence"),
                _ => debug!(?unhandled, "ignored sequence"),
            },
            _ => self.screen.apply(event),
        }
    }

    fn window_op(&mut self, op: WindowOp, notices: &mut Vec<TerminalEvent>) {
        match op {
            WindowOp::PushTitle(target) => {
                let (title, icon) = selects(target);
                self.title_stack.push(SavedTitle {
                    title: title.then(|| self.title.clone()),
                    icon: icon.then(|| self.icon.clone()),
                });
                if self.title_stack.len() > TITLE_STACK_DEPTH {
                    self.title_stack.remove(0);
                }
            }
            WindowOp::PopTitle(target) => {
                let Some(saved) = self.title_stack.pop() else {
                    return;
                };
                let (title, icon) = selects(target);
                if let (true, Some(saved_icon)) = (icon, saved.icon) {
                    self.icon.clone_from(&saved_icon);
                    notices.push(TerminalEvent::IconChanged(saved_icon));
                }
                if let (true, Some(saved_title)) = (title, saved.title) {
                    self.title.clone_from(&saved_title);
                    notices.push(TerminalEvent::TitleChanged(saved_title));
                }
            }
            WindowOp::ResizeChars { rows, cols } => {
                if !self.honor_resize_requests {
                    debug!(rows, cols, "resize request refused");
                    return;
                }
                let keep = |requested: u16, current: usize| match requested {
                    0 => u16::try_from(current).unwrap_or(u16::MAX),
                    n => n,
                };
                let size = WindowSize::new(
                    keep(cols, self.screen.cols()),
                    keep(rows, self.screen.rows()),
                )
                .limited(self.max_size);
                if size.cols != cols || size.rows != rows {
                    debug!(rows, cols, ?size, "resize request adjusted");
                }
                notices.push(TerminalEvent::ResizeRequested {
                    cols: size.cols,
                    rows: size.rows,
                });
            }
            WindowOp::ResizePixels { height, width } => {
                debug!(height, width, "pixel resize request has no cell size to map to");
            }
        }
    }

    /// Resize the screen; sizes are kept between 1 and the configured maximum
    pub fn resize(&mut self, cols: usize, rows: usize) -> TerminalEvent {
        let cols = cols.min(usize::from(self.max_size.cols));
        let rows = rows.min(usize::from(self.max_size.rows));
        self.screen.resize(cols, rows);
        self.resized()
    }

    fn resized(&self) -> TerminalEvent {
        TerminalEvent::Resized {
            cols: u16::try_from(self.screen.cols()).unwrap_or(u16::MAX),
            rows: u16::try_from(self.screen.rows()).unwrap_or(u16::MAX),
        }
    }

    /// Copy the visible state, including the title, and clear the damage
    pub fn snapshot(&mut self) -> Snapshot {
        let mut snapshot = self.screen.snapshot();
        snapshot.title.clone_from(&self.title);
        snapshot
    }

    pub fn take_damage(&mut self) -> Option<DirtyRect> {
        self.screen.take_damage()
    }
}

/// Which of (title, icon) a title-stack target covers
fn selects(target: TitleTarget) -> (bool, bool) {
    match target {
        TitleTarget::Both => (true, true),
        TitleTarget::Icon => (false, true),
        TitleTarget::Title => (true, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_print() {
        let mut term = Terminal::new(80, 24);
        assert!(term.process(b"Hello").is_empty());
        assert_eq!(term.screen().row_text(0), "Hello");
    }

    #[test]
    fn test_bell_is_reported() {
        let mut term = Terminal::new(10, 2);
        assert_eq!(term.process(b"a\x07b"), vec![TerminalEvent::Bell]);
        assert_eq!(term.screen().row_text(0), "ab");
    }

    #[test]
    fn test_terminal_title() {
        let mut term = Terminal::new(80, 24);
        let notices = term.process(b"\x1b]0;My Title\x07");
        assert_eq!(
            notices,
            vec![
                TerminalEvent::IconChanged("My Title".into()),
                TerminalEvent::TitleChanged("My Title".into()),
            ]
        );
        assert_eq!(term.title(), "My Title");
        assert_eq!(term.icon(), "My Title");

        term.process(b"\x1b]2;Only Title\x1b\\");
        assert_eq!(term.title(), "Only Title");
        assert_eq!(term.icon(), "My Title");
        assert_eq!(term.snapshot().title, "Only Title");
    }

    #[test]
    fn test_title_stack() {
        let mut term = Terminal::new(80, 24);
        term.process(b"\x1b]2;first\x07\x1b[22;0t\x1b]2;second\x07");
        assert_eq!(term.title(), "second");

        let notices = term.process(b"\x1b[23;0t");
        assert!(notices.contains(&TerminalEvent::TitleChanged("first".into())));
        assert_eq!(term.title(), "first");

        // Popping an empty stack changes nothing
        assert!(term.process(b"\x1b[23;0t").is_empty());
        assert_eq!(term.title(), "first");
    }

    #[test]
    fn test_title_stack_is_bounded() {
        let mut term = Terminal::new(80, 24);
        for i in 0..TITLE_STACK_DEPTH + 4 {
            term.process(format!("\x1b]2;t{}\x07\x1b[22;2t", i).as_bytes());
        }
        let mut popped = 0;
        while !term.process(b"\x1b[23;2t").is_empty() {
            popped += 1;
        }
        assert_eq!(popped, TITLE_STACK_DEPTH);
        // Oldest entries were dropped
        assert_eq!(term.title(), "t4");
    }

    #[test]
    fn test_resize_request() {
        let mut term = Terminal::new(80, 24);
        assert_eq!(
            term.process(b"\x1b[8;30;100t"),
            vec![TerminalEvent::ResizeRequested { cols: 100, rows: 30 }]
        );
        // A zero keeps the current dimension
        assert_eq!(
            term.process(b"\x1b[8;0;90t"),
            vec![TerminalEvent::ResizeRequested { cols: 90, rows: 24 }]
        );
        // Requests are not applied by the terminal itself
        assert_eq!(term.screen().cols(), 80);
        // Pixel sizes are advisory
        assert!(term.process(b"\x1b[4;600;800t").is_empty());
    }

    #[test]
    fn test_resize_request_is_capped() {
        let config = Config {
            max_cols: 300,
            max_rows: 100,
            ..Config::default()
        };
        let mut term = Terminal::from_config(&config);
        assert_eq!(
            term.process(b"\x1b[8;65535;65535t"),
            vec![TerminalEvent::ResizeRequested { cols: 300, rows: 100 }]
        );

        let mut notices = Vec::new();
        term.apply(&Event::Resize { cols: u16::MAX, rows: 50 }, &mut notices);
        assert_eq!(notices, vec![TerminalEvent::Resized { cols: 300, rows: 50 }]);
        assert_eq!(term.resize(100_000, 100_000), TerminalEvent::Resized { cols: 300, rows: 100 });
        assert_eq!((term.screen().cols(), term.screen().rows()), (300, 100));
    }

    #[test]
    fn test_default_size_cap() {
        let mut term = Terminal::new(80, 24);
        assert_eq!(
            term.process(b"\x1b[8;4000;4000t"),
            vec![TerminalEvent::ResizeRequested {
                cols: DEFAULT_MAX_COLS,
                rows: DEFAULT_MAX_ROWS
            }]
        );
    }

    #[test]
    fn test_resize_requests_can_be_refused() {
        let config = Config {
            honor_resize_requests: false,
            ..Config::default()
        };
        let mut term = Terminal::from_config(&config);
        assert!(term.process(b"\x1b[8;30;100t").is_empty());
    }

    #[test]
    fn test_resize_event() {
        let mut term = Terminal::new(80, 24);
        term.process(b"abc");
        let mut notices = Vec::new();
        term.apply(&Event::Resize { cols: 40, rows: 10 }, &mut notices);
        assert_eq!(notices, vec![TerminalEvent::Resized { cols: 40, rows: 10 }]);
        assert_eq!(term.screen().row_text(0), "abc");

        assert_eq!(term.resize(0, 0), TerminalEvent::Resized { cols: 1, rows: 1 });
    }

    #[test]
    fn test_from_config() {
        let config = Config {
            cols: 100,
            rows: 30,
            scrollback: 0,
            ..Config::default()
        };
        let term = Terminal::from_config(&config);
        assert_eq!((term.screen().cols(), term.screen().rows()), (100, 30));
        assert_eq!(term.screen().scrollback().capacity(), 0);
    }

    #[test]
    fn test_ignored_sequences_leave_grid_alone() {
        let mut term = Terminal::new(20, 2);
        assert!(term.process(b"\x1bP1$r\x1b\\\x1b[?999hX").is_empty());
        assert_eq!(term.screen().row_text(0), "X");
    }

    #[test]
    fn test_sink_implementations() {
        let (tx, rx) = mpsc::channel();
        tx.notify(TerminalEvent::Bell);
        assert_eq!(rx.recv().unwrap(), TerminalEvent::Bell);

        let (tx, rx) = mpsc::sync_channel(1);
        tx.notify(TerminalEvent::Bell);
        // Full queue drops instead of blocking
        tx.notify(TerminalEvent::Bell);
        assert_eq!(rx.try_iter().count(), 1);

        NullSink.notify(TerminalEvent::Bell);
    }
}
