//! cellterm: an embeddable terminal emulator core
//!
//! The crate hosts a child process on a pseudoterminal, decodes its output
//! into terminal events and projects them onto a grid of styled cells that a
//! GUI can render:
//!
//! - `pty`: pseudoterminal hosting behind the [`PipeHost`] trait
//! - `parser`: VT/xterm escape sequence decoder
//! - `core`: screen model, cells, cursor, scrollback, damage tracking
//! - `terminal`: applies events to the screen and produces GUI notifications
//! - `session`: the reader thread and GUI-side drive loop

pub mod config;
pub mod core;
pub mod error;
pub mod parser;
pub mod pty;
pub mod session;
pub mod terminal;

pub use config::{Config, ConfigError};
pub use crate::core::{Screen, Snapshot};
pub use error::{Error, Result};
pub use parser::{Event, Parser};
pub use pty::{Command, ExitStatus, NativePty, PipeHost, PtyError, WindowSize};
pub use session::Session;
pub use terminal::{EventSink, NullSink, Terminal, TerminalEvent};
