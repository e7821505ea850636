//! Pseudoterminal hosting
//!
//! A [`PipeHost`] owns the master side of a pseudoterminal pair and the child
//! process bound to its slave side. There is one implementation per platform:
//! [`UnixPty`] on POSIX systems and [`ConPty`] on Windows. [`NativePty`] names
//! whichever one the current target provides.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub use unix::UnixPty;
#[cfg(windows)]
pub use windows::ConPty;

/// The pseudoterminal backend for the current platform
#[cfg(unix)]
pub type NativePty = UnixPty;
/// The pseudoterminal backend for the current platform
#[cfg(windows)]
pub type NativePty = ConPty;

/// Error type for PTY operations
#[derive(Debug, thiserror::Error)]
pub enum PtyError {
    #[error("failed to open pseudoterminal: {0}")]
    Open(#[source] io::Error),

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("failed to resize pseudoterminal: {0}")]
    Resize(#[source] io::Error),

    #[error("pseudoterminal is closed")]
    Closed,

    #[error("failed to wait for child: {0}")]
    Wait(#[source] io::Error),

    #[error("pseudoterminal I/O error: {0}")]
    Io(#[from] io::Error),
}

impl PtyError {
    /// Whether this error happened while setting up the terminal, as opposed
    /// to an I/O failure on a running one.
    pub fn is_spawn(&self) -> bool {
        matches!(
            self,
            PtyError::Open(_) | PtyError::Spawn { .. } | PtyError::InvalidCommand(_)
        )
    }
}

/// Result type for PTY operations
pub type PtyResult<T> = Result<T, PtyError>;

/// Window size for PTY
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowSize {
    pub rows: u16,
    pub cols: u16,
    pub pixel_width: u16,
    pub pixel_height: u16,
}

impl WindowSize {
    /// Create a new window size with just rows and columns
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }

    /// Create a new window size with pixel dimensions
    pub fn with_pixels(cols: u16, rows: u16, pixel_width: u16, pixel_height: u16) -> Self {
        Self {
            rows,
            cols,
            pixel_width,
            pixel_height,
        }
    }

    /// The same size with both cell dimensions raised to at least 1
    pub fn clamped(self) -> Self {
        Self {
            rows: self.rows.max(1),
            cols: self.cols.max(1),
            ..self
        }
    }

    /// The same size kept within `1..=max` in both dimensions
    pub fn limited(self, max: WindowSize) -> Self {
        Self {
            rows: self.rows.clamp(1, max.rows.max(1)),
            cols: self.cols.clamp(1, max.cols.max(1)),
            ..self
        }
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        Self::new(80, 24)
    }
}

/// OS process identifier of a spawned child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessId(pub u32);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitStatus {
    /// Normal exit with a status code
    Code(i32),
    /// Killed by a signal (Unix only)
    Signal(i32),
}

impl ExitStatus {
    pub fn success(self) -> bool {
        self == ExitStatus::Code(0)
    }

    /// Exit code, if the child exited normally
    pub fn code(self) -> Option<i32> {
        match self {
            ExitStatus::Code(code) => Some(code),
            ExitStatus::Signal(_) => None,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Code(code) => write!(f, "exit code {}", code),
            ExitStatus::Signal(signal) => write!(f, "signal {}", signal),
        }
    }
}

/// A program to run inside the pseudoterminal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub program: String,
    pub args: Vec<String>,
    /// Variables layered over the inherited environment
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl Command {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    /// The user's login shell, falling back to the platform default
    pub fn default_shell() -> Self {
        Self::new(default_shell_program())
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Reject commands no backend could launch
    pub fn validate(&self) -> PtyResult<()> {
        if self.program.is_empty() {
            return Err(PtyError::InvalidCommand("empty program name".into()));
        }
        let has_nul = std::iter::once(&self.program)
            .chain(&self.args)
            .chain(self.env.keys())
            .chain(self.env.values())
            .any(|s| s.contains('\0'));
        if has_nul {
            return Err(PtyError::InvalidCommand(format!(
                "`{}`: arguments and environment must not contain NUL bytes",
                self.program
            )));
        }
        if self.env.keys().any(|k| k.is_empty() || k.contains('=')) {
            return Err(PtyError::InvalidCommand(format!(
                "`{}`: malformed environment variable name",
                self.program
            )));
        }
        Ok(())
    }
}

#[cfg(unix)]
fn default_shell_program() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "/bin/sh".to_string())
}

#[cfg(windows)]
fn default_shell_program() -> String {
    std::env::var("COMSPEC")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "cmd.exe".to_string())
}

/// Uniform interface over the OS pseudoterminal primitives.
///
/// Every method takes `&self` so that one host can be shared between the
/// reader thread (the only caller of [`read`](PipeHost::read)) and the GUI
/// thread. Implementations serialise concurrent writes internally.
pub trait PipeHost: Send + Sync + 'static {
    /// Allocate a pseudoterminal pair with the given initial size
    fn open(size: WindowSize) -> PtyResult<Self>
    where
        Self: Sized;

    /// Launch `command` with the slave side as its controlling terminal.
    ///
    /// Fails with a spawn error if the program cannot be executed.
    fn spawn(&self, command: &Command) -> PtyResult<ProcessId>;

    /// Read available output, blocking until some arrives.
    ///
    /// Returns 0 at end of file: the child closed its side or the host was
    /// closed.
    fn read(&self, buf: &mut [u8]) -> PtyResult<usize>;

    /// Write all of `data` to the child's input
    fn write(&self, data: &[u8]) -> PtyResult<()>;

    /// Tell the child the window changed size
    fn resize(&self, size: WindowSize) -> PtyResult<()>;

    /// Release every handle and unblock a pending [`read`](PipeHost::read).
    /// Calling it again does nothing.
    fn close(&self);

    /// `None` while the child runs, its exit status once it has ended
    fn poll_exit(&self) -> PtyResult<Option<ExitStatus>>;

    /// The spawned child, if any
    fn pid(&self) -> Option<ProcessId>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_size() {
        let size = WindowSize::new(80, 24);
        assert_eq!(size.cols, 80);
        assert_eq!(size.rows, 24);
        assert_eq!(WindowSize::default(), size);
        assert_eq!(WindowSize::new(0, 0).clamped(), WindowSize::new(1, 1));
    }

    #[test]
    fn test_exit_status() {
        assert!(ExitStatus::Code(0).success());
        assert!(!ExitStatus::Code(1).success());
        assert!(!ExitStatus::Signal(9).success());
        assert_eq!(ExitStatus::Code(3).code(), Some(3));
        assert_eq!(ExitStatus::Signal(1).code(), None);
        assert_eq!(ExitStatus::Code(259).to_string(), "exit code 259");
    }

    #[test]
    fn test_command_builder() {
        let cmd = Command::new("sh")
            .arg("-c")
            .args(["echo", "hi"])
            .env("FOO", "bar")
            .cwd("/tmp");
        assert_eq!(cmd.args, vec!["-c", "echo", "hi"]);
        assert_eq!(cmd.env.get("FOO").map(String::as_str), Some("bar"));
        assert_eq!(cmd.cwd, Some(PathBuf::from("/tmp")));
        assert!(cmd.validate().is_ok());
    }

    #[test]
    fn test_command_validation() {
        assert!(Command::new("").validate().is_err());
        assert!(Command::new("sh").arg("a\0b").validate().is_err());
        assert!(Command::new("sh").env("A=B", "c").validate().is_err());

        let err = Command::new("").validate().unwrap_err();
        assert!(err.is_spawn());
        assert!(!PtyError::Closed.is_spawn());
    }

    #[test]
    fn test_default_shell_is_not_empty() {
        assert!(!Command::default_shell().program.is_empty());
    }
}
