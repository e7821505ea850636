//! Configuration for a terminal session

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::ScreenOptions;
use crate::parser::DEFAULT_MAX_SEQUENCE_LEN;
use crate::pty::{Command, WindowSize};

/// Smallest reader buffer the session will use
pub const MIN_READ_CHUNK: usize = 1024;

/// Default bound on the screen width, including sizes the child asks for
pub const DEFAULT_MAX_COLS: u16 = 1000;

/// Default bound on the screen height
pub const DEFAULT_MAX_ROWS: u16 = 1000;

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Program to run; the user's shell when unset
    pub program: Option<String>,
    pub args: Vec<String>,
    /// Extra environment, layered over the inherited one
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
    /// Exported to the child as `TERM`
    pub term: String,
    pub cols: u16,
    pub rows: u16,
    /// Largest size any resize may reach
    pub max_cols: u16,
    pub max_rows: u16,
    /// Scrollback capacity in lines; 0 disables it
    pub scrollback: usize,
    /// Whether LF also returns the carriage
    pub newline_mode: bool,
    /// Reader buffer size in bytes
    pub read_chunk_size: usize,
    /// Depth of the reader to GUI queue
    pub queue_capacity: usize,
    /// Longest escape sequence the decoder buffers before giving up on it
    pub max_sequence_len: usize,
    /// Whether `CSI 8;H;W t` may resize the terminal
    pub honor_resize_requests: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            program: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            term: "xterm-256color".to_string(),
            cols: 80,
            rows: 24,
            max_cols: DEFAULT_MAX_COLS,
            max_rows: DEFAULT_MAX_ROWS,
            scrollback: 1000,
            newline_mode: true,
            read_chunk_size: 4096,
            queue_capacity: 256,
            max_sequence_len: DEFAULT_MAX_SEQUENCE_LEN,
            honor_resize_requests: true,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Load `path` if one is given, otherwise the defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, content).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })
    }

    /// A copy with every numeric field moved into its usable range
    pub fn validated(&self) -> Self {
        let max = self.max_size();
        Self {
            cols: self.cols.clamp(1, max.cols),
            rows: self.rows.clamp(1, max.rows),
            max_cols: max.cols,
            max_rows: max.rows,
            read_chunk_size: self.read_chunk_size.max(MIN_READ_CHUNK),
            queue_capacity: self.queue_capacity.max(1),
            ..self.clone()
        }
    }

    pub fn window_size(&self) -> WindowSize {
        self.clamp_size(self.cols, self.rows)
    }

    pub fn max_size(&self) -> WindowSize {
        WindowSize::new(self.max_cols, self.max_rows).clamped()
    }

    /// Bring a requested size within `1..=max` in both dimensions
    pub fn clamp_size(&self, cols: u16, rows: u16) -> WindowSize {
        WindowSize::new(cols, rows).limited(self.max_size())
    }

    pub fn screen_options(&self) -> ScreenOptions {
        ScreenOptions {
            scrollback: self.scrollback,
            newline_mode: self.newline_mode,
        }
    }

    /// The child command, with `TERM` set unless `env` overrides it
    pub fn command(&self) -> Command {
        let mut command = match &self.program {
            Some(program) => Command::new(program.clone()),
            None => Command::default_shell(),
        };
        command.args = self.args.clone();
        command.env.insert("TERM".to_string(), self.term.clone());
        command.env.extend(self.env.clone());
        command.cwd = self.cwd.clone();
        command
    }
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
