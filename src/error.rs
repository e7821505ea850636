//! Crate-level errors

use crate::config::ConfigError;
use crate::pty::PtyError;

/// Errors surfaced by a [`Session`](crate::session::Session)
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The terminal could not be set up; fatal
    #[error("failed to start terminal: {0}")]
    Spawn(#[source] PtyError),

    /// The pseudoterminal failed after startup
    #[error("terminal I/O failed: {0}")]
    Io(#[source] PtyError),

    #[error("terminal has not been started")]
    NotRunning,

    #[error("terminal was already started")]
    AlreadyStarted,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<PtyError> for Error {
    fn from(err: PtyError) -> Self {
        if err.is_spawn() {
            Error::Spawn(err)
        } else {
            Error::Io(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
