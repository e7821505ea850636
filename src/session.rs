//! Drive loop
//!
//! A [`Session`] wires a [`PipeHost`] to a [`Terminal`]. A dedicated reader
//! thread pulls bytes from the host and decodes them; decoded events travel
//! over a bounded queue to the thread that owns the session (normally the
//! GUI thread), which applies them in [`Session::pump`] and reports what
//! changed through an [`EventSink`].

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::core::Snapshot;
use crate::error::{Error, Result};
use crate::parser::{Event, Parser};
use crate::pty::{ExitStatus, NativePty, PipeHost, ProcessId, PtyError};
use crate::terminal::{EventSink, Terminal, TerminalEvent};

/// Name of the byte-pump thread
pub const READER_THREAD_NAME: &str = "cellterm-reader";

/// Poll interval while waiting for a child that closed its output
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Longest single wait inside [`Session::wait_exit`]
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Messages from the reader thread
#[derive(Debug)]
enum ReaderMsg {
    Events(Vec<Event>),
    Eof,
    Failed(PtyError),
}

fn reader_loop<H: PipeHost>(
    host: Arc<H>,
    mut parser: Parser,
    chunk_size: usize,
    tx: SyncSender<ReaderMsg>,
) {
    let mut buf = vec![0u8; chunk_size];
    loop {
        match host.read(&mut buf) {
            Ok(0) => {
                let _ = tx.send(ReaderMsg::Eof);
                break;
            }
            Ok(n) => {
                let events = parser.feed(&buf[..n]);
                if events.is_empty() {
                    continue;
                }
                if tx.send(ReaderMsg::Events(events)).is_err() {
                    break;
                }
            }
            Err(err) => {
                warn!(error = %err, "pty read failed");
                let _ = tx.send(ReaderMsg::Failed(err));
                break;
            }
        }
    }
    debug!("reader thread exiting");
}

/// One terminal: a child process, its screen and the threads between them
pub struct Session<H: PipeHost = NativePty> {
    config: Config,
    terminal: Terminal,
    host: Option<Arc<H>>,
    sink: Box<dyn EventSink>,
    rx: Option<Receiver<ReaderMsg>>,
    reader: Option<JoinHandle<()>>,
    started: bool,
    /// Reader reported EOF or failure
    reader_done: bool,
    /// Writes are refused from here on
    dead: bool,
    exit_status: Option<ExitStatus>,
    notices: Vec<TerminalEvent>,
}

impl<H: PipeHost> Session<H> {
    /// Create a session; nothing is opened or spawned until [`start`](Self::start)
    pub fn new(config: Config, sink: impl EventSink + 'static) -> Self {
        let config = config.validated();
        Self {
            terminal: Terminal::from_config(&config),
            config,
            host: None,
            sink: Box::new(sink),
            rx: None,
            reader: None,
            started: false,
            reader_done: false,
            dead: false,
            exit_status: None,
            notices: Vec::new(),
        }
    }

    /// Create a session around an already opened host
    pub fn with_host(config: Config, host: H, sink: impl EventSink + 'static) -> Self {
        let mut session = Self::new(config, sink);
        session.host = Some(Arc::new(host));
        session
    }

    /// Open the pseudoterminal, spawn the child and start the reader thread.
    ///
    /// Any failure here is a spawn error and leaves nothing running.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(Error::AlreadyStarted);
        }
        let host = match self.host.take() {
            Some(host) => host,
            None => Arc::new(H::open(self.config.window_size()).map_err(Error::Spawn)?),
        };

        let command = self.config.command();
        if let Err(err) = host.spawn(&command) {
            host.close();
            self.host = Some(host);
            return Err(Error::Spawn(err));
        }

        let (tx, rx) = mpsc::sync_channel(self.config.queue_capacity);
        let parser = Parser::with_limit(self.config.max_sequence_len);
        let chunk_size = self.config.read_chunk_size;
        let reader = {
            let host = Arc::clone(&host);
            thread::Builder::new()
                .name(READER_THREAD_NAME.to_string())
                .spawn(move || reader_loop(host, parser, chunk_size, tx))
        };
        let reader = match reader {
            Ok(handle) => handle,
            Err(err) => {
                host.close();
                self.host = Some(host);
                return Err(Error::Spawn(PtyError::Io(err)));
            }
        };

        info!(program = %command.program, pid = ?host.pid(), "session started");
        self.host = Some(host);
        self.rx = Some(rx);
        self.reader = Some(reader);
        self.started = true;
        Ok(())
    }

    /// Apply everything the reader has queued and notify the sink.
    ///
    /// Emits at most one [`TerminalEvent::Damaged`] per call, and
    /// [`TerminalEvent::ChildExited`] exactly once, after all output has been
    /// applied. Returns the number of events applied.
    pub fn pump(&mut self) -> usize {
        let batch = self.drain(None);
        self.process(batch)
    }

    /// Like [`pump`](Self::pump), but waits up to `timeout` for output first
    pub fn pump_timeout(&mut self, timeout: Duration) -> usize {
        let batch = self.drain(Some(timeout));
        self.process(batch)
    }

    /// Pump until the child exits, the session is closed or `timeout` passes
    pub fn wait_exit(&mut self, timeout: Option<Duration>) -> Option<ExitStatus> {
        let deadline = timeout.map(|t| Instant::now() + t);
        while self.rx.is_some() && self.exit_status.is_none() {
            let slice = match deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        break;
                    }
                    left.min(WAIT_SLICE)
                }
                None => WAIT_SLICE,
            };
            self.pump_timeout(slice);
        }
        self.exit_status
    }

    /// Collect queued reader messages, optionally waiting for the first one
    fn drain(&mut self, wait: Option<Duration>) -> Vec<ReaderMsg> {
        let mut batch = Vec::new();
        let Some(rx) = &self.rx else {
            return batch;
        };

        if let Some(timeout) = wait {
            if self.reader_done {
                // Output is finished; only the exit status is outstanding
                if self.exit_status.is_none() {
                    thread::sleep(timeout.min(EXIT_POLL_INTERVAL));
                }
            } else {
                match rx.recv_timeout(timeout) {
                    Ok(msg) => batch.push(msg),
                    Err(RecvTimeoutError::Timeout) => return batch,
                    Err(RecvTimeoutError::Disconnected) => {
                        self.reader_done = true;
                        return batch;
                    }
                }
            }
        }

        loop {
            match rx.try_recv() {
                Ok(msg) => batch.push(msg),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.reader_done = true;
                    break;
                }
            }
        }
        batch
    }

    fn process(&mut self, batch: Vec<ReaderMsg>) -> usize {
        let mut applied = 0;
        let mut notices = std::mem::take(&mut self.notices);
        for msg in batch {
            match msg {
                ReaderMsg::Events(events) => {
                    for event in &events {
                        self.terminal.apply(event, &mut notices);
                    }
                    applied += events.len();
                }
                ReaderMsg::Eof => {
                    debug!("pty reached end of file");
                    self.reader_done = true;
                }
                ReaderMsg::Failed(err) => {
                    notices.push(TerminalEvent::IoError(err.to_string()));
                    self.reader_done = true;
                    self.dead = true;
                    // Nothing more can be read; make sure the child goes too
                    if let Some(host) = &self.host {
                        host.close();
                    }
                }
            }
        }

        for notice in notices.drain(..) {
            match notice {
                TerminalEvent::ResizeRequested { cols, rows } => {
                    self.sink.notify(notice);
                    if let Err(err) = self.resize(cols, rows) {
                        warn!(error = %err, "requested resize failed");
                    }
                }
                notice => self.sink.notify(notice),
            }
        }
        self.notices = notices;

        if applied > 0 {
            if let Some(rect) = self.terminal.screen().damage() {
                self.sink.notify(TerminalEvent::Damaged(rect));
            }
        }
        self.check_exit();
        applied
    }

    fn check_exit(&mut self) {
        if !self.reader_done || self.exit_status.is_some() {
            return;
        }
        let Some(host) = &self.host else {
            return;
        };
        match host.poll_exit() {
            Ok(Some(status)) => {
                info!(%status, "child exited");
                self.exit_status = Some(status);
                self.dead = true;
                self.sink.notify(TerminalEvent::ChildExited(status));
            }
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "could not collect child status");
                self.dead = true;
                self.sink.notify(TerminalEvent::IoError(err.to_string()));
                // Status is unknowable; report the exit anyway so the GUI can move on
                let status = ExitStatus::Code(-1);
                self.exit_status = Some(status);
                self.sink.notify(TerminalEvent::ChildExited(status));
            }
        }
    }

    /// Send bytes to the child verbatim.
    ///
    /// Fails once the child has exited. A failure on a running terminal is
    /// reported through the sink as [`TerminalEvent::IoError`] and the
    /// session is marked dead.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if !self.started {
            return Err(Error::NotRunning);
        }
        let host = match &self.host {
            Some(host) if !self.dead => Arc::clone(host),
            _ => return Err(Error::Io(PtyError::Closed)),
        };
        if let Err(err) = host.write(data) {
            warn!(error = %err, "pty write failed");
            self.dead = true;
            self.sink.notify(TerminalEvent::IoError(err.to_string()));
        }
        Ok(())
    }

    /// Resize the screen, then the pseudoterminal, so the child sees the
    /// new size before its next output is applied. Sizes are kept within
    /// `1..=max_cols` by `1..=max_rows`.
    pub fn resize(&mut self, cols: u16, rows: u16) -> Result<()> {
        let size = self.config.clamp_size(cols, rows);
        self.config.cols = size.cols;
        self.config.rows = size.rows;
        let notice = self
            .terminal
            .resize(usize::from(size.cols), usize::from(size.rows));

        let result = match &self.host {
            Some(host) if self.started && !self.dead => host.resize(size).map_err(Error::from),
            _ => Ok(()),
        };
        self.sink.notify(notice);
        result
    }

    /// Close the pseudoterminal and stop the reader thread. Idempotent; also
    /// run on drop.
    pub fn close(&mut self) {
        match (&self.host, self.rx.take()) {
            (Some(host), Some(rx)) => {
                // Closing may wait for the child side to flush its output, so
                // the queue keeps draining until the reader hangs up
                let host = Arc::clone(host);
                thread::scope(|scope| {
                    scope.spawn(move || host.close());
                    while rx.recv().is_ok() {}
                });
            }
            (Some(host), None) => host.close(),
            (None, _) => {}
        }
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!("reader thread panicked");
            }
        }
        if self.started && !self.dead {
            debug!("session closed");
        }
        self.reader_done = true;
        self.dead = true;
    }

    pub fn terminal(&self) -> &Terminal {
        &self.terminal
    }

    /// Copy the screen for the renderer and clear the damage
    pub fn snapshot(&mut self) -> Snapshot {
        self.terminal.snapshot()
    }

    /// The shared pseudoterminal host, once opened
    pub fn host(&self) -> Option<&Arc<H>> {
        self.host.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pid(&self) -> Option<ProcessId> {
        self.host.as_ref().and_then(|host| host.pid())
    }

    /// Started, not closed, and the child has not been seen to exit
    pub fn is_alive(&self) -> bool {
        self.started && !self.dead && self.exit_status.is_none()
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }
}

impl<H: PipeHost> Drop for Session<H> {
    fn drop(&mut self) {
        self.close();
    }
}
