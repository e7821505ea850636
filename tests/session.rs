//! Drive-loop tests against a scripted in-memory host
//!
//! The fake host hands out pre-recorded output chunks, records what the
//! session writes and resizes, and lets each test decide when the "child"
//! exits.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use cellterm::core::Color;
use cellterm::pty::{Command, ExitStatus, PipeHost, ProcessId, PtyError, PtyResult, WindowSize};
use cellterm::{Config, Error, Session, TerminalEvent};

// ============================================================================
// Fake host
// ============================================================================

#[derive(Default)]
struct Script {
    chunks: VecDeque<Vec<u8>>,
    eof: bool,
    closed: bool,
    fail_read: bool,
    /// `close` blocks until every chunk has been read
    flush_on_close: bool,
    exit: Option<ExitStatus>,
}

#[derive(Default)]
struct FakeHost {
    script: Mutex<Script>,
    ready: Condvar,
    written: Mutex<Vec<u8>>,
    sizes: Mutex<Vec<WindowSize>>,
    spawned: Mutex<Option<Command>>,
    fail_spawn: AtomicBool,
    fail_writes: AtomicBool,
}

impl FakeHost {
    /// Queue output as one read's worth of bytes
    fn output(&self, bytes: &[u8]) {
        self.script.lock().unwrap().chunks.push_back(bytes.to_vec());
        self.ready.notify_all();
    }

    /// End the output stream and report `status` from then on
    fn exit(&self, status: ExitStatus) {
        let mut script = self.script.lock().unwrap();
        script.eof = true;
        script.exit = Some(status);
        self.ready.notify_all();
    }

    /// Make `close` wait for pending output to drain first
    fn flush_output_on_close(&self) {
        self.script.lock().unwrap().flush_on_close = true;
    }

    fn fail_next_read(&self) {
        self.script.lock().unwrap().fail_read = true;
        self.ready.notify_all();
    }

    fn is_closed(&self) -> bool {
        self.script.lock().unwrap().closed
    }

    fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }

    fn sizes(&self) -> Vec<WindowSize> {
        self.sizes.lock().unwrap().clone()
    }
}

impl PipeHost for FakeHost {
    fn open(_size: WindowSize) -> PtyResult<Self> {
        Ok(Self::default())
    }

    fn spawn(&self, command: &Command) -> PtyResult<ProcessId> {
        if self.fail_spawn.load(Ordering::SeqCst) {
            return Err(PtyError::Spawn {
                program: command.program.clone(),
                source: io::Error::from(io::ErrorKind::NotFound),
            });
        }
        *self.spawned.lock().unwrap() = Some(command.clone());
        Ok(ProcessId(42))
    }

    fn read(&self, buf: &mut [u8]) -> PtyResult<usize> {
        let mut script = self.script.lock().unwrap();
        loop {
            if let Some(mut chunk) = script.chunks.pop_front() {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    script.chunks.push_front(chunk.split_off(n));
                }
                self.ready.notify_all();
                return Ok(n);
            }
            if script.fail_read {
                return Err(PtyError::Io(io::Error::new(io::ErrorKind::Other, "read failed")));
            }
            if script.eof || script.closed {
                return Ok(0);
            }
            script = self.ready.wait(script).unwrap();
        }
    }

    fn write(&self, data: &[u8]) -> PtyResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PtyError::Io(io::Error::from(io::ErrorKind::BrokenPipe)));
        }
        if self.is_closed() {
            return Err(PtyError::Closed);
        }
        self.written.lock().unwrap().extend_from_slice(data);
        Ok(())
    }

    fn resize(&self, size: WindowSize) -> PtyResult<()> {
        if self.is_closed() {
            return Err(PtyError::Closed);
        }
        self.sizes.lock().unwrap().push(size);
        Ok(())
    }

    fn close(&self) {
        let mut script = self.script.lock().unwrap();
        while script.flush_on_close && !script.chunks.is_empty() {
            script = self.ready.wait(script).unwrap();
        }
        script.closed = true;
        script.exit.get_or_insert(ExitStatus::Signal(1));
        self.ready.notify_all();
    }

    fn poll_exit(&self) -> PtyResult<Option<ExitStatus>> {
        Ok(self.script.lock().unwrap().exit)
    }

    fn pid(&self) -> Option<ProcessId> {
        self.spawned.lock().unwrap().as_ref().map(|_| ProcessId(42))
    }
}

// ============================================================================
// Helpers
// ============================================================================

const DEADLINE: Duration = Duration::from_secs(5);

fn started(host: FakeHost) -> (Session<FakeHost>, Arc<FakeHost>, Receiver<TerminalEvent>) {
    started_with(Config::default(), host)
}

fn started_with(
    config: Config,
    host: FakeHost,
) -> (Session<FakeHost>, Arc<FakeHost>, Receiver<TerminalEvent>) {
    let (tx, rx) = mpsc::channel();
    let mut session = Session::with_host(config, host, tx);
    session.start().expect("start");
    let host = Arc::clone(session.host().expect("host"));
    (session, host, rx)
}

/// Pump until `done` holds; returns how many pumps it took
fn pump_until(session: &mut Session<FakeHost>, done: impl Fn(&Session<FakeHost>) -> bool) -> usize {
    let deadline = Instant::now() + DEADLINE;
    let mut pumps = 0;
    while !done(&*session) {
        assert!(Instant::now() < deadline, "timed out pumping the session");
        session.pump_timeout(Duration::from_millis(10));
        pumps += 1;
    }
    pumps
}

fn row(session: &Session<FakeHost>, row: usize) -> String {
    session.terminal().screen().row_text(row)
}

// ============================================================================
// Output
// ============================================================================

#[test]
fn test_output_is_applied_in_order() {
    let (mut session, host, _rx) = started(FakeHost::default());
    host.output(b"Hello");
    host.output(b", world\r\n");
    host.output(b"second line");

    pump_until(&mut session, |s| row(s, 1) == "second line");
    assert_eq!(row(&session, 0), "Hello, world");
    assert_eq!(session.pid(), Some(ProcessId(42)));
    assert!(session.is_alive());
}

#[test]
fn test_sequence_split_across_reads() {
    let (mut session, host, _rx) = started(FakeHost::default());
    host.output(b"\x1b[3");
    host.output(b"1mA");

    pump_until(&mut session, |s| row(s, 0) == "A");
    let cell = session.terminal().screen().cell(0, 0).copied().unwrap();
    assert_eq!(cell.fg, Color::RED);
}

#[test]
fn test_at_most_one_damage_per_pump() {
    let (mut session, host, rx) = started(FakeHost::default());
    for i in 0..50 {
        host.output(format!("line {}\r\n", i).as_bytes());
    }
    host.exit(ExitStatus::Code(0));

    let pumps = pump_until(&mut session, |s| s.exit_status().is_some());
    let damaged = rx
        .try_iter()
        .filter(|event| matches!(event, TerminalEvent::Damaged(_)))
        .count();
    assert!(damaged >= 1);
    assert!(damaged <= pumps, "{} damage events over {} pumps", damaged, pumps);
}

#[test]
fn test_snapshot_clears_damage() {
    let (mut session, host, _rx) = started(FakeHost::default());
    host.output(b"abc");
    pump_until(&mut session, |s| row(s, 0) == "abc");

    let snapshot = session.snapshot();
    assert!(snapshot.damage.is_some());
    assert_eq!(snapshot.row_text(0), "abc");
    assert!(session.snapshot().damage.is_none());
}

// ============================================================================
// Child exit
// ============================================================================

#[test]
fn test_child_exit_reported_once_after_output() {
    let (mut session, host, rx) = started(FakeHost::default());
    host.output(b"bye");
    host.exit(ExitStatus::Code(3));

    assert_eq!(session.wait_exit(Some(DEADLINE)), Some(ExitStatus::Code(3)));
    assert_eq!(row(&session, 0), "bye");
    for _ in 0..3 {
        session.pump();
    }

    let events: Vec<TerminalEvent> = rx.try_iter().collect();
    let exits = events
        .iter()
        .filter(|event| matches!(event, TerminalEvent::ChildExited(_)))
        .count();
    assert_eq!(exits, 1);
    assert_eq!(events.last(), Some(&TerminalEvent::ChildExited(ExitStatus::Code(3))));
    assert!(events.iter().any(|event| matches!(event, TerminalEvent::Damaged(_))));
    assert!(!session.is_alive());
}

#[test]
fn test_write_after_exit_fails() {
    let (mut session, host, _rx) = started(FakeHost::default());
    host.exit(ExitStatus::Code(0));
    session.wait_exit(Some(DEADLINE));

    let err = session.write(b"late").unwrap_err();
    assert!(matches!(err, Error::Io(PtyError::Closed)));
    assert!(host.written().is_empty());
}

#[test]
fn test_read_failure_reports_error_and_exit() {
    let (mut session, host, rx) = started(FakeHost::default());
    host.output(b"partial");
    host.fail_next_read();

    let status = session.wait_exit(Some(DEADLINE));
    assert_eq!(status, Some(ExitStatus::Signal(1)));
    assert!(host.is_closed());
    assert_eq!(row(&session, 0), "partial");

    let events: Vec<TerminalEvent> = rx.try_iter().collect();
    let error = events
        .iter()
        .position(|event| matches!(event, TerminalEvent::IoError(_)))
        .expect("io error notice");
    let exit = events
        .iter()
        .position(|event| matches!(event, TerminalEvent::ChildExited(_)))
        .expect("exit notice");
    assert!(error < exit);
}

// ============================================================================
// Startup
// ============================================================================

#[test]
fn test_spawn_failure_is_fatal() {
    let host = FakeHost::default();
    host.fail_spawn.store(true, Ordering::SeqCst);
    let mut session = Session::with_host(Config::default(), host, cellterm::NullSink);

    let err = session.start().unwrap_err();
    assert!(matches!(err, Error::Spawn(PtyError::Spawn { .. })));
    assert!(!session.is_alive());
    assert!(session.host().unwrap().is_closed());
    assert!(matches!(session.write(b"x"), Err(Error::NotRunning)));
}

#[test]
fn test_start_twice_is_rejected() {
    let (mut session, _host, _rx) = started(FakeHost::default());
    assert!(matches!(session.start(), Err(Error::AlreadyStarted)));
}

#[test]
fn test_write_before_start() {
    let mut session: Session<FakeHost> =
        Session::with_host(Config::default(), FakeHost::default(), cellterm::NullSink);
    assert!(matches!(session.write(b"x"), Err(Error::NotRunning)));
    assert_eq!(session.pump(), 0);
}

#[test]
fn test_configured_command_reaches_host() {
    let mut config = Config::default();
    config.program = Some("/bin/prog".to_string());
    config.args = vec!["-x".to_string()];
    config.term = "xterm".to_string();

    let (tx, _rx) = mpsc::channel();
    let mut session = Session::with_host(config, FakeHost::default(), tx);
    session.start().unwrap();

    let spawned = session.host().unwrap().spawned.lock().unwrap().clone().unwrap();
    assert_eq!(spawned.program, "/bin/prog");
    assert_eq!(spawned.args, vec!["-x".to_string()]);
    assert_eq!(spawned.env.get("TERM").map(String::as_str), Some("xterm"));
}

// ============================================================================
// Input and resize
// ============================================================================

#[test]
fn test_write_is_forwarded_verbatim() {
    let (mut session, host, _rx) = started(FakeHost::default());
    session.write(b"ls\r").unwrap();
    session.write(b"\x1b[A").unwrap();
    assert_eq!(host.written(), b"ls\r\x1b[A");
}

#[test]
fn test_write_failure_marks_session_dead() {
    let (mut session, host, rx) = started(FakeHost::default());
    host.fail_writes.store(true, Ordering::SeqCst);

    session.write(b"x").unwrap();
    assert!(rx.try_iter().any(|event| matches!(event, TerminalEvent::IoError(_))));
    assert!(!session.is_alive());
    assert!(matches!(session.write(b"y"), Err(Error::Io(PtyError::Closed))));
}

#[test]
fn test_resize_reaches_screen_and_host() {
    let (mut session, host, rx) = started(FakeHost::default());
    session.resize(100, 30).unwrap();

    assert_eq!(session.terminal().screen().cols(), 100);
    assert_eq!(session.terminal().screen().rows(), 30);
    assert_eq!(host.sizes(), vec![WindowSize::new(100, 30)]);
    assert_eq!((session.config().cols, session.config().rows), (100, 30));
    assert!(rx
        .try_iter()
        .any(|event| event == TerminalEvent::Resized { cols: 100, rows: 30 }));

    session.resize(0, 0).unwrap();
    assert_eq!(session.terminal().screen().cols(), 1);
    assert_eq!(host.sizes().last(), Some(&WindowSize::new(1, 1)));
}

#[test]
fn test_child_resize_request() {
    let (mut session, host, rx) = started(FakeHost::default());
    host.output(b"\x1b[8;30;100t");

    pump_until(&mut session, |s| s.terminal().screen().cols() == 100);
    assert_eq!(session.terminal().screen().rows(), 30);
    assert_eq!(host.sizes(), vec![WindowSize::new(100, 30)]);

    let events: Vec<TerminalEvent> = rx.try_iter().collect();
    let requested = events
        .iter()
        .position(|e| *e == TerminalEvent::ResizeRequested { cols: 100, rows: 30 })
        .expect("resize request");
    let resized = events
        .iter()
        .position(|e| *e == TerminalEvent::Resized { cols: 100, rows: 30 })
        .expect("resized");
    assert!(requested < resized);
}

#[test]
fn test_refused_resize_request() {
    let mut config = Config::default();
    config.honor_resize_requests = false;
    let (tx, rx) = mpsc::channel();
    let mut session = Session::with_host(config, FakeHost::default(), tx);
    session.start().unwrap();
    let host = Arc::clone(session.host().unwrap());

    host.output(b"\x1b[8;30;100tok");
    pump_until(&mut session, |s| row(s, 0) == "ok");
    assert_eq!(session.terminal().screen().cols(), 80);
    assert!(host.sizes().is_empty());
    assert!(!rx
        .try_iter()
        .any(|event| matches!(event, TerminalEvent::ResizeRequested { .. })));
}

#[test]
fn test_child_resize_request_is_capped() {
    let config = Config {
        max_cols: 200,
        max_rows: 100,
        ..Config::default()
    };
    let (mut session, host, rx) = started_with(config, FakeHost::default());
    host.output(b"\x1b[8;65535;65535t");

    pump_until(&mut session, |s| s.terminal().screen().cols() != 80);
    let screen = session.terminal().screen();
    assert_eq!((screen.cols(), screen.rows()), (200, 100));
    assert_eq!(host.sizes(), vec![WindowSize::new(200, 100)]);
    assert!(rx
        .try_iter()
        .any(|event| event == TerminalEvent::ResizeRequested { cols: 200, rows: 100 }));

    // Direct resizes are held to the same bound
    session.resize(u16::MAX, 50).unwrap();
    assert_eq!(session.terminal().screen().cols(), 200);
    assert_eq!(host.sizes().last(), Some(&WindowSize::new(200, 50)));
}

// ============================================================================
// Notifications and shutdown
// ============================================================================

#[test]
fn test_bell_and_title_notifications() {
    let (mut session, host, rx) = started(FakeHost::default());
    host.output(b"\x07\x1b]2;hello\x07done");

    pump_until(&mut session, |s| row(s, 0) == "done");
    let events: Vec<TerminalEvent> = rx.try_iter().collect();
    assert!(events.contains(&TerminalEvent::Bell));
    assert!(events.contains(&TerminalEvent::TitleChanged("hello".to_string())));
    assert_eq!(session.terminal().title(), "hello");
    assert_eq!(session.snapshot().title, "hello");
}

#[test]
fn test_close_is_idempotent() {
    let (mut session, host, _rx) = started(FakeHost::default());
    host.output(b"x");

    session.close();
    session.close();
    assert!(host.is_closed());
    assert!(!session.is_alive());
    assert!(matches!(session.write(b"x"), Err(Error::Io(PtyError::Closed))));
    assert_eq!(session.wait_exit(Some(Duration::from_millis(10))), None);
    assert_eq!(session.pump(), 0);
}

#[test]
fn test_close_drains_output_while_host_flushes() {
    let config = Config {
        queue_capacity: 1,
        ..Config::default()
    };
    let host = FakeHost::default();
    host.flush_output_on_close();
    for i in 0..32 {
        host.output(format!("chunk {}\r\n", i).as_bytes());
    }
    let (mut session, host, _rx) = started_with(config, host);

    // Nothing pumps, so the reader soon blocks on the full queue
    let (done_tx, done_rx) = mpsc::channel();
    std::thread::spawn(move || {
        session.close();
        let _ = done_tx.send(session.is_alive());
    });
    assert_eq!(done_rx.recv_timeout(DEADLINE), Ok(false));
    assert!(host.is_closed());
}

#[test]
fn test_drop_stops_reader() {
    let (session, host, _rx) = started(FakeHost::default());
    drop(session);
    assert!(host.is_closed());
    // Only the test's handle is left once the reader thread has exited
    assert_eq!(Arc::strong_count(&host), 1);
}
