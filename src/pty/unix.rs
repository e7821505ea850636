//! Unix PTY implementation
//!
//! Implements PTY creation and child process management using POSIX APIs.

use std::collections::BTreeMap;
use std::ffi::{CString, OsString};
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};

use libc::c_char;
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::pty::{openpty, OpenptyResult, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, pipe, ForkResult, Pid};

use super::{Command, ExitStatus, PipeHost, ProcessId, PtyError, PtyResult, WindowSize};

/// How long a blocked `read` waits before re-checking for `close`
const POLL_INTERVAL_MS: u16 = 50;

/// Search path used when neither the command nor the parent sets `PATH`
const FALLBACK_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// A pseudoterminal pair plus the child attached to it
pub struct UnixPty {
    /// Master side; taken on close once no read holds it
    master: RwLock<Option<File>>,
    /// Slave side, kept until the child owns it
    slave: Mutex<Option<OwnedFd>>,
    /// Serialises writers
    write_lock: Mutex<()>,
    child: Mutex<ChildState>,
    closed: AtomicBool,
}

#[derive(Debug, Default)]
struct ChildState {
    pid: Option<Pid>,
    status: Option<ExitStatus>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl UnixPty {
    /// Current window size as the kernel sees it
    pub fn window_size(&self) -> PtyResult<WindowSize> {
        let master = self.master.read().unwrap_or_else(PoisonError::into_inner);
        let master = master.as_ref().ok_or(PtyError::Closed)?;
        get_window_size(master.as_raw_fd())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl PipeHost for UnixPty {
    fn open(size: WindowSize) -> PtyResult<Self> {
        let size = size.clamped();
        let winsize = Winsize {
            ws_row: size.rows,
            ws_col: size.cols,
            ws_xpixel: size.pixel_width,
            ws_ypixel: size.pixel_height,
        };
        let OpenptyResult { master, slave } =
            openpty(Some(&winsize), None).map_err(|e| PtyError::Open(e.into()))?;

        // Neither end may leak into the child beyond its stdio
        set_cloexec(master.as_raw_fd()).map_err(PtyError::Open)?;
        set_cloexec(slave.as_raw_fd()).map_err(PtyError::Open)?;

        tracing::debug!(cols = size.cols, rows = size.rows, "opened pty");
        Ok(Self {
            master: RwLock::new(Some(File::from(master))),
            slave: Mutex::new(Some(slave)),
            write_lock: Mutex::new(()),
            child: Mutex::new(ChildState::default()),
            closed: AtomicBool::new(false),
        })
    }

    fn spawn(&self, command: &Command) -> PtyResult<ProcessId> {
        command.validate()?;
        let mut child = lock(&self.child);
        if child.pid.is_some() {
            return Err(PtyError::InvalidCommand(format!(
                "`{}`: a child is already attached to this pty",
                command.program
            )));
        }
        if self.is_closed() {
            return Err(PtyError::Closed);
        }

        let exec = PreparedExec::new(command)?;
        let spawn_error = |source: io::Error| PtyError::Spawn {
            program: command.program.clone(),
            source,
        };

        let slave = lock(&self.slave).take().ok_or(PtyError::Closed)?;
        // The child reports a failed exec as a raw errno on this pipe; a
        // successful exec closes it without writing anything.
        let (status_read, status_write) = pipe().map_err(|e| spawn_error(e.into()))?;
        set_cloexec(status_read.as_raw_fd()).map_err(spawn_error)?;
        set_cloexec(status_write.as_raw_fd()).map_err(spawn_error)?;

        // SAFETY: the child only calls async-signal-safe functions on data
        // prepared before the fork, then execs or exits.
        match unsafe { fork() }.map_err(|e| spawn_error(e.into()))? {
            ForkResult::Child => unsafe {
                exec_child(slave.as_raw_fd(), status_write.as_raw_fd(), &exec)
            }
            ForkResult::Parent { child: pid } => {
                drop(slave);
                drop(status_write);

                let mut status = File::from(status_read);
                let mut errno = [0u8; 4];
                match status.read_exact(&mut errno) {
                    Ok(()) => {
                        let _ = waitpid(pid, None);
                        let source = io::Error::from_raw_os_error(i32::from_ne_bytes(errno));
                        tracing::warn!(program = %command.program, error = %source, "exec failed");
                        Err(spawn_error(source))
                    }
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                        tracing::info!(pid = pid.as_raw(), program = %command.program, "spawned child");
                        child.pid = Some(pid);
                        Ok(ProcessId(pid.as_raw().unsigned_abs()))
                    }
                    Err(e) => Err(spawn_error(e)),
                }
            }
        }
    }

    fn read(&self, buf: &mut [u8]) -> PtyResult<usize> {
        loop {
            if self.is_closed() {
                return Ok(0);
            }
            let master = self.master.read().unwrap_or_else(PoisonError::into_inner);
            let Some(master) = master.as_ref() else {
                return Ok(0);
            };

            let mut fds = [PollFd::new(master.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, PollTimeout::from(POLL_INTERVAL_MS)) {
                Ok(0) | Err(Errno::EINTR) => continue,
                Ok(_) => {}
                Err(e) => return Err(PtyError::Io(e.into())),
            }

            let mut reader: &File = master;
            match reader.read(buf) {
                Ok(n) => return Ok(n),
                // Linux reports EIO once the last slave descriptor is closed
                Err(e) if e.raw_os_error() == Some(libc::EIO) => return Ok(0),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                    ) =>
                {
                    continue
                }
                Err(e) => return Err(PtyError::Io(e)),
            }
        }
    }

    fn write(&self, data: &[u8]) -> PtyResult<()> {
        let _serial = lock(&self.write_lock);
        if self.is_closed() {
            return Err(PtyError::Closed);
        }
        let master = self.master.read().unwrap_or_else(PoisonError::into_inner);
        let mut writer: &File = master.as_ref().ok_or(PtyError::Closed)?;
        writer
            .write_all(data)
            .and_then(|()| writer.flush())
            .map_err(|e| match e.raw_os_error() {
                Some(libc::EIO) | Some(libc::EPIPE) => PtyError::Closed,
                _ => PtyError::Io(e),
            })
    }

    fn resize(&self, size: WindowSize) -> PtyResult<()> {
        let master = self.master.read().unwrap_or_else(PoisonError::into_inner);
        let master = master.as_ref().ok_or(PtyError::Closed)?;
        set_window_size(master.as_raw_fd(), size.clamped())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        {
            let child = lock(&self.child);
            if let (Some(pid), None) = (child.pid, child.status) {
                // Unblocks a writer stuck on a full buffer too
                let _ = kill(pid, Signal::SIGHUP);
            }
        }

        drop(lock(&self.slave).take());
        // Waits for an in-flight read to notice the closed flag
        let master = self
            .master
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(master);
        tracing::debug!("pty closed");
    }

    fn poll_exit(&self) -> PtyResult<Option<ExitStatus>> {
        let mut child = lock(&self.child);
        if let Some(status) = child.status {
            return Ok(Some(status));
        }
        let Some(pid) = child.pid else {
            return Ok(None);
        };

        let status = match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(_, code)) => ExitStatus::Code(code),
            Ok(WaitStatus::Signaled(_, signal, _)) => ExitStatus::Signal(signal as i32),
            Ok(_) => return Ok(None),
            Err(e) => return Err(PtyError::Wait(e.into())),
        };
        tracing::info!(pid = pid.as_raw(), %status, "child exited");
        child.status = Some(status);
        Ok(Some(status))
    }

    fn pid(&self) -> Option<ProcessId> {
        lock(&self.child)
            .pid
            .map(|pid| ProcessId(pid.as_raw().unsigned_abs()))
    }
}

impl Drop for UnixPty {
    fn drop(&mut self) {
        self.close();
        // Try to reap the child process
        let child = lock(&self.child);
        if let (Some(pid), None) = (child.pid, child.status) {
            let _ = waitpid(pid, Some(WaitPidFlag::WNOHANG));
        }
    }
}

/// Everything the forked child needs, built before the fork so the child
/// never allocates.
struct PreparedExec {
    program: CString,
    cwd: Option<CString>,
    _argv: Vec<CString>,
    _envp: Vec<CString>,
    argv_ptrs: Vec<*const c_char>,
    envp_ptrs: Vec<*const c_char>,
}

impl PreparedExec {
    fn new(command: &Command) -> PtyResult<Self> {
        let invalid = |what: &str| {
            PtyError::InvalidCommand(format!("`{}`: {} contains a NUL byte", command.program, what))
        };

        let mut env: BTreeMap<OsString, OsString> = std::env::vars_os().collect();
        for (key, value) in &command.env {
            env.insert(key.into(), value.into());
        }

        let path = resolve_program(&command.program, env.get(&OsString::from("PATH")))
            .ok_or_else(|| PtyError::Spawn {
                program: command.program.clone(),
                source: io::Error::new(io::ErrorKind::NotFound, "program not found"),
            })?;
        let program = CString::new(path.into_os_string().into_vec()).map_err(|_| invalid("path"))?;

        let argv = std::iter::once(&command.program)
            .chain(&command.args)
            .map(|arg| CString::new(arg.as_bytes()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| invalid("argument"))?;

        let envp = env
            .into_iter()
            .map(|(key, value)| {
                let mut entry = key.into_vec();
                entry.push(b'=');
                entry.extend(value.into_vec());
                CString::new(entry)
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| invalid("environment"))?;

        let cwd = command
            .cwd
            .as_ref()
            .map(|dir| CString::new(dir.as_os_str().as_bytes()))
            .transpose()
            .map_err(|_| invalid("working directory"))?;

        let argv_ptrs = argv
            .iter()
            .map(|s| s.as_ptr())
            .chain(std::iter::once(std::ptr::null()))
            .collect();
        let envp_ptrs = envp
            .iter()
            .map(|s| s.as_ptr())
            .chain(std::iter::once(std::ptr::null()))
            .collect();

        Ok(Self {
            program,
            cwd,
            _argv: argv,
            _envp: envp,
            argv_ptrs,
            envp_ptrs,
        })
    }
}

/// Locate `program` the way `execvp` would, but in the parent
fn resolve_program(program: &str, path_var: Option<&OsString>) -> Option<PathBuf> {
    if program.contains('/') {
        return Some(PathBuf::from(program));
    }
    let search = path_var
        .cloned()
        .unwrap_or_else(|| OsString::from(FALLBACK_PATH));
    std::env::split_paths(&search)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Runs in the forked child: attach the slave as controlling terminal and
/// stdio, then exec. Never returns.
///
/// # Safety
///
/// Must only be called in a freshly forked child of a process that may have
/// other threads; only async-signal-safe calls are made.
unsafe fn exec_child(slave: RawFd, status: RawFd, exec: &PreparedExec) -> ! {
    if libc::setsid() < 0 {
        report_exec_failure(status);
    }
    if libc::ioctl(slave, libc::TIOCSCTTY as _, 0) < 0 {
        report_exec_failure(status);
    }
    for fd in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        if libc::dup2(slave, fd) < 0 {
            report_exec_failure(status);
        }
    }
    if slave > libc::STDERR_FILENO {
        libc::close(slave);
    }
    if let Some(cwd) = &exec.cwd {
        if libc::chdir(cwd.as_ptr()) < 0 {
            report_exec_failure(status);
        }
    }
    // The Rust runtime ignores SIGPIPE; the child should not inherit that
    libc::signal(libc::SIGPIPE, libc::SIG_DFL);

    libc::execve(
        exec.program.as_ptr(),
        exec.argv_ptrs.as_ptr(),
        exec.envp_ptrs.as_ptr(),
    );
    report_exec_failure(status)
}

unsafe fn report_exec_failure(status: RawFd) -> ! {
    let errno = (Errno::last() as i32).to_ne_bytes();
    libc::write(status, errno.as_ptr().cast(), errno.len());
    libc::_exit(127)
}

fn set_cloexec(fd: RawFd) -> io::Result<()> {
    fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
        .map(drop)
        .map_err(io::Error::from)
}

/// Set the window size on a PTY file descriptor
fn set_window_size(fd: RawFd, size: WindowSize) -> PtyResult<()> {
    let winsize = libc::winsize {
        ws_row: size.rows,
        ws_col: size.cols,
        ws_xpixel: size.pixel_width,
        ws_ypixel: size.pixel_height,
    };

    // SAFETY: TIOCSWINSZ is a valid ioctl for setting window size
    let result = unsafe { libc::ioctl(fd, libc::TIOCSWINSZ as _, &winsize) };

    if result < 0 {
        Err(PtyError::Resize(io::Error::last_os_error()))
    } else {
        Ok(())
    }
}

/// Get the window size from a PTY file descriptor
fn get_window_size(fd: RawFd) -> PtyResult<WindowSize> {
    let mut winsize = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };

    // SAFETY: TIOCGWINSZ is a valid ioctl for getting window size
    let result = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ as _, &mut winsize) };

    if result < 0 {
        Err(PtyError::Io(io::Error::last_os_error()))
    } else {
        Ok(WindowSize::with_pixels(
            winsize.ws_col,
            winsize.ws_row,
            winsize.ws_xpixel,
            winsize.ws_ypixel,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    fn spawn(program: &str, args: &[&str]) -> UnixPty {
        let pty = UnixPty::open(WindowSize::new(80, 24)).expect("Failed to open PTY");
        pty.spawn(&Command::new(program).args(args.iter().copied()))
            .expect("Failed to spawn");
        pty
    }

    /// Read until `needle` shows up or the child closes the pty
    fn read_until(pty: &UnixPty, needle: &str) -> String {
        let mut output = Vec::new();
        let mut buf = [0u8; 1024];
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            let n = pty.read(&mut buf).expect("Failed to read");
            if n == 0 {
                break;
            }
            output.extend_from_slice(&buf[..n]);
            if String::from_utf8_lossy(&output).contains(needle) {
                break;
            }
        }
        String::from_utf8_lossy(&output).into_owned()
    }

    fn wait_exit(pty: &UnixPty) -> ExitStatus {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(status) = pty.poll_exit().expect("Failed to poll exit") {
                return status;
            }
            assert!(Instant::now() < deadline, "child did not exit");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_pty_spawn() {
        let pty = spawn("/bin/echo", &["hello"]);
        assert!(pty.pid().is_some());

        let output = read_until(&pty, "hello");
        assert!(output.contains("hello"), "Unexpected output: {}", output);
        assert_eq!(wait_exit(&pty), ExitStatus::Code(0));
    }

    #[test]
    fn test_path_lookup() {
        let pty = spawn("echo", &["from-path"]);
        let output = read_until(&pty, "from-path");
        assert!(output.contains("from-path"), "Unexpected output: {}", output);
    }

    #[test]
    fn test_pty_write_read() {
        let pty = spawn("/bin/cat", &[]);
        pty.write(b"test\n").expect("Failed to write");

        let output = read_until(&pty, "test");
        assert!(output.contains("test"), "Unexpected output: {}", output);
        pty.close();
    }

    #[test]
    fn test_exit_code_and_eof() {
        let pty = spawn("/bin/sh", &["-c", "exit 3"]);
        let mut buf = [0u8; 256];
        let deadline = Instant::now() + Duration::from_secs(5);
        while pty.read(&mut buf).expect("Failed to read") != 0 {
            assert!(Instant::now() < deadline, "no EOF");
        }
        assert_eq!(wait_exit(&pty), ExitStatus::Code(3));
        // Status is sticky
        assert_eq!(pty.poll_exit().unwrap(), Some(ExitStatus::Code(3)));
    }

    #[test]
    fn test_env_and_cwd() {
        let pty = UnixPty::open(WindowSize::default()).unwrap();
        let cmd = Command::new("/bin/sh")
            .args(["-c", "echo \"$CELLTERM_TEST:$(pwd)\""])
            .env("CELLTERM_TEST", "marker")
            .cwd("/");
        pty.spawn(&cmd).unwrap();

        let output = read_until(&pty, "marker:/");
        assert!(output.contains("marker:/"), "Unexpected output: {}", output);
    }

    #[test]
    fn test_spawn_missing_program() {
        let pty = UnixPty::open(WindowSize::default()).unwrap();
        let err = pty
            .spawn(&Command::new("/nonexistent/cellterm-no-such-program"))
            .unwrap_err();
        assert!(err.is_spawn(), "{:?}", err);
        assert!(pty.pid().is_none());

        let err = UnixPty::open(WindowSize::default())
            .unwrap()
            .spawn(&Command::new("cellterm-no-such-program"))
            .unwrap_err();
        assert!(matches!(err, PtyError::Spawn { .. }));
    }

    #[test]
    fn test_spawn_twice_rejected() {
        let pty = spawn("/bin/cat", &[]);
        let err = pty.spawn(&Command::new("/bin/cat")).unwrap_err();
        assert!(matches!(err, PtyError::InvalidCommand(_)));
        pty.close();
    }

    #[test]
    fn test_pty_resize() {
        let pty = spawn("/bin/cat", &[]);
        assert_eq!(pty.window_size().unwrap(), WindowSize::new(80, 24));

        pty.resize(WindowSize::new(120, 40))
            .expect("Failed to resize");

        let size = pty.window_size().expect("Failed to get size");
        assert_eq!(size.cols, 120);
        assert_eq!(size.rows, 40);
        pty.close();
    }

    #[test]
    fn test_close_is_idempotent_and_unblocks_read() {
        let pty = std::sync::Arc::new(spawn("/bin/cat", &[]));
        let reader = {
            let pty = pty.clone();
            std::thread::spawn(move || {
                let mut buf = [0u8; 64];
                loop {
                    match pty.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(_) => continue,
                    }
                }
            })
        };

        std::thread::sleep(Duration::from_millis(20));
        pty.close();
        pty.close();
        reader.join().unwrap();

        assert!(matches!(pty.write(b"x"), Err(PtyError::Closed)));
        assert!(matches!(pty.resize(WindowSize::default()), Err(PtyError::Closed)));
        let status = wait_exit(&pty);
        assert!(!status.success());
    }
}
