//! Windows pseudoconsole implementation
//!
//! Drives a ConPTY: two anonymous pipes carry bytes to and from the
//! pseudoconsole, and the child is attached through a process thread
//! attribute list.

use std::ffi::{c_void, OsStr};
use std::io;
use std::mem;
use std::os::windows::ffi::OsStrExt;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};

use windows_sys::Win32::Foundation::{
    CloseHandle, ERROR_BROKEN_PIPE, ERROR_NO_DATA, ERROR_OPERATION_ABORTED, HANDLE,
    WAIT_TIMEOUT,
};
use windows_sys::Win32::Storage::FileSystem::{ReadFile, WriteFile};
use windows_sys::Win32::System::Console::{
    ClosePseudoConsole, CreatePseudoConsole, ResizePseudoConsole, COORD, HPCON,
};
use windows_sys::Win32::System::Pipes::CreatePipe;
use windows_sys::Win32::System::Threading::{
    CreateProcessW, DeleteProcThreadAttributeList, GetExitCodeProcess,
    InitializeProcThreadAttributeList, UpdateProcThreadAttribute, WaitForSingleObject,
    CREATE_UNICODE_ENVIRONMENT, EXTENDED_STARTUPINFO_PRESENT, LPPROC_THREAD_ATTRIBUTE_LIST,
    PROCESS_INFORMATION, PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE, STARTF_USESTDHANDLES,
    STARTUPINFOEXW,
};
use windows_sys::Win32::System::IO::CancelIoEx;

use super::{Command, ExitStatus, PipeHost, ProcessId, PtyError, PtyResult, WindowSize};

/// Exit code reported for a process that has not finished. A child may also
/// legitimately exit with it, so it is never trusted on its own.
const STILL_ACTIVE: u32 = 259;

/// An owned kernel handle
struct OwnedHandle(HANDLE);

// SAFETY: kernel handles may be used from any thread
unsafe impl Send for OwnedHandle {}
unsafe impl Sync for OwnedHandle {}

impl OwnedHandle {
    fn raw(&self) -> HANDLE {
        self.0
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        // SAFETY: the handle is owned and closed exactly once
        unsafe { CloseHandle(self.0) };
    }
}

struct PseudoConsole(HPCON);

// SAFETY: pseudoconsole handles are not tied to the creating thread
unsafe impl Send for PseudoConsole {}
unsafe impl Sync for PseudoConsole {}

impl Drop for PseudoConsole {
    fn drop(&mut self) {
        // SAFETY: owned handle, closed exactly once
        unsafe { ClosePseudoConsole(self.0) };
    }
}

struct ChildProcess {
    process: OwnedHandle,
    pid: u32,
    status: Option<ExitStatus>,
}

/// A pseudoconsole plus the child attached to it
pub struct ConPty {
    console: Mutex<Option<PseudoConsole>>,
    /// Our end of the console's input pipe; the mutex serialises writers
    input: Mutex<Option<OwnedHandle>>,
    /// Our end of the console's output pipe; taken on close once no read
    /// holds it
    output: RwLock<Option<OwnedHandle>>,
    /// Raw copy of the output handle so close can cancel a blocked read
    output_raw: usize,
    child: Mutex<Option<ChildProcess>>,
    closed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn create_pipe() -> io::Result<(OwnedHandle, OwnedHandle)> {
    let mut read: HANDLE = ptr::null_mut();
    let mut write: HANDLE = ptr::null_mut();
    // SAFETY: out-pointers are valid; default security, default buffer size
    if unsafe { CreatePipe(&mut read, &mut write, ptr::null(), 0) } == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((OwnedHandle(read), OwnedHandle(write)))
}

fn coord(size: WindowSize) -> COORD {
    let size = size.clamped();
    COORD {
        X: i16::try_from(size.cols).unwrap_or(i16::MAX),
        Y: i16::try_from(size.rows).unwrap_or(i16::MAX),
    }
}

fn hresult_error(hr: i32) -> io::Error {
    io::Error::from_raw_os_error(hr)
}

fn wide(s: &OsStr) -> Vec<u16> {
    s.encode_wide().chain(std::iter::once(0)).collect()
}

/// Quote one argument so `CommandLineToArgvW` reads it back unchanged
fn quote_arg(arg: &str, out: &mut String) {
    if !arg.is_empty() && !arg.contains([' ', '\t', '\n', '\u{b}', '"']) {
        out.push_str(arg);
        return;
    }
    out.push('"');
    let mut backslashes = 0;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                out.extend(std::iter::repeat('\\').take(backslashes * 2 + 1));
                out.push('"');
                backslashes = 0;
            }
            _ => {
                out.extend(std::iter::repeat('\\').take(backslashes));
                out.push(c);
                backslashes = 0;
            }
        }
    }
    out.extend(std::iter::repeat('\\').take(backslashes * 2));
    out.push('"');
}

fn command_line(command: &Command) -> String {
    let mut line = String::new();
    for (i, arg) in std::iter::once(&command.program)
        .chain(&command.args)
        .enumerate()
    {
        if i > 0 {
            line.push(' ');
        }
        quote_arg(arg, &mut line);
    }
    line
}

/// `KEY=VALUE\0...\0\0`, sorted case-insensitively as Windows expects
fn environment_block(command: &Command) -> Vec<u16> {
    let mut vars: Vec<(String, String)> = std::env::vars_os()
        .map(|(k, v)| {
            (
                k.to_string_lossy().into_owned(),
                v.to_string_lossy().into_owned(),
            )
        })
        .filter(|(k, _)| {
            !command
                .env
                .keys()
                .any(|override_key| override_key.eq_ignore_ascii_case(k))
        })
        .collect();
    vars.extend(command.env.iter().map(|(k, v)| (k.clone(), v.clone())));
    vars.sort_by_key(|(k, _)| k.to_uppercase());

    let mut block = Vec::new();
    for (key, value) in vars {
        block.extend(OsStr::new(&format!("{}={}", key, value)).encode_wide());
        block.push(0);
    }
    block.push(0);
    block
}

/// Owned `PROC_THREAD_ATTRIBUTE_LIST` storage
struct AttributeList {
    storage: Vec<usize>,
}

impl AttributeList {
    fn with_pseudoconsole(console: HPCON) -> io::Result<Self> {
        let mut size = 0usize;
        // SAFETY: size query; failure with ERROR_INSUFFICIENT_BUFFER is expected
        unsafe { InitializeProcThreadAttributeList(ptr::null_mut(), 1, 0, &mut size) };
        let mut list = Self {
            storage: vec![0usize; size.div_ceil(mem::size_of::<usize>())],
        };
        // SAFETY: the buffer is at least `size` bytes and pointer-aligned
        if unsafe { InitializeProcThreadAttributeList(list.as_ptr(), 1, 0, &mut size) } == 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: the attribute value is the pseudoconsole handle itself
        let ok = unsafe {
            UpdateProcThreadAttribute(
                list.as_ptr(),
                0,
                PROC_THREAD_ATTRIBUTE_PSEUDOCONSOLE as usize,
                console as *const c_void,
                mem::size_of::<HPCON>(),
                ptr::null_mut(),
                ptr::null(),
            )
        };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(list)
    }

    fn as_ptr(&mut self) -> LPPROC_THREAD_ATTRIBUTE_LIST {
        self.storage.as_mut_ptr().cast()
    }
}

impl Drop for AttributeList {
    fn drop(&mut self) {
        // SAFETY: initialised in with_pseudoconsole
        unsafe { DeleteProcThreadAttributeList(self.as_ptr()) };
    }
}

impl PipeHost for ConPty {
    fn open(size: WindowSize) -> PtyResult<Self> {
        let (console_in, input) = create_pipe().map_err(PtyError::Open)?;
        let (output, console_out) = create_pipe().map_err(PtyError::Open)?;

        let mut console: HPCON = 0 as _;
        // SAFETY: pipe handles are valid; the console duplicates them
        let hr = unsafe {
            CreatePseudoConsole(coord(size), console_in.raw(), console_out.raw(), 0, &mut console)
        };
        if hr < 0 {
            return Err(PtyError::Open(hresult_error(hr)));
        }
        // The console holds its own copies of its pipe ends
        drop(console_in);
        drop(console_out);

        tracing::debug!(cols = size.cols, rows = size.rows, "opened pseudoconsole");
        Ok(Self {
            console: Mutex::new(Some(PseudoConsole(console))),
            input: Mutex::new(Some(input)),
            output_raw: output.raw() as usize,
            output: RwLock::new(Some(output)),
            child: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    fn spawn(&self, command: &Command) -> PtyResult<ProcessId> {
        command.validate()?;
        let spawn_error = |source: io::Error| PtyError::Spawn {
            program: command.program.clone(),
            source,
        };

        let mut child = lock(&self.child);
        if child.is_some() {
            return Err(PtyError::InvalidCommand(format!(
                "`{}`: a child is already attached to this pseudoconsole",
                command.program
            )));
        }
        let console = lock(&self.console);
        let console = console.as_ref().ok_or(PtyError::Closed)?;

        let mut attributes = AttributeList::with_pseudoconsole(console.0).map_err(spawn_error)?;
        // SAFETY: plain-data struct; all-zero is a valid initial value
        let mut startup: STARTUPINFOEXW = unsafe { mem::zeroed() };
        startup.StartupInfo.cb = mem::size_of::<STARTUPINFOEXW>() as u32;
        // Keep the parent's console handles out of the child
        startup.StartupInfo.dwFlags = STARTF_USESTDHANDLES;
        startup.lpAttributeList = attributes.as_ptr();

        let mut line = wide(OsStr::new(&command_line(command)));
        let environment = environment_block(command);
        let cwd = command.cwd.as_ref().map(|dir| wide(dir.as_os_str()));
        // SAFETY: plain-data out struct
        let mut info: PROCESS_INFORMATION = unsafe { mem::zeroed() };

        // SAFETY: every pointer refers to a live, NUL-terminated buffer
        let ok = unsafe {
            CreateProcessW(
                ptr::null(),
                line.as_mut_ptr(),
                ptr::null(),
                ptr::null(),
                0,
                EXTENDED_STARTUPINFO_PRESENT | CREATE_UNICODE_ENVIRONMENT,
                environment.as_ptr().cast(),
                cwd.as_ref().map_or(ptr::null(), |dir| dir.as_ptr()),
                &startup.StartupInfo,
                &mut info,
            )
        };
        if ok == 0 {
            let source = io::Error::last_os_error();
            tracing::warn!(program = %command.program, error = %source, "CreateProcessW failed");
            return Err(spawn_error(source));
        }
        drop(OwnedHandle(info.hThread));

        tracing::info!(pid = info.dwProcessId, program = %command.program, "spawned child");
        *child = Some(ChildProcess {
            process: OwnedHandle(info.hProcess),
            pid: info.dwProcessId,
            status: None,
        });
        Ok(ProcessId(info.dwProcessId))
    }

    fn read(&self, buf: &mut [u8]) -> PtyResult<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(0);
        }
        let output = self.output.read().unwrap_or_else(PoisonError::into_inner);
        let Some(output) = output.as_ref() else {
            return Ok(0);
        };

        let len = u32::try_from(buf.len()).unwrap_or(u32::MAX);
        let mut read = 0u32;
        // SAFETY: buffer is valid for `len` bytes; synchronous read
        let ok = unsafe {
            ReadFile(
                output.raw(),
                buf.as_mut_ptr(),
                len,
                &mut read,
                ptr::null_mut(),
            )
        };
        if ok == 0 {
            let err = io::Error::last_os_error();
            return match err.raw_os_error().map(|code| code as u32) {
                Some(ERROR_BROKEN_PIPE) | Some(ERROR_OPERATION_ABORTED) => Ok(0),
                _ if self.closed.load(Ordering::Acquire) => Ok(0),
                _ => Err(PtyError::Io(err)),
            };
        }
        Ok(read as usize)
    }

    fn write(&self, mut data: &[u8]) -> PtyResult<()> {
        let input = lock(&self.input);
        let input = input.as_ref().ok_or(PtyError::Closed)?;
        while !data.is_empty() {
            let len = u32::try_from(data.len()).unwrap_or(u32::MAX);
            let mut written = 0u32;
            // SAFETY: data is valid for `len` bytes; synchronous write
            let ok = unsafe {
                WriteFile(input.raw(), data.as_ptr(), len, &mut written, ptr::null_mut())
            };
            if ok == 0 {
                let err = io::Error::last_os_error();
                return Err(match err.raw_os_error().map(|code| code as u32) {
                    Some(ERROR_BROKEN_PIPE) | Some(ERROR_NO_DATA) => PtyError::Closed,
                    _ => PtyError::Io(err),
                });
            }
            data = &data[written as usize..];
        }
        Ok(())
    }

    fn resize(&self, size: WindowSize) -> PtyResult<()> {
        let console = lock(&self.console);
        let console = console.as_ref().ok_or(PtyError::Closed)?;
        // SAFETY: live pseudoconsole handle
        let hr = unsafe { ResizePseudoConsole(console.0, coord(size)) };
        if hr < 0 {
            return Err(PtyError::Resize(hresult_error(hr)));
        }
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Closing the console ends the child's session and breaks the
        // output pipe; cancelling covers a read already in the kernel.
        drop(lock(&self.console).take());
        drop(lock(&self.input).take());
        // SAFETY: the output handle stays open until the write lock below
        unsafe { CancelIoEx(self.output_raw as HANDLE, ptr::null()) };
        let output = self
            .output
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(output);
        tracing::debug!("pseudoconsole closed");
    }

    fn poll_exit(&self) -> PtyResult<Option<ExitStatus>> {
        let mut child = lock(&self.child);
        let Some(child) = child.as_mut() else {
            return Ok(None);
        };
        if let Some(status) = child.status {
            return Ok(Some(status));
        }

        let mut code = 0u32;
        // SAFETY: live process handle, valid out-pointer
        if unsafe { GetExitCodeProcess(child.process.raw(), &mut code) } == 0 {
            return Err(PtyError::Wait(io::Error::last_os_error()));
        }
        // SAFETY: live process handle; zero timeout never blocks
        if code == STILL_ACTIVE && unsafe { WaitForSingleObject(child.process.raw(), 0) } == WAIT_TIMEOUT {
            return Ok(None);
        }

        let status = ExitStatus::Code(code as i32);
        tracing::info!(pid = child.pid, %status, "child exited");
        child.status = Some(status);
        Ok(Some(status))
    }

    fn pid(&self) -> Option<ProcessId> {
        lock(&self.child).as_ref().map(|child| ProcessId(child.pid))
    }
}

impl Drop for ConPty {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    #[test]
    fn test_quote_arg() {
        let quote = |arg: &str| {
            let mut out = String::new();
            quote_arg(arg, &mut out);
            out
        };
        assert_eq!(quote("plain"), "plain");
        assert_eq!(quote(""), "\"\"");
        assert_eq!(quote("two words"), "\"two words\"");
        assert_eq!(quote("say \"hi\""), "\"say \\\"hi\\\"\"");
        assert_eq!(quote("trailing\\ "), "\"trailing\\ \"");
        assert_eq!(quote("end slash\\"), "\"end slash\\\\\"");
    }

    #[test]
    fn test_environment_block_is_double_terminated() {
        let block = environment_block(&Command::new("cmd.exe").env("CELLTERM_TEST", "1"));
        assert!(block.ends_with(&[0, 0]));
        let text = String::from_utf16_lossy(&block);
        assert!(text.contains("CELLTERM_TEST=1"));
    }

    #[test]
    fn test_conpty_echo() {
        let pty = ConPty::open(WindowSize::new(80, 24)).expect("Failed to open ConPTY");
        pty.spawn(&Command::new("cmd.exe").args(["/C", "echo hello"]))
            .expect("Failed to spawn");

        let mut output = Vec::new();
        let mut buf = [0u8; 1024];
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline && !String::from_utf8_lossy(&output).contains("hello") {
            let n = pty.read(&mut buf).expect("Failed to read");
            if n == 0 {
                break;
            }
            output.extend_from_slice(&buf[..n]);
        }
        assert!(String::from_utf8_lossy(&output).contains("hello"));
        pty.close();
        pty.close();
    }
}
