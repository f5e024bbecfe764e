//! Process-backed line terminal over stdin/stdout.
//!
//! The terminal stays in canonical (cooked) mode: the kernel handles line
//! editing and echo, and complete lines are handed to the input handler.
//! SIGINT and SIGWINCH are routed to the signal handler instead of killing
//! the process.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crate::config::EnvConfig;
use crate::core::terminal::{InputHandler, SignalHandler, Terminal, TerminalSignal};

#[cfg(unix)]
use libc::{self, c_int};
#[cfg(unix)]
use signal_hook::iterator::Signals;

type SharedInputHandler = Arc<Mutex<Option<InputHandler>>>;
type SharedSignalHandler = Arc<Mutex<Option<SignalHandler>>>;

const INPUT_POLL_MS: i32 = 50;

#[cfg(unix)]
fn wait_writable(fd: c_int) -> std::io::Result<()> {
    let mut fds = libc::pollfd {
        fd,
        events: libc::POLLOUT,
        revents: 0,
    };
    loop {
        let result = unsafe { libc::poll(&mut fds, 1, -1) };
        if result < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if result == 0 {
            continue;
        }
        if (fds.revents & libc::POLLOUT) != 0 {
            return Ok(());
        }

        return Err(std::io::Error::other(format!(
            "poll(POLLOUT) returned revents=0x{:x}",
            fds.revents
        )));
    }
}

#[cfg(unix)]
fn write_all_fd_with<FWrite, FWait>(
    fd: c_int,
    bytes: &[u8],
    mut write_once: FWrite,
    mut wait_writable: FWait,
) -> std::io::Result<()>
where
    FWrite: FnMut(c_int, &[u8]) -> std::io::Result<usize>,
    FWait: FnMut(c_int) -> std::io::Result<()>,
{
    let mut written = 0;
    while written < bytes.len() {
        match write_once(fd, &bytes[written..]) {
            Ok(0) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "write returned 0",
                ));
            }
            Ok(count) => written += count.min(bytes.len() - written),
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => wait_writable(fd)?,
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

#[cfg(unix)]
fn write_fd(fd: c_int, data: &str) -> std::io::Result<()> {
    if data.is_empty() {
        return Ok(());
    }

    write_all_fd_with(
        fd,
        data.as_bytes(),
        |fd, buf| {
            let result = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
            if result < 0 {
                Err(std::io::Error::last_os_error())
            } else {
                Ok(result as usize)
            }
        },
        wait_writable,
    )
}

#[cfg(unix)]
fn read_winsize(fd: c_int) -> Option<(u16, u16)> {
    let mut size = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let result = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut size) };
    if result == 0 && size.ws_col > 0 && size.ws_row > 0 {
        Some((size.ws_col, size.ws_row))
    } else {
        None
    }
}

/// True when a read on `fd` will not block, including at end of file.
#[cfg(unix)]
fn poll_readable(fd: c_int, timeout_ms: i32) -> bool {
    let mut fds = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let result = unsafe { libc::poll(&mut fds, 1, timeout_ms) };
    result > 0 && (fds.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR)) != 0
}

#[cfg(unix)]
fn get_termios(fd: c_int) -> std::io::Result<libc::termios> {
    let mut termios = unsafe { std::mem::zeroed::<libc::termios>() };
    let result = unsafe { libc::tcgetattr(fd, &mut termios) };
    if result != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(termios)
}

#[cfg(unix)]
fn set_termios(fd: c_int, termios: &libc::termios) -> std::io::Result<()> {
    let result = unsafe { libc::tcsetattr(fd, libc::TCSANOW, termios) };
    if result != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn deliver_signal(handler: &SharedSignalHandler, signal: TerminalSignal) {
    if let Some(handler) = lock_unpoisoned(handler).as_mut() {
        handler(signal);
    }
}

/// Splits complete lines off the front of `pending`.
fn take_lines(pending: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(newline) = pending.iter().position(|byte| *byte == b'\n') {
        let raw: Vec<u8> = pending.drain(..=newline).collect();
        let text = String::from_utf8_lossy(&raw[..raw.len() - 1]);
        lines.push(text.trim_end_matches('\r').to_string());
    }
    lines
}

#[cfg(unix)]
pub struct ProcessTerminal {
    stdin_fd: c_int,
    stdout_fd: c_int,
    original_termios: Option<libc::termios>,
    input_handler: SharedInputHandler,
    signal_handler: SharedSignalHandler,
    input_thread: Option<JoinHandle<()>>,
    stop_flag: Arc<AtomicBool>,
    signal_handle: Option<signal_hook::iterator::Handle>,
    signal_thread: Option<JoinHandle<()>>,
    write_log_path: Option<PathBuf>,
    write_log_failed: bool,
}

#[cfg(unix)]
impl ProcessTerminal {
    pub fn new() -> Self {
        let config = EnvConfig::from_env();

        Self {
            stdin_fd: libc::STDIN_FILENO,
            stdout_fd: libc::STDOUT_FILENO,
            original_termios: None,
            input_handler: Arc::new(Mutex::new(None)),
            signal_handler: Arc::new(Mutex::new(None)),
            input_thread: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
            signal_handle: None,
            signal_thread: None,
            write_log_path: config.write_log.map(PathBuf::from),
            write_log_failed: false,
        }
    }

    /// Stops the tty from echoing `^C` into the layout. Non-tty stdin is left alone.
    fn suppress_control_echo(&mut self) -> std::io::Result<()> {
        if self.original_termios.is_none() {
            match get_termios(self.stdin_fd) {
                Ok(termios) => self.original_termios = Some(termios),
                Err(_) => return Ok(()),
            }
        }

        if let Some(original) = self.original_termios {
            let mut quiet = original;
            quiet.c_lflag &= !libc::ECHOCTL;
            set_termios(self.stdin_fd, &quiet)?;
        }
        Ok(())
    }

    fn restore_termios(&mut self) -> std::io::Result<()> {
        if let Some(original) = self.original_termios.as_ref() {
            set_termios(self.stdin_fd, original)?;
        }
        Ok(())
    }

    fn start_input_thread(&mut self) -> std::io::Result<()> {
        let stdin_fd = self.stdin_fd;
        let input_handler = Arc::clone(&self.input_handler);
        let signal_handler = Arc::clone(&self.signal_handler);
        let stop_flag = Arc::clone(&self.stop_flag);

        let thread = thread::Builder::new()
            .name("orbiton-tui-input".to_string())
            .spawn(move || {
                let mut buffer = [0u8; 4096];
                let mut pending: Vec<u8> = Vec::new();

                while !stop_flag.load(Ordering::SeqCst) {
                    if !poll_readable(stdin_fd, INPUT_POLL_MS) {
                        continue;
                    }

                    let read_len = unsafe {
                        libc::read(stdin_fd, buffer.as_mut_ptr() as *mut _, buffer.len())
                    };
                    if read_len < 0 {
                        let err = std::io::Error::last_os_error();
                        if matches!(
                            err.kind(),
                            std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock
                        ) {
                            continue;
                        }
                    }
                    if read_len <= 0 {
                        if !pending.is_empty() {
                            pending.push(b'\n');
                        }
                        for line in take_lines(&mut pending) {
                            if let Some(handler) = lock_unpoisoned(&input_handler).as_mut() {
                                handler(line);
                            }
                        }
                        deliver_signal(&signal_handler, TerminalSignal::EndOfInput);
                        break;
                    }

                    pending.extend_from_slice(&buffer[..read_len as usize]);
                    for line in take_lines(&mut pending) {
                        if let Some(handler) = lock_unpoisoned(&input_handler).as_mut() {
                            handler(line);
                        }
                    }
                }
            })?;

        self.input_thread = Some(thread);
        Ok(())
    }

    fn start_signal_thread(&mut self) -> std::io::Result<()> {
        let mut signals = Signals::new([libc::SIGINT, libc::SIGWINCH])?;
        let handle = signals.handle();
        let signal_handler = Arc::clone(&self.signal_handler);

        let thread = thread::Builder::new()
            .name("orbiton-tui-signals".to_string())
            .spawn(move || {
                for signal in signals.forever() {
                    let event = match signal {
                        libc::SIGINT => TerminalSignal::Interrupt,
                        libc::SIGWINCH => TerminalSignal::Resize,
                        _ => continue,
                    };
                    deliver_signal(&signal_handler, event);
                }
            })?;

        self.signal_handle = Some(handle);
        self.signal_thread = Some(thread);
        Ok(())
    }

    fn stop_threads(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.input_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.signal_handle.take() {
            handle.close();
        }
        if let Some(thread) = self.signal_thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(unix)]
impl Default for ProcessTerminal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
impl Terminal for ProcessTerminal {
    fn start(&mut self, on_input: InputHandler, on_signal: SignalHandler) -> std::io::Result<()> {
        *lock_unpoisoned(&self.input_handler) = Some(on_input);
        *lock_unpoisoned(&self.signal_handler) = Some(on_signal);
        self.stop_flag.store(false, Ordering::SeqCst);

        let started = self
            .suppress_control_echo()
            .and_then(|()| self.start_signal_thread())
            .and_then(|()| self.start_input_thread());
        if let Err(err) = started {
            self.stop_threads();
            *lock_unpoisoned(&self.input_handler) = None;
            *lock_unpoisoned(&self.signal_handler) = None;
            let _ = self.restore_termios();
            return Err(err);
        }

        Ok(())
    }

    fn stop(&mut self) -> std::io::Result<()> {
        self.stop_threads();
        *lock_unpoisoned(&self.input_handler) = None;
        *lock_unpoisoned(&self.signal_handler) = None;
        self.restore_termios()
    }

    fn write(&mut self, data: &str) {
        // A closed stdout leaves nothing to render to.
        let _ = write_fd(self.stdout_fd, data);
        if self.write_log_failed {
            return;
        }
        if let Some(path) = self.write_log_path.as_ref() {
            let result = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .and_then(|mut file| file.write_all(data.as_bytes()));
            if result.is_err() {
                self.write_log_failed = true;
            }
        }
    }

    fn columns(&self) -> u16 {
        read_winsize(self.stdout_fd)
            .map(|(cols, _)| cols)
            .unwrap_or(80)
    }

    fn rows(&self) -> u16 {
        read_winsize(self.stdout_fd)
            .map(|(_, rows)| rows)
            .unwrap_or(24)
    }
}

#[cfg(not(unix))]
pub struct ProcessTerminal;

#[cfg(not(unix))]
impl ProcessTerminal {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(not(unix))]
impl Default for ProcessTerminal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(unix))]
impl Terminal for ProcessTerminal {
    fn start(&mut self, _on_input: InputHandler, _on_signal: SignalHandler) -> std::io::Result<()> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "ProcessTerminal requires a unix platform",
        ))
    }

    fn stop(&mut self) -> std::io::Result<()> {
        Ok(())
    }

    fn write(&mut self, data: &str) {
        print!("{data}");
    }

    fn columns(&self) -> u16 {
        80
    }

    fn rows(&self) -> u16 {
        24
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_lines_keeps_partial_tail_pending() {
        let mut pending = b"first\r\nsecond\nthi".to_vec();

        let lines = take_lines(&mut pending);

        assert_eq!(lines, vec!["first".to_string(), "second".to_string()]);
        assert_eq!(pending, b"thi".to_vec());
    }

    #[test]
    fn take_lines_replaces_invalid_utf8() {
        let mut pending = vec![b'a', 0xff, b'\n'];
        assert_eq!(take_lines(&mut pending), vec!["a\u{fffd}".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn write_all_fd_with_retries_on_eintr_and_partial_writes() {
        let mut calls = 0;
        let mut written = Vec::new();

        write_all_fd_with(
            1,
            b"hello",
            |_, buf| {
                calls += 1;
                match calls {
                    1 => Err(std::io::Error::from(std::io::ErrorKind::Interrupted)),
                    2 => {
                        written.extend_from_slice(&buf[..2]);
                        Ok(2)
                    }
                    _ => {
                        written.extend_from_slice(buf);
                        Ok(buf.len())
                    }
                }
            },
            |_| Ok(()),
        )
        .expect("write should complete");

        assert_eq!(written, b"hello".to_vec());
        assert_eq!(calls, 3);
    }
}
