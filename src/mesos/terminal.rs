//! Local terminal handling for TTY sessions: raw mode, window size, and the
//! CTRL-p CTRL-q detach sequence.

use anyhow::{Result, bail};

use super::messages::WindowSize;

/// CTRL-p CTRL-q
pub const DETACH_SEQUENCE: &[u8] = &[0x10, 0x11];

pub fn stdin_is_tty() -> bool {
    // SAFETY: isatty only inspects the descriptor.
    unsafe { libc::isatty(libc::STDIN_FILENO) == 1 }
}

/// Current terminal size, if stdout (or stdin) is a terminal.
pub fn window_size() -> Option<WindowSize> {
    for fd in [libc::STDOUT_FILENO, libc::STDIN_FILENO] {
        let mut ws: libc::winsize = unsafe { std::mem::zeroed() };
        // SAFETY: TIOCGWINSZ writes a winsize into the provided pointer.
        let rc = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut ws as *mut libc::winsize) };
        if rc == 0 && ws.ws_row > 0 && ws.ws_col > 0 {
            return Some(WindowSize {
                rows: ws.ws_row,
                columns: ws.ws_col,
            });
        }
    }
    None
}

/// Puts stdin into raw mode; the original settings come back on drop.
pub struct RawModeGuard {
    original: libc::termios,
}

impl RawModeGuard {
    pub fn enable() -> Result<Self> {
        let mut original: libc::termios = unsafe { std::mem::zeroed() };
        // SAFETY: valid fd and a properly sized termios out-pointer.
        if unsafe { libc::tcgetattr(libc::STDIN_FILENO, &mut original) } != 0 {
            bail!(
                "unable to read terminal attributes: {}",
                std::io::Error::last_os_error()
            );
        }
        let mut raw = original;
        // SAFETY: cfmakeraw only mutates the struct it is given.
        unsafe { libc::cfmakeraw(&mut raw) };
        if unsafe { libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &raw) } != 0 {
            bail!(
                "unable to switch terminal to raw mode: {}",
                std::io::Error::last_os_error()
            );
        }
        Ok(Self { original })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        // SAFETY: restores the attributes captured in `enable`.
        unsafe {
            libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &self.original);
        }
    }
}

/// Outcome of scanning one stdin chunk for the detach sequence.
#[derive(Debug, PartialEq, Eq)]
pub enum Scan {
    /// Bytes to forward to the container (may be empty while a prefix is held back).
    Forward(Vec<u8>),
    /// The sequence was typed; carries the bytes that preceded it.
    Detach(Vec<u8>),
}

/// Finds the detach sequence in a byte stream, across read boundaries.
#[derive(Debug)]
pub struct DetachScanner {
    sequence: &'static [u8],
    matched: usize,
}

impl Default for DetachScanner {
    fn default() -> Self {
        Self::new(DETACH_SEQUENCE)
    }
}

impl DetachScanner {
    pub fn new(sequence: &'static [u8]) -> Self {
        Self {
            sequence,
            matched: 0,
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Scan {
        let mut out = Vec::with_capacity(chunk.len());
        for &byte in chunk {
            if byte == self.sequence[self.matched] {
                self.matched += 1;
                if self.matched == self.sequence.len() {
                    self.matched = 0;
                    return Scan::Detach(out);
                }
                continue;
            }
            // A held-back prefix turned out to be plain input.
            out.extend_from_slice(&self.sequence[..self.matched]);
            self.matched = 0;
            if byte == self.sequence[0] {
                self.matched = 1;
            } else {
                out.push(byte);
            }
        }
        Scan::Forward(out)
    }

    /// Release a held-back partial sequence, e.g. when stdin reaches EOF.
    pub fn flush(&mut self) -> Vec<u8> {
        let held = self.sequence[..self.matched].to_vec();
        self.matched = 0;
        held
    }
}
