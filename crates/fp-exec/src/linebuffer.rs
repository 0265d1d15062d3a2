//! Line splitting for process output.
//!
//! [`LineBuffer`] accepts arbitrary byte chunks and hands every `\n`- or
//! `\r`-terminated line (terminator included) to a [`LineSink`]. Content
//! after the last terminator is kept until more bytes arrive or the buffer
//! is closed.
//!
//! Two sinks are used in practice: a plain closure (progress decoding) and
//! [`Ring`], which keeps the last N lines for diagnostics ([`LastLines`]).

use std::io;

use crate::close::Close;

/// Default capacity of a [`LastLines`] buffer.
pub const DEFAULT_CAPACITY: usize = 100;

/// Receives complete lines from a [`LineBuffer`].
pub trait LineSink {
    /// Called once per line.
    fn line(&mut self, line: &str);
}

impl<F: FnMut(&str)> LineSink for F {
    fn line(&mut self, line: &str) {
        self(line)
    }
}

/// Splits written bytes into lines and forwards them to a sink.
#[derive(Debug)]
pub struct LineBuffer<S> {
    pending: Vec<u8>,
    sink: S,
}

impl<S: LineSink> LineBuffer<S> {
    /// Create a buffer forwarding lines to `sink`.
    pub fn new(sink: S) -> Self {
        Self {
            pending: Vec::new(),
            sink,
        }
    }

    /// Feed a chunk of bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);

        let mut start = 0;
        while let Some(i) = self.pending[start..]
            .iter()
            .position(|&b| b == b'\n' || b == b'\r')
        {
            let end = start + i + 1;
            self.sink
                .line(&String::from_utf8_lossy(&self.pending[start..end]));
            start = end;
        }
        self.pending.drain(..start);
    }

    /// Deliver any partial trailing content as a final line and reset.
    pub fn flush_partial(&mut self) {
        if !self.pending.is_empty() {
            self.sink.line(&String::from_utf8_lossy(&self.pending));
        }
        self.pending.clear();
    }

    /// The wrapped sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }
}

impl<S: LineSink> io::Write for LineBuffer<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.push(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: LineSink> Close for LineBuffer<S> {
    fn close(&mut self) -> io::Result<()> {
        self.flush_partial();
        Ok(())
    }
}

/// Fixed-capacity ring of the most recent lines.
#[derive(Debug, Clone)]
pub struct Ring {
    current: usize,
    lines: Vec<String>,
}

impl Ring {
    /// Create a ring holding `capacity` lines. A capacity of 0 is treated
    /// as 1.
    pub fn new(capacity: usize) -> Self {
        Self {
            current: 0,
            lines: vec![String::new(); capacity.max(1)],
        }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.lines.len()
    }

    /// Concatenate the stored lines, oldest first.
    pub fn render(&self) -> String {
        let n = self.lines.len();
        (0..n)
            .map(|i| self.lines[(self.current + i) % n].as_str())
            .collect()
    }
}

impl LineSink for Ring {
    fn line(&mut self, line: &str) {
        self.lines[self.current] = line.to_string();
        self.current = (self.current + 1) % self.lines.len();
    }
}

/// A line buffer that keeps the last N lines.
pub type LastLines = LineBuffer<Ring>;

impl LineBuffer<Ring> {
    /// Create a buffer keeping the last `capacity` lines.
    pub fn last_lines(capacity: usize) -> Self {
        Self::new(Ring::new(capacity))
    }

    /// The kept lines as one string, oldest first.
    pub fn render(&self) -> String {
        self.sink.render()
    }
}

impl Default for LineBuffer<Ring> {
    fn default() -> Self {
        Self::last_lines(DEFAULT_CAPACITY)
    }
}
