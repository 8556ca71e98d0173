//! Destinations for disassembly trace lines.
//!
//! A sink owns the indentation level; every appended line is prefixed with
//! one tab per level. Sink methods cannot fail: implementations that do I/O
//! report problems through `log` and carry on.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

const INDENT_CHAR: char = '\t';

pub trait Sink {
    fn append_line(&mut self, line: &str);

    /// Adjust the nesting level used to prefix later lines.
    fn change_indent(&mut self, delta: i32);
}

impl<S: Sink + ?Sized> Sink for &mut S {
    fn append_line(&mut self, line: &str) {
        (**self).append_line(line)
    }

    fn change_indent(&mut self, delta: i32) {
        (**self).change_indent(delta)
    }
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn append_line(&mut self, line: &str) {
        (**self).append_line(line)
    }

    fn change_indent(&mut self, delta: i32) {
        (**self).change_indent(delta)
    }
}

fn apply_delta(level: usize, delta: i32) -> usize {
    if delta < 0 {
        level.saturating_sub(delta.unsigned_abs() as usize)
    } else {
        level.saturating_add(delta as usize)
    }
}

fn indented(level: usize, line: &str) -> String {
    let mut out = String::with_capacity(level + line.len());
    out.extend(std::iter::repeat_n(INDENT_CHAR, level));
    out.push_str(line);
    out
}

/// Discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl Sink for NullSink {
    fn append_line(&mut self, _line: &str) {}

    fn change_indent(&mut self, _delta: i32) {}
}

/// Keeps indented lines in memory.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    lines: Vec<String>,
    level: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }

    pub fn level(&self) -> usize {
        self.level
    }

    /// All lines joined with newlines, with a trailing newline.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

impl Sink for MemorySink {
    fn append_line(&mut self, line: &str) {
        self.lines.push(indented(self.level, line));
    }

    fn change_indent(&mut self, delta: i32) {
        self.level = apply_delta(self.level, delta);
    }
}

/// Buffers lines and appends them to a file on [`flush`](Self::flush) and
/// on drop.
///
/// Write failures are logged at warn level and the affected lines are
/// dropped; tracing never interrupts code generation.
#[derive(Debug)]
pub struct BufferedFileLog {
    path: PathBuf,
    buffer: Vec<String>,
    level: usize,
}

impl BufferedFileLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            buffer: Vec::new(),
            level: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lines appended since the last flush.
    pub fn buffered(&self) -> &[String] {
        &self.buffer
    }

    pub fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let lines = std::mem::take(&mut self.buffer);
        if let Err(e) = self.write_lines(&lines) {
            log::warn!(
                "dropping {} trace line(s), cannot write {}: {e}",
                lines.len(),
                self.path.display()
            );
        }
    }

    fn write_lines(&self, lines: &[String]) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut text = String::new();
        for line in lines {
            text.push_str(line);
            text.push('\n');
        }
        file.write_all(text.as_bytes())
    }
}

impl Sink for BufferedFileLog {
    fn append_line(&mut self, line: &str) {
        self.buffer.push(indented(self.level, line));
    }

    fn change_indent(&mut self, delta: i32) {
        self.level = apply_delta(self.level, delta);
    }
}

impl Drop for BufferedFileLog {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Forwards each line to the `log` facade at debug level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink {
    level: usize,
}

impl LogSink {
    pub const TARGET: &'static str = "iltrace::disasm";

    pub fn new() -> Self {
        Self::default()
    }
}

impl Sink for LogSink {
    fn append_line(&mut self, line: &str) {
        log::debug!(target: Self::TARGET, "{}", indented(self.level, line));
    }

    fn change_indent(&mut self, delta: i32) {
        self.level = apply_delta(self.level, delta);
    }
}
