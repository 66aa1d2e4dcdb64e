//! Human-readable line sink
//!
//! Lines are written whole and flushed immediately. A failing writer is
//! counted and otherwise ignored: the human stream is best effort and
//! never reports errors back into logging calls.

use colored::Colorize;
use conductor_config::{ColorMode, HumanStream};
use parking_lot::Mutex;
use std::io::{self, IsTerminal, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::record::Level;

/// Glyph prefixed to a line of the given level
pub fn glyph(level: Level) -> &'static str {
    match level {
        Level::Debug => "·",
        Level::Info => "ℹ",
        Level::Success => "✓",
        Level::Warning => "⚠",
        Level::Error => "✗",
    }
}

/// Rendering of a single human line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStyle {
    /// Glyph, optional color, optional correlation suffix
    Rich,
    /// `LEVEL message`, nothing else
    Plain,
}

pub struct HumanSink {
    writer: Mutex<Box<dyn Write + Send>>,
    color: bool,
    /// Console-only mode: notices render plain too
    plain: AtomicBool,
    lines: AtomicU64,
    failures: AtomicU64,
}

impl HumanSink {
    pub fn new(writer: Box<dyn Write + Send>, color: bool) -> Self {
        Self {
            writer: Mutex::new(writer),
            color,
            plain: AtomicBool::new(false),
            lines: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Sink on the configured process stream
    pub fn for_stream(stream: HumanStream, mode: ColorMode) -> Self {
        match stream {
            HumanStream::Stdout => {
                let tty = io::stdout().is_terminal();
                Self::new(Box::new(io::stdout()), resolve_color(mode, tty))
            }
            HumanStream::Stderr => {
                let tty = io::stderr().is_terminal();
                Self::new(Box::new(io::stderr()), resolve_color(mode, tty))
            }
        }
    }

    pub fn color_enabled(&self) -> bool {
        self.color
    }

    /// Write a leveled line
    pub fn line(&self, level: Level, message: &str, suffix: Option<&str>, style: LineStyle) {
        let text = match style {
            LineStyle::Plain => format!("{} {message}", level.tag()),
            LineStyle::Rich => {
                let glyph = if self.color {
                    paint(level, glyph(level))
                } else {
                    glyph(level).to_string()
                };
                match suffix {
                    Some(corr) if self.color => {
                        format!("{glyph} {message} {}", format!("[{corr}]").dimmed())
                    }
                    Some(corr) => format!("{glyph} {message} [{corr}]"),
                    None => format!("{glyph} {message}"),
                }
            }
        };
        self.write_line(&text);
    }

    pub fn set_plain(&self, plain: bool) {
        self.plain.store(plain, Ordering::Release);
    }

    /// Style for lines that do not pick their own
    pub fn style(&self) -> LineStyle {
        if self.plain.load(Ordering::Acquire) {
            LineStyle::Plain
        } else {
            LineStyle::Rich
        }
    }

    /// Warning-level operator notice (tier changes, aggregated failures)
    pub fn notice(&self, message: &str) {
        self.line(Level::Warning, message, None, self.style());
    }

    /// Write `text` followed by a newline, then flush
    pub fn write_line(&self, text: &str) {
        let mut writer = self.writer.lock();
        let result = writer
            .write_all(text.as_bytes())
            .and_then(|()| writer.write_all(b"\n"))
            .and_then(|()| writer.flush());
        match result {
            Ok(()) => {
                self.lines.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn lines_written(&self) -> u64 {
        self.lines.load(Ordering::Relaxed)
    }

    pub fn write_failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for HumanSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HumanSink")
            .field("color", &self.color)
            .field("lines", &self.lines_written())
            .finish_non_exhaustive()
    }
}

/// Decide whether to color, given the mode and whether the stream is a tty
pub fn resolve_color(mode: ColorMode, is_terminal: bool) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => is_terminal,
    }
}

fn paint(level: Level, text: &str) -> String {
    match level {
        Level::Debug => text.dimmed().to_string(),
        Level::Info => text.blue().to_string(),
        Level::Success => text.green().to_string(),
        Level::Warning => text.yellow().to_string(),
        Level::Error => text.red().to_string(),
    }
}
