//! The aggregated log.
//!
//! Both supervised processes write their forwarded lines here. Each line is
//! tagged with the tool's prefix (e.g. `[ng] `) so the two streams stay
//! distinguishable on a shared stdout.

use std::io::Write;
use std::time::Instant;

use strip_ansi_escapes::strip;

/// Indicates the source stream of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// Formatting settings for the aggregated log.
#[derive(Debug, Clone)]
pub struct LogSink {
    colors: bool,
    timestamp: bool,
    start: Instant,
}

impl LogSink {
    pub fn new(colors: bool, timestamp: bool) -> Self {
        Self {
            colors,
            timestamp,
            start: Instant::now(),
        }
    }

    /// Writes one line from a child process.
    ///
    /// Lines are written whole under the stdout lock, so concurrent readers
    /// never interleave within a line.
    pub fn emit(&self, prefix: &str, line: &str) {
        let output = self.format_line(prefix, line);
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{}", output);
    }

    fn format_line(&self, prefix: &str, line: &str) -> String {
        let text = sanitize_text(line, !self.colors);
        let cleaned = strip_existing_prefix(prefix, &text);
        let mut tag = format!("[{}]", prefix);
        if self.colors {
            tag = gray(&tag);
        }
        if self.timestamp {
            tag = format!("{} {}", self.elapsed(), tag);
        }
        format!("{} {}", tag, cleaned)
    }

    fn elapsed(&self) -> String {
        let secs = self.start.elapsed().as_secs();
        format!("{:02}:{:02}", secs / 60, secs % 60)
    }
}

/// Sanitizes text for display, optionally stripping ANSI escape codes.
///
/// If `strip_ansi` is true, ANSI codes are removed. Invalid UTF-8 sequences are replaced.
pub fn sanitize_text(text: &str, strip_ansi: bool) -> String {
    if !strip_ansi {
        return text.to_string();
    }
    let stripped = strip(text.as_bytes());
    String::from_utf8_lossy(&stripped).to_string()
}

/// Dims `text` with the bright-black ANSI color.
fn gray(text: &str) -> String {
    format!("\u{1b}[90m{}\u{1b}[0m", text)
}

fn strip_existing_prefix(prefix: &str, text: &str) -> String {
    let candidates = [
        format!("[{}] ", prefix),
        format!("[{}]", prefix),
        format!("{}: ", prefix),
    ];
    for candidate in candidates {
        if let Some(rest) = text.strip_prefix(&candidate) {
            return rest.trim_start().to_string();
        }
    }
    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_tagged_with_prefix() {
        let sink = LogSink::new(false, false);
        assert_eq!(sink.format_line("ng", "compiling"), "[ng] compiling");
    }

    #[test]
    fn existing_prefix_is_not_duplicated() {
        let sink = LogSink::new(false, false);
        assert_eq!(sink.format_line("ng", "[ng] compiling"), "[ng] compiling");
        assert_eq!(sink.format_line("lab", "lab: running"), "[lab] running");
    }

    #[test]
    fn ansi_is_stripped_without_colors() {
        let sink = LogSink::new(false, false);
        let line = "\u{1b}[32mCompiled successfully\u{1b}[0m";
        assert_eq!(sink.format_line("ng", line), "[ng] Compiled successfully");
    }

    #[test]
    fn timestamp_precedes_tag() {
        let sink = LogSink::new(false, true);
        assert_eq!(sink.format_line("ng", "x"), "00:00 [ng] x");
    }

    #[test]
    fn colored_prefix_is_gray() {
        let sink = LogSink::new(true, false);
        assert_eq!(
            sink.format_line("ng", "compiled"),
            "\u{1b}[90m[ng]\u{1b}[0m compiled"
        );
    }
}
