//! Command output capture
//!
//! Provides:
//! - Line-by-line capture of a command's merged stdout/stderr
//! - Real-time streaming to subscribers
//! - A byte cap that keeps the tail of long outputs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Broadcast channel capacity
const BROADCAST_CAPACITY: usize = 1000;

/// Kind of captured line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputKind {
    /// Output produced by the command
    Output,
    /// Messages from the session itself (channel errors, shutdown)
    System,
}

impl OutputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKind::Output => "output",
            OutputKind::System => "system",
        }
    }
}

/// A single captured line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputLine {
    pub timestamp: DateTime<Utc>,
    pub kind: OutputKind,
    pub content: String,
    /// 1-based line number within the command's output
    pub line_number: usize,
}

impl OutputLine {
    pub fn format_for_analysis(&self) -> String {
        format!(
            "[{}] [{}] L{}: {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.kind.as_str(),
            self.line_number,
            self.content
        )
    }
}

/// Output buffer for a single command
#[derive(Debug)]
pub struct OutputBuffer {
    /// Captured text, newline-terminated lines
    data: String,

    /// Bytes to retain
    max_bytes: usize,

    /// Whether older output was dropped
    truncated: bool,

    line_count: usize,

    tx: broadcast::Sender<OutputLine>,
}

impl OutputBuffer {
    pub fn new(max_bytes: usize) -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            data: String::new(),
            max_bytes: max_bytes.max(1),
            truncated: false,
            line_count: 0,
            tx,
        }
    }

    /// Append one line of command output
    pub fn push_output(&mut self, content: impl Into<String>) {
        let content = content.into();
        self.data.push_str(&content);
        self.data.push('\n');

        // Let the buffer grow to 2x the limit before compacting
        if self.data.len() > self.max_bytes * 2 {
            let start = tail_start(&self.data, self.max_bytes);
            self.data.drain(..start);
            self.truncated = true;
        }

        self.broadcast(OutputKind::Output, content);
    }

    /// Publish a session message; it is streamed but not part of `text()`
    pub fn push_system(&mut self, content: impl Into<String>) {
        self.broadcast(OutputKind::System, content.into());
    }

    fn broadcast(&mut self, kind: OutputKind, content: String) {
        self.line_count += 1;
        let _ = self.tx.send(OutputLine {
            timestamp: Utc::now(),
            kind,
            content,
            line_number: self.line_count,
        });
    }

    /// Captured output, at most `max_bytes` from the tail
    pub fn text(&self) -> String {
        if self.data.len() <= self.max_bytes {
            return self.data.clone();
        }
        self.data[tail_start(&self.data, self.max_bytes)..].to_string()
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated || self.data.len() > self.max_bytes
    }

    pub fn line_count(&self) -> usize {
        self.line_count
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutputLine> {
        self.tx.subscribe()
    }
}

/// Byte offset keeping at most `max_bytes` of `data`'s tail, on a char boundary
fn tail_start(data: &str, max_bytes: usize) -> usize {
    let mut start = data.len().saturating_sub(max_bytes);
    while !data.is_char_boundary(start) {
        start += 1;
    }
    start
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_text() {
        let mut buffer = OutputBuffer::new(1024);
        buffer.push_output("hello");
        buffer.push_output("world");
        assert_eq!(buffer.text(), "hello\nworld\n");
        assert_eq!(buffer.line_count(), 2);
        assert!(!buffer.is_truncated());
    }

    #[test]
    fn test_truncation_keeps_tail() {
        let mut buffer = OutputBuffer::new(8);
        for i in 0..10 {
            buffer.push_output(format!("line{}", i));
        }
        let text = buffer.text();
        assert!(text.len() <= 8);
        assert!(text.ends_with("line9\n"));
        assert!(buffer.is_truncated());
    }

    #[test]
    fn test_truncation_respects_utf8() {
        let mut buffer = OutputBuffer::new(5);
        buffer.push_output("ééééééé");
        // Must not panic on a split multi-byte char
        let text = buffer.text();
        assert!(text.len() <= 5);
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn test_system_lines_are_streamed_not_captured() {
        let mut buffer = OutputBuffer::new(64);
        let mut rx = buffer.subscribe();
        buffer.push_system("session closed");
        buffer.push_output("data");

        let first = rx.try_recv().unwrap();
        assert_eq!(first.kind, OutputKind::System);
        let second = rx.try_recv().unwrap();
        assert_eq!(second.content, "data");
        assert_eq!(second.line_number, 2);
        assert_eq!(buffer.text(), "data\n");
    }
}
