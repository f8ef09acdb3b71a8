//! Reassembly of partial writes into whole lines.

/// Accumulates raw bytes and yields complete lines.
///
/// A line is only emitted once its `\n` terminator arrived, or when the
/// source closes ([`LineBuffer::finish`]). `\r\n` is treated as `\n`, blank
/// lines are skipped and invalid UTF-8 is replaced. A line longer than
/// `max_line_length` bytes is emitted in `max_line_length` pieces.
pub struct LineBuffer {
    pending: Vec<u8>,
    max_line_length: usize,
}

impl LineBuffer {
    pub fn new(max_line_length: usize) -> Self {
        Self {
            pending: Vec::with_capacity(512),
            max_line_length: max_line_length.max(1),
        }
    }

    /// Append bytes and return every line they complete, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        for &byte in bytes {
            if byte == b'\n' {
                self.take_pending(&mut lines);
                continue;
            }
            self.pending.push(byte);
            if self.pending.len() >= self.max_line_length {
                self.take_pending(&mut lines);
            }
        }

        lines
    }

    /// The source closed: emit what is left, if anything.
    pub fn finish(&mut self) -> Option<String> {
        let mut lines = Vec::with_capacity(1);
        self.take_pending(&mut lines);
        lines.pop()
    }

    /// Bytes waiting for a terminator.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    fn take_pending(&mut self, lines: &mut Vec<String>) {
        if self.pending.last() == Some(&b'\r') {
            self.pending.pop();
        }
        if !self.pending.is_empty() {
            lines.push(String::from_utf8_lossy(&self.pending).into_owned());
        }
        self.pending.clear();
    }
}
