//! Line framing for the feed body.

/// Accumulates body chunks and yields complete newline-terminated lines.
///
/// A trailing partial line stays buffered until the next chunk completes it
/// or the connection is dropped with [`LineBuffer::clear`].
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
    cursor: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a body chunk.
    pub fn push(&mut self, chunk: &[u8]) {
        if self.cursor > 0 {
            self.pending.drain(..self.cursor);
            self.cursor = 0;
        }
        self.pending.extend_from_slice(chunk);
    }

    /// Returns the next complete line without its terminator.
    pub fn next_line(&mut self) -> Option<String> {
        let rest = &self.pending[self.cursor..];
        let newline = rest.iter().position(|&b| b == b'\n')?;

        let mut line = &rest[..newline];
        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }
        let line = String::from_utf8_lossy(line).into_owned();

        self.cursor += newline + 1;
        Some(line)
    }

    /// Drops any buffered partial line.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.cursor = 0;
    }
}

/// Classification of one feed line.
#[derive(Debug, PartialEq, Eq)]
pub enum Frame<'a> {
    /// Empty separator line.
    Blank,
    /// Line too short to hold the prefix plus a payload.
    Short,
    /// Payload following the fixed-length prefix.
    Payload(&'a str),
}

/// Strips the fixed-length prefix from a line.
pub fn split_frame(line: &str, prefix_len: usize) -> Frame<'_> {
    if line.trim().is_empty() {
        return Frame::Blank;
    }

    match line.get(prefix_len..) {
        Some(payload) if !payload.is_empty() => Frame::Payload(payload),
        _ => Frame::Short,
    }
}
