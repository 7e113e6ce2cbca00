//! Reassembles SSE event blocks from arbitrarily chunked bytes.

/// Blank line terminating one event block.
pub const EVENT_SEPARATOR: &[u8] = b"\n\n";

/// The text of one event, without its terminating blank line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEventBlock(String);

impl RawEventBlock {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<&str> for RawEventBlock {
    fn from(text: &str) -> Self {
        Self(text.to_string())
    }
}

/// Buffers incoming bytes and splits off complete event blocks.
///
/// The buffer holds raw bytes so a multi-byte character split across two
/// appends is decoded intact. Data after the last separator stays buffered;
/// nothing flushes it when the stream ends.
#[derive(Debug, Default)]
pub struct ByteAccumulator {
    buffer: Vec<u8>,
}

impl ByteAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return every block completed by them, in order.
    pub fn append(&mut self, bytes: &[u8]) -> Vec<RawEventBlock> {
        self.buffer.extend_from_slice(bytes);

        let mut blocks = Vec::new();
        let mut start = 0;
        while let Some(pos) = find_separator(&self.buffer[start..]) {
            let end = start + pos;
            blocks.push(RawEventBlock(
                String::from_utf8_lossy(&self.buffer[start..end]).into_owned(),
            ));
            start = end + EVENT_SEPARATOR.len();
        }
        if start > 0 {
            self.buffer.drain(..start);
        }
        blocks
    }

    /// Bytes of the trailing, not yet terminated block.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop whatever is buffered; returns how many bytes were discarded.
    pub fn clear(&mut self) -> usize {
        let dropped = self.buffer.len();
        self.buffer.clear();
        dropped
    }
}

fn find_separator(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(EVENT_SEPARATOR.len())
        .position(|window| window == EVENT_SEPARATOR)
}
