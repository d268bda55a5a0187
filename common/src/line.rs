use bytes::BytesMut;

/// One framed chunk of peer input, at most one logical line.
///
/// A `Line` normally ends with its `\n` terminator. Two exceptions: the
/// tail of the stream (no terminator arrived before EOF), and over-long
/// input, which is handed out in buffer-sized chunks. `starts_fresh`
/// distinguishes the start of a logical line from the broken-off
/// remainder of a previous chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// The raw bytes, terminator included when one was seen.
    pub bytes: BytesMut,
    /// Whether this chunk begins a logical line.
    pub starts_fresh: bool,
}

impl Line {
    /// Bundle up framed bytes.
    #[must_use]
    pub fn new(bytes: BytesMut, starts_fresh: bool) -> Self {
        Self {
            bytes,
            starts_fresh,
        }
    }

    /// First byte of the chunk, if any.
    #[must_use]
    pub fn first_byte(&self) -> Option<u8> {
        self.bytes.first().copied()
    }

    /// Whether the chunk carries its `\n` terminator.
    #[must_use]
    pub fn ends_line(&self) -> bool {
        self.bytes.last() == Some(&b'\n')
    }
}
