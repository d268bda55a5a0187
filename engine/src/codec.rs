use asynchronous_codec::{Decoder, Encoder};
use bytes::BytesMut;

use smtpsift_common::encoding::WireMessage;
use smtpsift_common::Line;

use crate::Error;

/// Frames raw smtp traffic into [`Line`] chunks and encodes outgoing
/// [`WireMessage`]s.
///
/// Lines longer than `max_line_length` are handed out in chunks of
/// that size, with `starts_fresh` marking the first chunk. A `\r`
/// sitting at the end of a chunk is held back, so a `\r\n` terminator
/// is never split across two chunks.
#[derive(Debug, Clone)]
pub(crate) struct SmtpLineCodec {
    max_line_length: usize,
    next_starts_fresh: bool,
}

impl SmtpLineCodec {
    pub(crate) fn new(max_line_length: usize) -> Self {
        Self {
            max_line_length,
            next_starts_fresh: true,
        }
    }

    /// Split off `len` framed bytes and track line state for the next
    /// chunk.
    fn emit(&mut self, src: &mut BytesMut, len: usize) -> Line {
        let bytes = src.split_to(len);

        let starts_fresh = self.next_starts_fresh;
        self.next_starts_fresh = bytes.last() == Some(&b'\n');

        Line::new(bytes, starts_fresh)
    }
}

impl Decoder for SmtpLineCodec {
    type Item = Line;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let window = src.len().min(self.max_line_length);

        if let Some(position) = src[..window].iter().position(|&b| b == b'\n') {
            return Ok(Some(self.emit(src, position + 1)));
        }

        if src.len() < self.max_line_length {
            // Not a full line and not a full buffer yet.
            return Ok(None);
        }

        // Over-long line: hand out a buffer-sized chunk. Keep a
        // trailing `\r` back, it may be the first half of the
        // terminator.
        let mut len = window;
        if src[len - 1] == b'\r' {
            len -= 1;
        }

        if len == 0 {
            return Ok(None);
        }

        Ok(Some(self.emit(src, len)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }

        if src.is_empty() {
            return Ok(None);
        }

        // Unterminated tail. Nothing can follow a trailing `\r` now,
        // so it is dropped instead of held back.
        let mut len = src.len().min(self.max_line_length);
        if src[len - 1] == b'\r' {
            len -= 1;
        }

        if len == 0 {
            src.clear();
            return Ok(None);
        }

        Ok(Some(self.emit(src, len)))
    }
}

impl Encoder for SmtpLineCodec {
    type Item<'i> = &'i WireMessage;
    type Error = Error;

    fn encode(&mut self, item: &WireMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.wire_len());
        item.write(dst);
        Ok(())
    }
}
