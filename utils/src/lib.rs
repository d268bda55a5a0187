use bytes::{Buf, BytesMut};

pub trait ByteParsing {
    fn delimited(&mut self, delimiter: u8) -> Option<BytesMut>;
}

impl ByteParsing for BytesMut {
    fn delimited(&mut self, delimiter: u8) -> Option<BytesMut> {
        let index = self.iter().position(|&b| b == delimiter)?;

        let off = self.split_to(index);
        self.advance(1);

        Some(off)
    }
}

/// Case-insensitive prefix check, ASCII only.
#[must_use]
pub fn starts_with_ignore_ascii_case(haystack: &[u8], prefix: &[u8]) -> bool {
    haystack.len() >= prefix.len() && haystack[..prefix.len()].eq_ignore_ascii_case(prefix)
}
