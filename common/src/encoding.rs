//! Wire representation of what the proxy itself sends.
//!
//! Besides relaying raw lines, the proxy synthesizes SMTP replies for
//! the client and bare verbs for the output server. [`WireMessage`]
//! covers all three so one encoder handles every outgoing frame.

use std::fmt;

use bytes::{BufMut, BytesMut};

/// Longest reply text the proxy will put on the wire, in bytes.
pub const MAX_REPLY_TEXT: usize = 200;

/// Truncate `text` to at most `max` bytes, respecting char boundaries.
pub fn clamp(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }

    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}

/// An outgoing frame: relayed bytes, a synthesized reply, or a verb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// Bytes relayed as-is, terminator included.
    Raw(BytesMut),
    /// A reply synthesized by the proxy.
    Reply(Reply),
    /// A command verb synthesized by the proxy.
    Verb(Verb),
}

impl WireMessage {
    /// Append the encoded frame to `dst`.
    pub fn write(&self, dst: &mut BytesMut) {
        match self {
            Self::Raw(bytes) => dst.put_slice(bytes),
            Self::Reply(reply) => {
                dst.put_slice(reply.to_string().as_bytes());
                dst.put_slice(b"\r\n");
            }
            Self::Verb(verb) => dst.put_slice(verb.as_wire()),
        }
    }

    /// Encoded length in bytes.
    #[must_use]
    pub fn wire_len(&self) -> usize {
        match self {
            Self::Raw(bytes) => bytes.len(),
            // code, space, text, CRLF
            Self::Reply(reply) => 4 + reply.text.len() + 2,
            Self::Verb(verb) => verb.as_wire().len(),
        }
    }
}

impl From<BytesMut> for WireMessage {
    fn from(bytes: BytesMut) -> Self {
        Self::Raw(bytes)
    }
}

impl From<Reply> for WireMessage {
    fn from(reply: Reply) -> Self {
        Self::Reply(reply)
    }
}

impl From<Verb> for WireMessage {
    fn from(verb: Verb) -> Self {
        Self::Verb(verb)
    }
}

/// A single-line SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// The three-digit status code.
    pub code: u16,
    /// The human-readable text, at most [`MAX_REPLY_TEXT`] bytes.
    pub text: String,
}

impl Reply {
    /// Build a reply, clamping over-long text.
    #[must_use]
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        let mut text = text.into();
        clamp(&mut text, MAX_REPLY_TEXT);

        Self { code, text }
    }

    /// Build the rejection reply for a filter-supplied reason.
    ///
    /// A reason that already leads with an SMTP status (three digits
    /// starting 2-5, then a space) is used verbatim; any other reason
    /// becomes the text of a `554`. No reason at all yields a generic
    /// `554 Content rejected`.
    #[must_use]
    pub fn rejection(reason: Option<&str>) -> Self {
        let Some(reason) = reason else {
            return Self::new(554, "Content rejected");
        };

        if let Some((code, text)) = split_status_line(reason) {
            return Self::new(code, text);
        }

        Self::new(554, reason)
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03} {}", self.code, self.text)
    }
}

/// Split `reason` into status code and text, if it leads with one.
fn split_status_line(reason: &str) -> Option<(u16, &str)> {
    let bytes = reason.as_bytes();

    if bytes.len() < 4
        || !(b'2'..=b'5').contains(&bytes[0])
        || !bytes[1].is_ascii_digit()
        || !bytes[2].is_ascii_digit()
        || bytes[3] != b' '
    {
        return None;
    }

    let code = reason[..3].parse().ok()?;

    Some((code, &reason[4..]))
}

/// Bare command verbs the proxy sends to the output server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    /// Start the message content phase.
    Data,
    /// Keep the connection alive.
    Noop,
    /// Abort the current transaction.
    Rset,
    /// Close the session.
    Quit,
}

impl Verb {
    /// The verb's wire form, CRLF included.
    #[must_use]
    pub fn as_wire(self) -> &'static [u8] {
        match self {
            Self::Data => b"DATA\r\n",
            Self::Noop => b"NOOP\r\n",
            Self::Rset => b"RSET\r\n",
            Self::Quit => b"QUIT\r\n",
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::none(None, 554, "Content rejected")]
    #[case::plain(Some("Spam detected"), 554, "Spam detected")]
    #[case::empty(Some(""), 554, "")]
    #[case::verbatim(Some("552 Message too large"), 552, "Message too large")]
    #[case::bad_first_digit(Some("152 Nope"), 554, "152 Nope")]
    #[case::missing_space(Some("552-Message too large"), 554, "552-Message too large")]
    fn rejection_replies(#[case] reason: Option<&str>, #[case] code: u16, #[case] text: &str) {
        assert_eq!(Reply::rejection(reason), Reply::new(code, text));
    }

    #[test]
    fn reply_text_is_clamped() {
        let reply = Reply::new(554, "y".repeat(300));

        assert_eq!(reply.text.len(), MAX_REPLY_TEXT);
    }

    #[test]
    fn clamp_respects_char_boundaries() {
        let mut text = "ab\u{00e9}".to_string();
        clamp(&mut text, 3);

        assert_eq!(text, "ab");
    }

    #[rstest]
    #[case::reply(Reply::new(354, "End data with <CR><LF>.<CR><LF>").into(), b"354 End data with <CR><LF>.<CR><LF>\r\n".as_slice())]
    #[case::verb(Verb::Rset.into(), b"RSET\r\n".as_slice())]
    #[case::raw(BytesMut::from(&b"EHLO mx\r\n"[..]).into(), b"EHLO mx\r\n".as_slice())]
    fn wire_encoding(#[case] message: WireMessage, #[case] expected: &[u8]) {
        let mut dst = BytesMut::new();
        message.write(&mut dst);

        assert_eq!(&dst[..], expected);
        assert_eq!(message.wire_len(), expected.len());
    }
}
