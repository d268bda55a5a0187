//! Classification of client-origin command lines.
//!
//! The proxy only inspects the handful of commands that drive its own
//! state: `DATA`, `XFORWARD`, `MAIL FROM` and `RCPT TO`. Everything
//! else is relayed untouched.

use bytes::BytesMut;
use smtpsift_utils::{starts_with_ignore_ascii_case, ByteParsing};

use crate::{Line, MAX_ATTR_LEN};

/// A client command line, as far as the proxy cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// `DATA`, the client wants to transmit message content.
    DataStart,
    /// `XFORWARD`, upstream forwarding attributes.
    XForward(XForward),
    /// `MAIL FROM:<...>` with the enclosed address, if one was found.
    MailFrom(Option<String>),
    /// `RCPT TO:<...>` with the enclosed address, if one was found.
    RcptTo(Option<String>),
    /// Anything else; relayed without interpretation.
    Other,
}

impl ClientCommand {
    /// Classify a framed client line.
    ///
    /// Chunks that continue an over-long line are never commands. The
    /// verb match is ASCII case-insensitive; `DATA` must be the whole
    /// line for the proxy to treat it as the start of message content.
    #[must_use]
    pub fn classify(line: &Line) -> Self {
        if !line.starts_fresh {
            return Self::Other;
        }

        let bytes = &line.bytes[..];

        if bytes.len() > 4
            && starts_with_ignore_ascii_case(bytes, b"DATA")
            && (bytes[4] == b'\r' || bytes[4] == b'\n')
        {
            return Self::DataStart;
        }

        if starts_with_ignore_ascii_case(bytes, b"XFORWARD ") {
            return Self::XForward(XForward::parse(&bytes[9..]));
        }

        if starts_with_ignore_ascii_case(bytes, b"MAIL FROM:") {
            return Self::MailFrom(extract_address(&bytes[10..]));
        }

        if starts_with_ignore_ascii_case(bytes, b"RCPT TO:") {
            return Self::RcptTo(extract_address(&bytes[8..]));
        }

        Self::Other
    }
}

/// Attributes carried by an `XFORWARD` command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XForward {
    /// `ADDR=` value, the address of the original client.
    pub addr: Option<String>,
    /// `HELO=` value, the original HELO/EHLO name.
    pub helo: Option<String>,
}

impl XForward {
    /// Pull `ADDR=` and `HELO=` attributes out of the command arguments.
    ///
    /// Attribute keys are matched case-sensitively, as Postfix emits
    /// them. Empty values are ignored; the first non-empty value of
    /// each attribute on the line wins.
    #[must_use]
    pub fn parse(args: &[u8]) -> Self {
        let mut parsed = Self::default();

        for word in args.split(|b| b.is_ascii_whitespace()) {
            if let Some(value) = word.strip_prefix(b"ADDR=") {
                if !value.is_empty() && parsed.addr.is_none() {
                    parsed.addr = Some(capped_string(value));
                }
            } else if let Some(value) = word.strip_prefix(b"HELO=") {
                if !value.is_empty() && parsed.helo.is_none() {
                    parsed.helo = Some(capped_string(value));
                }
            }
        }

        parsed
    }
}

/// Extract the address between the first `<` and the first `>`.
///
/// A `>` before any `<` bounds the search, matching a left-to-right
/// scan of the line. An empty pair yields the null reverse-path `<>`;
/// a line without `<` yields nothing.
fn extract_address(args: &[u8]) -> Option<String> {
    let mut buf = BytesMut::from(args);

    let mut scope = buf.delimited(b'>').unwrap_or(buf);
    scope.delimited(b'<')?;

    if scope.is_empty() {
        return Some("<>".to_string());
    }

    Some(capped_string(&scope))
}

/// Lossy UTF-8 conversion, truncated to [`MAX_ATTR_LEN`] bytes first.
fn capped_string(value: &[u8]) -> String {
    let end = value.len().min(MAX_ATTR_LEN);

    String::from_utf8_lossy(&value[..end]).into_owned()
}
