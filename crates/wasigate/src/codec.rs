//! Boundary codec: the textual HTTP/1.1 head framing carried inside guest
//! buffers.
//!
//! ## Wire Layout
//!
//! ```text
//! request:  METHOD SP PATH[?QUERY] SP HTTP/1.1 CRLF
//!           key: value (CRLF key: value)*
//!           CRLF CRLF
//!           body bytes
//!
//! response: HTTP/d.d SP ddd SP status text CRLF
//!           key: value (CRLF key: value)*
//!           CRLF CRLF
//!           body bytes
//! ```
//!
//! Body length is never taken from a header: the body is whatever follows the
//! first `CRLF CRLF`. Nothing here performs I/O or touches guest memory.

use crate::message::{Headers, Request, Response};

const CRLF: &str = "\r\n";
const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Outcome of decoding a guest reply.
///
/// The public contract always yields a [`Response`]; keeping the malformed
/// case explicit lets callers and tests see which path was taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A well-formed reply
    Response(Response),
    /// No head terminator or an unparseable status line; carries the whole
    /// original input
    Malformed(Vec<u8>),
}

impl Decoded {
    /// Collapse into a response, mapping malformed replies to `502 Bad Gateway`
    pub fn into_response(self) -> Response {
        match self {
            Decoded::Response(resp) => resp,
            Decoded::Malformed(raw) => Response::bad_gateway(raw),
        }
    }

    /// Whether the reply failed to decode
    pub fn is_malformed(&self) -> bool {
        matches!(self, Decoded::Malformed(_))
    }
}

/// Render a request into the bytes handed to the guest.
pub fn encode_request(request: &Request) -> Vec<u8> {
    let header_lines: Vec<String> = request
        .headers()
        .iter()
        .map(|(k, v)| format!("{}: {}", k, v))
        .collect();

    let head = format!(
        "{} {}{} HTTP/1.1{}{}{}{}",
        request.method(),
        request.path(),
        request.query(),
        CRLF,
        header_lines.join(CRLF),
        CRLF,
        CRLF,
    );

    let mut payload = Vec::with_capacity(head.len() + request.body().len());
    payload.extend_from_slice(head.as_bytes());
    payload.extend_from_slice(request.body());
    payload
}

/// Decode guest output, keeping the malformed case explicit.
pub fn decode(raw: &[u8]) -> Decoded {
    let Some(end) = find_head_end(raw) else {
        return Decoded::Malformed(raw.to_vec());
    };

    let head = &raw[..end];
    let head = String::from_utf8_lossy(head.strip_prefix(UTF8_BOM).unwrap_or(head));
    let body = raw[end + HEAD_TERMINATOR.len()..].to_vec();

    let mut lines = head.split(CRLF);
    let status_line = lines.next().unwrap_or_default();
    let Some((status, status_text)) = parse_status_line(status_line) else {
        return Decoded::Malformed(raw.to_vec());
    };

    let headers = lines.filter_map(parse_header_line).collect::<Headers>();

    Decoded::Response(Response::new(status, status_text.to_string(), headers, body))
}

/// Decode guest output into a response, falling back to `502 Bad Gateway`.
pub fn decode_response(raw: &[u8]) -> Response {
    decode(raw).into_response()
}

/// Offset of the first `CRLF CRLF`, if any.
fn find_head_end(raw: &[u8]) -> Option<usize> {
    raw.windows(HEAD_TERMINATOR.len())
        .position(|w| w == HEAD_TERMINATOR)
}

/// Match `HTTP/<d>.<d> <ddd> <rest>`, returning the code and the rest verbatim.
fn parse_status_line(line: &str) -> Option<(u16, &str)> {
    let rest = line.strip_prefix("HTTP/")?;
    let bytes = rest.as_bytes();

    // "d.d ddd " is 8 bytes, all ASCII
    if bytes.len() < 8 {
        return None;
    }
    let version_ok = bytes[0].is_ascii_digit() && bytes[1] == b'.' && bytes[2].is_ascii_digit();
    let code = &bytes[4..7];
    if !version_ok || bytes[3] != b' ' || !code.iter().all(u8::is_ascii_digit) || bytes[7] != b' ' {
        return None;
    }

    let text = &rest[8..];
    if text.contains(['\r', '\n', '\u{2028}', '\u{2029}']) {
        return None;
    }

    let status = code
        .iter()
        .fold(0u16, |acc, d| acc * 10 + u16::from(d - b'0'));
    Some((status, text))
}

/// Split at the first colon; lines without one are dropped.
fn parse_header_line(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(':')?;
    Some((key, value.trim_start_matches(is_value_padding)))
}

/// Leading padding stripped from header values: Unicode white space and
/// U+FEFF, but not NEL (U+0085).
fn is_value_padding(c: char) -> bool {
    c == '\u{FEFF}' || (c.is_whitespace() && c != '\u{85}')
}
