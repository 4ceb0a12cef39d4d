//! Batch protocol codec.
//!
//! Pure framing functions shared by every supervisor regardless of which
//! engine it fronts. Nothing here performs I/O.
//!
//! # Framing
//!
//! - Request: lines joined with `\n`, then the request sentinel line, then `\n`.
//! - Response: arbitrary bytes, then the response sentinel as a whole line.
//!
//! With [`SentinelMatch::Line`] a sentinel only counts when it occupies an
//! entire line: it must start the buffer or follow a `\n`, and be followed by
//! `\n` or `\r\n`. Interactive engines that end a response with a prompt
//! (`> ` with no newline) use [`SentinelMatch::Prompt`], where the sentinel
//! only has to start a line. A sentinel that
//! appears inside document content still breaks the framing; requests whose
//! lines equal the request sentinel are rejected up front (see
//! [`sentinel_collision`]), while response content cannot be checked.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default request terminator understood by the bundled engine scripts
pub const DEFAULT_REQUEST_SENTINEL: &str = "####EOD####";

/// Default response terminator printed by the bundled engine scripts
pub const DEFAULT_RESPONSE_SENTINEL: &str = "END";

const LINE_SEPARATOR: u8 = b'\n';

/// How the response sentinel is recognised in the worker's output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentinelMatch {
    /// The sentinel is a complete line of its own
    #[default]
    Line,
    /// The sentinel starts a line; nothing has to follow it
    Prompt,
}

impl SentinelMatch {
    /// Offset of the first sentinel starting at or after `from`.
    pub fn find_end(self, buffer: &[u8], sentinel: &str, from: usize) -> Option<usize> {
        match self {
            Self::Line => find_response_end_from(buffer, sentinel, from),
            Self::Prompt => find_prompt_from(buffer, sentinel, from),
        }
    }

    /// Offset just past the sentinel found at `end`.
    pub fn consumed(self, buffer: &[u8], end: usize, sentinel: &str) -> usize {
        match self {
            Self::Line => response_consumed(buffer, end, sentinel),
            Self::Prompt => {
                let after = (end + sentinel.len()).min(buffer.len());
                if buffer[after..].starts_with(b"\r\n") {
                    after + 2
                } else if buffer[after..].starts_with(b"\n") {
                    after + 1
                } else {
                    after
                }
            }
        }
    }
}

/// One document submitted for analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    lines: Vec<String>,
    byte_len: usize,
}

impl Request {
    /// Build a request from already split lines.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines: Vec<String> = lines.into_iter().map(Into::into).collect();
        let byte_len = lines.iter().map(String::len).sum::<usize>() + lines.len().saturating_sub(1);
        Self { lines, byte_len }
    }

    /// Split a document on `\n` or `\r\n`.
    pub fn from_text(text: &str) -> Self {
        Self::from_lines(text.lines())
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Size of the document body in bytes, separators included.
    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The document body as sent, without the sentinel.
    pub fn body(&self) -> String {
        self.lines.join("\n")
    }
}

/// Bytes read from a worker up to, but excluding, the response sentinel line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePayload(String);

impl ResponsePayload {
    pub fn new(payload: impl Into<String>) -> Self {
        Self(payload.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ResponsePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<&str> for ResponsePayload {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Frame a document for the worker's stdin.
pub fn encode_request(lines: &[String], sentinel: &str) -> Vec<u8> {
    let capacity = lines.iter().map(|l| l.len() + 1).sum::<usize>() + sentinel.len() + 1;
    let mut out = Vec::with_capacity(capacity);
    for line in lines {
        out.extend_from_slice(line.as_bytes());
        out.push(LINE_SEPARATOR);
    }
    out.extend_from_slice(sentinel.as_bytes());
    out.push(LINE_SEPARATOR);
    out
}

/// Index of the first document line that equals the request sentinel.
///
/// Such a line would end the request early on the worker side.
pub fn sentinel_collision(lines: &[String], sentinel: &str) -> Option<usize> {
    lines
        .iter()
        .position(|line| line.trim_end_matches('\r') == sentinel)
}

/// Byte offset where the first complete response sentinel line starts.
pub fn find_response_end(buffer: &[u8], sentinel: &str) -> Option<usize> {
    find_response_end_from(buffer, sentinel, 0)
}

/// Like [`find_response_end`], skipping candidates that start before `from`.
///
/// Lets a poll loop rescan only the tail of a growing buffer.
pub fn find_response_end_from(buffer: &[u8], sentinel: &str, from: usize) -> Option<usize> {
    let needle = sentinel.as_bytes();
    if needle.is_empty() {
        return None;
    }

    let mut cursor = from;
    while cursor < buffer.len() {
        let pos = cursor + find_subslice(&buffer[cursor..], needle)?;
        let at_line_start = pos == 0 || buffer[pos - 1] == LINE_SEPARATOR;
        let rest = &buffer[pos + needle.len()..];
        let line_complete = rest.starts_with(b"\n") || rest.starts_with(b"\r\n");
        if at_line_start && line_complete {
            return Some(pos);
        }
        cursor = pos + 1;
    }
    None
}

/// Offset of the first sentinel at a line start, complete or not.
pub fn find_prompt_from(buffer: &[u8], sentinel: &str, from: usize) -> Option<usize> {
    let needle = sentinel.as_bytes();
    if needle.is_empty() {
        return None;
    }

    let mut cursor = from;
    while cursor < buffer.len() {
        let pos = cursor + find_subslice(&buffer[cursor..], needle)?;
        if pos == 0 || buffer[pos - 1] == LINE_SEPARATOR {
            return Some(pos);
        }
        cursor = pos + 1;
    }
    None
}

/// Payload preceding the sentinel line at `end`.
///
/// The line separator in front of the sentinel belongs to the framing and is
/// dropped, so `"HELLO\nEND\n"` yields `"HELLO"`.
pub fn extract_payload(buffer: &[u8], end: usize) -> &[u8] {
    let payload = &buffer[..end.min(buffer.len())];
    let payload = payload.strip_suffix(b"\n").unwrap_or(payload);
    payload.strip_suffix(b"\r").unwrap_or(payload)
}

/// Byte offset just past the sentinel line starting at `end`.
pub fn response_consumed(buffer: &[u8], end: usize, sentinel: &str) -> usize {
    let after = end + sentinel.len();
    if buffer[after..].starts_with(b"\r\n") {
        after + 2
    } else {
        (after + 1).min(buffer.len())
    }
}

/// Whether `marker` occurs anywhere in `buffer`; an empty marker always does.
pub fn contains_marker(buffer: &[u8], marker: &str) -> bool {
    marker.is_empty() || find_subslice(buffer, marker.as_bytes()).is_some()
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
