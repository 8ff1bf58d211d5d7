//! HTTP request prelude parser
//!
//! A small state machine that walks the request line and headers byte by
//! byte. It is re-run from the start of the read buffer every time more
//! data arrives, so it keeps no state between calls; the cost only matters
//! for very large uploads, which are bounded elsewhere.
//!
//! Known issues, kept for wire compatibility with the clients this server
//! is driven by:
//! - exactly one space is expected between method/URL and URL/protocol;
//! - obs-folded (continuation-line) headers are not supported;
//! - a header line without a colon terminates the prelude early, and `\n`
//!   is accepted between header lines while the final terminator also
//!   accepts `\r\n` sequences produced via the CR column.

use crate::http::{request::RequestInfo, types::to_lower_case};
use std::{collections::btree_map::Entry, mem};
use tracing::error;

/// Outcome of one parse pass over the unconsumed read buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ParseStatus {
    /// A full prelude; the body starts at this offset.
    Complete(usize),
    /// Ran out of bytes mid-prelude. Retry once more data arrives.
    Incomplete,
    /// Invalid syntax, a null byte, or an unsupported protocol token.
    Invalid,
}

// Parser states.
#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    Method,    // Receiving the method
    Url,       // Receiving the URL
    Proto,     // Receiving the protocol
    Header,    // Starting a request header
    Name,      // Receiving a header name
    Separator, // Between header name and value
    Value,     // Receiving a header value
    Done,      // Parsing is complete and successful
    Err,       // Invalid syntax encountered
}

// Input character classes, in column order: LWS, CR, LF, COLON, DEFAULT.
#[inline(always)]
const fn input_class(byte: u8) -> usize {
    match byte {
        b' ' | b'\t' => 0,
        b'\r' => 1,
        b'\n' => 2,
        b':' => 3,
        _ => 4,
    }
}

// State transition table. Rows are the current state, columns the input
// class. Accumulating states collect the current token implicitly: the
// token is the byte range since the last transition.
#[rustfmt::skip]
const TRANSITIONS: [[State; 5]; 9] = {
    use State::*;
    [
        /* METHOD    */ [Url,       Err,    Err,  Err,   Method],
        /* URL       */ [Proto,     Err,    Err,  Url,   Url],
        /* PROTO     */ [Err,       Header, Name, Err,   Proto],
        /* HEADER    */ [Err,       Err,    Name, Err,   Err],
        /* NAME      */ [Separator, Done,   Err,  Value, Name],
        /* SEPARATOR */ [Separator, Err,    Err,  Value, Err],
        /* VALUE     */ [Value,     Header, Name, Value, Value],
        /* DONE      */ [Err,       Err,    Done, Err,   Err],
        /* ERR       */ [Err,       Err,    Err,  Err,   Err],
    ]
};

#[inline(always)]
fn trim_leading(mut bytes: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = bytes {
        if !matches!(first, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c) {
            break;
        }
        bytes = rest;
    }
    bytes
}

#[inline(always)]
fn lossy(token: &[u8]) -> String {
    String::from_utf8_lossy(token).into_owned()
}

/// Parses a request prelude from the start of `data` into `request`.
///
/// Always restarts from scratch, so parsing a prefix that comes back
/// [`ParseStatus::Incomplete`] and later re-parsing the grown buffer is
/// equivalent to parsing the whole input at once.
pub(crate) fn parse(data: &[u8], request: &mut RequestInfo) -> ParseStatus {
    let mut state = State::Method;
    let mut token_start = 0;
    let mut header_name = String::new();

    for (pos, &byte) in data.iter().enumerate() {
        if byte == 0 {
            // Field strings are assumed null-free everywhere downstream.
            return ParseStatus::Invalid;
        }

        let next_state = TRANSITIONS[state as usize][input_class(byte)];
        if next_state == State::Err {
            return ParseStatus::Invalid;
        }

        if next_state != state {
            let token = &data[token_start..pos];
            token_start = pos + 1; // Skip the whitespace or separator.

            match state {
                State::Method => request.method = lossy(token),
                State::Url => request.path = lossy(token),
                State::Proto => {
                    if token != b"HTTP/1.1" {
                        error!(
                            protocol = %String::from_utf8_lossy(token),
                            "cannot handle request protocol"
                        );
                        return ParseStatus::Invalid;
                    }
                }
                State::Name => {
                    let mut name = token.to_vec();
                    to_lower_case(&mut name);
                    header_name = lossy(&name);
                }
                State::Value => {
                    let value = trim_leading(token);
                    match request.headers.entry(mem::take(&mut header_name)) {
                        Entry::Vacant(slot) => {
                            slot.insert(lossy(value));
                        }
                        Entry::Occupied(mut slot) => {
                            let joined = slot.get_mut();
                            joined.push(',');
                            joined.push_str(&lossy(value));
                        }
                    }
                }
                _ => {}
            }

            state = next_state;
        } else if state == State::Done {
            // This LF terminates the prelude; the body starts right after.
            return ParseStatus::Complete(pos + 1);
        }
    }

    ParseStatus::Incomplete
}
