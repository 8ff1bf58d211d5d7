//! WebSocket upgrade handshake and RFC 6455 framing
//!
//! Once a connection upgrades, its read buffer is fed here instead of the
//! HTTP parser. Client frames must be masked; only text messages (and the
//! control frames) are understood. Fragmented text is reassembled
//! internally and surfaced to the delegate as one message.

use crate::{
    http::{request::RequestInfo, response::ResponseInfo, types::StatusCode},
    server::buffer::ReadBuffer,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sha1::{Digest, Sha1};

// RFC 6455 section 4.2 magic GUID for the Sec-WebSocket-Accept digest.
const MAGIC_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-5AB5C0F84F11";

const OP_CONTINUATION: u8 = 0x0;
const OP_TEXT: u8 = 0x1;
const OP_CLOSE: u8 = 0x8;
const OP_PING: u8 = 0x9;
const OP_PONG: u8 = 0xA;

/// Outcome of reading one frame from the connection's buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ParseResult {
    /// Final frame of a text message; the full message is ready.
    OkFinal,
    /// Non-final fragment, buffered internally.
    OkMiddle,
    Ping,
    Pong,
    Incomplete,
    Close,
    Error,
}

/// Per-connection WebSocket state, installed on upgrade.
#[derive(Debug, Default)]
pub(crate) struct WebSocket {
    // Fragments of an in-progress text message.
    partial: String,
    // Pong queued for the last ping; the server flushes it after read.
    control_reply: Option<Vec<u8>>,
}

impl WebSocket {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Builds the `101 Switching Protocols` response for `request`, or
    /// `None` when the handshake key is missing.
    pub(crate) fn accept(&self, request: &RequestInfo) -> Option<Vec<u8>> {
        let key = request.header_value("sec-websocket-key")?;

        let mut response = ResponseInfo::new(StatusCode::SwitchingProtocols);
        response
            .add_header("Upgrade", "websocket")
            .add_header("Connection", "Upgrade")
            .add_header("Sec-WebSocket-Accept", &compute_accept_key(key.trim()));
        Some(response.serialize().into_bytes())
    }

    /// Parses and consumes exactly one client frame from `read_buf`.
    ///
    /// On [`ParseResult::OkFinal`] the reassembled text message is left in
    /// `message`. Ping frames queue a pong retrievable via
    /// [`take_control_reply`](Self::take_control_reply).
    pub(crate) fn read(&mut self, read_buf: &mut ReadBuffer, message: &mut String) -> ParseResult {
        let Some(frame) = parse_frame(read_buf.readable()) else {
            return ParseResult::Incomplete;
        };

        // Frames arriving at a server must be masked (RFC 6455 section 5.1).
        if !frame.masked {
            return ParseResult::Error;
        }
        if frame.opcode & 0x8 != 0 && (!frame.fin || frame.payload_len > 125) {
            return ParseResult::Error;
        }

        let payload_end = frame.payload_offset + frame.payload_len;
        let mut payload = read_buf.readable()[frame.payload_offset..payload_end].to_vec();
        unmask(&mut payload, frame.mask);
        read_buf.did_consume(frame.frame_len);

        match frame.opcode {
            OP_CLOSE => ParseResult::Close,
            OP_PONG => ParseResult::Pong,
            OP_PING => {
                self.control_reply = Some(encode_frame(OP_PONG, &payload));
                ParseResult::Ping
            }
            OP_TEXT | OP_CONTINUATION => {
                let Ok(text) = simdutf8::basic::from_utf8(&payload) else {
                    return ParseResult::Error;
                };
                if frame.opcode == OP_TEXT && !self.partial.is_empty() {
                    // A new text message may not start mid-fragmentation.
                    return ParseResult::Error;
                }

                self.partial.push_str(text);
                if frame.fin {
                    *message = std::mem::take(&mut self.partial);
                    ParseResult::OkFinal
                } else {
                    ParseResult::OkMiddle
                }
            }
            // Binary and reserved opcodes are not supported.
            _ => ParseResult::Error,
        }
    }

    #[inline]
    pub(crate) fn take_control_reply(&mut self) -> Option<Vec<u8>> {
        self.control_reply.take()
    }
}

/// Server-to-client text frame (never masked).
pub(crate) fn encode_text_frame(message: &str) -> Vec<u8> {
    encode_frame(OP_TEXT, message.as_bytes())
}

/// SHA-1(key + magic GUID), base64-encoded.
fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(MAGIC_GUID);
    BASE64.encode(hasher.finalize())
}

struct Frame {
    fin: bool,
    opcode: u8,
    masked: bool,
    mask: [u8; 4],
    payload_offset: usize,
    payload_len: usize,
    frame_len: usize,
}

// Pure offset arithmetic; `None` means the buffer does not yet hold a
// complete frame.
fn parse_frame(buf: &[u8]) -> Option<Frame> {
    if buf.len() < 2 {
        return None;
    }

    let fin = buf[0] & 0x80 != 0;
    let opcode = buf[0] & 0x0F;
    let masked = buf[1] & 0x80 != 0;

    let (payload_len, header_end) = match (buf[1] & 0x7F) as usize {
        len @ 0..=125 => (len, 2),
        126 => {
            if buf.len() < 4 {
                return None;
            }
            (u16::from_be_bytes([buf[2], buf[3]]) as usize, 4)
        }
        _ => {
            if buf.len() < 10 {
                return None;
            }
            let mut raw = [0; 8];
            raw.copy_from_slice(&buf[2..10]);
            (u64::from_be_bytes(raw) as usize, 10)
        }
    };

    let mask_size = if masked { 4 } else { 0 };
    let frame_len = header_end + mask_size + payload_len;
    if buf.len() < frame_len {
        return None;
    }

    let mut mask = [0; 4];
    if masked {
        mask.copy_from_slice(&buf[header_end..header_end + 4]);
    }

    Some(Frame {
        fin,
        opcode,
        masked,
        mask,
        payload_offset: header_end + mask_size,
        payload_len,
        frame_len,
    })
}

#[inline]
fn unmask(payload: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

fn encode_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(10 + payload.len());
    out.push(0x80 | opcode);

    match payload.len() {
        len @ 0..=125 => out.push(len as u8),
        len @ 126..=65535 => {
            out.push(126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        }
        len => {
            out.push(127);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }
    }

    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod web_socket_self {
    use super::*;

    const MASK: [u8; 4] = [0x11, 0x22, 0x33, 0x44];

    fn client_frame(fin: bool, opcode: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(if fin { 0x80 | opcode } else { opcode });

        match payload.len() {
            len @ 0..=125 => out.push(0x80 | len as u8),
            len @ 126..=65535 => {
                out.push(0x80 | 126);
                out.extend_from_slice(&(len as u16).to_be_bytes());
            }
            len => {
                out.push(0x80 | 127);
                out.extend_from_slice(&(len as u64).to_be_bytes());
            }
        }

        out.extend_from_slice(&MASK);
        out.extend(payload.iter().enumerate().map(|(i, b)| b ^ MASK[i % 4]));
        out
    }

    fn buffer_with(bytes: &[u8]) -> ReadBuffer {
        let mut buf = ReadBuffer::default();
        while buf.remaining_capacity() < bytes.len() {
            assert!(buf.increase_capacity());
        }
        buf.writable_tail()[..bytes.len()].copy_from_slice(bytes);
        buf.did_read(bytes.len());
        buf
    }

    #[test]
    fn accept_key_matches_rfc_vector() {
        // RFC 6455 section 4.2.2 example.
        assert_eq!(
            compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn accept_builds_switching_protocols() {
        let mut request = RequestInfo::new();
        request.headers.insert(
            "sec-websocket-key".to_string(),
            "dGhlIHNhbXBsZSBub25jZQ==".to_string(),
        );

        let response = WebSocket::new().accept(&request).unwrap();
        let response = String::from_utf8(response).unwrap();

        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Upgrade: websocket\r\n"));
        assert!(response.contains("Connection: Upgrade\r\n"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(response.ends_with("\r\n\r\n"));
    }

    #[test]
    fn accept_requires_key() {
        assert!(WebSocket::new().accept(&RequestInfo::new()).is_none());
    }

    #[test]
    fn masked_text_round_trip() {
        let mut ws = WebSocket::new();
        let mut buf = buffer_with(&client_frame(true, OP_TEXT, b"hello"));
        let mut message = String::new();

        assert_eq!(ws.read(&mut buf, &mut message), ParseResult::OkFinal);
        assert_eq!(message, "hello");
        assert!(buf.readable().is_empty());
    }

    #[test]
    fn fragmented_message_reassembles() {
        let mut ws = WebSocket::new();
        let mut bytes = client_frame(false, OP_TEXT, b"hel");
        bytes.extend(client_frame(false, OP_CONTINUATION, b"lo "));
        bytes.extend(client_frame(true, OP_CONTINUATION, b"world"));
        let mut buf = buffer_with(&bytes);
        let mut message = String::new();

        assert_eq!(ws.read(&mut buf, &mut message), ParseResult::OkMiddle);
        assert_eq!(ws.read(&mut buf, &mut message), ParseResult::OkMiddle);
        assert_eq!(ws.read(&mut buf, &mut message), ParseResult::OkFinal);
        assert_eq!(message, "hello world");
    }

    #[test]
    fn ping_queues_pong() {
        let mut ws = WebSocket::new();
        let mut buf = buffer_with(&client_frame(true, OP_PING, b"probe"));
        let mut message = String::new();

        assert_eq!(ws.read(&mut buf, &mut message), ParseResult::Ping);
        assert_eq!(ws.take_control_reply(), Some(encode_frame(OP_PONG, b"probe")));
        assert_eq!(ws.take_control_reply(), None);
    }

    #[test]
    fn incomplete_frame_waits() {
        let mut ws = WebSocket::new();
        let frame = client_frame(true, OP_TEXT, b"partial");
        let mut buf = buffer_with(&frame[..frame.len() - 3]);
        let mut message = String::new();

        assert_eq!(ws.read(&mut buf, &mut message), ParseResult::Incomplete);
        // Nothing consumed while waiting for the rest.
        assert_eq!(buf.readable().len(), frame.len() - 3);
    }

    #[test]
    fn rejections() {
        // Unmasked client frame.
        let mut buf = buffer_with(&encode_frame(OP_TEXT, b"nope"));
        let mut message = String::new();
        assert_eq!(
            WebSocket::new().read(&mut buf, &mut message),
            ParseResult::Error
        );

        // Binary opcode.
        let mut buf = buffer_with(&client_frame(true, 0x2, b"\x00\x01"));
        assert_eq!(
            WebSocket::new().read(&mut buf, &mut message),
            ParseResult::Error
        );

        // Invalid UTF-8 in a text frame.
        let mut buf = buffer_with(&client_frame(true, OP_TEXT, &[0xFF, 0xFE]));
        assert_eq!(
            WebSocket::new().read(&mut buf, &mut message),
            ParseResult::Error
        );

        // Fragmented control frame.
        let mut buf = buffer_with(&client_frame(false, OP_PING, b"x"));
        assert_eq!(
            WebSocket::new().read(&mut buf, &mut message),
            ParseResult::Error
        );
    }

    #[test]
    fn close_frame() {
        let mut ws = WebSocket::new();
        let mut buf = buffer_with(&client_frame(true, OP_CLOSE, &[0x03, 0xE8]));
        let mut message = String::new();

        assert_eq!(ws.read(&mut buf, &mut message), ParseResult::Close);
    }

    #[test]
    fn extended_length_encoding() {
        let long = "x".repeat(200);
        let frame = encode_text_frame(&long);
        assert_eq!(frame[1], 126);
        assert_eq!(u16::from_be_bytes([frame[2], frame[3]]) as usize, 200);

        let huge = "y".repeat(70_000);
        let frame = encode_text_frame(&huge);
        assert_eq!(frame[1], 127);
    }
}
