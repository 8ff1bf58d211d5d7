//! Core QUIC wire types and the framing seams the CHLO probe drives.

use std::fmt;

/// 64-bit gQUIC connection id.
pub type QuicConnectionId = u64;

/// Four-character tag, stored little-endian the way it travels on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QuicTag(pub u32);

impl QuicTag {
    #[inline]
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(u32::from_le_bytes(bytes))
    }

    #[inline]
    pub const fn to_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

impl fmt::Display for QuicTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.to_bytes() {
            match byte {
                0x20..=0x7E => write!(f, "{}", byte as char)?,
                _ => write!(f, "\\x{byte:02x}")?,
            }
        }
        Ok(())
    }
}

/// Tag opening every client hello.
pub const TAG_CHLO: QuicTag = QuicTag::new(*b"CHLO");

/// One entry of a supported-version list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedVersion {
    pub transport_version: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Perspective {
    Client,
    Server,
}

/// Unauthenticated public packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketHeader {
    pub destination_connection_id: QuicConnectionId,
    pub version: Option<ParsedVersion>,
    pub packet_number: u64,
}

/// A stream frame carved out of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFrame<'a> {
    pub stream_id: u32,
    pub fin: bool,
    pub offset: u64,
    pub data: &'a [u8],
}

/// Stream reserved for handshake messages in the gQUIC variant.
pub const CRYPTO_STREAM_ID: u32 = 0;

/// Packet-level events surfaced by a [`PacketFramer`].
///
/// Defaults treat every event as benign so a visitor overrides only what
/// it cares about. Returning `false` aborts packet processing.
pub trait FrameVisitor {
    fn on_unauthenticated_public_header(&mut self, _header: &PacketHeader) -> bool {
        true
    }

    fn on_packet_header(&mut self, _header: &PacketHeader) -> bool {
        true
    }

    fn on_stream_frame(&mut self, _frame: &StreamFrame<'_>) -> bool {
        true
    }

    fn on_ack_frame(&mut self) -> bool {
        true
    }

    fn on_ping_frame(&mut self) -> bool {
        true
    }

    fn on_padding_frame(&mut self) -> bool {
        true
    }

    fn on_connection_close_frame(&mut self) -> bool {
        true
    }

    /// The packet names a version the framer does not speak; `true`
    /// accepts it anyway.
    fn on_protocol_version_mismatch(&mut self, _version: ParsedVersion) -> bool {
        false
    }

    fn on_error(&mut self) {}
}

/// Packet-parsing boundary.
///
/// Decrypting and walking the packet belongs to the surrounding QUIC
/// stack; the probe in this crate only needs something that can drive a
/// [`FrameVisitor`] over a single packet from the server's perspective.
pub trait PacketFramer {
    fn new(supported_versions: Vec<ParsedVersion>, perspective: Perspective) -> Self
    where
        Self: Sized;

    /// Walks one encrypted packet. `false` on any parse failure or
    /// visitor rejection.
    fn process_packet(&mut self, packet: &[u8], visitor: &mut dyn FrameVisitor) -> bool;
}

#[cfg(test)]
mod types_self {
    use super::*;

    #[test]
    fn tag_round_trip() {
        let tag = QuicTag::new(*b"CHLO");
        assert_eq!(tag.to_bytes(), *b"CHLO");
        assert_eq!(tag, TAG_CHLO);
        assert_eq!(tag.to_string(), "CHLO");
    }

    #[test]
    fn tag_display_escapes_non_printable() {
        assert_eq!(QuicTag::new(*b"VER\0").to_string(), "VER\\x00");
    }
}
