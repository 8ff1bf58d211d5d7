//! Stateless client-hello probe
//!
//! A QUIC dispatcher wants to know, before creating any per-connection
//! state, whether the first packet of a new connection carries a client
//! hello it can act on. [`ChloExtractor::extract`] walks a single packet
//! with a throwaway visitor and reports what it found; it owns nothing
//! and leaves no trace beyond the delegate call.

use crate::quic::{
    crypto_framer::{CryptoFramer, HandshakeMessage},
    types::{
        FrameVisitor, PacketFramer, PacketHeader, ParsedVersion, Perspective, QuicConnectionId,
        QuicTag, StreamFrame, CRYPTO_STREAM_ID, TAG_CHLO,
    },
};

/// Receiver of extracted client hellos.
pub trait ChloDelegate {
    fn on_chlo(
        &mut self,
        transport_version: u32,
        connection_id: QuicConnectionId,
        chlo: &HandshakeMessage,
    );
}

struct ChloFramerVisitor<'a> {
    supported_versions: &'a [ParsedVersion],
    create_session_tag_indicators: &'a [QuicTag],
    delegate: Option<&'a mut dyn ChloDelegate>,
    found_chlo: bool,
    chlo_contains_tags: bool,
    connection_id: QuicConnectionId,
    transport_version: u32,
}

impl ChloFramerVisitor<'_> {
    fn on_handshake_message(&mut self, message: &HandshakeMessage) {
        if let Some(delegate) = self.delegate.as_deref_mut() {
            delegate.on_chlo(self.transport_version, self.connection_id, message);
        }
        self.found_chlo = true;
    }
}

impl FrameVisitor for ChloFramerVisitor<'_> {
    fn on_unauthenticated_public_header(&mut self, header: &PacketHeader) -> bool {
        self.connection_id = header.destination_connection_id;
        if let Some(version) = header.version {
            self.transport_version = version.transport_version;
        }
        true
    }

    fn on_protocol_version_mismatch(&mut self, version: ParsedVersion) -> bool {
        self.supported_versions.contains(&version)
    }

    fn on_stream_frame(&mut self, frame: &StreamFrame<'_>) -> bool {
        if frame.stream_id == CRYPTO_STREAM_ID
            && frame.offset == 0
            && frame.data.starts_with(&TAG_CHLO.to_bytes())
        {
            let mut crypto_framer = CryptoFramer::new();
            if !crypto_framer.process_input(frame.data) {
                return false;
            }

            if let Some(message) = crypto_framer.message_if_complete() {
                self.on_handshake_message(&message);
            } else {
                // Partial hello: see whether the tags it announces are
                // enough for the dispatcher to create a session anyway.
                for tag in self.create_session_tag_indicators {
                    if crypto_framer.has_tag(*tag) {
                        self.chlo_contains_tags = true;
                    }
                }
                if self.chlo_contains_tags && self.delegate.is_some() {
                    // The full hello never arrived, so hand the delegate
                    // whatever material made it into this packet.
                    let forced = crypto_framer.force_handshake();
                    self.on_handshake_message(&forced);
                }
            }
        }

        true
    }
}

/// Finds a client hello in the first packet of a connection.
pub struct ChloExtractor;

impl ChloExtractor {
    /// Walks `packet` as a server speaking `versions` and reports whether
    /// a client hello (or enough of one, per the indicator tags) was
    /// present. Identical inputs always produce identical delegate calls
    /// and return value.
    pub fn extract<'a, F: PacketFramer>(
        packet: &[u8],
        versions: &'a [ParsedVersion],
        create_session_tag_indicators: &'a [QuicTag],
        delegate: Option<&'a mut dyn ChloDelegate>,
    ) -> bool {
        let mut framer = F::new(versions.to_vec(), Perspective::Server);
        let mut visitor = ChloFramerVisitor {
            supported_versions: versions,
            create_session_tag_indicators,
            delegate,
            found_chlo: false,
            chlo_contains_tags: false,
            connection_id: 0,
            transport_version: versions
                .first()
                .map_or(0, |version| version.transport_version),
        };

        if !framer.process_packet(packet, &mut visitor) {
            return false;
        }
        visitor.found_chlo || visitor.chlo_contains_tags
    }
}
