//! QUIC crypto handshake-message framing
//!
//! The crypto stream carries tag-value messages: a message tag, an entry
//! count, a sorted (tag, end-offset) index, then the packed value bytes.
//! The framer here parses that layout incrementally — a single UDP packet
//! often holds only a prefix of a large client hello, and the probe still
//! wants to see which tags the prefix announces.

use crate::quic::types::QuicTag;
use std::collections::BTreeMap;

// Message header: tag (4) + entry count (2) + padding (2).
const HEADER_SIZE: usize = 8;
// Index entry: tag (4) + cumulative end offset (4).
const ENTRY_SIZE: usize = 8;
// An honest handshake never needs more entries than this.
const MAX_ENTRIES: usize = 128;

/// A parsed tag-value handshake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeMessage {
    tag: QuicTag,
    values: BTreeMap<QuicTag, Vec<u8>>,
}

impl HandshakeMessage {
    pub fn new(tag: QuicTag) -> Self {
        Self {
            tag,
            values: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn tag(&self) -> QuicTag {
        self.tag
    }

    pub fn set_value(&mut self, tag: QuicTag, value: impl Into<Vec<u8>>) {
        self.values.insert(tag, value.into());
    }

    pub fn value(&self, tag: QuicTag) -> Option<&[u8]> {
        self.values.get(&tag).map(Vec::as_slice)
    }

    #[inline]
    pub fn has_tag(&self, tag: QuicTag) -> bool {
        self.values.contains_key(&tag)
    }

    /// Wire encoding: header, tag-sorted index, packed values.
    pub fn serialize(&self) -> Vec<u8> {
        let total: usize = self.values.values().map(Vec::len).sum();
        let mut out = Vec::with_capacity(HEADER_SIZE + self.values.len() * ENTRY_SIZE + total);

        out.extend_from_slice(&self.tag.to_bytes());
        out.extend_from_slice(&(self.values.len() as u16).to_le_bytes());
        out.extend_from_slice(&[0, 0]);

        let mut end = 0u32;
        for (tag, value) in &self.values {
            end += value.len() as u32;
            out.extend_from_slice(&tag.to_bytes());
            out.extend_from_slice(&end.to_le_bytes());
        }
        for value in self.values.values() {
            out.extend_from_slice(value);
        }

        out
    }
}

/// Incremental parser for one handshake message.
#[derive(Debug, Default)]
pub struct CryptoFramer {
    input: Vec<u8>,
    error: bool,
}

impl CryptoFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulates `data` and validates as much of the message as is
    /// visible. `false` means the input cannot be a handshake message.
    pub fn process_input(&mut self, data: &[u8]) -> bool {
        if self.error {
            return false;
        }

        self.input.extend_from_slice(data);
        if let Err(()) = self.validate() {
            self.error = true;
            return false;
        }
        true
    }

    /// The full message, if every announced value has arrived. Resets the
    /// framer for the next message on success.
    pub fn message_if_complete(&mut self) -> Option<HandshakeMessage> {
        if self.error {
            return None;
        }

        let (tag, entries) = self.index()?;
        if entries.len() < self.declared_entries()? {
            return None;
        }

        let values_start = HEADER_SIZE + entries.len() * ENTRY_SIZE;
        let total = entries.last().map_or(0, |&(_, end)| end as usize);
        if self.input.len() < values_start + total {
            return None;
        }

        let mut message = HandshakeMessage::new(tag);
        let mut start = 0;
        for (entry_tag, end) in entries {
            let end = end as usize;
            message.set_value(entry_tag, &self.input[values_start + start..values_start + end]);
            start = end;
        }

        self.input.clear();
        Some(message)
    }

    /// Whether `tag` is announced by the index parsed so far, even when
    /// its value has not arrived yet.
    pub fn has_tag(&self, tag: QuicTag) -> bool {
        match self.index() {
            Some((_, entries)) => entries.iter().any(|&(entry_tag, _)| entry_tag == tag),
            None => false,
        }
    }

    /// Builds a message from the values that did arrive in full, for
    /// callers that must dispatch on a partial client hello.
    pub fn force_handshake(&self) -> HandshakeMessage {
        let Some((tag, entries)) = self.index() else {
            return HandshakeMessage::new(QuicTag(0));
        };

        let values_start = HEADER_SIZE + self.declared_entries().unwrap_or(0) * ENTRY_SIZE;
        let available = self.input.len().saturating_sub(values_start);

        let mut message = HandshakeMessage::new(tag);
        let mut start = 0;
        for (entry_tag, end) in entries {
            let end = end as usize;
            if end > available {
                break;
            }
            message.set_value(entry_tag, &self.input[values_start + start..values_start + end]);
            start = end;
        }
        message
    }

    // Entry count announced in the header.
    fn declared_entries(&self) -> Option<usize> {
        if self.input.len() < HEADER_SIZE {
            return None;
        }
        Some(u16::from_le_bytes([self.input[4], self.input[5]]) as usize)
    }

    // Message tag plus the index entries visible so far.
    fn index(&self) -> Option<(QuicTag, Vec<(QuicTag, u32)>)> {
        let declared = self.declared_entries()?;
        let tag = QuicTag(u32::from_le_bytes([
            self.input[0],
            self.input[1],
            self.input[2],
            self.input[3],
        ]));

        let visible = declared.min((self.input.len() - HEADER_SIZE) / ENTRY_SIZE);
        let mut entries = Vec::with_capacity(visible);
        for i in 0..visible {
            let at = HEADER_SIZE + i * ENTRY_SIZE;
            let entry_tag = QuicTag(u32::from_le_bytes([
                self.input[at],
                self.input[at + 1],
                self.input[at + 2],
                self.input[at + 3],
            ]));
            let end = u32::from_le_bytes([
                self.input[at + 4],
                self.input[at + 5],
                self.input[at + 6],
                self.input[at + 7],
            ]);
            entries.push((entry_tag, end));
        }

        Some((tag, entries))
    }

    fn validate(&self) -> Result<(), ()> {
        let Some(declared) = self.declared_entries() else {
            return Ok(());
        };
        if declared > MAX_ENTRIES {
            return Err(());
        }
        if self.input[6] != 0 || self.input[7] != 0 {
            return Err(());
        }

        // End offsets must never decrease.
        if let Some((_, entries)) = self.index() {
            let mut previous = 0;
            for &(_, end) in &entries {
                if end < previous {
                    return Err(());
                }
                previous = end;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod crypto_framer_self {
    use super::*;
    use crate::quic::types::TAG_CHLO;

    const TAG_SNI: QuicTag = QuicTag::new(*b"SNI\0");
    const TAG_ALPN: QuicTag = QuicTag::new(*b"ALPN");

    fn sample_chlo() -> HandshakeMessage {
        let mut message = HandshakeMessage::new(TAG_CHLO);
        message.set_value(TAG_SNI, b"example.org".as_slice());
        message.set_value(TAG_ALPN, b"h3-q046".as_slice());
        message
    }

    #[test]
    fn serialize_then_parse() {
        let message = sample_chlo();
        let mut framer = CryptoFramer::new();

        assert!(framer.process_input(&message.serialize()));
        assert_eq!(framer.message_if_complete(), Some(message));
    }

    #[test]
    fn split_input_is_reassembled() {
        let wire = sample_chlo().serialize();
        let mut framer = CryptoFramer::new();

        for byte in &wire[..wire.len() - 1] {
            assert!(framer.process_input(std::slice::from_ref(byte)));
        }
        assert_eq!(framer.message_if_complete(), None);

        assert!(framer.process_input(&wire[wire.len() - 1..]));
        assert_eq!(framer.message_if_complete(), Some(sample_chlo()));
    }

    #[test]
    fn partial_message_announces_tags() {
        let wire = sample_chlo().serialize();
        // Header and index only; no value bytes at all.
        let index_end = 8 + 2 * 8;
        let mut framer = CryptoFramer::new();

        assert!(framer.process_input(&wire[..index_end]));
        assert_eq!(framer.message_if_complete(), None);
        assert!(framer.has_tag(TAG_SNI));
        assert!(framer.has_tag(TAG_ALPN));
        assert!(!framer.has_tag(QuicTag::new(*b"XLCT")));
    }

    #[test]
    fn force_handshake_keeps_complete_values() {
        let message = sample_chlo();
        let wire = message.serialize();
        // Numeric tag order puts SNI first (its last byte is NUL); cut
        // inside the second value.
        let first_len = message.value(TAG_SNI).unwrap().len();
        let cut = 8 + 2 * 8 + first_len + 3;
        let mut framer = CryptoFramer::new();

        assert!(framer.process_input(&wire[..cut]));
        let forced = framer.force_handshake();

        assert_eq!(forced.tag(), TAG_CHLO);
        assert_eq!(forced.value(TAG_SNI), Some(b"example.org".as_slice()));
        assert_eq!(forced.value(TAG_ALPN), None);
    }

    #[test]
    fn rejects_garbage() {
        // Entry count beyond any honest handshake.
        let mut raw = TAG_CHLO.to_bytes().to_vec();
        raw.extend_from_slice(&1000u16.to_le_bytes());
        raw.extend_from_slice(&[0, 0]);
        let mut framer = CryptoFramer::new();
        assert!(!framer.process_input(&raw));
        assert!(!framer.process_input(b"more"));

        // Decreasing end offsets.
        let mut raw = TAG_CHLO.to_bytes().to_vec();
        raw.extend_from_slice(&2u16.to_le_bytes());
        raw.extend_from_slice(&[0, 0]);
        raw.extend_from_slice(&TAG_ALPN.to_bytes());
        raw.extend_from_slice(&10u32.to_le_bytes());
        raw.extend_from_slice(&TAG_SNI.to_bytes());
        raw.extend_from_slice(&4u32.to_le_bytes());
        let mut framer = CryptoFramer::new();
        assert!(!framer.process_input(&raw));

        // Non-zero padding.
        let mut raw = TAG_CHLO.to_bytes().to_vec();
        raw.extend_from_slice(&0u16.to_le_bytes());
        raw.extend_from_slice(&[1, 0]);
        let mut framer = CryptoFramer::new();
        assert!(!framer.process_input(&raw));
    }
}
