//! RFC76 fragment framing
//!
//! Every fragment starts with one header byte: bit 0 set means more
//! fragments follow, bits 1-7 carry the sequence number modulo 128.

use bytes::{BufMut, BytesMut};

use crate::{BleError, Result};

/// ATT write/notification overhead subtracted from the MTU.
pub const ATT_OVERHEAD: usize = 3;

/// Header bytes per fragment.
pub const HEADER_LEN: usize = 1;

const MORE_BIT: u8 = 0x01;
const SEQUENCE_MODULO: u8 = 128;

/// Decoded fragment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    pub more: bool,
    pub sequence: u8,
}

impl FragmentHeader {
    pub fn from_byte(byte: u8) -> Self {
        Self { more: byte & MORE_BIT != 0, sequence: byte >> 1 }
    }

    pub fn to_byte(self) -> u8 {
        ((self.sequence % SEQUENCE_MODULO) << 1) | self.more as u8
    }
}

/// Payload bytes one fragment carries for a given ATT MTU.
pub fn fragment_payload_size(mtu: u16) -> usize {
    (mtu as usize).saturating_sub(ATT_OVERHEAD + HEADER_LEN).max(1)
}

/// Split `payload` into header-prefixed fragments, sequence starting at 0.
///
/// An empty payload still produces one (final) fragment.
pub fn fragment(payload: &[u8], payload_size: usize) -> Vec<BytesMut> {
    let payload_size = payload_size.max(1);
    let count = payload.len().div_ceil(payload_size).max(1);

    (0..count)
        .map(|i| {
            let start = i * payload_size;
            let chunk = &payload[start.min(payload.len())..(start + payload_size).min(payload.len())];
            let header = FragmentHeader { more: i + 1 < count, sequence: (i % SEQUENCE_MODULO as usize) as u8 };
            let mut out = BytesMut::with_capacity(HEADER_LEN + chunk.len());
            out.put_u8(header.to_byte());
            out.put_slice(chunk);
            out
        })
        .collect()
}

/// Accumulates inbound fragments of one message.
#[derive(Debug, Default)]
pub struct Reassembler {
    buffer: BytesMut,
    expected: u8,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one fragment. Returns the complete message on the final fragment.
    ///
    /// A sequence gap fails with [`BleError::FramingSequence`]; the caller
    /// discards the reassembler.
    pub fn push(&mut self, fragment: &[u8]) -> Result<Option<BytesMut>> {
        let (&header_byte, data) = fragment
            .split_first()
            .ok_or_else(|| BleError::decode("RFC76 fragment", "empty notification"))?;
        let header = FragmentHeader::from_byte(header_byte);

        if header.sequence != self.expected {
            return Err(BleError::FramingSequence { expected: self.expected, found: header.sequence });
        }
        self.expected = (self.expected + 1) % SEQUENCE_MODULO;
        self.buffer.put_slice(data);

        if header.more { Ok(None) } else { Ok(Some(std::mem::take(&mut self.buffer))) }
    }

    /// Bytes accumulated so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
