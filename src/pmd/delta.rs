//! Delta-compressed PMD frame payloads
//!
//! Layout: one reference sample (per channel, `ceil(resolution / 8)` bytes),
//! then blocks of `[delta_bits: u8, sample_count: u8, packed deltas]`. Deltas
//! are packed LSB-first, sample-major then channel, each `delta_bits` wide and
//! signed. Every delta step is accumulated onto the previous sample.

use crate::codec;
use crate::{BleError, Result};

/// How reference samples and deltas are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldEncoding {
    /// Two's complement integers sign-extended at the resolution
    SignedInt,
    /// IEEE 754 f32 bit patterns; deltas apply to the raw bits
    Float,
}

/// Decode all samples of a delta-compressed payload.
///
/// Returned rows are per sample, one value per channel. For [`FieldEncoding::Float`]
/// the values are raw f32 bit patterns.
pub fn parse_delta_frames(
    data: &[u8],
    channels: usize,
    resolution: u32,
    encoding: FieldEncoding,
) -> Result<Vec<Vec<i32>>> {
    if channels == 0 || resolution == 0 || resolution > 32 {
        return Err(BleError::decode(
            "delta frame",
            format!("invalid layout: {} channels at {} bits", channels, resolution),
        ));
    }

    let ref_width = resolution.div_ceil(8) as usize;
    let mut reference = Vec::with_capacity(channels);
    for channel in 0..channels {
        let bytes = codec::field(data, channel * ref_width, ref_width, "delta frame reference")?;
        let value = match encoding {
            FieldEncoding::SignedInt => codec::sign_extend(codec::le_u32(bytes) as u64, resolution) as i32,
            FieldEncoding::Float => codec::le_u32(bytes) as i32,
        };
        reference.push(value);
    }

    let mut samples = vec![reference];
    let mut offset = channels * ref_width;

    while offset < data.len() {
        let delta_bits = codec::byte_at(data, offset, "delta block size")? as u32;
        let sample_count = codec::byte_at(data, offset + 1, "delta block count")? as usize;
        offset += 2;

        // Zero-width blocks repeat the previous sample
        if delta_bits > 32 {
            return Err(BleError::decode(
                "delta block size",
                format!("invalid delta width {} at offset {}", delta_bits, offset - 2),
            ));
        }

        let bit_length = sample_count * channels * delta_bits as usize;
        let byte_length = bit_length.div_ceil(8);
        let block = codec::field(data, offset, byte_length, "delta block")?;
        offset += byte_length;

        let mut reader = BitReader::new(block);
        for _ in 0..sample_count {
            let last = samples.last().cloned().unwrap_or_default();
            let next = last
                .iter()
                .map(|previous| {
                    let delta = codec::sign_extend(reader.read(delta_bits), delta_bits) as i32;
                    previous.wrapping_add(delta)
                })
                .collect();
            samples.push(next);
        }
    }

    Ok(samples)
}

/// LSB-first bit reader over a byte slice. Callers size the slice to fit.
struct BitReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    fn read(&mut self, bits: u32) -> u64 {
        let mut value = 0u64;
        for i in 0..bits as usize {
            let bit_index = self.position + i;
            let byte = self.data.get(bit_index / 8).copied().unwrap_or(0);
            if (byte >> (bit_index % 8)) & 1 == 1 {
                value |= 1 << i;
            }
        }
        self.position += bits as usize;
        value
    }
}
