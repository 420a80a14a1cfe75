//! PMD data frame decoding
//!
//! Every notification on the PMD data characteristic is one frame:
//!
//! ```text
//! [measurement type: u8][timestamp: u64 LE ns][frame type: u8][payload...]
//! ```
//!
//! Bit 7 of the frame type byte marks a delta-compressed payload, bits 0-6
//! select the sample layout. A frame is decoded completely or not at all.

use tracing::trace;

use super::delta::{FieldEncoding, parse_delta_frames};
use super::timestamps;
use crate::codec;
use crate::types::{
    AccSample, AxisSample, EcgSample, EcgTags, HrSample, PmdMeasurementType, PmdSetting,
    PpgSample, PpiSample, Samples, ScalarSample, StreamFrame,
};
use crate::{BleError, Result};

/// Size of the common frame header.
pub const HEADER_LEN: usize = 10;

const COMPRESSED_BIT: u8 = 0x80;
const FRAME_TYPE_MASK: u8 = 0x7F;

/// Common header of a PMD data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub measurement_type: PmdMeasurementType,
    pub timestamp: u64,
    pub frame_type: u8,
    pub compressed: bool,
}

impl FrameHeader {
    /// Split a frame into its header and payload.
    pub fn parse(data: &[u8]) -> Result<(Self, &[u8])> {
        if data.len() < HEADER_LEN {
            return Err(BleError::decode(
                "PMD frame header",
                format!("frame of {} bytes is shorter than the {} byte header", data.len(), HEADER_LEN),
            ));
        }
        let measurement_type = PmdMeasurementType::from_byte(data[0]);
        let timestamp = codec::le_u64(&data[1..9]);
        let frame_type = data[9] & FRAME_TYPE_MASK;
        let compressed = data[9] & COMPRESSED_BIT != 0;
        Ok((Self { measurement_type, timestamp, frame_type, compressed }, &data[HEADER_LEN..]))
    }
}

/// Decoder for one measurement stream.
///
/// Holds the previous frame timestamp so per-sample timestamps can be
/// reconstructed across frames. One decoder per subscription.
#[derive(Debug, Clone)]
pub struct StreamDecoder {
    measurement_type: PmdMeasurementType,
    factor: f32,
    sample_rate: Option<u32>,
    previous_timestamp: u64,
}

impl StreamDecoder {
    /// Create a decoder using the stream's negotiated settings.
    pub fn new(measurement_type: PmdMeasurementType, settings: &PmdSetting) -> Self {
        Self {
            measurement_type,
            factor: settings.factor(),
            sample_rate: settings.sample_rate(),
            previous_timestamp: 0,
        }
    }

    pub fn measurement_type(&self) -> PmdMeasurementType {
        self.measurement_type
    }

    /// Timestamp of the last successfully decoded frame, 0 before the first.
    pub fn previous_timestamp(&self) -> u64 {
        self.previous_timestamp
    }

    /// Decode one frame and stamp its samples.
    ///
    /// Failed frames leave the timestamp state untouched.
    pub fn decode(&mut self, data: &[u8]) -> Result<StreamFrame> {
        let (header, payload) = FrameHeader::parse(data)?;
        if header.measurement_type != self.measurement_type {
            return Err(BleError::decode(
                "PMD frame header",
                format!("expected {:?} frame, got {:?}", self.measurement_type, header.measurement_type),
            ));
        }

        let mut samples = decode_samples(&header, payload, self.factor)?;
        let stamps = match samples {
            Samples::Ppi(_) => vec![header.timestamp; samples.len()],
            _ => {
                let delta = timestamps::live_sample_delta(
                    self.previous_timestamp,
                    header.timestamp,
                    samples.len(),
                    self.sample_rate,
                );
                timestamps::sample_timestamps(delta, header.timestamp, samples.len())
            }
        };
        assign_timestamps(&mut samples, &stamps);

        trace!(
            measurement_type = ?header.measurement_type,
            frame_type = header.frame_type,
            compressed = header.compressed,
            samples = samples.len(),
            "Decoded PMD frame"
        );

        self.previous_timestamp = header.timestamp;
        Ok(StreamFrame {
            measurement_type: header.measurement_type,
            timestamp: header.timestamp,
            frame_type: header.frame_type,
            compressed: header.compressed,
            samples,
        })
    }
}

/// Decode the payload of a frame into samples with zero timestamps.
pub fn decode_samples(header: &FrameHeader, payload: &[u8], factor: f32) -> Result<Samples> {
    use PmdMeasurementType as T;

    let unsupported = || BleError::UnsupportedFrameType {
        measurement_type: header.measurement_type,
        frame_type: header.frame_type,
        compressed: header.compressed,
    };

    if header.compressed {
        return match (header.measurement_type, header.frame_type) {
            (T::Ecg, 0) => {
                let rows = parse_delta_frames(payload, 1, 14, FieldEncoding::SignedInt)?;
                Ok(Samples::Ecg(
                    rows.iter()
                        .map(|r| EcgSample { timestamp: 0, microvolts: r[0], tags: None })
                        .collect(),
                ))
            }
            (T::Acc, 0 | 1) => {
                let rows = parse_delta_frames(payload, 3, 16, FieldEncoding::SignedInt)?;
                let scale = |v: i32| (v as f32 * factor).round() as i32;
                Ok(Samples::Acc(
                    rows.iter()
                        .map(|r| AccSample { timestamp: 0, x: scale(r[0]), y: scale(r[1]), z: scale(r[2]) })
                        .collect(),
                ))
            }
            (T::Ppg, 0) => {
                let rows = parse_delta_frames(payload, 4, 22, FieldEncoding::SignedInt)?;
                let scale = |v: i32| (v as f32 * factor).round() as i32;
                Ok(Samples::Ppg(
                    rows.iter()
                        .map(|r| PpgSample {
                            timestamp: 0,
                            channels: [scale(r[0]), scale(r[1]), scale(r[2])],
                            ambient: scale(r[3]),
                        })
                        .collect(),
                ))
            }
            (T::Gyro, 0 | 1) => Ok(Samples::Gyro(scaled_axes(payload, factor)?)),
            (T::Magnetometer, 0) => Ok(Samples::Magnetometer(scaled_axes(payload, factor)?)),
            (T::Pressure, 0) => Ok(Samples::Pressure(float_field(payload)?)),
            (T::Temperature, 0) => Ok(Samples::Temperature(float_field(payload)?)),
            _ => Err(unsupported()),
        };
    }

    match (header.measurement_type, header.frame_type) {
        (T::Ecg, 0) => raw_records(payload, 3, "ECG frame", |b| EcgSample {
            timestamp: 0,
            microvolts: codec::le_i32(b),
            tags: None,
        })
        .map(Samples::Ecg),
        (T::Ecg, 1) => raw_records(payload, 3, "ECG frame", |b| EcgSample {
            timestamp: 0,
            microvolts: codec::sign_extend((b[0] as u64) | ((b[1] as u64 & 0x3F) << 8), 14) as i32,
            tags: Some(EcgTags {
                over_sampling: b[2] & 0x01 != 0,
                skin_contact: (b[2] & 0x06) >> 1,
                contact_impedance: (b[2] & 0x18) >> 3,
            }),
        })
        .map(Samples::Ecg),
        (T::Acc, frame_type @ 0..=2) => {
            let width = frame_type as usize + 1;
            raw_records(payload, width * 3, "ACC frame", |b| AccSample {
                timestamp: 0,
                x: codec::le_i32(&b[..width]),
                y: codec::le_i32(&b[width..2 * width]),
                z: codec::le_i32(&b[2 * width..]),
            })
            .map(Samples::Acc)
        }
        (T::Ppg, 0) => raw_records(payload, 12, "PPG frame", |b| PpgSample {
            timestamp: 0,
            channels: [codec::le_i32(&b[0..3]), codec::le_i32(&b[3..6]), codec::le_i32(&b[6..9])],
            ambient: codec::le_i32(&b[9..12]),
        })
        .map(Samples::Ppg),
        (T::Ppi, 0) => raw_records(payload, 6, "PPI frame", |b| PpiSample {
            timestamp: 0,
            hr: b[0],
            pp_ms: codec::le_u32(&b[1..3]) as u16,
            pp_error_estimate_ms: codec::le_u32(&b[3..5]) as u16,
            blocker: b[5] & 0x01 != 0,
            skin_contact_status: b[5] & 0x02 != 0,
            skin_contact_supported: b[5] & 0x04 != 0,
        })
        .map(Samples::Ppi),
        (T::OfflineHr, 0) => raw_records(payload, 1, "offline HR frame", |b| HrSample {
            timestamp: 0,
            hr: b[0],
            ppg_quality: None,
            corrected_hr: None,
        })
        .map(Samples::Hr),
        (T::OfflineHr, 1) => raw_records(payload, 3, "offline HR frame", |b| HrSample {
            timestamp: 0,
            hr: b[0],
            ppg_quality: Some(b[1]),
            corrected_hr: Some(b[2]),
        })
        .map(Samples::Hr),
        (T::Pressure, 0) => raw_records(payload, 4, "pressure frame", |b| ScalarSample {
            timestamp: 0,
            value: f32::from_bits(codec::le_u32(b)),
        })
        .map(Samples::Pressure),
        (T::Temperature, 0) => raw_records(payload, 4, "temperature frame", |b| ScalarSample {
            timestamp: 0,
            value: f32::from_bits(codec::le_u32(b)),
        })
        .map(Samples::Temperature),
        _ => Err(unsupported()),
    }
}

/// Split a raw payload into fixed-width records.
fn raw_records<T>(payload: &[u8], width: usize, context: &str, parse: impl Fn(&[u8]) -> T) -> Result<Vec<T>> {
    if payload.len() % width != 0 {
        return Err(BleError::decode(
            context,
            format!(
                "payload of {} bytes is not a multiple of the {} byte sample (trailing data at offset {})",
                payload.len(),
                width,
                HEADER_LEN + payload.len() / width * width
            ),
        ));
    }
    Ok(payload.chunks_exact(width).map(parse).collect())
}

fn scaled_axes(payload: &[u8], factor: f32) -> Result<Vec<AxisSample>> {
    let rows = parse_delta_frames(payload, 3, 16, FieldEncoding::SignedInt)?;
    Ok(rows
        .iter()
        .map(|r| AxisSample {
            timestamp: 0,
            x: r[0] as f32 * factor,
            y: r[1] as f32 * factor,
            z: r[2] as f32 * factor,
        })
        .collect())
}

fn float_field(payload: &[u8]) -> Result<Vec<ScalarSample>> {
    let rows = parse_delta_frames(payload, 1, 32, FieldEncoding::Float)?;
    Ok(rows
        .iter()
        .map(|r| ScalarSample { timestamp: 0, value: f32::from_bits(r[0] as u32) })
        .collect())
}

fn assign_timestamps(samples: &mut Samples, stamps: &[u64]) {
    fn apply<S>(items: &mut [S], stamps: &[u64], field: impl Fn(&mut S) -> &mut u64) {
        for (item, ts) in items.iter_mut().zip(stamps) {
            *field(item) = *ts;
        }
    }

    match samples {
        Samples::Ecg(s) => apply(s, stamps, |x| &mut x.timestamp),
        Samples::Acc(s) => apply(s, stamps, |x| &mut x.timestamp),
        Samples::Ppg(s) => apply(s, stamps, |x| &mut x.timestamp),
        Samples::Ppi(s) => apply(s, stamps, |x| &mut x.timestamp),
        Samples::Gyro(s) | Samples::Magnetometer(s) => apply(s, stamps, |x| &mut x.timestamp),
        Samples::Hr(s) => apply(s, stamps, |x| &mut x.timestamp),
        Samples::Pressure(s) | Samples::Temperature(s) => apply(s, stamps, |x| &mut x.timestamp),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::frame_bytes;
    use crate::types::SettingType;
    use std::collections::BTreeMap;

    fn settings(rate: u32) -> PmdSetting {
        PmdSetting::from_selected(BTreeMap::from([(SettingType::SampleRate, rate)]))
    }

    #[test]
    fn header_splits_payload() {
        let data = frame_bytes(PmdMeasurementType::Acc, 42, 0x81, &[1, 2]);
        let (header, payload) = FrameHeader::parse(&data).unwrap();
        assert_eq!(header.measurement_type, PmdMeasurementType::Acc);
        assert_eq!(header.timestamp, 42);
        assert_eq!(header.frame_type, 1);
        assert!(header.compressed);
        assert_eq!(payload, &[1, 2]);
    }

    #[test]
    fn short_header_is_decode_error() {
        assert!(matches!(FrameHeader::parse(&[0; 9]), Err(BleError::Decode { .. })));
    }

    #[test]
    fn ecg_raw_samples() {
        let payload = [0xFF, 0xFF, 0xFF, 0x10, 0x00, 0x00];
        let data = frame_bytes(PmdMeasurementType::Ecg, 1_000_000_000, 0, &payload);
        let mut decoder = StreamDecoder::new(PmdMeasurementType::Ecg, &settings(130));

        let frame = decoder.decode(&data).unwrap();
        let Samples::Ecg(samples) = frame.samples else { panic!("expected ECG samples") };
        assert_eq!(samples[0].microvolts, -1);
        assert_eq!(samples[1].microvolts, 16);
        assert_eq!(samples[1].timestamp, 1_000_000_000);
    }

    #[test]
    fn ecg_tagged_samples() {
        // -2 in 14 bits, over-sampling, skin contact 3, impedance 2
        let payload = [0xFE, 0x3F, 0x01 | 0x06 | 0x10];
        let data = frame_bytes(PmdMeasurementType::Ecg, 5, 1, &payload);
        let mut decoder = StreamDecoder::new(PmdMeasurementType::Ecg, &PmdSetting::default());

        let Samples::Ecg(samples) = decoder.decode(&data).unwrap().samples else {
            panic!("expected ECG samples")
        };
        assert_eq!(samples[0].microvolts, -2);
        assert_eq!(
            samples[0].tags,
            Some(EcgTags { over_sampling: true, skin_contact: 3, contact_impedance: 2 })
        );
    }

    #[test]
    fn acc_raw_widths() {
        let payload = [0x01, 0x00, 0xFF, 0xFF, 0x00, 0x80];
        let data = frame_bytes(PmdMeasurementType::Acc, 7, 1, &payload);
        let mut decoder = StreamDecoder::new(PmdMeasurementType::Acc, &PmdSetting::default());

        let Samples::Acc(samples) = decoder.decode(&data).unwrap().samples else {
            panic!("expected ACC samples")
        };
        assert_eq!((samples[0].x, samples[0].y, samples[0].z), (1, -1, -32768));
    }

    #[test]
    fn ppi_flags_and_shared_timestamp() {
        let payload = [60, 0xE8, 0x03, 0x0A, 0x00, 0b110, 61, 0xDC, 0x03, 0x05, 0x00, 0b001];
        let data = frame_bytes(PmdMeasurementType::Ppi, 9_000, 0, &payload);
        let mut decoder = StreamDecoder::new(PmdMeasurementType::Ppi, &PmdSetting::default());

        let Samples::Ppi(samples) = decoder.decode(&data).unwrap().samples else {
            panic!("expected PPI samples")
        };
        assert_eq!(samples[0].pp_ms, 1000);
        assert_eq!(samples[0].pp_error_estimate_ms, 10);
        assert!(!samples[0].blocker && samples[0].skin_contact_status && samples[0].skin_contact_supported);
        assert!(samples[1].blocker);
        assert!(samples.iter().all(|s| s.timestamp == 9_000));
    }

    #[test]
    fn compressed_gyro_applies_factor() {
        let mut payload = vec![];
        for reference in [100i16, -100, 0] {
            payload.extend(reference.to_le_bytes());
        }
        let data = frame_bytes(PmdMeasurementType::Gyro, 1, 0x80, &payload);
        let settings = PmdSetting::parse(&[0x05, 0x01, 0x00, 0x00, 0x00, 0x3F]).unwrap(); // factor 0.5
        let mut decoder = StreamDecoder::new(PmdMeasurementType::Gyro, &settings);

        let Samples::Gyro(samples) = decoder.decode(&data).unwrap().samples else {
            panic!("expected gyro samples")
        };
        assert_eq!((samples[0].x, samples[0].y, samples[0].z), (50.0, -50.0, 0.0));
    }

    #[test]
    fn temperature_raw_float() {
        let data = frame_bytes(PmdMeasurementType::Temperature, 1, 0, &36.5f32.to_le_bytes());
        let mut decoder = StreamDecoder::new(PmdMeasurementType::Temperature, &PmdSetting::default());
        let Samples::Temperature(samples) = decoder.decode(&data).unwrap().samples else {
            panic!("expected temperature samples")
        };
        assert_eq!(samples[0].value, 36.5);
    }

    #[test]
    fn timestamps_follow_previous_frame() {
        let mut decoder = StreamDecoder::new(PmdMeasurementType::Ecg, &settings(100));
        let payload = [0u8; 12]; // 4 samples

        let first = decoder.decode(&frame_bytes(PmdMeasurementType::Ecg, 1_000_000_000, 0, &payload)).unwrap();
        // nominal 100 Hz spacing for the first frame
        assert_eq!(first.samples.timestamps(), vec![970_000_000, 980_000_000, 990_000_000, 1_000_000_000]);

        let second = decoder.decode(&frame_bytes(PmdMeasurementType::Ecg, 1_080_000_000, 0, &payload)).unwrap();
        assert_eq!(second.samples.timestamps(), vec![1_020_000_000, 1_040_000_000, 1_060_000_000, 1_080_000_000]);
        assert_eq!(decoder.previous_timestamp(), 1_080_000_000);
    }

    #[test]
    fn unknown_layout_is_unsupported() {
        let data = frame_bytes(PmdMeasurementType::Ecg, 1, 0x85, &[]);
        let mut decoder = StreamDecoder::new(PmdMeasurementType::Ecg, &PmdSetting::default());
        assert!(matches!(
            decoder.decode(&data),
            Err(BleError::UnsupportedFrameType { frame_type: 5, compressed: true, .. })
        ));
    }

    #[test]
    fn partial_record_fails_whole_frame() {
        let data = frame_bytes(PmdMeasurementType::Ppg, 1, 0, &[0; 13]);
        let mut decoder = StreamDecoder::new(PmdMeasurementType::Ppg, &PmdSetting::default());
        assert!(matches!(decoder.decode(&data), Err(BleError::Decode { .. })));
        assert_eq!(decoder.previous_timestamp(), 0);
    }

    #[test]
    fn mismatched_type_is_rejected() {
        let data = frame_bytes(PmdMeasurementType::Acc, 1, 0, &[0, 0, 0]);
        let mut decoder = StreamDecoder::new(PmdMeasurementType::Ecg, &PmdSetting::default());
        assert!(decoder.decode(&data).is_err());
    }
}
