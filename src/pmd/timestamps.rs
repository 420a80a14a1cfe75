//! Per-sample timestamp reconstruction
//!
//! Frames carry one device timestamp, that of their last sample. Sample
//! timestamps are rebuilt from the spacing between consecutive frame
//! timestamps. Delta is recomputed for every packet and not smoothed.

use tracing::warn;

const NANOS_PER_SECOND: f64 = 1e9;

/// Sample spacing in nanoseconds for the current packet.
///
/// With no previous packet (`ts_previous == 0`) the spacing is taken forward
/// from the next packet: `(ts_next - ts_current) / size_next`. Otherwise it is
/// `(ts_current - ts_previous) / size_current`. Missing inputs yield 0.
pub fn calculate_sample_delta(
    ts_previous: u64,
    ts_current: u64,
    size_current: usize,
    ts_next: u64,
    size_next: usize,
) -> f64 {
    if ts_previous == 0 {
        if ts_current == 0 || ts_next == 0 || size_next == 0 {
            return 0.0;
        }
        (ts_next as f64 - ts_current as f64) / size_next as f64
    } else {
        if ts_current == 0 || size_current == 0 {
            return 0.0;
        }
        (ts_current as f64 - ts_previous as f64) / size_current as f64
    }
}

/// Sample rate in Hz implied by two packet timestamps; 0.0 means unknown.
pub fn calculate_sample_rate(ts_previous: u64, ts_current: u64, size_current: usize) -> f64 {
    if ts_previous == 0 || ts_current == 0 {
        return 0.0;
    }
    let delta = calculate_sample_delta(ts_previous, ts_current, size_current, 0, 0);
    if delta <= 0.0 {
        warn!(ts_previous, ts_current, delta, "Non-positive sample delta, sample rate unknown");
        return 0.0;
    }
    NANOS_PER_SECOND / delta
}

/// Timestamp of the first sample of a packet whose last sample is at `packet_timestamp`.
pub fn estimate_first_sample_timestamp(delta: f64, packet_timestamp: u64, packet_size: usize) -> f64 {
    packet_timestamp as f64 - (packet_size.saturating_sub(1)) as f64 * delta
}

/// Sample spacing for a live frame.
///
/// Uses the previous frame when it gives a positive delta, otherwise the
/// nominal sample rate. Returns 0.0 when neither is known.
pub fn live_sample_delta(ts_previous: u64, ts_current: u64, size: usize, sample_rate: Option<u32>) -> f64 {
    let delta = calculate_sample_delta(ts_previous, ts_current, size, 0, 0);
    if ts_previous != 0 && delta > 0.0 {
        return delta;
    }
    match sample_rate {
        Some(rate) if rate > 0 => NANOS_PER_SECOND / rate as f64,
        _ => 0.0,
    }
}

/// Evenly spaced timestamps ending at `packet_timestamp`.
pub fn sample_timestamps(delta: f64, packet_timestamp: u64, packet_size: usize) -> Vec<u64> {
    let first = estimate_first_sample_timestamp(delta, packet_timestamp, packet_size);
    (0..packet_size).map(|i| (first + i as f64 * delta).round().max(0.0) as u64).collect()
}

/// Reconstruct sample timestamps for a sequence of recorded packets.
///
/// Each entry is `(packet_timestamp, sample_count)`. The first packet has no
/// predecessor and borrows its spacing from the second.
pub fn reconstruct_timestamps(packets: &[(u64, usize)]) -> Vec<Vec<u64>> {
    let mut out = Vec::with_capacity(packets.len());
    for (i, &(ts, size)) in packets.iter().enumerate() {
        let previous = if i == 0 { 0 } else { packets[i - 1].0 };
        let (next, size_next) = packets.get(i + 1).copied().unwrap_or((0, 0));
        let delta = calculate_sample_delta(previous, ts, size, next, size_next);
        out.push(sample_timestamps(delta, ts, size));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn first_packet_uses_next_packet_spacing() {
        let delta = calculate_sample_delta(0, 1_000, 10, 2_000, 5);
        assert_eq!(delta, 200.0);
    }

    #[test]
    fn later_packets_use_previous_spacing() {
        let delta = calculate_sample_delta(1_000, 2_000, 4, 9_999, 1);
        assert_eq!(delta, 250.0);
    }

    #[test]
    fn sample_rate_edge_cases() {
        assert_eq!(calculate_sample_rate(0, 1_000, 10), 0.0);
        assert_eq!(calculate_sample_rate(1_000, 0, 10), 0.0);
        assert_eq!(calculate_sample_rate(2_000, 1_000, 10), 0.0);
        assert_eq!(calculate_sample_rate(1_000, 1_000, 10), 0.0);
        // 10 samples over 0.1 s
        assert_eq!(calculate_sample_rate(1_000_000_000, 1_100_000_000, 10), 100.0);
    }

    #[test]
    fn first_sample_extrapolates_backwards() {
        assert_eq!(estimate_first_sample_timestamp(10.0, 1_000, 5), 960.0);
        assert_eq!(estimate_first_sample_timestamp(10.0, 1_000, 1), 1_000.0);
    }

    #[test]
    fn live_delta_falls_back_to_sample_rate() {
        assert_eq!(live_sample_delta(0, 1_000_000_000, 10, Some(100)), 10_000_000.0);
        assert_eq!(live_sample_delta(0, 1_000_000_000, 10, None), 0.0);
        assert_eq!(live_sample_delta(900_000_000, 1_000_000_000, 10, Some(52)), 10_000_000.0);
        // Non-monotonic timestamps fall back too
        assert_eq!(live_sample_delta(2_000_000_000, 1_000_000_000, 10, Some(100)), 10_000_000.0);
    }

    #[test]
    fn reconstructed_packets_are_contiguous() {
        let packets = [(1_000, 4), (2_000, 4), (3_000, 4)];
        let stamps = reconstruct_timestamps(&packets);
        assert_eq!(stamps[0], vec![250, 500, 750, 1_000]);
        assert_eq!(stamps[1], vec![1_250, 1_500, 1_750, 2_000]);
        assert_eq!(stamps[2], vec![2_250, 2_500, 2_750, 3_000]);
    }

    proptest! {
        #[test]
        fn first_sample_formula(delta in 0.0f64..1e7, ts in 1u64..1_000_000_000_000, size in 1usize..200) {
            let expected = ts as f64 - (size - 1) as f64 * delta;
            prop_assert_eq!(estimate_first_sample_timestamp(delta, ts, size), expected);
        }

        #[test]
        fn positive_delta_gives_reciprocal_rate(prev in 1u64..1_000_000, step in 1u64..1_000_000, size in 1usize..100) {
            let current = prev + step;
            let delta = (current - prev) as f64 / size as f64;
            prop_assert_eq!(calculate_sample_rate(prev, current, size), 1e9 / delta);
        }
    }
}
