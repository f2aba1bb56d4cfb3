// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Binary spectrum frame format over WebSocket (§6). `SpectrumEncoder`
//! tracks whether a full frame has already been sent so it can enforce
//! P6 ("every delta has a preceding full frame in the same session") at
//! the point of encoding, not just as a test property to uphold
//! elsewhere.

use bytes::{BufMut, BytesMut};

const MAGIC: &[u8; 4] = b"SPEC";
const VERSION: u8 = 0x01;
const FLAG_FULL: u8 = 0x01;
const FLAG_DELTA: u8 = 0x02;
const HEADER_LEN: usize = 22;

/// Resync cadence: a full frame at least every 50 frames (§6).
const RESYNC_INTERVAL: u32 = 50;
/// Resend full when more than half the bins changed.
const FULL_RESEND_CHANGE_FRACTION: f32 = 0.5;

fn put_header(buf: &mut BytesMut, flags: u8, timestamp_ms: u64, center_hz: u64) {
    buf.put_slice(MAGIC);
    buf.put_u8(VERSION);
    buf.put_u8(flags);
    buf.put_u64_le(timestamp_ms);
    buf.put_u64_le(center_hz);
    debug_assert_eq!(buf.len(), HEADER_LEN);
}

pub fn encode_full(timestamp_ms: u64, center_hz: u64, bins_db: &[f32]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + bins_db.len() * 4);
    put_header(&mut buf, FLAG_FULL, timestamp_ms, center_hz);
    for &b in bins_db {
        buf.put_f32_le(b);
    }
    buf.to_vec()
}

/// `changes` is (bin index, new dB value).
pub fn encode_delta(timestamp_ms: u64, center_hz: u64, changes: &[(u16, f32)]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + 2 + changes.len() * 6);
    put_header(&mut buf, FLAG_DELTA, timestamp_ms, center_hz);
    buf.put_u16_le(changes.len() as u16);
    for &(idx, val) in changes {
        buf.put_u16_le(idx);
        buf.put_f32_le(val);
    }
    buf.to_vec()
}

/// Floor applied before `log10` so a true-zero power bin doesn't produce
/// `-inf` dB.
const MIN_POWER: f32 = 1.0e-12;

/// Reorders raw back-end power bins from "natural order" (DC..+Nyquist
/// then -Nyquist..DC) into contiguous low-to-high frequency order and
/// converts each from linear power to dB (10*log10), per §4.D: "The
/// receiver MUST NOT modify the bins; the consumer unwraps and
/// dB-converts on read to keep the hot path cheap."
pub fn unwrap_to_db(natural_order: &[f32]) -> Vec<f32> {
    let n = natural_order.len();
    let split = n.div_ceil(2);
    let (positive, negative) = natural_order.split_at(split);
    negative
        .iter()
        .chain(positive.iter())
        .map(|&p| 10.0 * p.max(MIN_POWER).log10())
        .collect()
}

/// Per-session encoder state driving the full/delta/resync policy in §6.
pub struct SpectrumEncoder {
    last_bins: Option<Vec<f32>>,
    frames_since_full: u32,
}

impl Default for SpectrumEncoder {
    fn default() -> Self {
        Self {
            last_bins: None,
            frames_since_full: 0,
        }
    }
}

impl SpectrumEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide and encode the next frame for a new set of bins. Returns
    /// the wire bytes; internally tracks whatever bookkeeping is needed
    /// to decide the next call's mode.
    pub fn encode_next(&mut self, timestamp_ms: u64, center_hz: u64, bins_db: &[f32]) -> Vec<u8> {
        let needs_full = match &self.last_bins {
            None => true,
            Some(prev) if prev.len() != bins_db.len() => true,
            Some(prev) => {
                let changed = prev
                    .iter()
                    .zip(bins_db.iter())
                    .filter(|(a, b)| a != b)
                    .count();
                let fraction = changed as f32 / bins_db.len().max(1) as f32;
                fraction > FULL_RESEND_CHANGE_FRACTION
                    || self.frames_since_full >= RESYNC_INTERVAL - 1
            }
        };

        let out = if needs_full {
            self.frames_since_full = 0;
            encode_full(timestamp_ms, center_hz, bins_db)
        } else {
            self.frames_since_full += 1;
            let prev = self.last_bins.as_ref().expect("delta path implies a prior full frame");
            let changes: Vec<(u16, f32)> = prev
                .iter()
                .zip(bins_db.iter())
                .enumerate()
                .filter(|(_, (a, b))| a != b)
                .map(|(i, (_, &b))| (i as u16, b))
                .collect();
            encode_delta(timestamp_ms, center_hz, &changes)
        };

        self.last_bins = Some(bins_db.to_vec());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_is_always_full() {
        let mut enc = SpectrumEncoder::new();
        let frame = enc.encode_next(0, 14_000_000, &[1.0, 2.0, 3.0]);
        assert_eq!(&frame[0..4], MAGIC);
        assert_eq!(frame[5], FLAG_FULL);
    }

    #[test]
    fn small_change_after_full_is_delta() {
        let mut enc = SpectrumEncoder::new();
        enc.encode_next(0, 14_000_000, &[1.0, 2.0, 3.0, 4.0]);
        let frame = enc.encode_next(1, 14_000_000, &[1.0, 2.0, 3.0, 5.0]);
        assert_eq!(frame[5], FLAG_DELTA);
    }

    #[test]
    fn resync_after_fifty_frames() {
        let mut enc = SpectrumEncoder::new();
        let bins = vec![1.0f32; 8];
        enc.encode_next(0, 1, &bins);
        let mut saw_full_again = false;
        for i in 1..=RESYNC_INTERVAL {
            let frame = enc.encode_next(i as u64, 1, &bins);
            if i == RESYNC_INTERVAL && frame[5] == FLAG_FULL {
                saw_full_again = true;
            }
        }
        assert!(saw_full_again);
    }

    #[test]
    fn bin_count_change_forces_full() {
        let mut enc = SpectrumEncoder::new();
        enc.encode_next(0, 1, &[1.0, 2.0]);
        let frame = enc.encode_next(1, 1, &[1.0, 2.0, 3.0]);
        assert_eq!(frame[5], FLAG_FULL);
    }

    #[test]
    fn unwrap_to_db_moves_negative_half_before_positive_half() {
        // natural order: DC, +1, -2, -1 (4 bins, split at ceil(4/2)=2)
        let natural = [1.0, 10.0, 0.01, 0.1];
        let unwrapped = unwrap_to_db(&natural);
        // low-to-high: -2, -1, DC, +1
        assert_eq!(unwrapped.len(), 4);
        assert!((unwrapped[0] - (10.0 * 0.01f32.log10())).abs() < 1e-4);
        assert!((unwrapped[1] - (10.0 * 0.1f32.log10())).abs() < 1e-4);
        assert!((unwrapped[2] - (10.0 * 1.0f32.log10())).abs() < 1e-4);
        assert!((unwrapped[3] - (10.0 * 10.0f32.log10())).abs() < 1e-4);
    }

    #[test]
    fn unwrap_to_db_floors_zero_power_instead_of_producing_infinity() {
        let unwrapped = unwrap_to_db(&[0.0, 0.0]);
        assert!(unwrapped.iter().all(|v| v.is_finite()));
    }
}
