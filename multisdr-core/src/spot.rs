// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Spot type produced by MultiDecoder (§4.G) and deduplication across a
//! single decode cycle: the same station is frequently decoded more than
//! once per cycle (e.g. two overlapping receivers, or a decoder retry),
//! and only the strongest copy should be kept.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Ft8,
    Ft4,
    Wspr,
    Js8,
}

#[derive(Debug, Clone, Serialize)]
pub struct Spot {
    pub callsign: String,
    pub band: String,
    pub mode: Mode,
    /// UTC timestamp of the cycle this spot belongs to (ms since epoch).
    pub cycle_ts_ms: i64,
    pub snr_db: f32,
    pub dt_s: f32,
    pub freq_hz: f32,
    pub message: String,
    /// WSPR-specific: drift rate in Hz/minute.
    pub drift: Option<i32>,
    /// WSPR-specific: transmit power in dBm.
    pub dbm: Option<i32>,
    /// WSPR-specific: 4 or 6 character Maidenhead locator.
    pub locator: Option<String>,
}

impl Spot {
    /// The identity used for deduplication within a single cycle: same
    /// station, band, mode, and cycle, regardless of which receiver or
    /// decoder pass produced it.
    fn dedup_key(&self) -> (String, String, Mode, i64) {
        (
            self.callsign.clone(),
            self.band.clone(),
            self.mode,
            self.cycle_ts_ms,
        )
    }
}

/// Deduplicates a batch of spots from one decode cycle, keeping the copy
/// with the highest SNR whenever more than one spot shares an identity.
pub fn dedup_keep_max_snr(spots: Vec<Spot>) -> Vec<Spot> {
    use std::collections::HashMap;

    let mut best: HashMap<(String, String, Mode, i64), Spot> = HashMap::new();
    for spot in spots {
        let key = spot.dedup_key();
        match best.get(&key) {
            Some(existing) if existing.snr_db >= spot.snr_db => {}
            _ => {
                best.insert(key, spot);
            }
        }
    }
    best.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spot(callsign: &str, snr_db: f32) -> Spot {
        Spot {
            callsign: callsign.to_string(),
            band: "20m".to_string(),
            mode: Mode::Ft8,
            cycle_ts_ms: 1_000,
            snr_db,
            dt_s: 0.1,
            freq_hz: 1500.0,
            message: "CQ TEST AB1CD FN42".to_string(),
            drift: None,
            dbm: None,
            locator: None,
        }
    }

    #[test]
    fn dedup_keeps_strongest_duplicate() {
        let spots = vec![spot("AB1CD", -10.0), spot("AB1CD", -5.0), spot("AB1CD", -20.0)];
        let deduped = dedup_keep_max_snr(spots);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].snr_db, -5.0);
    }

    #[test]
    fn distinct_callsigns_are_not_merged() {
        let spots = vec![spot("AB1CD", -10.0), spot("XY9Z", -8.0)];
        let deduped = dedup_keep_max_snr(spots);
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn different_cycles_are_kept_separate() {
        let mut later = spot("AB1CD", -10.0);
        later.cycle_ts_ms = 16_000;
        let spots = vec![spot("AB1CD", -10.0), later];
        let deduped = dedup_keep_max_snr(spots);
        assert_eq!(deduped.len(), 2);
    }
}
