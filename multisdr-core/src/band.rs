// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Amateur radio band name lookup, used when labeling sessions and spots
//! by band rather than raw center frequency.

/// (lower_hz, upper_hz, name) table, ordered by frequency. Ranges are
/// inclusive of both edges.
const BANDS: &[(u64, u64, &str)] = &[
    (135_700, 137_800, "2200m"),
    (472_000, 479_000, "630m"),
    (1_800_000, 2_000_000, "160m"),
    (3_500_000, 4_000_000, "80m"),
    (5_330_500, 5_406_400, "60m"),
    (7_000_000, 7_300_000, "40m"),
    (10_100_000, 10_150_000, "30m"),
    (14_000_000, 14_350_000, "20m"),
    (18_068_000, 18_168_000, "17m"),
    (21_000_000, 21_450_000, "15m"),
    (24_890_000, 24_990_000, "12m"),
    (28_000_000, 29_700_000, "10m"),
    (50_000_000, 54_000_000, "6m"),
    (144_000_000, 148_000_000, "2m"),
    (420_000_000, 450_000_000, "70cm"),
];

/// Returns the amateur band name containing `freq_hz`, or `None` if the
/// frequency falls outside every known band (e.g. a general-coverage
/// receive frequency with no ham allocation).
pub fn band_name(freq_hz: u64) -> Option<&'static str> {
    BANDS
        .iter()
        .find(|(lo, hi, _)| freq_hz >= *lo && freq_hz <= *hi)
        .map(|(_, _, name)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifies_common_bands() {
        assert_eq!(band_name(14_074_000), Some("20m"));
        assert_eq!(band_name(7_074_000), Some("40m"));
        assert_eq!(band_name(3_573_000), Some("80m"));
        assert_eq!(band_name(50_313_000), Some("6m"));
    }

    #[test]
    fn unallocated_frequency_returns_none() {
        assert_eq!(band_name(13_000_000), None);
        assert_eq!(band_name(0), None);
    }

    #[test]
    fn band_edges_are_inclusive() {
        assert_eq!(band_name(14_000_000), Some("20m"));
        assert_eq!(band_name(14_350_000), Some("20m"));
    }
}
