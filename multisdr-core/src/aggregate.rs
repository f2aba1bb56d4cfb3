// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! UserSessionAggregate (§3): per-browser-tab bookkeeping that survives
//! across the individual receiver Sessions a user opens and closes while
//! they browse bands, so "how long has this visitor been listening" and
//! "what have they tuned across" can be answered without re-deriving it
//! from the session registry each time.

use std::collections::HashSet;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct UserSessionAggregate {
    pub user_session_id: String,
    pub first_seen: Instant,
    pub user_agent: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    bands_seen: HashSet<String>,
    modes_seen: HashSet<String>,
}

impl UserSessionAggregate {
    pub fn new(user_session_id: String) -> Self {
        Self {
            user_session_id,
            first_seen: Instant::now(),
            user_agent: None,
            country: None,
            country_code: None,
            bands_seen: HashSet::new(),
            modes_seen: HashSet::new(),
        }
    }

    pub fn record_band(&mut self, band: &str) {
        self.bands_seen.insert(band.to_string());
    }

    pub fn record_mode(&mut self, mode: &str) {
        self.modes_seen.insert(mode.to_string());
    }

    pub fn bands_seen(&self) -> impl Iterator<Item = &str> {
        self.bands_seen.iter().map(String::as_str)
    }

    pub fn modes_seen(&self) -> impl Iterator<Item = &str> {
        self.modes_seen.iter().map(String::as_str)
    }

    pub fn set_client_metadata(
        &mut self,
        user_agent: Option<String>,
        country: Option<String>,
        country_code: Option<String>,
    ) {
        self.user_agent = user_agent;
        self.country = country;
        self.country_code = country_code;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_unique_bands_and_modes() {
        let mut agg = UserSessionAggregate::new("user-1".into());
        agg.record_band("20m");
        agg.record_band("40m");
        agg.record_band("20m");
        agg.record_mode("ft8");

        let mut bands: Vec<&str> = agg.bands_seen().collect();
        bands.sort_unstable();
        assert_eq!(bands, vec!["20m", "40m"]);
        assert_eq!(agg.modes_seen().count(), 1);
    }

    #[test]
    fn client_metadata_defaults_to_none() {
        let agg = UserSessionAggregate::new("user-2".into());
        assert!(agg.user_agent.is_none());
        assert!(agg.country.is_none());
    }
}
