// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! §4.G MultiDecoder: per-band cycle-aligned decoding. Buffered audio is
//! written to disk as a WAV file at each cycle boundary and handed to an
//! external decoder binary (the JT9/WSPR family of tools); the binary's
//! stdout is parsed into `Spot`s, deduplicated, and forwarded.
//!
//! The external process is a scoped resource: it is spawned fresh for
//! each cycle, given a bounded amount of wall-clock time to finish, and
//! killed if it overruns rather than allowed to pile up across cycles.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

use multisdr_protocol::wav::WavWriter;

use crate::policies::ExponentialBackoff;
use crate::spot::{dedup_keep_max_snr, Mode, Spot};

/// How long a decode cycle's external process is given to run before
/// it's killed and the cycle's spots (if any were already parsed) are
/// forwarded as-is.
const DECODE_TIMEOUT: Duration = Duration::from_secs(20);

/// Per-mode cycle timing (§6 Design Notes: cycle-aligned timing).
#[derive(Debug, Clone, Copy)]
pub struct CycleConfig {
    pub mode: Mode,
    /// Cycle length in milliseconds (FT4's 7.5 s cycle doesn't land on a
    /// whole second, so seconds alone can't represent it). `None` for
    /// streaming modes (JS8) that have no fixed cycle boundary.
    pub cycle_len_ms: Option<i64>,
    /// How many seconds into the cycle to record before decoding.
    pub record_s: f64,
}

impl CycleConfig {
    pub fn for_mode(mode: Mode) -> Self {
        match mode {
            Mode::Ft8 => Self {
                mode,
                cycle_len_ms: Some(15_000),
                record_s: 12.64,
            },
            Mode::Ft4 => Self {
                mode,
                cycle_len_ms: Some(7_500),
                record_s: 4.48,
            },
            Mode::Wspr => Self {
                mode,
                cycle_len_ms: Some(120_000),
                record_s: 114.0,
            },
            Mode::Js8 => Self {
                mode,
                cycle_len_ms: None,
                record_s: 0.0,
            },
        }
    }
}

/// The next wall-clock cycle boundary (ms since epoch) at or after `now_ms`.
pub fn next_cycle_boundary_ms(now_ms: i64, cycle_len_ms: i64) -> i64 {
    let remainder = now_ms % cycle_len_ms;
    if remainder == 0 {
        now_ms
    } else {
        now_ms + (cycle_len_ms - remainder)
    }
}

/// Looks up station metadata (e.g. country) for a decoded callsign.
/// Injected so MultiDecoder doesn't hard-depend on a specific lookup
/// backend; the default does nothing.
pub trait CallsignLookup: Send + Sync {
    fn country_of(&self, _callsign: &str) -> Option<String> {
        None
    }
}

#[derive(Default)]
pub struct NoopCallsignLookup;

impl CallsignLookup for NoopCallsignLookup {}

/// Static configuration for one band's decoder loop.
pub struct MultiDecoderConfig {
    pub band: String,
    pub mode: Mode,
    pub sample_rate_hz: u32,
    pub decoder_binary: PathBuf,
    pub decoder_args: Vec<String>,
    pub work_dir: PathBuf,
    pub callsign_lookup: Arc<dyn CallsignLookup>,
}

/// Drives one band's cycle-aligned decode loop. Consumes mono 16-bit PCM
/// samples at `sample_rate_hz` and emits deduplicated `Spot`s.
pub struct MultiDecoder {
    config: MultiDecoderConfig,
    cycle: CycleConfig,
    retry: ExponentialBackoff,
}

impl MultiDecoder {
    pub fn new(config: MultiDecoderConfig) -> Self {
        let cycle = CycleConfig::for_mode(config.mode);
        Self {
            config,
            cycle,
            retry: ExponentialBackoff::default_session_recreate(),
        }
    }

    /// Runs the decode loop until `pcm_rx` closes. Samples arriving
    /// outside the current cycle's recording window are dropped.
    pub async fn run(&self, mut pcm_rx: mpsc::Receiver<Vec<i16>>, spot_tx: mpsc::Sender<Spot>) {
        let Some(cycle_len_ms) = self.cycle.cycle_len_ms else {
            warn!(band = %self.config.band, "streaming mode has no cycle loop yet");
            return;
        };

        let mut buffer: Vec<i16> = Vec::new();
        let mut cycle_start_ms = next_cycle_boundary_ms(now_ms(), cycle_len_ms);
        let record_samples =
            (self.cycle.record_s * self.config.sample_rate_hz as f64) as usize;

        loop {
            let Some(frame) = pcm_rx.recv().await else {
                break;
            };

            let now = now_ms();
            if now >= cycle_start_ms + cycle_len_ms {
                let spots = self.decode_cycle(&buffer, cycle_start_ms).await;
                for spot in spots {
                    if spot_tx.send(spot).await.is_err() {
                        return;
                    }
                }
                buffer.clear();
                cycle_start_ms = next_cycle_boundary_ms(now, cycle_len_ms);
            }

            if buffer.len() < record_samples {
                buffer.extend_from_slice(&frame);
            }
        }

        if !buffer.is_empty() {
            let spots = self.decode_cycle(&buffer, cycle_start_ms).await;
            for spot in spots {
                let _ = spot_tx.send(spot).await;
            }
        }
    }

    async fn decode_cycle(&self, samples: &[i16], cycle_start_ms: i64) -> Vec<Spot> {
        let wav_path = self
            .config
            .work_dir
            .join(format!("{}-{}.wav", self.config.band, cycle_start_ms));

        if let Err(err) = write_cycle_wav(&wav_path, samples, self.config.sample_rate_hz) {
            warn!(band = %self.config.band, %err, "failed to write cycle WAV");
            return Vec::new();
        }

        let spots = match self.spawn_and_parse(&wav_path, cycle_start_ms).await {
            Ok(spots) => spots,
            Err(err) => {
                warn!(band = %self.config.band, %err, "decoder invocation failed");
                Vec::new()
            }
        };

        let _ = std::fs::remove_file(&wav_path);
        dedup_keep_max_snr(spots)
    }

    async fn spawn_and_parse(
        &self,
        wav_path: &std::path::Path,
        cycle_start_ms: i64,
    ) -> std::io::Result<Vec<Spot>> {
        let mut cmd = Command::new(&self.config.decoder_binary);
        cmd.args(&self.config.decoder_args)
            .arg(wav_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let stdout = child.stdout.take().expect("piped stdout");
        let mut lines = BufReader::new(stdout).lines();

        let mut spots = Vec::new();
        let parse_result = timeout(DECODE_TIMEOUT, async {
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(spot) = parse_decoder_line(
                    &line,
                    self.config.mode,
                    &self.config.band,
                    cycle_start_ms,
                ) {
                    spots.push(spot);
                }
            }
        })
        .await;

        if parse_result.is_err() {
            warn!(band = %self.config.band, "decoder overran timeout, killing");
            let _ = child.kill().await;
        }
        let _ = child.wait().await;

        for spot in &mut spots {
            if let Some(country) = self.config.callsign_lookup.country_of(&spot.callsign) {
                debug!(callsign = %spot.callsign, %country, "resolved callsign country");
            }
        }

        Ok(spots)
    }
}

fn write_cycle_wav(path: &std::path::Path, samples: &[i16], sample_rate_hz: u32) -> std::io::Result<()> {
    let file = std::fs::File::create(path)?;
    let mut writer = WavWriter::new(std::io::BufWriter::new(file), sample_rate_hz)?;
    writer.write_samples(samples)?;
    writer.finish()?;
    Ok(())
}

/// Parses one line of decoder stdout into a `Spot`. The real jt9/wsprd
/// tools emit fixed-column text; unrecognized lines are skipped rather
/// than treated as an error (§4.G.4: "whitespace-tolerant, unrecognized
/// lines are logged and skipped").
fn parse_decoder_line(line: &str, mode: Mode, band: &str, cycle_start_ms: i64) -> Option<Spot> {
    match mode {
        Mode::Ft8 | Mode::Ft4 => parse_ft_line(line, mode, band, cycle_start_ms),
        Mode::Wspr => parse_wspr_line(line, band, cycle_start_ms),
        Mode::Js8 => None,
    }
}

/// FT8/FT4 jt9-style line: `HHMMSS SNR DT FREQ ~ MESSAGE...`, e.g.
/// `001230 -5  0.2 1234 ~ CQ MM3NDH IO86` (S4).
fn parse_ft_line(line: &str, mode: Mode, band: &str, cycle_start_ms: i64) -> Option<Spot> {
    let mut fields = line.split_whitespace();
    let _timestamp = fields.next()?;
    let snr_db: f32 = fields.next()?.parse().ok()?;
    let dt_s: f32 = fields.next()?.parse().ok()?;
    let freq_hz: f32 = fields.next()?.parse().ok()?;

    let rest: Vec<&str> = fields.collect();
    let words: &[&str] = match rest.first() {
        Some(&"~") => &rest[1..],
        _ => &rest[..],
    };
    if words.is_empty() {
        return None;
    }
    let message = words.join(" ");

    let callsign = match words.first() {
        Some(&"CQ") => *words.get(1)?,
        Some(first) => first,
        None => return None,
    }
    .to_string();
    let locator = words
        .last()
        .filter(|w| is_maidenhead_locator(w))
        .map(|w| w.to_string());

    Some(Spot {
        callsign,
        band: band.to_string(),
        mode,
        cycle_ts_ms: cycle_start_ms,
        snr_db,
        dt_s,
        freq_hz,
        message,
        drift: None,
        dbm: None,
        locator,
    })
}

/// WSPR wsprd-style line: `HHMMSS SNR DT FREQ DRIFT CALLSIGN LOCATOR DBM`
/// (§4.G.4: "WSPR (timestamp, SNR, Δt, freq, drift, callsign, locator, dBm)").
fn parse_wspr_line(line: &str, band: &str, cycle_start_ms: i64) -> Option<Spot> {
    let mut fields = line.split_whitespace();
    let _timestamp = fields.next()?;
    let snr_db: f32 = fields.next()?.parse().ok()?;
    let dt_s: f32 = fields.next()?.parse().ok()?;
    let freq_hz: f32 = fields.next()?.parse().ok()?;
    let drift: i32 = fields.next()?.parse().ok()?;
    let callsign = fields.next()?.to_string();
    let locator = fields.next()?.to_string();
    let dbm: i32 = fields.next()?.parse().ok()?;

    Some(Spot {
        callsign: callsign.clone(),
        band: band.to_string(),
        mode: Mode::Wspr,
        cycle_ts_ms: cycle_start_ms,
        snr_db,
        dt_s,
        freq_hz,
        message: format!("{callsign} {locator} {dbm}"),
        drift: Some(drift),
        dbm: Some(dbm),
        locator: Some(locator),
    })
}

/// Loose Maidenhead grid check: 4 or 6 characters, alternating
/// letter-pairs and digit-pairs (e.g. `IO86`, `FN42ab`).
fn is_maidenhead_locator(word: &str) -> bool {
    let chars: Vec<char> = word.chars().collect();
    matches!(chars.len(), 4 | 6)
        && chars[0].is_ascii_alphabetic()
        && chars[1].is_ascii_alphabetic()
        && chars[2].is_ascii_digit()
        && chars[3].is_ascii_digit()
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_boundary_rounds_up() {
        assert_eq!(next_cycle_boundary_ms(1_000, 15_000), 15_000);
        assert_eq!(next_cycle_boundary_ms(15_000, 15_000), 15_000);
        assert_eq!(next_cycle_boundary_ms(15_001, 15_000), 30_000);
    }

    #[test]
    fn cycle_boundary_handles_fractional_ft4_cycle() {
        assert_eq!(next_cycle_boundary_ms(1_000, 7_500), 7_500);
        assert_eq!(next_cycle_boundary_ms(7_501, 7_500), 15_000);
    }

    #[test]
    fn cycle_config_matches_known_timings() {
        let ft8 = CycleConfig::for_mode(Mode::Ft8);
        assert_eq!(ft8.cycle_len_ms, Some(15_000));
        let ft4 = CycleConfig::for_mode(Mode::Ft4);
        assert_eq!(ft4.cycle_len_ms, Some(7_500));
        let wspr = CycleConfig::for_mode(Mode::Wspr);
        assert_eq!(wspr.cycle_len_ms, Some(120_000));
        assert_eq!(wspr.record_s, 114.0);
        let js8 = CycleConfig::for_mode(Mode::Js8);
        assert_eq!(js8.cycle_len_ms, None);
    }

    #[test]
    fn parses_s4_example_ft8_line() {
        // §8 S4: `001230 -5  0.2 1234 ~ CQ MM3NDH IO86`
        let spot = parse_decoder_line("001230 -5  0.2 1234 ~ CQ MM3NDH IO86", Mode::Ft8, "20m", 1000)
            .expect("should parse");
        assert_eq!(spot.callsign, "MM3NDH");
        assert_eq!(spot.locator.as_deref(), Some("IO86"));
        assert_eq!(spot.snr_db, -5.0);
        assert_eq!(spot.dt_s, 0.2);
        assert_eq!(spot.freq_hz, 1234.0);
    }

    #[test]
    fn parses_directed_ft8_line_without_cq() {
        let spot = parse_decoder_line("001230 -5 0.2 1234 ~ K1ABC W9XYZ -08", Mode::Ft8, "20m", 1000)
            .expect("should parse");
        assert_eq!(spot.callsign, "K1ABC");
        assert!(spot.locator.is_none());
    }

    #[test]
    fn parses_wspr_line() {
        let spot = parse_decoder_line("001200 -18 0.3 1500 0 AB1CD FN42 27", Mode::Wspr, "20m", 2000)
            .expect("should parse");
        assert_eq!(spot.callsign, "AB1CD");
        assert_eq!(spot.locator.as_deref(), Some("FN42"));
        assert_eq!(spot.dbm, Some(27));
        assert_eq!(spot.drift, Some(0));
    }

    #[test]
    fn rejects_malformed_line() {
        assert!(parse_decoder_line("garbage", Mode::Ft8, "20m", 1000).is_none());
        assert!(parse_decoder_line("garbage too short", Mode::Wspr, "20m", 1000).is_none());
    }
}
