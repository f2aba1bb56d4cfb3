// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! §4.G integration glue: gives MultiDecoder a real internal audio
//! Session instead of a private shortcut, through the same
//! SessionManager/RadiodController path every client-facing adapter
//! uses, and fans its decoded Spots out over the WSJT-X UDP broadcast
//! protocol (§6).
//!
//! A band's session is watched for loss by polling STATUS on an
//! interval; if the back-end stops answering, the session is torn down
//! and re-Created with `ExponentialBackoff::default_session_recreate`
//! (§4.G: "Audio session loss triggers MultiDecoder to re-Create the
//! session (exponential backoff up to 30 s)").

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use multisdr_core::multidecoder::{MultiDecoder, MultiDecoderConfig, NoopCallsignLookup};
use multisdr_core::policies::{ExponentialBackoff, RetryPolicy};
use multisdr_core::session::{SessionEvent, SessionKind};
use multisdr_core::session_manager::{CreateRequest, SessionManager};
use multisdr_core::spot::{Mode, Spot};
use multisdr_protocol::wsjtx;

use crate::config::DecoderBandConfig;
use crate::radiod_controller::RadiodController;

const DECODER_SAMPLE_RATE_HZ: u32 = 12_000;
const PCM_CHANNEL_DEPTH: usize = 8;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(10);
const WSJTX_CLIENT_ID: &str = "multisdr";

fn parse_mode(mode: &str) -> Option<Mode> {
    match mode.to_ascii_lowercase().as_str() {
        "ft8" => Some(Mode::Ft8),
        "ft4" => Some(Mode::Ft4),
        "wspr" => Some(Mode::Wspr),
        "js8" => Some(Mode::Js8),
        _ => None,
    }
}

fn mode_label(mode: Mode) -> &'static str {
    match mode {
        Mode::Ft8 => "FT8",
        Mode::Ft4 => "FT4",
        Mode::Wspr => "WSPR",
        Mode::Js8 => "JS8",
    }
}

/// Runs one configured band's internal audio session plus MultiDecoder
/// loop until `shutdown` fires, re-Creating the session with backoff
/// whenever it is lost.
pub async fn run_band(
    config: DecoderBandConfig,
    work_dir: PathBuf,
    sessions: SessionManager,
    controller: Arc<RadiodController>,
    spot_tx: mpsc::Sender<Spot>,
    mut shutdown: watch::Receiver<bool>,
) {
    let Some(mode) = parse_mode(&config.mode) else {
        warn!(band = %config.band, mode = %config.mode, "unknown decoder mode, skipping band");
        return;
    };

    let retry = ExponentialBackoff::default_session_recreate();
    let mut attempt = 0u32;

    loop {
        if *shutdown.borrow() {
            return;
        }

        let channel_name = format!("decoder-{}", config.band);
        let create_request = CreateRequest {
            user_session_id: format!("internal-decoder-{}", config.band),
            remote_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            source_ip: None,
            channel_name: channel_name.clone(),
            kind: SessionKind::Audio,
            mode: config.mode.clone(),
            center_freq_hz: config.center_freq_hz,
            low_edge_hz: -(DECODER_SAMPLE_RATE_HZ as i32) / 2,
            high_edge_hz: DECODER_SAMPLE_RATE_HZ as i32 / 2,
            sample_rate_hz: DECODER_SAMPLE_RATE_HZ,
            bypass_password: None,
        };

        let session = match sessions.create(create_request).await {
            Ok(s) => s,
            Err(err) => {
                warn!(band = %config.band, %err, "failed to create decoder audio session");
                tokio::time::sleep(retry.delay(attempt)).await;
                attempt = attempt.saturating_add(1);
                continue;
            }
        };
        let ssrc = session.ssrc();
        session.begin_configuring();

        if let Err(err) = controller
            .create_audio_channel(&channel_name, config.center_freq_hz, &config.mode, ssrc)
            .await
        {
            warn!(band = %config.band, ssrc, %err, "back-end refused decoder audio channel");
            let _ = sessions.close(ssrc).await;
            tokio::time::sleep(retry.delay(attempt)).await;
            attempt = attempt.saturating_add(1);
            continue;
        }
        session.apply(SessionEvent::StatusConfirmed);
        info!(band = %config.band, ssrc, "decoder audio session streaming");
        attempt = 0;

        let (pcm_tx, pcm_rx) = mpsc::channel(PCM_CHANNEL_DEPTH);
        let pump_session = session.clone();
        let pump_handle = tokio::spawn(async move {
            loop {
                let payload = pump_session.deliver().await;
                let samples: Vec<i16> = payload
                    .chunks_exact(2)
                    .map(|c| i16::from_be_bytes([c[0], c[1]]))
                    .collect();
                if pcm_tx.send(samples).await.is_err() {
                    return;
                }
            }
        });

        let watchdog_controller = controller.clone();
        let (lost_tx, mut lost_rx) = watch::channel(false);
        let watchdog_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEALTH_POLL_INTERVAL);
            loop {
                ticker.tick().await;
                if watchdog_controller.poll_status(ssrc).await.is_err() {
                    let _ = lost_tx.send(true);
                    return;
                }
            }
        });

        let decoder = MultiDecoder::new(MultiDecoderConfig {
            band: config.band.clone(),
            mode,
            sample_rate_hz: DECODER_SAMPLE_RATE_HZ,
            decoder_binary: PathBuf::from(&config.decoder_binary),
            decoder_args: config.decoder_args.clone(),
            work_dir: work_dir.clone(),
            callsign_lookup: Arc::new(NoopCallsignLookup),
        });

        let mut run_shutdown = shutdown.clone();
        let shut_down = tokio::select! {
            _ = decoder.run(pcm_rx, spot_tx.clone()) => {
                warn!(band = %config.band, ssrc, "decoder loop ended, session presumed lost");
                false
            }
            _ = lost_rx.changed() => {
                warn!(band = %config.band, ssrc, "STATUS poll failed, session presumed lost");
                false
            }
            _ = run_shutdown.changed() => {
                *run_shutdown.borrow()
            }
        };

        pump_handle.abort();
        watchdog_handle.abort();
        let _ = controller.disable_channel(&channel_name, ssrc).await;
        let _ = sessions.close(ssrc).await;

        if shut_down {
            return;
        }

        tokio::time::sleep(retry.delay(attempt)).await;
        attempt = attempt.saturating_add(1);
    }
}

/// Broadcasts Heartbeat (every 15 s), Status+Decode/WSPR-Decode for every
/// `Spot` MultiDecoder emits, and Close on shutdown, over the WSJT-X UDP
/// protocol (§6).
pub async fn run_wsjtx_broadcast(
    target: SocketAddr,
    mut spot_rx: mpsc::Receiver<Spot>,
    mut shutdown: watch::Receiver<bool>,
) {
    let socket = match UdpSocket::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)).await {
        Ok(s) => s,
        Err(err) => {
            warn!(%err, "failed to bind WSJT-X broadcast socket");
            return;
        }
    };

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                let frame = wsjtx::heartbeat(WSJTX_CLIENT_ID, 3, env!("CARGO_PKG_VERSION"), "");
                let _ = socket.send_to(&frame, target).await;
            }
            spot = spot_rx.recv() => {
                let Some(spot) = spot else { break };
                let status = wsjtx::StatusUpdate {
                    dial_freq_hz: spot.freq_hz as u64,
                    mode: mode_label(spot.mode),
                    dx_call: "",
                    report: "",
                    tx_mode: mode_label(spot.mode),
                    tx_enabled: false,
                    transmitting: false,
                    decoding: true,
                };
                let _ = socket.send_to(&wsjtx::status(WSJTX_CLIENT_ID, &status), target).await;

                let frame = match spot.mode {
                    Mode::Wspr => wsjtx::wspr_decode(
                        WSJTX_CLIENT_ID,
                        &wsjtx::WsprDecode {
                            ts_ms: spot.cycle_ts_ms,
                            snr_db: spot.snr_db.round() as i32,
                            dt_s: spot.dt_s as f64,
                            freq_hz: spot.freq_hz as u64,
                            drift_hz: spot.drift.unwrap_or(0),
                            callsign: &spot.callsign,
                            grid: spot.locator.as_deref().unwrap_or(""),
                            power_dbm: spot.dbm.unwrap_or(0),
                        },
                    ),
                    _ => wsjtx::decode(
                        WSJTX_CLIENT_ID,
                        &wsjtx::Decode {
                            is_new: true,
                            ts_ms: spot.cycle_ts_ms,
                            snr_db: spot.snr_db.round() as i32,
                            dt_s: spot.dt_s as f64,
                            freq_hz: spot.freq_hz as u32,
                            mode: mode_label(spot.mode),
                            message: &spot.message,
                        },
                    ),
                };
                let _ = socket.send_to(&frame, target).await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    let _ = socket.send_to(&wsjtx::close(WSJTX_CLIENT_ID), target).await;
}
