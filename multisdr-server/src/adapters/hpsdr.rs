// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! §4.H HPSDR Protocol 2 adapter: lets legacy HPSDR client software (which
//! only ever learned to speak Protocol 2 over a handful of fixed UDP
//! ports) address this system as if it were a Hermes-class board, backed
//! by the same `SessionManager`/`RadiodController` every other adapter
//! uses. Up to `MAX_DDC` independent per-DDC receive chains share the
//! discovery/start-stop socket; each enabled DDC owns one IQ session and
//! one outbound forwarder task.
//!
//! The enable-mask and per-DDC tune requests arriving on the DDC-config
//! and high-priority ports use this adapter's own small fixed-width
//! record layout rather than a bit-exact reproduction of Protocol 2's
//! control frames — only discovery/start-stop (`hpsdr::parse_general`)
//! and the I/Q output framing (`hpsdr::pack_iq_frame`) are wire-exact,
//! since those are the two surfaces real client software actually
//! round-trips against.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use multisdr_core::session::SessionKind;
use multisdr_core::session_manager::{CreateRequest, SessionManager};
use multisdr_protocol::hpsdr::{
    self, build_discovery_reply, clamp_sample_rate, pack_iq_frame, GeneralPacket, DEVICE_TYPE_HERMES,
    MAX_DDC, PORT_DDC_CONFIG, PORT_DISCOVERY, PORT_HIGH_PRIORITY, PORT_IQ_BASE, PORT_MIC_AUDIO,
};

use crate::config::HpsdrConfig;
use crate::radiod_controller::RadiodController;

struct DdcState {
    ssrc: u32,
    peer: SocketAddr,
    forwarder: JoinHandle<()>,
}

/// Owns every socket and per-DDC session the HPSDR surface needs.
pub struct HpsdrAdapter {
    config: HpsdrConfig,
    sessions: SessionManager,
    controller: Arc<RadiodController>,
    active: AtomicBool,
    ddcs: Mutex<HashMap<u8, DdcState>>,
}

impl HpsdrAdapter {
    /// Binds all five HPSDR ports and spawns their receive loops. Returns
    /// immediately; the adapter runs until `shutdown` fires.
    pub async fn spawn(
        config: HpsdrConfig,
        sessions: SessionManager,
        controller: Arc<RadiodController>,
        shutdown: watch::Receiver<bool>,
    ) -> std::io::Result<Arc<Self>> {
        let adapter = Arc::new(Self {
            config,
            sessions,
            controller,
            active: AtomicBool::new(false),
            ddcs: Mutex::new(HashMap::new()),
        });

        let discovery = bind(adapter.listen_addr(), PORT_DISCOVERY).await?;
        let ddc_config = bind(adapter.listen_addr(), PORT_DDC_CONFIG).await?;
        let high_priority = bind(adapter.listen_addr(), PORT_HIGH_PRIORITY).await?;
        let mic_audio = bind(adapter.listen_addr(), PORT_MIC_AUDIO).await?;

        tokio::spawn(run_discovery(adapter.clone(), discovery, shutdown.clone()));
        tokio::spawn(run_ddc_config(adapter.clone(), ddc_config, shutdown.clone()));
        tokio::spawn(run_high_priority(adapter.clone(), high_priority, shutdown.clone()));
        tokio::spawn(run_mic_drain(mic_audio, shutdown));

        Ok(adapter)
    }

    fn listen_addr(&self) -> IpAddr {
        self.config.listen
    }
}

async fn bind(addr: IpAddr, port: u16) -> std::io::Result<UdpSocket> {
    UdpSocket::bind(SocketAddr::new(addr, port)).await
}

async fn run_discovery(adapter: Arc<HpsdrAdapter>, socket: UdpSocket, mut shutdown: watch::Receiver<bool>) {
    let mut buf = vec![0u8; 128];
    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let Ok((len, peer)) = received else { continue };
                match hpsdr::parse_general(&buf[..len]) {
                    Some(GeneralPacket::Discovery) => {
                        let mac = parse_mac(&adapter.config.mac_address);
                        let reply = build_discovery_reply(mac, DEVICE_TYPE_HERMES);
                        if let Err(err) = socket.send_to(&reply, peer).await {
                            warn!(%err, "failed to send HPSDR discovery reply");
                        }
                    }
                    Some(GeneralPacket::Start) => {
                        adapter.active.store(true, Ordering::Relaxed);
                        info!(%peer, "HPSDR client started streaming");
                    }
                    Some(GeneralPacket::Stop) => {
                        adapter.active.store(false, Ordering::Relaxed);
                        info!(%peer, "HPSDR client stopped streaming");
                    }
                    None => debug!(%peer, "unrecognized HPSDR discovery-port packet"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() { return; }
            }
        }
    }
}

/// One record per potential DDC: `[enabled: u8][sample_rate_hz: u32 LE]`.
const DDC_RECORD_LEN: usize = 5;

async fn run_ddc_config(adapter: Arc<HpsdrAdapter>, socket: UdpSocket, mut shutdown: watch::Receiver<bool>) {
    let mut buf = vec![0u8; DDC_RECORD_LEN * MAX_DDC];
    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let Ok((len, peer)) = received else { continue };
                for idx in 0..MAX_DDC {
                    let offset = idx * DDC_RECORD_LEN;
                    if offset + DDC_RECORD_LEN > len {
                        break;
                    }
                    let enabled = buf[offset] != 0;
                    let rate = u32::from_le_bytes(buf[offset + 1..offset + 5].try_into().unwrap());
                    adapter.clone().set_ddc_enabled(idx as u8, enabled, rate, peer).await;
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() { return; }
            }
        }
    }
}

impl HpsdrAdapter {
    async fn set_ddc_enabled(self: Arc<Self>, ddc: u8, enabled: bool, requested_rate_hz: u32, peer: SocketAddr) {
        let already_running = self.ddcs.lock().expect("ddc table poisoned").contains_key(&ddc);
        if enabled && !already_running {
            let (rate_hz, clamped) = clamp_sample_rate(requested_rate_hz);
            if clamped {
                warn!(ddc, requested_rate_hz, clamped_to = rate_hz, "HPSDR DDC sample rate clamped");
            }

            let request = CreateRequest {
                user_session_id: format!("hpsdr-{peer}"),
                remote_addr: peer.ip(),
                source_ip: None,
                channel_name: format!("hpsdr-ddc-{ddc}"),
                kind: SessionKind::Iq,
                mode: "iq".to_string(),
                center_freq_hz: 0,
                low_edge_hz: -(rate_hz as i32) / 2,
                high_edge_hz: rate_hz as i32 / 2,
                sample_rate_hz: rate_hz,
                bypass_password: None,
            };
            let session = match self.sessions.create(request).await {
                Ok(s) => s,
                Err(err) => {
                    warn!(ddc, %err, "failed to create HPSDR DDC session");
                    return;
                }
            };
            let ssrc = session.ssrc();
            if let Err(err) = self
                .controller
                .create_iq_channel(&format!("hpsdr-ddc-{ddc}"), 0, rate_hz, ssrc)
                .await
            {
                warn!(ddc, %err, "back-end refused HPSDR DDC channel");
                let _ = self.sessions.close(ssrc).await;
                return;
            }
            session.begin_configuring();
            session.apply(multisdr_core::session::SessionEvent::StatusConfirmed);

            let forward_session = session.clone();
            let forwarder = tokio::spawn(forward_iq(forward_session, peer, ddc));
            self.ddcs
                .lock()
                .expect("ddc table poisoned")
                .insert(ddc, DdcState { ssrc, peer, forwarder });
            info!(ddc, ssrc, %peer, rate_hz, "HPSDR DDC enabled");
        } else if !enabled && already_running {
            if let Some(state) = self.ddcs.lock().expect("ddc table poisoned").remove(&ddc) {
                state.forwarder.abort();
                let _ = self.controller.disable_channel(&format!("hpsdr-ddc-{ddc}"), state.ssrc).await;
                let _ = self.sessions.close(state.ssrc).await;
                info!(ddc, ssrc = state.ssrc, "HPSDR DDC disabled");
            }
        }
    }
}

/// Pulls interleaved 16-bit I/Q payloads off a session's queue and packs
/// them into 1444-byte HPSDR datagrams on the DDC's dedicated output port.
async fn forward_iq(session: Arc<multisdr_core::session::Session>, peer: SocketAddr, ddc: u8) {
    let Ok(socket) = UdpSocket::bind((peer.ip(), 0u16)).await else {
        warn!(ddc, "failed to bind HPSDR IQ forwarder socket");
        return;
    };
    let out_port = PORT_IQ_BASE + ddc as u16;
    let out_addr = SocketAddr::new(peer.ip(), out_port);
    let mut sequence: u32 = 0;

    loop {
        let payload = session.deliver().await;
        let samples: Vec<(i16, i16)> = payload
            .chunks_exact(4)
            .map(|c| {
                let i = i16::from_be_bytes([c[0], c[1]]);
                let q = i16::from_be_bytes([c[2], c[3]]);
                (i, q)
            })
            .collect();

        for chunk in samples.chunks(hpsdr::SAMPLES_PER_FRAME) {
            let mut header = [0u8; 8];
            header[0..4].copy_from_slice(&sequence.to_be_bytes());
            sequence = sequence.wrapping_add(1);
            let frame = pack_iq_frame(header, chunk);
            if let Err(err) = socket.send_to(&frame, out_addr).await {
                debug!(ddc, %err, "HPSDR IQ forwarder send failed, stopping");
                return;
            }
        }
    }
}

async fn run_high_priority(adapter: Arc<HpsdrAdapter>, socket: UdpSocket, mut shutdown: watch::Receiver<bool>) {
    let mut buf = vec![0u8; 16];
    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let Ok((len, peer)) = received else { continue };
                if len < 9 {
                    debug!(%peer, len, "short HPSDR high-priority packet");
                    continue;
                }
                let ddc = buf[0];
                let freq_hz = u64::from_le_bytes(buf[1..9].try_into().unwrap());
                let ssrc = adapter
                    .ddcs
                    .lock()
                    .expect("ddc table poisoned")
                    .get(&ddc)
                    .map(|s| s.ssrc);
                if let Some(ssrc) = ssrc {
                    if let Err(err) = adapter.controller.tune(ssrc, freq_hz, None).await {
                        warn!(ddc, ssrc, %err, "HPSDR tune command failed");
                    }
                } else {
                    debug!(ddc, "tune request for an inactive DDC, ignored");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() { return; }
            }
        }
    }
}

/// This system never transmits, so the mic-audio port only needs to be
/// bound (so discovery replies stay plausible to clients that check for
/// it) and drained of whatever silence frames the client sends.
async fn run_mic_drain(socket: UdpSocket, mut shutdown: watch::Receiver<bool>) {
    let mut buf = vec![0u8; 1500];
    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                if received.is_err() {
                    return;
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() { return; }
            }
        }
    }
}

fn parse_mac(s: &str) -> [u8; 6] {
    let mut mac = [0u8; 6];
    for (i, part) in s.split(':').take(6).enumerate() {
        mac[i] = u8::from_str_radix(part, 16).unwrap_or(0);
    }
    mac
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_mac() {
        assert_eq!(parse_mac("00:1c:c0:a2:13:37"), [0x00, 0x1c, 0xc0, 0xa2, 0x13, 0x37]);
    }

    #[test]
    fn malformed_mac_octet_falls_back_to_zero() {
        assert_eq!(parse_mac("zz:1c:c0:a2:13:37")[0], 0);
    }
}
