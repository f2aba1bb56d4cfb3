// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! §4.D AudioReceiver / SpectrumReceiver: one receive loop per data
//! multicast group, demultiplexing RTP datagrams by SSRC into the
//! matching Session's outbound queue. Lookups go through the manager's
//! synchronous `ReceiverRegistry`, never its async request channel, so a
//! burst of packets never waits on anything but the registry's own
//! `RwLock` (§4.D, §5 "receivers NEVER block on the consumer").

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use multisdr_core::session_manager::ReceiverRegistry;
use multisdr_protocol::rtp;

use crate::multicast::MulticastSocket;

/// Counters exposed for health/diagnostics; both receivers share the same
/// shape since their demux logic is identical and only the payload
/// interpretation (owned by Session.kind) differs downstream.
#[derive(Default)]
pub struct ReceiverStats {
    pub packets_received: AtomicU64,
    pub orphaned_ssrc: AtomicU64,
    pub malformed: AtomicU64,
}

/// Parses one RTP datagram and routes its payload to the owning Session,
/// or counts it as orphaned/malformed/dropped. Kept free of any socket so
/// it can be exercised directly in tests without a live multicast join.
fn route_datagram(buf: &[u8], registry: &ReceiverRegistry, stats: &ReceiverStats) {
    let packet = match rtp::parse(buf) {
        Ok(packet) => packet,
        Err(err) => {
            stats.malformed.fetch_add(1, Ordering::Relaxed);
            debug!(%err, "malformed RTP datagram");
            return;
        }
    };

    // B3: a zero-length payload is a no-op, dropped before it reaches the
    // registry lookup and without incrementing any counter.
    if packet.payload.is_empty() {
        return;
    }

    stats.packets_received.fetch_add(1, Ordering::Relaxed);

    match registry.lookup(packet.header.ssrc) {
        Some(session) => session.enqueue(packet.payload.to_vec()),
        None => {
            stats.orphaned_ssrc.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Reads RTP datagrams from one multicast group and routes them by SSRC.
pub struct DatagramReceiver {
    socket: MulticastSocket,
    registry: ReceiverRegistry,
    stats: Arc<ReceiverStats>,
}

impl DatagramReceiver {
    pub fn new(socket: MulticastSocket, registry: ReceiverRegistry) -> Self {
        Self {
            socket,
            registry,
            stats: Arc::new(ReceiverStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<ReceiverStats> {
        self.stats.clone()
    }

    /// Runs until `shutdown` fires. Each iteration either processes one
    /// datagram or times out (per the socket's configured read deadline),
    /// which is how the loop notices shutdown promptly (§5 "reads use
    /// short deadlines").
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut buf = vec![0u8; 2048];
        loop {
            if *shutdown.borrow() {
                return;
            }
            tokio::select! {
                received = self.socket.recv(&mut buf) => {
                    if let Ok(Some((len, _from))) = received {
                        route_datagram(&buf[..len], &self.registry, &self.stats);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use multisdr_core::session_manager::{CreateRequest, Limits, SessionManager};
    use multisdr_core::session::SessionKind;
    use std::net::{IpAddr, Ipv4Addr};

    fn sample_packet(ssrc: u32, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; rtp::HEADER_LEN];
        buf[0] = 0x80;
        buf[8..12].copy_from_slice(&ssrc.to_be_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    #[tokio::test]
    async fn routes_payload_to_owning_session() {
        let mgr = SessionManager::spawn(Limits::default());
        let ip = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
        let session = mgr
            .create(CreateRequest {
                user_session_id: "u".to_string(),
                remote_addr: ip,
                source_ip: None,
                channel_name: "audio".to_string(),
                kind: SessionKind::Audio,
                mode: "usb".to_string(),
                center_freq_hz: 14_074_000,
                low_edge_hz: -1500,
                high_edge_hz: 1500,
                sample_rate_hz: 12000,
                bypass_password: None,
            })
            .await
            .unwrap();

        let registry = mgr.receiver_registry();
        let stats = ReceiverStats::default();
        let buf = sample_packet(session.ssrc(), &[1, 2, 3, 4]);
        route_datagram(&buf, &registry, &stats);

        assert_eq!(session.queue_len(), 1);
        assert_eq!(stats.packets_received.load(Ordering::Relaxed), 1);
        assert_eq!(stats.orphaned_ssrc.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn orphaned_ssrc_is_counted_and_dropped() {
        let mgr = SessionManager::spawn(Limits::default());
        let registry = mgr.receiver_registry();
        let stats = ReceiverStats::default();
        let buf = sample_packet(999, &[1, 2, 3]);
        route_datagram(&buf, &registry, &stats);

        assert_eq!(stats.orphaned_ssrc.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn zero_length_payload_is_dropped_without_counting() {
        let mgr = SessionManager::spawn(Limits::default());
        let ip = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
        let session = mgr
            .create(CreateRequest {
                user_session_id: "u".to_string(),
                remote_addr: ip,
                source_ip: None,
                channel_name: "audio".to_string(),
                kind: SessionKind::Audio,
                mode: "usb".to_string(),
                center_freq_hz: 14_074_000,
                low_edge_hz: -1500,
                high_edge_hz: 1500,
                sample_rate_hz: 12000,
                bypass_password: None,
            })
            .await
            .unwrap();

        let registry = mgr.receiver_registry();
        let stats = ReceiverStats::default();
        let buf = sample_packet(session.ssrc(), &[]);
        route_datagram(&buf, &registry, &stats);

        assert_eq!(session.queue_len(), 0);
        assert_eq!(stats.packets_received.load(Ordering::Relaxed), 0);
        assert_eq!(stats.orphaned_ssrc.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn malformed_datagram_is_counted() {
        let mgr = SessionManager::spawn(Limits::default());
        let registry = mgr.receiver_registry();
        let stats = ReceiverStats::default();
        route_datagram(&[0u8; 4], &registry, &stats);
        assert_eq!(stats.malformed.load(Ordering::Relaxed), 1);
    }
}
