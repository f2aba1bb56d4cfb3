// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! HPSDR Protocol 2 UDP framing (§4.H, §6). The adapter that owns the
//! sockets lives in `multisdr-server::adapters::hpsdr`; this module only
//! knows how to recognize and build the datagrams.

/// Port 1024: discovery and general start/stop.
pub const PORT_DISCOVERY: u16 = 1024;
/// Port 1025: DDC enable mask / per-DDC sample rate.
pub const PORT_DDC_CONFIG: u16 = 1025;
/// Port 1026: mic audio (silence; this system is receive-only).
pub const PORT_MIC_AUDIO: u16 = 1026;
/// Port 1027: high-priority control (per-DDC frequency).
pub const PORT_HIGH_PRIORITY: u16 = 1027;
/// First of the per-DDC I/Q output ports (1035..=1042, up to 8 DDCs).
pub const PORT_IQ_BASE: u16 = 1035;
pub const MAX_DDC: usize = 8;

/// A back-end-imposed ceiling: sample rates above this are clamped (B1).
pub const MAX_SAMPLE_RATE_HZ: u32 = 192_000;

const DISCOVERY_LEN: usize = 60;
const DISCOVERY_PREFIX: [u8; 5] = [0x00, 0x00, 0x00, 0x00, 0x02];
const START_STOP_PREFIX: [u8; 5] = [0x00, 0x00, 0x00, 0x00, 0x00];

/// One parsed request arriving on port 1024.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneralPacket {
    Discovery,
    Start,
    Stop,
}

pub fn parse_general(buf: &[u8]) -> Option<GeneralPacket> {
    if buf.len() == DISCOVERY_LEN && buf[..5] == DISCOVERY_PREFIX {
        return Some(GeneralPacket::Discovery);
    }
    if buf.len() >= 5 && buf[..5] == START_STOP_PREFIX {
        // The 6th byte conventionally distinguishes start (1) from stop (0);
        // absent a byte, treat as stop.
        return Some(if buf.get(5) == Some(&1) {
            GeneralPacket::Start
        } else {
            GeneralPacket::Stop
        });
    }
    None
}

/// Build a discovery reply: configured MAC address and device-type byte.
pub fn build_discovery_reply(mac: [u8; 6], device_type: u8) -> Vec<u8> {
    let mut buf = vec![0u8; DISCOVERY_LEN];
    buf[0..5].copy_from_slice(&DISCOVERY_PREFIX);
    buf[5..11].copy_from_slice(&mac);
    buf[11] = device_type;
    buf
}

/// "hermes" is the device-type byte this system identifies as (S5).
pub const DEVICE_TYPE_HERMES: u8 = 0x06;

/// Clamp a requested per-DDC sample rate to the back-end's ceiling,
/// returning `true` when clamping occurred (the caller logs on `true`,
/// per B1).
pub fn clamp_sample_rate(requested_hz: u32) -> (u32, bool) {
    if requested_hz > MAX_SAMPLE_RATE_HZ {
        (MAX_SAMPLE_RATE_HZ, true)
    } else {
        (requested_hz, false)
    }
}

/// Samples per I/Q output datagram and the resulting datagram size:
/// 8-byte header + 238 * 6-byte samples = 1444 bytes.
pub const SAMPLES_PER_FRAME: usize = 238;
pub const IQ_DATAGRAM_LEN: usize = 8 + SAMPLES_PER_FRAME * 6;

/// Pack up to `SAMPLES_PER_FRAME` 16-bit I/Q pairs (as received from the
/// back-end's RTP stream, §4.D) into one 1444-byte HPSDR I/Q datagram as
/// 24-bit big-endian samples, left-justified with zero-padded low byte.
/// `header` is the 8-byte HPSDR sequence/sync header, caller-supplied.
pub fn pack_iq_frame(header: [u8; 8], samples: &[(i16, i16)]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(IQ_DATAGRAM_LEN);
    buf.extend_from_slice(&header);
    for i in 0..SAMPLES_PER_FRAME {
        let (i_sample, q_sample) = samples.get(i).copied().unwrap_or((0, 0));
        push_24bit(&mut buf, i_sample);
        push_24bit(&mut buf, q_sample);
    }
    debug_assert_eq!(buf.len(), IQ_DATAGRAM_LEN);
    buf
}

fn push_24bit(buf: &mut Vec<u8>, sample16: i16) {
    // Widen a 16-bit sample to 24-bit by left-justifying it (low byte 0),
    // matching how a 16-bit ADC value is conventionally placed into a
    // wider HPSDR sample slot.
    let widened = (sample16 as i32) << 8;
    let bytes = widened.to_be_bytes();
    buf.extend_from_slice(&bytes[1..4]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_packet_recognized() {
        let mut buf = vec![0u8; DISCOVERY_LEN];
        buf[..5].copy_from_slice(&DISCOVERY_PREFIX);
        assert_eq!(parse_general(&buf), Some(GeneralPacket::Discovery));
    }

    #[test]
    fn discovery_reply_carries_mac_and_device_type() {
        let mac = [0x00, 0x1C, 0x2A, 0x11, 0x22, 0x33];
        let reply = build_discovery_reply(mac, DEVICE_TYPE_HERMES);
        assert_eq!(&reply[5..11], &mac);
        assert_eq!(reply[11], DEVICE_TYPE_HERMES);
    }

    #[test]
    fn sample_rates_above_192k_are_clamped() {
        for requested in [384_000, 768_000, 1_536_000] {
            let (clamped, did_clamp) = clamp_sample_rate(requested);
            assert_eq!(clamped, MAX_SAMPLE_RATE_HZ);
            assert!(did_clamp);
        }
        let (clamped, did_clamp) = clamp_sample_rate(48_000);
        assert_eq!(clamped, 48_000);
        assert!(!did_clamp);
    }

    #[test]
    fn iq_frame_is_1444_bytes() {
        let frame = pack_iq_frame([0; 8], &[(100, -100); SAMPLES_PER_FRAME]);
        assert_eq!(frame.len(), IQ_DATAGRAM_LEN);
        assert_eq!(IQ_DATAGRAM_LEN, 1444);
    }
}
