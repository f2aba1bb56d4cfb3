// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! WSJT-X UDP broadcast encoding (§6), used by MultiDecoder to publish
//! decodes to the conventional WSJT-X ecosystem (e.g. a PSKReporter
//! uploader listening on the same multicast/broadcast address). Field
//! order within each message type must match the real protocol
//! bit-for-bit; this module only implements the subset MultiDecoder
//! needs (Heartbeat, Status, Decode, Close, WSPR-Decode).

use bytes::{BufMut, BytesMut};

const MAGIC: u32 = 0xADBC_CBDA;
const SCHEMA: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageType {
    Heartbeat = 0,
    Status = 1,
    Decode = 2,
    Close = 6,
    WsprDecode = 10,
}

fn put_header(buf: &mut BytesMut, msg_type: MessageType, client_id: &str) {
    buf.put_u32(MAGIC);
    buf.put_u32(SCHEMA);
    buf.put_u32(msg_type as u32);
    put_utf8_string(buf, client_id);
}

fn put_utf8_string(buf: &mut BytesMut, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn put_bool(buf: &mut BytesMut, v: bool) {
    buf.put_u8(v as u8);
}

/// Heartbeat, sent every 15 s while the connection is alive.
pub fn heartbeat(client_id: &str, max_schema: u32, version: &str, revision: &str) -> Vec<u8> {
    let mut buf = BytesMut::new();
    put_header(&mut buf, MessageType::Heartbeat, client_id);
    buf.put_u32(max_schema);
    put_utf8_string(&mut buf, version);
    put_utf8_string(&mut buf, revision);
    buf.to_vec()
}

/// Status update, sent whenever band/dial/mode changes, BEFORE the
/// matching decode (§6).
pub struct StatusUpdate<'a> {
    pub dial_freq_hz: u64,
    pub mode: &'a str,
    pub dx_call: &'a str,
    pub report: &'a str,
    pub tx_mode: &'a str,
    pub tx_enabled: bool,
    pub transmitting: bool,
    pub decoding: bool,
}

pub fn status(client_id: &str, s: &StatusUpdate<'_>) -> Vec<u8> {
    let mut buf = BytesMut::new();
    put_header(&mut buf, MessageType::Status, client_id);
    buf.put_u64(s.dial_freq_hz);
    put_utf8_string(&mut buf, s.mode);
    put_utf8_string(&mut buf, s.dx_call);
    put_utf8_string(&mut buf, s.report);
    put_utf8_string(&mut buf, s.tx_mode);
    put_bool(&mut buf, s.tx_enabled);
    put_bool(&mut buf, s.transmitting);
    put_bool(&mut buf, s.decoding);
    buf.to_vec()
}

/// A single FT8/FT4 decode line (§4.G.4).
pub struct Decode<'a> {
    pub is_new: bool,
    pub ts_ms: i64,
    pub snr_db: i32,
    pub dt_s: f64,
    pub freq_hz: u32,
    pub mode: &'a str,
    pub message: &'a str,
}

pub fn decode(client_id: &str, d: &Decode<'_>) -> Vec<u8> {
    let mut buf = BytesMut::new();
    put_header(&mut buf, MessageType::Decode, client_id);
    put_bool(&mut buf, d.is_new);
    buf.put_u32((d.ts_ms.rem_euclid(86_400_000)) as u32);
    buf.put_i32(d.snr_db);
    buf.put_f64(d.dt_s);
    buf.put_u32(d.freq_hz);
    put_utf8_string(&mut buf, d.mode);
    put_utf8_string(&mut buf, d.message);
    buf.to_vec()
}

/// WSPR decode (§4.G.4), schema-3 message type 10.
pub struct WsprDecode<'a> {
    pub ts_ms: i64,
    pub snr_db: i32,
    pub dt_s: f64,
    pub freq_hz: u64,
    pub drift_hz: i32,
    pub callsign: &'a str,
    pub grid: &'a str,
    pub power_dbm: i32,
}

pub fn wspr_decode(client_id: &str, w: &WsprDecode<'_>) -> Vec<u8> {
    let mut buf = BytesMut::new();
    put_header(&mut buf, MessageType::WsprDecode, client_id);
    buf.put_u32((w.ts_ms.rem_euclid(86_400_000)) as u32);
    buf.put_i32(w.snr_db);
    buf.put_f64(w.dt_s);
    buf.put_u64(w.freq_hz);
    put_utf8_string(&mut buf, w.callsign);
    put_utf8_string(&mut buf, w.grid);
    buf.put_i32(w.power_dbm);
    buf.put_i32(w.drift_hz);
    buf.to_vec()
}

/// Sent once, on shutdown.
pub fn close(client_id: &str) -> Vec<u8> {
    let mut buf = BytesMut::new();
    put_header(&mut buf, MessageType::Close, client_id);
    buf.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_u32(buf: &[u8], pos: &mut usize) -> u32 {
        let v = u32::from_be_bytes(buf[*pos..*pos + 4].try_into().unwrap());
        *pos += 4;
        v
    }

    #[test]
    fn heartbeat_starts_with_magic_schema_and_type() {
        let buf = heartbeat("multisdr", 3, "1.0", "abc123");
        let mut pos = 0;
        assert_eq!(read_u32(&buf, &mut pos), MAGIC);
        assert_eq!(read_u32(&buf, &mut pos), SCHEMA);
        assert_eq!(read_u32(&buf, &mut pos), MessageType::Heartbeat as u32);
    }

    #[test]
    fn client_id_string_is_length_prefixed() {
        let buf = close("multisdr");
        let mut pos = 12; // past magic/schema/type
        let len = read_u32(&buf, &mut pos) as usize;
        assert_eq!(len, "multisdr".len());
        assert_eq!(&buf[pos..pos + len], b"multisdr");
    }

    #[test]
    fn wspr_decode_roundtrips_field_order() {
        let w = WsprDecode {
            ts_ms: 1_000,
            snr_db: -12,
            dt_s: 0.3,
            freq_hz: 14_097_100,
            drift_hz: 1,
            callsign: "MM3NDH",
            grid: "IO86",
            power_dbm: 37,
        };
        let buf = wspr_decode("multisdr", &w);
        let mut pos = 0;
        assert_eq!(read_u32(&buf, &mut pos), MAGIC);
        assert_eq!(read_u32(&buf, &mut pos), SCHEMA);
        assert_eq!(read_u32(&buf, &mut pos), MessageType::WsprDecode as u32);
    }
}
