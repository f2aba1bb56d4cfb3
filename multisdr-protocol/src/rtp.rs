// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Minimal RTP header parsing for the back-end's data multicast groups
//! (§4.D, §6). Version/payload-type are retained but not interpreted by
//! this system; the SSRC is the only field the receivers route on.

/// Fixed RTP header size in bytes; CSRC identifiers (if any) follow.
pub const HEADER_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum RtpError {
    #[error("RTP packet shorter than the 12-byte fixed header")]
    TooShort,
    #[error("RTP packet shorter than its CSRC list implies")]
    CsrcTruncated,
}

/// A parsed RTP packet: header plus the payload bytes that follow it
/// (and any CSRC identifiers).
pub struct RtpPacket<'a> {
    pub header: RtpHeader,
    pub payload: &'a [u8],
}

/// Parse an RTP packet from a received datagram. Returns an error only
/// when the buffer is too short to contain a well-formed header; an
/// empty payload is a valid (if degenerate) packet — callers decide
/// whether a zero-length payload is worth delivering (B3: it is dropped
/// silently, not as an error).
pub fn parse(buf: &[u8]) -> Result<RtpPacket<'_>, RtpError> {
    if buf.len() < HEADER_LEN {
        return Err(RtpError::TooShort);
    }

    let b0 = buf[0];
    let version = b0 >> 6;
    let padding = (b0 & 0x20) != 0;
    let extension = (b0 & 0x10) != 0;
    let csrc_count = b0 & 0x0F;

    let b1 = buf[1];
    let marker = (b1 & 0x80) != 0;
    let payload_type = b1 & 0x7F;

    let sequence_number = u16::from_be_bytes([buf[2], buf[3]]);
    let timestamp = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let ssrc = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);

    let csrc_bytes = csrc_count as usize * 4;
    if buf.len() < HEADER_LEN + csrc_bytes {
        return Err(RtpError::CsrcTruncated);
    }

    Ok(RtpPacket {
        header: RtpHeader {
            version,
            padding,
            extension,
            csrc_count,
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
        },
        payload: &buf[HEADER_LEN + csrc_bytes..],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_packet(ssrc: u32, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN];
        buf[0] = 0x80; // version 2, no padding/extension/csrc
        buf[1] = 0x00; // no marker, payload type 0
        buf[2..4].copy_from_slice(&1234u16.to_be_bytes());
        buf[4..8].copy_from_slice(&5678u32.to_be_bytes());
        buf[8..12].copy_from_slice(&ssrc.to_be_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn parses_ssrc_from_bytes_8_to_11() {
        let buf = sample_packet(0x1234_5678, &[1, 2, 3, 4]);
        let pkt = parse(&buf).unwrap();
        assert_eq!(pkt.header.ssrc, 0x1234_5678);
        assert_eq!(pkt.payload, &[1, 2, 3, 4]);
    }

    #[test]
    fn zero_length_payload_parses_but_is_empty() {
        let buf = sample_packet(42, &[]);
        let pkt = parse(&buf).unwrap();
        assert!(pkt.payload.is_empty());
    }

    #[test]
    fn too_short_is_an_error() {
        let buf = vec![0u8; 11];
        assert!(matches!(parse(&buf), Err(RtpError::TooShort)));
    }
}
