// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! TLV codec for the back-end's STATUS/COMMAND control protocol.
//!
//! Frame layout: one byte packet type, then a sequence of (tag, length,
//! value) triples terminated by tag 0. `length` is a single byte when
//! < 128; otherwise the high bit marks an extension and the low 7 bits
//! give the count of following big-endian length bytes. Unknown tags are
//! always skipped rather than rejected, so new back-end tags never break
//! an older client.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest single TLV value this codec will allocate for. Guards against
/// a corrupt or hostile length field causing an unbounded allocation.
pub const MAX_VALUE_SIZE: usize = 1 << 20;

/// Packet type byte that prefixes every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Status,
    Command,
}

impl PacketType {
    fn to_byte(self) -> u8 {
        match self {
            PacketType::Status => 0,
            PacketType::Command => 1,
        }
    }

    fn from_byte(b: u8) -> Result<Self, TlvError> {
        match b {
            0 => Ok(PacketType::Status),
            1 => Ok(PacketType::Command),
            other => Err(TlvError::UnknownPacketType(other)),
        }
    }
}

/// Known tags used by this system. The back-end defines the canonical
/// numeric assignments (§9 open question (a)); the values below are an
/// internally-consistent placeholder table, not guessed production
/// numbers. Because encode and decode share this table, round-tripping
/// (R1) holds regardless of which real numbers the back-end actually
/// uses — only interop with a live back-end requires the real table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
    Eom = 0,
    CommandTag = 1,
    OutputSsrc = 2,
    RadioFrequency = 3,
    Preset = 4,
    LowEdge = 5,
    HighEdge = 6,
    SampleRate = 7,
    DemodType = 8,
    BinCount = 9,
    BinBandwidth = 10,
    BinData = 11,
    /// Some back-end builds emit bin data under this alternate code
    /// (§9 open question (b)); the STATUS handler treats it identically
    /// to `BinData`.
    BinDataAlt = 12,
    Unknown(u8),
}

impl Tag {
    fn to_byte(self) -> u8 {
        match self {
            Tag::Eom => 0,
            Tag::CommandTag => 1,
            Tag::OutputSsrc => 2,
            Tag::RadioFrequency => 3,
            Tag::Preset => 4,
            Tag::LowEdge => 5,
            Tag::HighEdge => 6,
            Tag::SampleRate => 7,
            Tag::DemodType => 8,
            Tag::BinCount => 9,
            Tag::BinBandwidth => 10,
            Tag::BinData => 11,
            Tag::BinDataAlt => 12,
            Tag::Unknown(b) => b,
        }
    }

    fn from_byte(b: u8) -> Tag {
        match b {
            0 => Tag::Eom,
            1 => Tag::CommandTag,
            2 => Tag::OutputSsrc,
            3 => Tag::RadioFrequency,
            4 => Tag::Preset,
            5 => Tag::LowEdge,
            6 => Tag::HighEdge,
            7 => Tag::SampleRate,
            8 => Tag::DemodType,
            9 => Tag::BinCount,
            10 => Tag::BinBandwidth,
            11 => Tag::BinData,
            12 => Tag::BinDataAlt,
            other => Tag::Unknown(other),
        }
    }

    /// True for the two tags a STATUS handler should treat as carrying
    /// spectrum power bins.
    pub fn is_bin_data(self) -> bool {
        matches!(self, Tag::BinData | Tag::BinDataAlt)
    }
}

/// The decoded value of one TLV element. The codec itself does not know
/// which shape a given tag "should" carry; callers interpret `Bytes`
/// according to the tag as integer, float, or opaque blob.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A variable-width big-endian unsigned integer, widened into a u64.
    Int(u64),
    Float32(f32),
    Float64(f64),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        self.as_u64().map(|v| v as u32)
    }

    pub fn int(value: u64, width: usize) -> Self {
        debug_assert!(width <= 8);
        Value::Int(value)
    }
}

/// One (tag, value) element of a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: Tag,
    pub value: Value,
}

/// A fully decoded STATUS or COMMAND frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub packet_type: PacketType,
    pub elements: Vec<Element>,
}

impl Frame {
    pub fn new(packet_type: PacketType) -> Self {
        Self {
            packet_type,
            elements: Vec::new(),
        }
    }

    pub fn push_int(&mut self, tag: Tag, value: u64, width: usize) -> &mut Self {
        self.elements.push(Element {
            tag,
            value: Value::int(value, width),
        });
        self
    }

    pub fn push_float32(&mut self, tag: Tag, value: f32) -> &mut Self {
        self.elements.push(Element {
            tag,
            value: Value::Float32(value),
        });
        self
    }

    pub fn push_bytes(&mut self, tag: Tag, value: Vec<u8>) -> &mut Self {
        self.elements.push(Element {
            tag,
            value: Value::Bytes(value),
        });
        self
    }

    pub fn get(&self, tag: Tag) -> Option<&Value> {
        self.elements.iter().find(|e| e.tag == tag).map(|e| &e.value)
    }

    /// Encode this frame to a flat byte buffer (used for UDP sends where
    /// the whole datagram is built up-front).
    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32);
        out.push(self.packet_type.to_byte());
        for el in &self.elements {
            encode_element(&mut out, el);
        }
        out.push(Tag::Eom.to_byte());
        out.push(0); // length 0 terminator
        out
    }

    pub fn decode_from_slice(buf: &[u8]) -> Result<Frame, TlvError> {
        if buf.is_empty() {
            return Err(TlvError::Truncated);
        }
        let packet_type = PacketType::from_byte(buf[0])?;
        let mut frame = Frame::new(packet_type);
        let mut pos = 1;
        loop {
            if pos >= buf.len() {
                return Err(TlvError::Truncated);
            }
            let tag = Tag::from_byte(buf[pos]);
            pos += 1;
            let (len, len_bytes) = decode_length(&buf[pos..])?;
            pos += len_bytes;
            if tag == Tag::Eom {
                break;
            }
            if len > MAX_VALUE_SIZE {
                return Err(TlvError::ValueTooLarge(len));
            }
            if pos + len > buf.len() {
                return Err(TlvError::Truncated);
            }
            let raw = &buf[pos..pos + len];
            frame.elements.push(Element {
                tag,
                value: Value::Bytes(raw.to_vec()),
            });
            pos += len;
        }
        Ok(frame)
    }
}

fn encode_length(out: &mut Vec<u8>, len: usize) {
    if len < 128 {
        out.push(len as u8);
        return;
    }
    // Extension form: high bit set, low 7 bits = count of following
    // big-endian length bytes.
    let mut bytes = Vec::new();
    let mut remaining = len as u64;
    while remaining > 0 {
        bytes.push((remaining & 0xFF) as u8);
        remaining >>= 8;
    }
    bytes.reverse();
    out.push(0x80 | (bytes.len() as u8));
    out.extend_from_slice(&bytes);
}

fn decode_length(buf: &[u8]) -> Result<(usize, usize), TlvError> {
    if buf.is_empty() {
        return Err(TlvError::Truncated);
    }
    let first = buf[0];
    if first & 0x80 == 0 {
        return Ok((first as usize, 1));
    }
    let count = (first & 0x7F) as usize;
    if buf.len() < 1 + count {
        return Err(TlvError::Truncated);
    }
    let mut len: usize = 0;
    for &b in &buf[1..1 + count] {
        len = (len << 8) | b as usize;
    }
    Ok((len, 1 + count))
}

fn encode_element(out: &mut Vec<u8>, el: &Element) {
    out.push(el.tag.to_byte());
    match &el.value {
        Value::Int(v) => {
            let bytes = minimal_be_bytes(*v);
            encode_length(out, bytes.len());
            out.extend_from_slice(&bytes);
        }
        Value::Float32(v) => {
            encode_length(out, 4);
            out.extend_from_slice(&v.to_be_bytes());
        }
        Value::Float64(v) => {
            encode_length(out, 8);
            out.extend_from_slice(&v.to_be_bytes());
        }
        Value::Bytes(b) => {
            encode_length(out, b.len());
            out.extend_from_slice(b);
        }
    }
}

/// The minimal-width big-endian encoding of `v` (at least one byte, even
/// for zero), matching the back-end's variable-width integer convention.
fn minimal_be_bytes(v: u64) -> Vec<u8> {
    let full = v.to_be_bytes();
    let first_nonzero = full.iter().position(|&b| b != 0).unwrap_or(7);
    full[first_nonzero..].to_vec()
}

#[derive(Debug, thiserror::Error)]
pub enum TlvError {
    #[error("frame truncated")]
    Truncated,
    #[error("unknown packet type byte {0}")]
    UnknownPacketType(u8),
    #[error("TLV value of {0} bytes exceeds the {MAX_VALUE_SIZE} byte cap")]
    ValueTooLarge(usize),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Decode a tag's raw bytes as a big-endian integer, widening into a u64.
/// Used by callers that stored an `Int` element as `Value::Bytes` after a
/// `decode_from_slice` round trip (the wire form has no "this is an int"
/// marker — tag identity conveys that).
pub fn bytes_as_u64(bytes: &[u8]) -> u64 {
    let mut v: u64 = 0;
    for &b in bytes {
        v = (v << 8) | b as u64;
    }
    v
}

pub fn bytes_as_f32(bytes: &[u8]) -> Option<f32> {
    let arr: [u8; 4] = bytes.try_into().ok()?;
    Some(f32::from_be_bytes(arr))
}

/// Write a frame to an async stream (used by the TCP-backed test harness;
/// production traffic is UDP datagrams via `Frame::encode_to_vec`).
pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, frame: &Frame) -> Result<(), TlvError> {
    let buf = frame.encode_to_vec();
    w.write_all(&buf).await?;
    Ok(())
}

/// Read exactly one frame from an async stream, given the caller already
/// knows the frame's total length (e.g. from a UDP datagram size).
pub async fn read_frame<R: AsyncRead + Unpin>(
    r: &mut R,
    len: usize,
) -> Result<Frame, TlvError> {
    if len > MAX_VALUE_SIZE {
        return Err(TlvError::ValueTooLarge(len));
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    Frame::decode_from_slice(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_simple_command() {
        let mut frame = Frame::new(PacketType::Command);
        frame
            .push_int(Tag::OutputSsrc, 0xDEADBEEF, 4)
            .push_int(Tag::CommandTag, 42, 4);

        let encoded = frame.encode_to_vec();
        let decoded = Frame::decode_from_slice(&encoded).unwrap();

        assert_eq!(decoded.packet_type, PacketType::Command);
        let ssrc = decoded.get(Tag::OutputSsrc).unwrap();
        assert_eq!(bytes_as_u64(match ssrc {
            Value::Bytes(b) => b,
            _ => unreachable!(),
        }), 0xDEADBEEF);
    }

    #[test]
    fn unknown_tags_are_skipped_not_rejected() {
        let mut buf = vec![PacketType::Status.to_byte()];
        // A tag this codec has never heard of, with a short payload.
        buf.push(200);
        buf.push(3);
        buf.extend_from_slice(&[1, 2, 3]);
        // Known tag after it, to confirm parsing continues.
        buf.push(Tag::OutputSsrc.to_byte());
        buf.push(4);
        buf.extend_from_slice(&7u32.to_be_bytes());
        buf.push(Tag::Eom.to_byte());
        buf.push(0);

        let frame = Frame::decode_from_slice(&buf).unwrap();
        assert_eq!(frame.elements.len(), 2);
        assert!(matches!(frame.elements[0].tag, Tag::Unknown(200)));
        assert_eq!(frame.elements[1].tag, Tag::OutputSsrc);
    }

    #[test]
    fn extension_length_round_trips() {
        let mut frame = Frame::new(PacketType::Status);
        let big = vec![0xABu8; 300];
        frame.push_bytes(Tag::BinData, big.clone());
        let encoded = frame.encode_to_vec();
        let decoded = Frame::decode_from_slice(&encoded).unwrap();
        match &decoded.elements[0].value {
            Value::Bytes(b) => assert_eq!(b, &big),
            _ => panic!("expected bytes"),
        }
    }

    #[test]
    fn bin_data_alt_tag_recognized() {
        let mut frame = Frame::new(PacketType::Status);
        frame.push_bytes(Tag::BinDataAlt, vec![1, 2, 3, 4]);
        let encoded = frame.encode_to_vec();
        let decoded = Frame::decode_from_slice(&encoded).unwrap();
        assert!(decoded.elements[0].tag.is_bin_data());
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let buf = vec![PacketType::Command.to_byte(), Tag::OutputSsrc.to_byte(), 4, 1, 2];
        assert!(matches!(
            Frame::decode_from_slice(&buf),
            Err(TlvError::Truncated)
        ));
    }

    #[test]
    fn minimal_width_zero_is_one_byte() {
        assert_eq!(minimal_be_bytes(0), vec![0u8]);
        assert_eq!(minimal_be_bytes(256), vec![1u8, 0u8]);
    }
}
