// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! §4.C RadiodController: the one component that speaks the back-end's
//! STATUS/COMMAND protocol. Every channel create/tune/destroy goes out as
//! a COMMAND carrying a fresh `COMMAND_TAG`; a background reader on the
//! STATUS socket correlates replies by `(ssrc, tag)` and fulfills the
//! caller's pending oneshot, the same "register with a timeout" shape the
//! rig backends behind this system used for CAT command/response pairs,
//! generalized from a single serial line to a multicast STATUS stream.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use multisdr_core::error::{SessionError, SessionResult};
use multisdr_core::policies::{ExponentialBackoff, RetryPolicy};
use multisdr_protocol::tlv::{bytes_as_f32, bytes_as_u64, Frame, PacketType, Tag, Value};

use crate::multicast::MulticastSocket;

/// A parsed STATUS reply relevant to one pending command.
#[derive(Debug, Clone, Default)]
pub struct StatusReply {
    pub ssrc: u32,
    pub command_tag: Option<u32>,
    pub radio_frequency_hz: Option<u64>,
    pub low_edge_hz: Option<i64>,
    pub high_edge_hz: Option<i64>,
    pub sample_rate_hz: Option<u32>,
    pub bin_count: Option<u32>,
    pub bin_bandwidth_hz: Option<f32>,
    pub bin_data: Option<Vec<u8>>,
}

impl StatusReply {
    fn from_frame(frame: &Frame) -> Option<Self> {
        let ssrc = frame.get(Tag::OutputSsrc).and_then(value_as_u32)?;
        let mut reply = StatusReply {
            ssrc,
            ..Default::default()
        };
        reply.command_tag = frame.get(Tag::CommandTag).and_then(value_as_u32);
        reply.radio_frequency_hz = frame.get(Tag::RadioFrequency).and_then(value_as_u64);
        reply.low_edge_hz = frame
            .get(Tag::LowEdge)
            .and_then(value_as_u64)
            .map(|v| v as i64);
        reply.high_edge_hz = frame
            .get(Tag::HighEdge)
            .and_then(value_as_u64)
            .map(|v| v as i64);
        reply.sample_rate_hz = frame.get(Tag::SampleRate).and_then(value_as_u32);
        reply.bin_count = frame.get(Tag::BinCount).and_then(value_as_u32);
        reply.bin_bandwidth_hz = frame.get(Tag::BinBandwidth).and_then(value_as_f32_any);
        for element in &frame.elements {
            if element.tag.is_bin_data() {
                if let Value::Bytes(b) = &element.value {
                    reply.bin_data = Some(b.clone());
                }
            }
        }
        Some(reply)
    }
}

fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Int(v) => Some(*v),
        Value::Bytes(b) => Some(bytes_as_u64(b)),
        _ => None,
    }
}

fn value_as_u32(value: &Value) -> Option<u32> {
    value_as_u64(value).map(|v| v as u32)
}

fn value_as_f32_any(value: &Value) -> Option<f32> {
    match value {
        Value::Float32(v) => Some(*v),
        Value::Bytes(b) => bytes_as_f32(b),
        _ => None,
    }
}

type PendingKey = (u32, u32);
type PendingTable = Mutex<HashMap<PendingKey, oneshot::Sender<StatusReply>>>;

/// How long a caller waits for a STATUS reply to its COMMAND before giving
/// up (§4.C: "registers (ssrc, tag) with a timeout").
const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

/// Maintains the COMMAND/STATUS sockets to the back-end and the
/// correlation table between outstanding commands and their replies.
pub struct RadiodController {
    control: Arc<MulticastSocket>,
    pending: Arc<PendingTable>,
    next_tag: Mutex<u32>,
    retry: ExponentialBackoff,
    /// STATUS frames carrying BIN_DATA for an SSRC with no pending command
    /// (i.e. unsolicited spectrum updates) are forwarded here for the
    /// SpectrumReceiver to treat as fresh bin data alongside the RTP path.
    spectrum_tx: Option<mpsc::Sender<StatusReply>>,
}

impl RadiodController {
    /// Spawns the background STATUS reader and returns a handle.
    pub fn spawn(control: MulticastSocket, spectrum_tx: Option<mpsc::Sender<StatusReply>>) -> Arc<Self> {
        let controller = Arc::new(Self {
            control: Arc::new(control),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_tag: Mutex::new(1),
            retry: ExponentialBackoff::default_command(),
            spectrum_tx,
        });
        tokio::spawn(run_status_reader(controller.clone()));
        controller
    }

    fn allocate_tag(&self) -> u32 {
        let mut tag = self.next_tag.lock().expect("tag counter poisoned");
        let value = *tag;
        *tag = tag.wrapping_add(1).max(1);
        value
    }

    /// Sends a COMMAND frame and waits (with retry) for a matching STATUS.
    async fn send_and_await(&self, ssrc: u32, frame: Frame) -> SessionResult<StatusReply> {
        if ssrc == 0 || ssrc == u32::MAX {
            return Err(SessionError::InvalidParams(
                "ssrc 0 and 0xFFFFFFFF are reserved".into(),
            ));
        }

        let tag = frame
            .get(Tag::CommandTag)
            .and_then(value_as_u32)
            .expect("caller must set CommandTag before sending");

        let mut attempt = 0;
        let encoded = frame.encode_to_vec();
        loop {
            let (tx, rx) = oneshot::channel();
            self.pending
                .lock()
                .expect("pending table poisoned")
                .insert((ssrc, tag), tx);

            let send_result = self.control.send(&encoded).await;
            if let Err(err) = send_result {
                self.pending
                    .lock()
                    .expect("pending table poisoned")
                    .remove(&(ssrc, tag));
                warn!(ssrc, tag, %err, "failed to send COMMAND");
                let transient = SessionError::BackendUnavailable;
                if self.retry.should_retry(attempt, &transient) {
                    tokio::time::sleep(self.retry.delay(attempt)).await;
                    attempt += 1;
                    continue;
                }
                return Err(transient);
            }

            match tokio::time::timeout(REPLY_TIMEOUT, rx).await {
                Ok(Ok(reply)) => return Ok(reply),
                _ => {
                    self.pending
                        .lock()
                        .expect("pending table poisoned")
                        .remove(&(ssrc, tag));
                    let err = SessionError::BackendRefused { ssrc };
                    if self.retry.should_retry(attempt, &err) {
                        attempt += 1;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    pub async fn create_audio_channel(
        &self,
        name: &str,
        freq_hz: u64,
        preset: &str,
        ssrc: u32,
    ) -> SessionResult<StatusReply> {
        let tag = self.allocate_tag();
        let mut frame = Frame::new(PacketType::Command);
        frame
            .push_int(Tag::OutputSsrc, ssrc as u64, 4)
            .push_int(Tag::CommandTag, tag as u64, 4)
            .push_int(Tag::RadioFrequency, freq_hz, 8)
            .push_bytes(Tag::Preset, preset.as_bytes().to_vec());
        debug!(ssrc, name, freq_hz, preset, "creating audio channel");
        self.send_and_await(ssrc, frame).await
    }

    pub async fn create_iq_channel(
        &self,
        name: &str,
        freq_hz: u64,
        sample_rate_hz: u32,
        ssrc: u32,
    ) -> SessionResult<StatusReply> {
        let tag = self.allocate_tag();
        let mut frame = Frame::new(PacketType::Command);
        frame
            .push_int(Tag::OutputSsrc, ssrc as u64, 4)
            .push_int(Tag::CommandTag, tag as u64, 4)
            .push_int(Tag::RadioFrequency, freq_hz, 8)
            .push_int(Tag::SampleRate, sample_rate_hz as u64, 4);
        debug!(ssrc, name, freq_hz, sample_rate_hz, "creating IQ channel");
        self.send_and_await(ssrc, frame).await
    }

    pub async fn create_spectrum_channel(
        &self,
        name: &str,
        center_freq_hz: u64,
        bin_count: u32,
        bin_bw_hz: f32,
        ssrc: u32,
    ) -> SessionResult<StatusReply> {
        let tag = self.allocate_tag();
        let mut frame = Frame::new(PacketType::Command);
        frame
            .push_int(Tag::OutputSsrc, ssrc as u64, 4)
            .push_int(Tag::CommandTag, tag as u64, 4)
            .push_int(Tag::RadioFrequency, center_freq_hz, 8)
            .push_int(Tag::BinCount, bin_count as u64, 4)
            .push_float32(Tag::BinBandwidth, bin_bw_hz);
        debug!(ssrc, name, center_freq_hz, bin_count, "creating spectrum channel");
        self.send_and_await(ssrc, frame).await
    }

    pub async fn tune(&self, ssrc: u32, freq_hz: u64, preset: Option<&str>) -> SessionResult<StatusReply> {
        let tag = self.allocate_tag();
        let mut frame = Frame::new(PacketType::Command);
        frame
            .push_int(Tag::OutputSsrc, ssrc as u64, 4)
            .push_int(Tag::CommandTag, tag as u64, 4)
            .push_int(Tag::RadioFrequency, freq_hz, 8);
        if let Some(preset) = preset {
            frame.push_bytes(Tag::Preset, preset.as_bytes().to_vec());
        }
        self.send_and_await(ssrc, frame).await
    }

    /// Issues a COMMAND carrying only OUTPUT_SSRC and COMMAND_TAG, asking
    /// the back-end to echo a full STATUS (§4.C PollStatus).
    pub async fn poll_status(&self, ssrc: u32) -> SessionResult<StatusReply> {
        let tag = self.allocate_tag();
        let mut frame = Frame::new(PacketType::Command);
        frame
            .push_int(Tag::OutputSsrc, ssrc as u64, 4)
            .push_int(Tag::CommandTag, tag as u64, 4);
        self.send_and_await(ssrc, frame).await
    }

    pub async fn disable_channel(&self, name: &str, ssrc: u32) -> SessionResult<()> {
        let tag = self.allocate_tag();
        let mut frame = Frame::new(PacketType::Command);
        frame
            .push_int(Tag::OutputSsrc, ssrc as u64, 4)
            .push_int(Tag::CommandTag, tag as u64, 4)
            .push_int(Tag::RadioFrequency, 0, 8);
        info!(ssrc, name, "disabling channel");
        self.send_and_await(ssrc, frame).await.map(|_| ())
    }
}

async fn run_status_reader(controller: Arc<RadiodController>) {
    let mut buf = vec![0u8; 8192];
    loop {
        let received = match controller.control.recv(&mut buf).await {
            Ok(Some((len, _addr))) => len,
            Ok(None) => continue,
            Err(err) => {
                warn!(%err, "STATUS socket read failed");
                continue;
            }
        };

        let frame = match Frame::decode_from_slice(&buf[..received]) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%err, "malformed STATUS frame");
                continue;
            }
        };
        if frame.packet_type != PacketType::Status {
            continue;
        }

        let Some(reply) = StatusReply::from_frame(&frame) else {
            warn!("STATUS frame missing OUTPUT_SSRC, dropping");
            continue;
        };

        let pending_sender = reply.command_tag.and_then(|tag| {
            controller
                .pending
                .lock()
                .expect("pending table poisoned")
                .remove(&(reply.ssrc, tag))
        });

        match pending_sender {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => {
                if reply.bin_data.is_some() {
                    if let Some(tx) = &controller.spectrum_tx {
                        let _ = tx.try_send(reply);
                    }
                } else {
                    debug!(ssrc = reply.ssrc, "STATUS for unmatched/unsolicited ssrc, dropped");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_reply_parses_known_fields() {
        let mut frame = Frame::new(PacketType::Status);
        frame
            .push_int(Tag::OutputSsrc, 42, 4)
            .push_int(Tag::CommandTag, 7, 4)
            .push_int(Tag::RadioFrequency, 14_074_000, 8)
            .push_int(Tag::SampleRate, 12000, 4);
        let encoded = frame.encode_to_vec();
        let decoded = Frame::decode_from_slice(&encoded).unwrap();

        let reply = StatusReply::from_frame(&decoded).expect("should parse");
        assert_eq!(reply.ssrc, 42);
        assert_eq!(reply.command_tag, Some(7));
        assert_eq!(reply.radio_frequency_hz, Some(14_074_000));
        assert_eq!(reply.sample_rate_hz, Some(12000));
    }

    #[test]
    fn status_reply_recognizes_either_bin_data_tag() {
        let mut frame = Frame::new(PacketType::Status);
        frame
            .push_int(Tag::OutputSsrc, 1, 4)
            .push_bytes(Tag::BinDataAlt, vec![1, 2, 3, 4]);
        let encoded = frame.encode_to_vec();
        let decoded = Frame::decode_from_slice(&encoded).unwrap();

        let reply = StatusReply::from_frame(&decoded).expect("should parse");
        assert_eq!(reply.bin_data, Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn status_reply_without_ssrc_is_rejected() {
        let frame = Frame::new(PacketType::Status);
        assert!(StatusReply::from_frame(&frame).is_none());
    }
}
