// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Wire formats spoken by the session runtime: the back-end's TLV
//! control protocol, RTP data framing, HPSDR Protocol 2, the WSJT-X
//! broadcast protocol, the WebSocket spectrum frame format, and the
//! on-disk WAV format MultiDecoder writes.

pub mod hpsdr;
pub mod rtp;
pub mod spectrum_ws;
pub mod tlv;
pub mod wav;
pub mod wsjtx;
