// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! §4.H Outer protocol surfaces: the HPSDR Protocol 2 adapter for legacy
//! client software and the WebSocket adapter for browser clients. Both
//! translate their wire protocol into `SessionManager`/`RadiodController`
//! calls; neither owns any session bookkeeping of its own.

pub mod hpsdr;
pub mod websocket;
