// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Session lifecycle, retry policy, and decode-cycle machinery shared by
//! the multiuser SDR session runtime, independent of any particular
//! wire transport or back-end.

pub mod aggregate;
pub mod band;
pub mod error;
pub mod multidecoder;
pub mod policies;
pub mod queue;
pub mod session;
pub mod session_manager;
pub mod spot;
