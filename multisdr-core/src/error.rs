// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! §7 error taxonomy surfaced to SessionManager/Session callers.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("capacity exceeded (limit {limit})")]
    CapacityExceeded { limit: u32 },

    #[error("back-end refused ssrc {ssrc}")]
    BackendRefused { ssrc: u32 },

    #[error("back-end unavailable")]
    BackendUnavailable,

    #[error("session already closed")]
    AlreadyClosed,

    #[error("canceled by shutdown")]
    CanceledByShutdown,
}

impl SessionError {
    /// Whether a caller should retry this exact request. Distinct from
    /// whether the controller already retried on the wire before
    /// surfacing this error — that's §4.C's send-path retry, internal to
    /// `RadiodController` and governed by `RetryPolicy`.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SessionError::BackendUnavailable | SessionError::BackendRefused { .. }
        )
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_and_invalid_params_are_not_transient() {
        assert!(!SessionError::CapacityExceeded { limit: 10 }.is_transient());
        assert!(!SessionError::InvalidParams("bad freq".into()).is_transient());
        assert!(!SessionError::AlreadyClosed.is_transient());
        assert!(!SessionError::CanceledByShutdown.is_transient());
    }

    #[test]
    fn backend_errors_are_transient() {
        assert!(SessionError::BackendUnavailable.is_transient());
        assert!(SessionError::BackendRefused { ssrc: 1 }.is_transient());
    }
}
