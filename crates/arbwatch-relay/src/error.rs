//! Upstream connection error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// Too many consecutive failed sessions.
    #[error("Gave up on {upstream} after {attempts} attempts")]
    GaveUp {
        upstream: &'static str,
        attempts: u32,
    },

    /// The upstream sent a close frame.
    #[error("Upstream closed the session: code={code}, reason={reason}")]
    Closed { code: u16, reason: String },

    /// Connect plus handshake did not finish in time.
    #[error("Upstream dial timed out after {0:?}")]
    DialTimeout(std::time::Duration),

    #[error("WebSocket transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
}

pub type RelayResult<T> = Result<T, RelayError>;
