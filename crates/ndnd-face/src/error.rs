//! Transport error types.

use ndnd_core::TlvError;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("framing error: {0}")]
    Framing(#[from] TlvError),

    #[error("transport is not up")]
    NotUp,

    #[error("transport is closed")]
    Closed,

    #[error("no suitable address on interface {0}")]
    NoSuitableAddress(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}
