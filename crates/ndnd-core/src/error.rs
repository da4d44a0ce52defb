//! Wire codec error types.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TlvError {
    #[error("truncated element: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("element length {element} does not match datagram length {datagram}")]
    LengthMismatch { element: usize, datagram: usize },

    #[error("packet of {len} bytes exceeds maximum of {max}")]
    Oversized { len: usize, max: usize },

    #[error("unexpected TLV type {found:#x}, expected {expected:#x}")]
    UnexpectedType { expected: u64, found: u64 },

    #[error("missing required element {0:#x}")]
    MissingElement(u64),

    #[error("non-negative integer field has invalid width {0}")]
    InvalidIntegerWidth(usize),

    #[error("empty datagram")]
    Empty,
}
