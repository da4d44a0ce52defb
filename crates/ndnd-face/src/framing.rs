//! Datagram framing against the packet codec.
//!
//! Each datagram must carry exactly one outer TLV element whose encoded
//! size equals the datagram size. Anything else is dropped and counted;
//! the face stays open and the datagram does not refresh the idle
//! latch.

use std::sync::atomic::{AtomicU64, Ordering};

use ndnd_core::{frame_datagram, TlvError};

/// Counter of dropped datagrams, shared with the receive loop.
#[derive(Debug, Default)]
pub struct FramingErrors(AtomicU64);

impl FramingErrors {
    pub fn record(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Validate one received datagram, yielding its payload bytes.
pub fn check_datagram(datagram: &[u8]) -> Result<(), TlvError> {
    frame_datagram(datagram).map(|_| ())
}
