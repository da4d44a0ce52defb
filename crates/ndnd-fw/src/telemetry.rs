//! Strategy telemetry events.
//!
//! The engine returns these as values; the host decides how to sink
//! them (ndnd renders each as one structured `tracing` event).

use ndnd_core::Name;

use crate::types::FaceId;

/// Measurements attached to a Data arrival (received or rejected).
#[derive(Debug, Clone, PartialEq)]
pub struct DataOutcome {
    pub strategy: &'static str,
    pub name: Name,
    pub face: FaceId,
    pub interface: String,
    /// Pre-clamp RTT sample of this exchange, if one was taken.
    pub rtt_ms: Option<f32>,
    /// Smoothed mean of the arrival interface's estimator.
    pub mean_rtt_ms: Option<f32>,
    /// Retransmissions before the Data arrived (0 = first send answered).
    pub n_retries: u32,
    /// Time from the first send to the Data arrival.
    pub retrieve_time_ms: Option<u64>,
    /// Last accepted (clamped) sample of the estimator.
    pub last_rtt_ms: Option<f32>,
}

/// Events the strategies emit while forwarding.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    /// An Interest left on a face (initial send or retry).
    InterestSent {
        strategy: &'static str,
        name: Name,
        face: FaceId,
        interface: String,
        rto_ms: u64,
    },
    /// Data satisfied a pending Interest that had a live out-record.
    DataReceived(DataOutcome),
    /// Data arrived for an entry with no live out-record.
    DataRejected(DataOutcome),
    /// A sample was raised to the lower clamp.
    RttMin { ms: f32 },
    /// A sample was lowered to the upper clamp.
    RttMax { ms: f32 },
    /// A new smallest no-retry RTT was observed.
    RttMinObserved { ms: f32 },
}
