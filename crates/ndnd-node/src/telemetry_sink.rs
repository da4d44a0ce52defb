//! Renders strategy telemetry as structured tracing events.

use tracing::{debug, info};

use ndnd_fw::telemetry::DataOutcome;
use ndnd_fw::TelemetryEvent;

/// Emit one tracing event per telemetry value.
pub fn emit(event: &TelemetryEvent) {
    match event {
        TelemetryEvent::InterestSent {
            strategy,
            name,
            face,
            interface,
            rto_ms,
        } => {
            debug!(
                target: "ndnd::telemetry",
                strategy, %name, %face, interface = %interface, rto_ms, "interest_sent"
            );
        }
        TelemetryEvent::DataReceived(outcome) => emit_data_outcome(outcome, "data_received"),
        TelemetryEvent::DataRejected(outcome) => emit_data_outcome(outcome, "data_rejected"),
        TelemetryEvent::RttMin { ms } => {
            debug!(target: "ndnd::telemetry", ms = f64::from(*ms), "rtt_min");
        }
        TelemetryEvent::RttMax { ms } => {
            debug!(target: "ndnd::telemetry", ms = f64::from(*ms), "rtt_max");
        }
        TelemetryEvent::RttMinObserved { ms } => {
            debug!(target: "ndnd::telemetry", ms = f64::from(*ms), "rtt_min_observed");
        }
    }
}

fn emit_data_outcome(outcome: &DataOutcome, message: &'static str) {
    info!(
        target: "ndnd::telemetry",
        strategy = outcome.strategy,
        name = %outcome.name,
        face = %outcome.face,
        interface = %outcome.interface,
        rtt_ms = outcome.rtt_ms.map(f64::from),
        mean_rtt_ms = outcome.mean_rtt_ms.map(f64::from),
        n_retries = outcome.n_retries,
        retrieve_time_ms = outcome.retrieve_time_ms,
        last_rtt_ms = outcome.last_rtt_ms.map(f64::from),
        "{message}"
    );
}
