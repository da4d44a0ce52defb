//! Forwarding strategies for the ndnd daemon.
//!
//! Everything in this crate is a synchronous state machine: entry
//! points take an explicit `now` and return the actions the host
//! should perform (send an Interest on a face, emit telemetry, ...).
//! The host forwarder owns the clock, the sockets, and the timers;
//! correctness here never depends on a runtime.

pub mod engine;
pub mod pending;
pub mod policy;
pub mod rtt;
pub mod telemetry;
pub mod types;

pub use engine::{RetryEngine, StrategyAction, StrategyConfig, UnroutableAction};
pub use policy::{Candidate, PreferredPolicy, SelectionPolicy, WeightedRandomPolicy};
pub use rtt::RttEstimator;
pub use telemetry::TelemetryEvent;
pub use types::{FaceId, FaceTable, FibSnapshot, InterfaceState, Persistency, PitView, TransportState};
