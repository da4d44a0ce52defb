//! Wiring for the ndnd forwarding daemon.
//!
//! Configuration, logging, the minimal FIB/PIT the daemon runs with,
//! and the event loop that drives the strategy engine from face
//! traffic and timer deadlines.

pub mod config;
pub mod daemon;
pub mod error;
pub mod fib;
pub mod logging;
pub mod pit;
pub mod telemetry_sink;

pub use config::DaemonConfig;
pub use daemon::Daemon;
pub use error::DaemonError;
