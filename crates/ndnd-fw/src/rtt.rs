//! Smoothed round-trip-time estimation, one estimator per interface.
//!
//! The estimator feeds the retransmission timeout. Samples come from
//! satisfied Interests: the ordered send timestamps of all
//! transmission attempts on the interface where the Data arrived.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Lower clamp applied before any minimum has been observed, in ms.
pub const RTT_MIN_MS: f32 = 10.0;

/// Upper clamp on any accepted sample, in ms.
pub const RTT_MAX_MS: f32 = 1000.0;

/// Seed mean used by `compute_rto` before any sample is accepted, in ms.
pub const RTT0_MS: f32 = 250.0;

/// Headroom multiplier in the RTO formula.
pub const RTT_MULTIPLIER: f32 = 2.0;

/// Absolute floor on the retransmission timeout.
pub const RTO_FLOOR: Duration = Duration::from_millis(5);

/// Number of samples kept in the smoothing window.
pub const SAMPLE_WINDOW: usize = 5;

const MEAN_WEIGHT_OLD: f32 = 0.3;
const MEAN_WEIGHT_NEW: f32 = 0.7;
const VAR_WEIGHT_OLD: f32 = 0.125;
const VAR_WEIGHT_NEW: f32 = 0.875;

/// Outcome of one accepted measurement, for telemetry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RttSample {
    /// The sample before clamping, in ms.
    pub raw_ms: f32,
    /// Set when the sample was raised to the lower clamp.
    pub clamped_low: bool,
    /// Set when the sample was lowered to the upper clamp.
    pub clamped_high: bool,
    /// Set when this sample established a new observed minimum.
    pub new_min_ms: Option<f32>,
}

/// Per-interface smoothed RTT and deviation tracker.
#[derive(Debug, Clone, Default)]
#[must_use]
pub struct RttEstimator {
    mean: Option<f32>,
    var: Option<f32>,
    min_observed: Option<f32>,
    last_rtt: Option<f32>,
    window: VecDeque<f32>,
}

impl RttEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Smoothed mean RTT in ms, if any sample has been accepted.
    #[must_use]
    pub fn mean_ms(&self) -> Option<f32> {
        self.mean
    }

    /// The last accepted (clamped) sample in ms.
    #[must_use]
    pub fn last_rtt_ms(&self) -> Option<f32> {
        self.last_rtt
    }

    /// Smallest RTT ever observed on a non-retransmitted exchange, in ms.
    #[must_use]
    pub fn min_observed_ms(&self) -> Option<f32> {
        self.min_observed
    }

    /// Accept the send timestamps of a satisfied Interest.
    ///
    /// `send_times` holds one timestamp per transmission attempt, the
    /// original send first. Returns `None` when the list is empty
    /// (Data arrived for an Interest that was never sent here).
    pub fn add_measurement(&mut self, send_times: &[Instant], now: Instant) -> Option<RttSample> {
        let had_min = self.min_observed.is_some();
        let mut new_min = None;

        let rtt = match send_times {
            [] => return None,
            [only] => {
                let rtt = ms_between(*only, now);
                // The no-retry path is the only one allowed to lower
                // the observed minimum: a retried exchange cannot tell
                // which transmission the Data answered.
                if self.min_observed.map_or(true, |min| rtt < min) {
                    self.min_observed = Some(rtt);
                    new_min = Some(rtt);
                }
                rtt
            }
            retried => {
                // Walk newest to oldest; the first candidate at least
                // as large as the observed minimum is plausible.
                let mut rtt = ms_between(*retried.last().expect("non-empty"), now);
                if let Some(min) = self.min_observed {
                    for &sent in retried.iter().rev() {
                        rtt = ms_between(sent, now);
                        if rtt >= min {
                            break;
                        }
                    }
                }
                rtt
            }
        };

        // The 10 ms floor protects the estimate only until a real
        // minimum has been observed; afterwards the minimum itself is
        // the floor.
        let floor = if had_min {
            self.min_observed.unwrap_or(RTT_MIN_MS)
        } else {
            RTT_MIN_MS
        };
        Some(self.accept(rtt, floor, new_min))
    }

    fn accept(&mut self, raw: f32, floor: f32, new_min: Option<f32>) -> RttSample {
        let mut rtt = raw;
        let clamped_low = rtt < floor;
        if clamped_low {
            rtt = floor;
        }
        let clamped_high = rtt > RTT_MAX_MS;
        if clamped_high {
            rtt = RTT_MAX_MS;
        }

        self.window.push_back(rtt);
        while self.window.len() > SAMPLE_WINDOW {
            self.window.pop_front();
        }

        let mut mean = self.window[0];
        let mut var = self.window[0] / 2.0;
        for &sample in self.window.iter().skip(1) {
            var = var * VAR_WEIGHT_OLD + (sample - mean).abs() * VAR_WEIGHT_NEW;
            mean = mean * MEAN_WEIGHT_OLD + sample * MEAN_WEIGHT_NEW;
        }

        self.mean = Some(mean);
        self.var = Some(var);
        self.last_rtt = Some(rtt);

        RttSample {
            raw_ms: raw,
            clamped_low,
            clamped_high,
            new_min_ms: new_min,
        }
    }

    /// The retransmission timeout derived from the current estimate.
    ///
    /// `max(5 ms, ceil(2 * (mean + 4 * var)))`, with the seed mean of
    /// 250 ms (and zero deviation) before any sample: 500 ms.
    #[must_use]
    pub fn compute_rto(&self) -> Duration {
        let mean = self.mean.unwrap_or(RTT0_MS);
        let var = self.var.unwrap_or(0.0);
        let rto_ms = (RTT_MULTIPLIER * (mean + 4.0 * var)).ceil() as u64;
        Duration::from_millis(rto_ms).max(RTO_FLOOR)
    }

    /// Forget everything; the next `compute_rto` returns the seed RTO.
    pub fn reset(&mut self) {
        self.mean = None;
        self.var = None;
        self.min_observed = None;
        self.window.clear();
    }
}

fn ms_between(earlier: Instant, now: Instant) -> f32 {
    now.saturating_duration_since(earlier).as_secs_f32() * 1000.0
}
