//! Pending-interest records and their timer bookkeeping.
//!
//! One record per outstanding Interest still being forwarded; one
//! sub-record per next-hop face with the send history and the pending
//! retry deadline. Timers are absolute instants stored on the records;
//! the engine polls them, so cancelling is clearing a field and a
//! deadline firing for a purged record finds nothing to do.

use std::time::{Duration, Instant};

use ndnd_core::Name;

use crate::types::FaceId;

/// Retry state for one (pending Interest, next-hop face) pair.
#[derive(Debug, Clone)]
pub struct NextHopRetries {
    pub face: FaceId,
    /// Interface backing the face, snapshotted at insertion.
    pub interface: String,
    /// One timestamp per transmission attempt, the initial send first.
    pub send_times: Vec<Instant>,
    /// Pending retry deadline, if a retry is scheduled.
    pub retry_at: Option<Instant>,
    /// Set when the face was destroyed while the record was alive.
    pub dead: bool,
}

impl NextHopRetries {
    pub fn new(face: FaceId, interface: impl Into<String>) -> Self {
        Self {
            face,
            interface: interface.into(),
            send_times: Vec::new(),
            retry_at: None,
            dead: false,
        }
    }

    /// Record a transmission and (re)schedule the retry deadline.
    pub fn record_send(&mut self, now: Instant, rto: Duration) {
        self.send_times.push(now);
        self.retry_at = Some(now + rto);
    }

    pub fn cancel_retry(&mut self) {
        self.retry_at = None;
    }

    /// Drop the send history along with the retry deadline, so a later
    /// satisfaction on this face cannot feed stale timestamps to the
    /// estimator.
    pub fn clear(&mut self) {
        self.retry_at = None;
        self.send_times.clear();
    }

    /// Retransmissions so far (0 when only the initial send happened).
    #[must_use]
    pub fn n_retries(&self) -> u32 {
        self.send_times.len().saturating_sub(1) as u32
    }
}

/// One outstanding Interest the strategy is still responsible for.
#[derive(Debug, Clone)]
pub struct PendingInterest {
    pub name: Name,
    pub lifetime: Duration,
    /// Next hops copied from the FIB entry at insertion time.
    pub next_hops: Vec<NextHopRetries>,
    /// When the record self-destructs (lifetime + zombie grace).
    pub expire_at: Instant,
}

impl PendingInterest {
    #[must_use]
    pub fn next_hop(&self, face: FaceId) -> Option<&NextHopRetries> {
        self.next_hops.iter().find(|nh| nh.face == face)
    }

    pub fn next_hop_mut(&mut self, face: FaceId) -> Option<&mut NextHopRetries> {
        self.next_hops.iter_mut().find(|nh| nh.face == face)
    }

    fn earliest_deadline(&self) -> Option<Instant> {
        self.next_hops
            .iter()
            .filter_map(|nh| nh.retry_at)
            .chain(std::iter::once(self.expire_at))
            .min()
    }
}

/// The strategy's collection of pending Interests, keyed by name.
#[derive(Debug, Default)]
#[must_use]
pub struct PendingTable {
    records: Vec<PendingInterest>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &Name) -> Option<&PendingInterest> {
        self.records.iter().find(|r| &r.name == name)
    }

    pub fn get_mut(&mut self, name: &Name) -> Option<&mut PendingInterest> {
        self.records.iter_mut().find(|r| &r.name == name)
    }

    #[must_use]
    pub fn contains(&self, name: &Name) -> bool {
        self.get(name).is_some()
    }

    pub fn push(&mut self, record: PendingInterest) {
        self.records.push(record);
    }

    /// Remove a record by name. Idempotent: removing an absent record
    /// is a no-op.
    pub fn remove(&mut self, name: &Name) -> Option<PendingInterest> {
        let index = self.records.iter().position(|r| &r.name == name)?;
        Some(self.records.swap_remove(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingInterest> {
        self.records.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PendingInterest> {
        self.records.iter_mut()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Earliest deadline (retry or expiry) over all records.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.records.iter().filter_map(|r| r.earliest_deadline()).min()
    }

    /// Names of records whose lifetime (plus grace) has run out.
    #[must_use]
    pub fn expired(&self, now: Instant) -> Vec<Name> {
        self.records
            .iter()
            .filter(|r| r.expire_at <= now)
            .map(|r| r.name.clone())
            .collect()
    }

    /// Due (record, face) retry pairs. Collected up front so the
    /// caller can mutate the table while acting on them.
    #[must_use]
    pub fn due_retries(&self, now: Instant) -> Vec<(Name, FaceId)> {
        let mut due = Vec::new();
        for record in &self.records {
            for nh in &record.next_hops {
                if nh.retry_at.is_some_and(|at| at <= now) {
                    due.push((record.name.clone(), nh.face));
                }
            }
        }
        due
    }
}
