//! Minimal Pending Interest Table.
//!
//! Just enough PIT for the daemon to host the strategies: entries keep
//! the Interest (for re-encoding on retries), the downstream faces
//! waiting for Data, and the out-records of upstream transmissions.
//! The strategy engine sees it through the [`PitView`] seam.

use std::collections::HashMap;
use std::time::Instant;

use ndnd_core::{Interest, Name};
use ndnd_fw::{FaceId, PitView};

#[derive(Debug)]
struct PitEntry {
    interest: Interest,
    in_faces: Vec<FaceId>,
    in_expiry: Instant,
    out_faces: Vec<FaceId>,
}

/// Name-keyed table of outstanding Interests.
#[derive(Debug, Default)]
#[must_use]
pub struct Pit {
    entries: HashMap<Name, PitEntry>,
}

impl Pit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an Interest arriving from a downstream face. Returns
    /// whether the entry is new.
    pub fn insert_in_record(&mut self, interest: &Interest, from: FaceId, now: Instant) -> bool {
        let expiry = now + interest.lifetime;
        match self.entries.get_mut(&interest.name) {
            Some(entry) => {
                if !entry.in_faces.contains(&from) {
                    entry.in_faces.push(from);
                }
                entry.in_expiry = entry.in_expiry.max(expiry);
                entry.interest = interest.clone();
                false
            }
            None => {
                self.entries.insert(
                    interest.name.clone(),
                    PitEntry {
                        interest: interest.clone(),
                        in_faces: vec![from],
                        in_expiry: expiry,
                        out_faces: Vec::new(),
                    },
                );
                true
            }
        }
    }

    /// Record a transmission towards an upstream face.
    pub fn add_out_record(&mut self, name: &Name, face: FaceId) {
        if let Some(entry) = self.entries.get_mut(name) {
            if !entry.out_faces.contains(&face) {
                entry.out_faces.push(face);
            }
        }
    }

    /// The Interest stored for a name, for re-encoding on retries.
    #[must_use]
    pub fn interest(&self, name: &Name) -> Option<&Interest> {
        self.entries.get(name).map(|e| &e.interest)
    }

    /// Downstream faces waiting for this name.
    #[must_use]
    pub fn in_faces(&self, name: &Name) -> &[FaceId] {
        self.entries
            .get(name)
            .map(|e| e.in_faces.as_slice())
            .unwrap_or(&[])
    }

    /// Satisfy (remove) an entry; returns the downstream faces that
    /// were waiting.
    pub fn satisfy(&mut self, name: &Name) -> Vec<FaceId> {
        self.entries
            .remove(name)
            .map(|e| e.in_faces)
            .unwrap_or_default()
    }

    /// Drop an entry without satisfying it.
    pub fn reject(&mut self, name: &Name) {
        self.entries.remove(name);
    }

    /// Drop entries whose downstreams have all expired.
    pub fn cull(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.in_expiry > now);
        before - self.entries.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PitView for Pit {
    fn has_valid_local_in_record(&self, name: &Name) -> bool {
        self.entries
            .get(name)
            .is_some_and(|e| e.in_expiry > Instant::now())
    }

    fn violates_scope(&self, _name: &Name, _face: FaceId) -> bool {
        // All faces here are non-local UDP faces; no scope rules apply.
        false
    }

    fn has_out_record(&self, name: &Name, face: FaceId) -> bool {
        self.entries
            .get(name)
            .is_some_and(|e| e.out_faces.contains(&face))
    }
}
