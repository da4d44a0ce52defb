//! Minimal Forwarding Information Base.
//!
//! Longest-prefix match from name prefixes to next-hop face lists,
//! populated from the static routes in the configuration. The
//! strategies only ever see [`FibSnapshot`]s copied out of it.

use ndnd_core::Name;
use ndnd_fw::{FaceId, FibSnapshot};

/// Prefix routing table.
#[derive(Debug, Default)]
#[must_use]
pub struct Fib {
    entries: Vec<(Name, Vec<FaceId>)>,
}

impl Fib {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the next hops of a prefix.
    pub fn insert(&mut self, prefix: Name, next_hops: Vec<FaceId>) {
        if let Some(entry) = self.entries.iter_mut().find(|(p, _)| *p == prefix) {
            entry.1 = next_hops;
        } else {
            self.entries.push((prefix, next_hops));
        }
    }

    pub fn remove(&mut self, prefix: &Name) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(p, _)| p != prefix);
        self.entries.len() < before
    }

    /// Longest-prefix match; the snapshot copies the next-hop list.
    #[must_use]
    pub fn lookup(&self, name: &Name) -> Option<FibSnapshot> {
        self.entries
            .iter()
            .filter(|(prefix, _)| prefix.is_prefix_of(name))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, hops)| FibSnapshot::new(hops.clone()))
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
