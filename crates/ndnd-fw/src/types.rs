//! Face and interface bookkeeping shared by the strategies.

use std::collections::HashMap;

use ndnd_core::Name;

/// Identifier of a face within the host forwarder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FaceId(pub u64);

impl std::fmt::Display for FaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "face{}", self.0)
    }
}

/// State of a face's transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Up,
    Down,
    Closing,
    Failed,
    Closed,
}

/// Face lifetime policy. `Permanent` faces survive I/O errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Persistency {
    OnDemand,
    #[default]
    Persistent,
    Permanent,
}

/// State of a kernel network interface, as reported by the observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceState {
    Unknown,
    Down,
    NoCarrier,
    Dormant,
    Running,
}

/// Per-face snapshot the strategies keep: which interface backs the
/// face and what state its transport is in.
#[derive(Debug, Clone)]
pub struct FaceEntry {
    pub id: FaceId,
    pub interface: String,
    pub state: TransportState,
}

/// Face registry maintained from face events of the host forwarder.
#[derive(Debug, Default)]
#[must_use]
pub struct FaceTable {
    entries: HashMap<FaceId, FaceEntry>,
}

impl FaceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: FaceId, interface: impl Into<String>, state: TransportState) {
        self.entries.insert(
            id,
            FaceEntry {
                id,
                interface: interface.into(),
                state,
            },
        );
    }

    pub fn remove(&mut self, id: FaceId) -> Option<FaceEntry> {
        self.entries.remove(&id)
    }

    #[must_use]
    pub fn get(&self, id: FaceId) -> Option<&FaceEntry> {
        self.entries.get(&id)
    }

    pub fn set_state(&mut self, id: FaceId, state: TransportState) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.state = state;
        }
    }

    /// Interface name backing a face, if the face is known.
    #[must_use]
    pub fn interface_of(&self, id: FaceId) -> Option<&str> {
        self.entries.get(&id).map(|e| e.interface.as_str())
    }

    /// Transport state of a face; unknown faces report `Closed`.
    #[must_use]
    pub fn state_of(&self, id: FaceId) -> TransportState {
        self.entries
            .get(&id)
            .map(|e| e.state)
            .unwrap_or(TransportState::Closed)
    }

    /// Whether the face exists and can carry traffic right now.
    #[must_use]
    pub fn is_up(&self, id: FaceId) -> bool {
        self.state_of(id) == TransportState::Up
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

/// The next-hop list copied out of a FIB entry when an Interest is
/// inserted. The FIB may drop the entry afterwards; the strategy never
/// looks back at it.
#[derive(Debug, Clone, Default)]
#[must_use]
pub struct FibSnapshot {
    pub next_hops: Vec<FaceId>,
}

impl FibSnapshot {
    pub fn new(next_hops: Vec<FaceId>) -> Self {
        Self { next_hops }
    }
}

/// The strategy's window onto the host's Pending Interest Table.
///
/// The PIT itself is owned elsewhere; the engine only ever asks these
/// three questions about it.
pub trait PitView {
    /// Whether the entry still has an unexpired local in-record, i.e.
    /// some downstream is still waiting for this name.
    fn has_valid_local_in_record(&self, name: &Name) -> bool;

    /// Whether forwarding this entry's Interest out `face` would
    /// violate NDN scope.
    fn violates_scope(&self, name: &Name, face: FaceId) -> bool;

    /// Whether the entry has a valid out-record for `face`.
    fn has_out_record(&self, name: &Name, face: FaceId) -> bool;
}
