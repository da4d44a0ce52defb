//! The retry strategy engine.
//!
//! Tracks every Interest still being forwarded, retransmits on a
//! timeout derived from the per-interface RTT estimators, and re-homes
//! pending Interests when interfaces change state. The engine is a
//! synchronous state machine: the host calls in with an explicit `now`
//! and performs the returned actions; timer scheduling reduces to
//! sleeping until [`RetryEngine::next_deadline`] and then calling
//! [`RetryEngine::poll_timers`].

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use ndnd_core::{Interest, Name, NackReason};

use crate::pending::{NextHopRetries, PendingInterest, PendingTable};
use crate::policy::{Candidate, SelectionPolicy};
use crate::rtt::RttEstimator;
use crate::telemetry::{DataOutcome, TelemetryEvent};
use crate::types::{FaceId, FaceTable, FibSnapshot, InterfaceState, PitView, TransportState};

/// Extra time past the Interest lifetime before a pending record
/// self-destructs.
pub const DEFAULT_ZOMBIE_GRACE: Duration = Duration::from_millis(100);

/// What to do with an Interest no eligible face can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnroutableAction {
    /// Keep the Interest pending and replay it when an interface
    /// recovers.
    #[default]
    Hold,
    /// Nack the downstream immediately and reject the entry.
    NackAndReject,
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct StrategyConfig {
    pub zombie_grace: Duration,
    pub on_unroutable: UnroutableAction,
    /// When false, the engine only selects and sends: no pending
    /// records, no retransmission. For hosts that retry themselves.
    pub schedule_retries: bool,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            zombie_grace: DEFAULT_ZOMBIE_GRACE,
            on_unroutable: UnroutableAction::Hold,
            schedule_retries: true,
        }
    }
}

/// What the host forwarder should do, in order.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub enum StrategyAction {
    /// Emit the entry's Interest on `face`. `new_nonce` asks for a
    /// fresh nonce on the wire.
    SendInterest {
        name: Name,
        face: FaceId,
        new_nonce: bool,
    },
    /// Give up on the entry.
    RejectInterest { name: Name },
    /// Send a Nack for the entry downstream on `face`.
    SendNack {
        name: Name,
        face: FaceId,
        reason: NackReason,
    },
    /// Surface a telemetry event.
    Telemetry(TelemetryEvent),
}

/// Forwarding strategy with per-Interest retransmission.
#[must_use]
pub struct RetryEngine<P> {
    policy: P,
    config: StrategyConfig,
    faces: FaceTable,
    estimators: HashMap<String, RttEstimator>,
    pending: PendingTable,
}

impl<P: SelectionPolicy> RetryEngine<P> {
    pub fn new(policy: P, config: StrategyConfig) -> Self {
        Self {
            policy,
            config,
            faces: FaceTable::new(),
            estimators: HashMap::new(),
            pending: PendingTable::new(),
        }
    }

    // -- face & interface registry ------------------------------------

    pub fn handle_face_added(&mut self, face: FaceId, interface: &str, state: TransportState) {
        self.faces.insert(face, interface, state);
    }

    pub fn handle_face_state(&mut self, face: FaceId, state: TransportState) {
        self.faces.set_state(face, state);
    }

    /// A face was destroyed: its sub-records go dead and stop retrying.
    pub fn handle_face_removed(&mut self, face: FaceId) {
        self.faces.remove(face);
        for record in self.pending.iter_mut() {
            if let Some(nh) = record.next_hop_mut(face) {
                nh.dead = true;
                nh.cancel_retry();
            }
        }
    }

    pub fn handle_interface_added(&mut self, interface: &str) {
        self.estimators
            .insert(interface.to_string(), RttEstimator::new());
    }

    /// Drop the interface's estimator; nothing may keep retrying
    /// against it.
    pub fn handle_interface_removed(&mut self, interface: &str) {
        self.estimators.remove(interface);
        for record in self.pending.iter_mut() {
            for nh in record.next_hops.iter_mut() {
                if nh.interface == interface {
                    nh.cancel_retry();
                }
            }
        }
    }

    // -- strategy entry points ----------------------------------------

    /// An Interest arrived on `in_face` and matched `fib`.
    pub fn after_receive_interest(
        &mut self,
        in_face: FaceId,
        interest: &Interest,
        fib: &FibSnapshot,
        pit: &impl PitView,
        now: Instant,
    ) -> Vec<StrategyAction> {
        let mut actions = Vec::new();

        let candidates: Vec<Candidate> = fib
            .next_hops
            .iter()
            .filter_map(|&face| {
                let entry = self.faces.get(face)?;
                if face == in_face {
                    return None;
                }
                if pit.violates_scope(&interest.name, face) {
                    return None;
                }
                if entry.state == TransportState::Down {
                    return None;
                }
                Some(Candidate {
                    face,
                    interface: entry.interface.clone(),
                })
            })
            .collect();

        match self.policy.select(&candidates) {
            Some(out_face) => {
                trace!(name = %interest.name, %out_face, "next hop selected");
                if self.config.schedule_retries {
                    self.insert_pending(interest, Some(out_face), fib, pit, now, &mut actions);
                } else {
                    actions.push(StrategyAction::SendInterest {
                        name: interest.name.clone(),
                        face: out_face,
                        new_nonce: false,
                    });
                }
            }
            None => {
                trace!(name = %interest.name, "no eligible next hop");
                match self.config.on_unroutable {
                    UnroutableAction::Hold if self.config.schedule_retries => {
                        // Held for replay when an interface comes back.
                        self.insert_pending(interest, None, fib, pit, now, &mut actions);
                    }
                    UnroutableAction::Hold => {
                        actions.push(StrategyAction::RejectInterest {
                            name: interest.name.clone(),
                        });
                    }
                    UnroutableAction::NackAndReject => {
                        actions.push(StrategyAction::SendNack {
                            name: interest.name.clone(),
                            face: in_face,
                            reason: NackReason::Duplicate,
                        });
                        actions.push(StrategyAction::RejectInterest {
                            name: interest.name.clone(),
                        });
                    }
                }
            }
        }

        actions
    }

    /// Data for `name` is about to satisfy the PIT entry via `in_face`.
    pub fn before_satisfy_interest(
        &mut self,
        name: &Name,
        in_face: FaceId,
        pit: &impl PitView,
        now: Instant,
    ) -> Vec<StrategyAction> {
        let mut actions = Vec::new();

        if !pit.has_valid_local_in_record(name) {
            return actions;
        }
        // Removing the record retires every timer it owned.
        let Some(record) = self.pending.remove(name) else {
            return actions;
        };

        let has_out = pit.has_out_record(name, in_face);
        let interface = self
            .faces
            .interface_of(in_face)
            .map(str::to_string)
            .or_else(|| record.next_hop(in_face).map(|nh| nh.interface.clone()));

        let mut rtt_ms = None;
        let mut n_retries = 0;
        let mut retrieve_time_ms = None;

        if let (Some(nh), Some(interface)) = (record.next_hop(in_face), interface.as_deref()) {
            if has_out && !nh.send_times.is_empty() {
                n_retries = nh.n_retries();
                retrieve_time_ms =
                    Some(now.saturating_duration_since(nh.send_times[0]).as_millis() as u64);

                let estimator = self
                    .estimators
                    .entry(interface.to_string())
                    .or_insert_with(RttEstimator::new);
                if let Some(sample) = estimator.add_measurement(&nh.send_times, now) {
                    rtt_ms = Some(sample.raw_ms);
                    if let Some(ms) = sample.new_min_ms {
                        actions.push(StrategyAction::Telemetry(TelemetryEvent::RttMinObserved {
                            ms,
                        }));
                    }
                    if sample.clamped_low {
                        actions.push(StrategyAction::Telemetry(TelemetryEvent::RttMin {
                            ms: sample.raw_ms,
                        }));
                    }
                    if sample.clamped_high {
                        actions.push(StrategyAction::Telemetry(TelemetryEvent::RttMax {
                            ms: sample.raw_ms,
                        }));
                    }
                }
            }
        }

        let (mean_rtt_ms, last_rtt_ms) = interface
            .as_deref()
            .and_then(|i| self.estimators.get(i))
            .map(|e| (e.mean_ms(), e.last_rtt_ms()))
            .unwrap_or((None, None));

        let outcome = DataOutcome {
            strategy: self.policy.name(),
            name: name.clone(),
            face: in_face,
            interface: interface.unwrap_or_default(),
            rtt_ms,
            mean_rtt_ms,
            n_retries,
            retrieve_time_ms,
            last_rtt_ms,
        };
        if has_out {
            actions.push(StrategyAction::Telemetry(TelemetryEvent::DataReceived(
                outcome,
            )));
        } else {
            debug!(%name, "data rejected: no live out-record");
            actions.push(StrategyAction::Telemetry(TelemetryEvent::DataRejected(
                outcome,
            )));
        }

        actions
    }

    /// A kernel interface changed state.
    pub fn handle_interface_state(
        &mut self,
        interface: &str,
        new_state: InterfaceState,
        pit: &impl PitView,
        now: Instant,
    ) -> Vec<StrategyAction> {
        let mut actions = Vec::new();
        if !self.policy.is_main_interface(interface) {
            return actions;
        }

        if let Some(estimator) = self.estimators.get_mut(interface) {
            estimator.reset();
        }

        if new_state == InterfaceState::Running {
            debug!(interface, "interface up, moving pending interests to it");
            for record in self.pending.iter_mut() {
                for nh in record.next_hops.iter_mut() {
                    if nh.interface != interface {
                        nh.clear();
                    }
                }
            }
            self.resend_all(interface, pit, now, &mut actions);
        } else {
            debug!(interface, ?new_state, "interface lost, failing over");
            for record in self.pending.iter_mut() {
                for nh in record.next_hops.iter_mut() {
                    if nh.interface == interface {
                        nh.clear();
                    }
                }
            }

            let failover = self.pending.iter().find_map(|record| {
                record.next_hops.iter().find_map(|nh| {
                    (nh.interface != interface && !nh.dead && self.faces.is_up(nh.face))
                        .then(|| nh.interface.clone())
                })
            });
            if let Some(other) = failover {
                self.resend_all(&other, pit, now, &mut actions);
            }
        }

        actions
    }

    // -- timers -------------------------------------------------------

    /// Earliest pending deadline (retry or record expiry), if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.next_deadline()
    }

    /// Fire every deadline that is due at `now`.
    pub fn poll_timers(&mut self, pit: &impl PitView, now: Instant) -> Vec<StrategyAction> {
        let mut actions = Vec::new();

        for name in self.pending.expired(now) {
            debug!(%name, "pending interest expired");
            self.remove_pending(&name);
        }

        for (name, face) in self.pending.due_retries(now) {
            match self.pending.get_mut(&name).and_then(|r| r.next_hop_mut(face)) {
                Some(nh) => nh.cancel_retry(),
                // Record purged while this batch was being processed.
                None => continue,
            }
            self.send_pending(&name, face, pit, now, &mut actions);
        }

        actions
    }

    // -- internals ----------------------------------------------------

    /// Register (or refresh) the pending record for an Interest and
    /// optionally send it right away.
    fn insert_pending(
        &mut self,
        interest: &Interest,
        out_face: Option<FaceId>,
        fib: &FibSnapshot,
        pit: &impl PitView,
        now: Instant,
        actions: &mut Vec<StrategyAction>,
    ) {
        let expire_at = now + interest.lifetime + self.config.zombie_grace;

        if let Some(record) = self.pending.get_mut(&interest.name) {
            // Same name as a live record: refresh it in place.
            record.lifetime = interest.lifetime;
            record.expire_at = expire_at;
        } else {
            let next_hops: Vec<NextHopRetries> = fib
                .next_hops
                .iter()
                .filter_map(|&face| {
                    let entry = self.faces.get(face)?;
                    Some(NextHopRetries::new(face, entry.interface.clone()))
                })
                .collect();
            self.pending.push(PendingInterest {
                name: interest.name.clone(),
                lifetime: interest.lifetime,
                next_hops,
                expire_at,
            });
        }

        if let Some(face) = out_face {
            self.send_pending(&interest.name, face, pit, now, actions);
        }
    }

    /// Emit the pending Interest on `face` and arm the next retry.
    ///
    /// The record is re-resolved by name: if it has been purged in the
    /// meantime this is a no-op, and if the PIT entry died the record
    /// is purged instead of retransmitted.
    fn send_pending(
        &mut self,
        name: &Name,
        face: FaceId,
        pit: &impl PitView,
        now: Instant,
        actions: &mut Vec<StrategyAction>,
    ) {
        if !self.pending.contains(name) {
            return;
        }
        if !pit.has_valid_local_in_record(name) {
            self.remove_pending(name);
            return;
        }

        let Some(record) = self.pending.get_mut(name) else {
            return;
        };
        let Some(nh) = record.next_hop_mut(face) else {
            warn!(%name, %face, "pending interest has no next hop on the selected face");
            return;
        };
        if nh.dead {
            return;
        }

        let interface = nh.interface.clone();
        let rto = self
            .estimators
            .get(&interface)
            .map(RttEstimator::compute_rto)
            // Unknown interface: fall back to the seed timeout.
            .unwrap_or_else(|| RttEstimator::new().compute_rto());

        nh.record_send(now, rto);

        actions.push(StrategyAction::SendInterest {
            name: name.clone(),
            face,
            new_nonce: true,
        });
        actions.push(StrategyAction::Telemetry(TelemetryEvent::InterestSent {
            strategy: self.policy.name(),
            name: name.clone(),
            face,
            interface,
            rto_ms: rto.as_millis() as u64,
        }));
    }

    /// Drop a record and every timer it owns. Idempotent.
    pub fn remove_pending(&mut self, name: &Name) {
        if self.pending.remove(name).is_some() {
            trace!(%name, remaining = self.pending.len(), "pending interest removed");
        }
    }

    /// Re-emit every pending Interest on `interface`; other next hops
    /// of the same records stop retrying (the Interest is now owned by
    /// this interface).
    fn resend_all(
        &mut self,
        interface: &str,
        pit: &impl PitView,
        now: Instant,
        actions: &mut Vec<StrategyAction>,
    ) {
        debug!(size = self.pending.len(), interface, "resending pending interests");

        let mut to_send = Vec::new();
        for record in self.pending.iter_mut() {
            for nh in record.next_hops.iter_mut() {
                let live = !nh.dead && self.faces.get(nh.face).is_some();
                if live && nh.interface == interface {
                    to_send.push((record.name.clone(), nh.face));
                } else {
                    nh.cancel_retry();
                }
            }
        }
        for (name, face) in to_send {
            self.send_pending(&name, face, pit, now, actions);
        }
    }

    // -- inspection ---------------------------------------------------

    #[must_use]
    pub fn pending(&self) -> &PendingTable {
        &self.pending
    }

    #[must_use]
    pub fn estimator(&self, interface: &str) -> Option<&RttEstimator> {
        self.estimators.get(interface)
    }

    #[must_use]
    pub fn policy(&self) -> &P {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::WeightedRandomPolicy;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    const FACE_A: FaceId = FaceId(1);
    const FACE_B: FaceId = FaceId(2);

    /// PIT stand-in: a set of live names plus out-record bookkeeping.
    #[derive(Default)]
    struct FakePit {
        valid: HashSet<Name>,
        out_records: HashSet<(Name, FaceId)>,
        scope_violations: HashSet<(Name, FaceId)>,
    }

    impl FakePit {
        fn with_valid(names: &[&str]) -> Self {
            Self {
                valid: names.iter().map(|n| Name::from_uri(n)).collect(),
                ..Self::default()
            }
        }

        fn add_out_record(&mut self, name: &str, face: FaceId) {
            self.out_records.insert((Name::from_uri(name), face));
        }
    }

    impl PitView for FakePit {
        fn has_valid_local_in_record(&self, name: &Name) -> bool {
            self.valid.contains(name)
        }
        fn violates_scope(&self, name: &Name, face: FaceId) -> bool {
            self.scope_violations.contains(&(name.clone(), face))
        }
        fn has_out_record(&self, name: &Name, face: FaceId) -> bool {
            self.out_records.contains(&(name.clone(), face))
        }
    }

    fn engine_ab() -> RetryEngine<WeightedRandomPolicy> {
        // Interface "a" is preferred (weight 2), "b" is fallback.
        let weights = [("a".to_string(), 2), ("b".to_string(), 1)]
            .into_iter()
            .collect();
        let policy = WeightedRandomPolicy::with_rng(weights, StdRng::seed_from_u64(11));
        let mut engine = RetryEngine::new(policy, StrategyConfig::default());
        engine.handle_interface_added("a");
        engine.handle_interface_added("b");
        engine.handle_face_added(FACE_A, "a", TransportState::Up);
        engine.handle_face_added(FACE_B, "b", TransportState::Up);
        engine
    }

    fn fib_ab() -> FibSnapshot {
        FibSnapshot::new(vec![FACE_A, FACE_B])
    }

    fn interest(name: &str) -> Interest {
        Interest::new(Name::from_uri(name))
    }

    fn sends(actions: &[StrategyAction]) -> Vec<FaceId> {
        actions
            .iter()
            .filter_map(|a| match a {
                StrategyAction::SendInterest { face, .. } => Some(*face),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn interest_goes_to_preferred_interface() {
        let mut engine = engine_ab();
        let pit = FakePit::with_valid(&["/x"]);
        let now = Instant::now();

        let actions =
            engine.after_receive_interest(FaceId(100), &interest("/x"), &fib_ab(), &pit, now);

        assert_eq!(sends(&actions), vec![FACE_A]);
        // Seed RTO is reported with the send.
        assert!(actions.iter().any(|a| matches!(
            a,
            StrategyAction::Telemetry(TelemetryEvent::InterestSent { rto_ms: 500, .. })
        )));

        let record = engine.pending().get(&Name::from_uri("/x")).unwrap();
        let nh = record.next_hop(FACE_A).unwrap();
        assert_eq!(nh.send_times.len(), 1);
        assert_eq!(nh.retry_at, Some(now + Duration::from_millis(500)));
        // The other next hop is idle.
        assert!(record.next_hop(FACE_B).unwrap().retry_at.is_none());
    }

    #[test]
    fn down_face_is_never_selected() {
        let mut engine = engine_ab();
        engine.handle_face_state(FACE_A, TransportState::Down);
        let pit = FakePit::with_valid(&["/x"]);

        let actions = engine.after_receive_interest(
            FaceId(100),
            &interest("/x"),
            &fib_ab(),
            &pit,
            Instant::now(),
        );
        assert_eq!(sends(&actions), vec![FACE_B]);
    }

    #[test]
    fn inbound_face_is_never_selected() {
        let mut engine = engine_ab();
        let pit = FakePit::with_valid(&["/x"]);

        let actions = engine.after_receive_interest(
            FACE_A,
            &interest("/x"),
            &fib_ab(),
            &pit,
            Instant::now(),
        );
        assert_eq!(sends(&actions), vec![FACE_B]);
    }

    #[test]
    fn scope_violating_face_is_never_selected() {
        let mut engine = engine_ab();
        let mut pit = FakePit::with_valid(&["/x"]);
        pit.scope_violations.insert((Name::from_uri("/x"), FACE_A));

        let actions = engine.after_receive_interest(
            FaceId(100),
            &interest("/x"),
            &fib_ab(),
            &pit,
            Instant::now(),
        );
        assert_eq!(sends(&actions), vec![FACE_B]);
    }

    #[test]
    fn unroutable_interest_is_held_for_replay() {
        let mut engine = engine_ab();
        engine.handle_face_state(FACE_A, TransportState::Down);
        engine.handle_face_state(FACE_B, TransportState::Down);
        let pit = FakePit::with_valid(&["/x"]);
        let now = Instant::now();

        let actions =
            engine.after_receive_interest(FaceId(100), &interest("/x"), &fib_ab(), &pit, now);
        assert!(sends(&actions).is_empty());
        assert!(engine.pending().contains(&Name::from_uri("/x")));

        // Interface "a" recovers: the held Interest goes out on it.
        engine.handle_face_state(FACE_A, TransportState::Up);
        let actions = engine.handle_interface_state(
            "a",
            InterfaceState::Running,
            &pit,
            now + Duration::from_millis(50),
        );
        assert_eq!(sends(&actions), vec![FACE_A]);
    }

    #[test]
    fn unroutable_interest_can_nack_instead() {
        let weights = [("a".to_string(), 2)].into_iter().collect();
        let policy = WeightedRandomPolicy::with_rng(weights, StdRng::seed_from_u64(0));
        let mut engine = RetryEngine::new(
            policy,
            StrategyConfig {
                on_unroutable: UnroutableAction::NackAndReject,
                ..StrategyConfig::default()
            },
        );
        let pit = FakePit::with_valid(&["/x"]);

        let actions = engine.after_receive_interest(
            FaceId(100),
            &interest("/x"),
            &FibSnapshot::default(),
            &pit,
            Instant::now(),
        );
        assert_eq!(
            actions,
            vec![
                StrategyAction::SendNack {
                    name: Name::from_uri("/x"),
                    face: FaceId(100),
                    reason: NackReason::Duplicate,
                },
                StrategyAction::RejectInterest {
                    name: Name::from_uri("/x"),
                },
            ]
        );
        assert!(engine.pending().is_empty());
    }

    #[test]
    fn select_only_mode_keeps_no_state() {
        let weights = [("a".to_string(), 2)].into_iter().collect();
        let policy = WeightedRandomPolicy::with_rng(weights, StdRng::seed_from_u64(0));
        let mut engine = RetryEngine::new(
            policy,
            StrategyConfig {
                schedule_retries: false,
                ..StrategyConfig::default()
            },
        );
        engine.handle_face_added(FACE_A, "a", TransportState::Up);
        let pit = FakePit::with_valid(&["/x"]);

        let actions = engine.after_receive_interest(
            FaceId(100),
            &interest("/x"),
            &FibSnapshot::new(vec![FACE_A]),
            &pit,
            Instant::now(),
        );
        assert_eq!(
            actions,
            vec![StrategyAction::SendInterest {
                name: Name::from_uri("/x"),
                face: FACE_A,
                new_nonce: false,
            }]
        );
        assert!(engine.pending().is_empty());
        assert!(engine.next_deadline().is_none());
    }

    #[test]
    fn retry_fires_at_rto_and_reschedules() {
        let mut engine = engine_ab();
        let pit = FakePit::with_valid(&["/x"]);
        let now = Instant::now();
        engine.after_receive_interest(FaceId(100), &interest("/x"), &fib_ab(), &pit, now);

        let deadline = engine.next_deadline().unwrap();
        assert_eq!(deadline, now + Duration::from_millis(500));

        let actions = engine.poll_timers(&pit, deadline);
        assert_eq!(sends(&actions), vec![FACE_A]);

        let record = engine.pending().get(&Name::from_uri("/x")).unwrap();
        let nh = record.next_hop(FACE_A).unwrap();
        assert_eq!(nh.send_times.len(), 2);
        assert_eq!(nh.n_retries(), 1);
        // Rescheduled, exactly one deadline outstanding.
        assert_eq!(nh.retry_at, Some(deadline + Duration::from_millis(500)));
    }

    #[test]
    fn retry_for_dead_pit_entry_purges_record() {
        let mut engine = engine_ab();
        let pit = FakePit::with_valid(&["/x"]);
        let now = Instant::now();
        engine.after_receive_interest(FaceId(100), &interest("/x"), &fib_ab(), &pit, now);

        // The PIT entry disappears before the retry fires.
        let empty_pit = FakePit::default();
        let actions = engine.poll_timers(&empty_pit, now + Duration::from_millis(500));
        assert!(sends(&actions).is_empty());
        assert!(engine.pending().is_empty());
    }

    #[test]
    fn poll_after_removal_is_noop() {
        let mut engine = engine_ab();
        let pit = FakePit::with_valid(&["/x"]);
        let now = Instant::now();
        engine.after_receive_interest(FaceId(100), &interest("/x"), &fib_ab(), &pit, now);

        engine.remove_pending(&Name::from_uri("/x"));
        // Idempotent.
        engine.remove_pending(&Name::from_uri("/x"));

        let actions = engine.poll_timers(&pit, now + Duration::from_secs(10));
        assert!(actions.is_empty());
    }

    #[test]
    fn record_expires_after_lifetime_plus_grace() {
        let mut engine = engine_ab();
        let pit = FakePit::with_valid(&["/x"]);
        let now = Instant::now();
        let interest = interest("/x").with_lifetime(Duration::from_millis(2000));
        engine.after_receive_interest(FaceId(100), &interest, &fib_ab(), &pit, now);

        // One tick before the zombie deadline the record survives.
        engine.poll_timers(&pit, now + Duration::from_millis(2099));
        assert!(engine.pending().contains(&Name::from_uri("/x")));

        engine.poll_timers(&pit, now + Duration::from_millis(2100));
        assert!(engine.pending().is_empty());
    }

    #[test]
    fn reinserting_same_name_refreshes_in_place() {
        let mut engine = engine_ab();
        let pit = FakePit::with_valid(&["/x"]);
        let now = Instant::now();
        engine.after_receive_interest(FaceId(100), &interest("/x"), &fib_ab(), &pit, now);
        assert_eq!(engine.pending().len(), 1);
        let first_expiry = engine.pending().get(&Name::from_uri("/x")).unwrap().expire_at;

        let later = now + Duration::from_millis(1000);
        engine.after_receive_interest(FaceId(100), &interest("/x"), &fib_ab(), &pit, later);

        assert_eq!(engine.pending().len(), 1, "collision must update in place");
        let second_expiry = engine.pending().get(&Name::from_uri("/x")).unwrap().expire_at;
        assert!(second_expiry > first_expiry);
    }

    #[test]
    fn satisfaction_feeds_estimator_once_and_removes_record() {
        let mut engine = engine_ab();
        let mut pit = FakePit::with_valid(&["/x"]);
        let now = Instant::now();
        engine.after_receive_interest(FaceId(100), &interest("/x"), &fib_ab(), &pit, now);
        pit.add_out_record("/x", FACE_A);

        let at = now + Duration::from_millis(120);
        let actions = engine.before_satisfy_interest(&Name::from_uri("/x"), FACE_A, &pit, at);

        let received = actions.iter().find_map(|a| match a {
            StrategyAction::Telemetry(TelemetryEvent::DataReceived(outcome)) => Some(outcome),
            _ => None,
        });
        let outcome = received.expect("data_received telemetry");
        assert_eq!(outcome.n_retries, 0);
        assert_eq!(outcome.retrieve_time_ms, Some(120));
        assert_eq!(outcome.interface, "a");
        assert!(outcome.rtt_ms.is_some());

        // The measurement landed in interface a's estimator.
        assert!(engine.estimator("a").unwrap().mean_ms().is_some());
        assert!(engine.estimator("b").unwrap().mean_ms().is_none());
        assert!(engine.pending().is_empty());

        // Satisfying again does nothing: at most one measurement per record.
        let again = engine.before_satisfy_interest(&Name::from_uri("/x"), FACE_A, &pit, at);
        assert!(again.is_empty());
    }

    #[test]
    fn satisfaction_without_out_record_is_rejected() {
        let mut engine = engine_ab();
        let pit = FakePit::with_valid(&["/x"]);
        let now = Instant::now();
        engine.after_receive_interest(FaceId(100), &interest("/x"), &fib_ab(), &pit, now);

        let actions = engine.before_satisfy_interest(
            &Name::from_uri("/x"),
            FACE_A,
            &pit,
            now + Duration::from_millis(50),
        );
        assert!(actions.iter().any(|a| matches!(
            a,
            StrategyAction::Telemetry(TelemetryEvent::DataRejected(_))
        )));
        // No sample entered the estimator.
        assert!(engine.estimator("a").unwrap().mean_ms().is_none());
    }

    #[test]
    fn satisfaction_with_expired_downstream_is_ignored() {
        let mut engine = engine_ab();
        let pit = FakePit::with_valid(&["/x"]);
        let now = Instant::now();
        engine.after_receive_interest(FaceId(100), &interest("/x"), &fib_ab(), &pit, now);

        let gone = FakePit::default();
        let actions =
            engine.before_satisfy_interest(&Name::from_uri("/x"), FACE_A, &gone, now);
        assert!(actions.is_empty());
        // The record stays until its zombie timeout.
        assert!(engine.pending().contains(&Name::from_uri("/x")));
    }

    #[test]
    fn interface_loss_fails_over_and_recovery_reclaims() {
        // The fail-over scenario: Interest out on A, A goes down 50 ms
        // later, B takes over; A recovers and reclaims the Interest.
        let mut engine = engine_ab();
        let pit = FakePit::with_valid(&["/x"]);
        let t0 = Instant::now();
        engine.after_receive_interest(FaceId(100), &interest("/x"), &fib_ab(), &pit, t0);

        let t1 = t0 + Duration::from_millis(50);
        engine.handle_face_state(FACE_A, TransportState::Down);
        let actions = engine.handle_interface_state("a", InterfaceState::Down, &pit, t1);

        // Sent on B; A's retry timer and history are gone.
        assert_eq!(sends(&actions), vec![FACE_B]);
        let record = engine.pending().get(&Name::from_uri("/x")).unwrap();
        let a = record.next_hop(FACE_A).unwrap();
        assert!(a.retry_at.is_none());
        assert!(a.send_times.is_empty());
        let b = record.next_hop(FACE_B).unwrap();
        assert_eq!(b.send_times.len(), 1);
        assert!(b.retry_at.is_some());

        // A comes back: resent on A, B's timer cancelled.
        let t2 = t1 + Duration::from_millis(200);
        engine.handle_face_state(FACE_A, TransportState::Up);
        let actions = engine.handle_interface_state("a", InterfaceState::Running, &pit, t2);
        assert_eq!(sends(&actions), vec![FACE_A]);
        let record = engine.pending().get(&Name::from_uri("/x")).unwrap();
        assert!(record.next_hop(FACE_A).unwrap().retry_at.is_some());
        assert!(record.next_hop(FACE_B).unwrap().retry_at.is_none());
        assert!(record.next_hop(FACE_B).unwrap().send_times.is_empty());
    }

    #[test]
    fn non_main_interface_state_changes_are_ignored() {
        let mut engine = engine_ab();
        let pit = FakePit::with_valid(&["/x"]);
        let now = Instant::now();
        engine.after_receive_interest(FaceId(100), &interest("/x"), &fib_ab(), &pit, now);

        // "b" is the fallback tier; its flaps change nothing.
        let actions = engine.handle_interface_state("b", InterfaceState::Down, &pit, now);
        assert!(actions.is_empty());
        let record = engine.pending().get(&Name::from_uri("/x")).unwrap();
        assert!(record.next_hop(FACE_A).unwrap().retry_at.is_some());
    }

    #[test]
    fn interface_state_change_resets_estimator() {
        let mut engine = engine_ab();
        let mut pit = FakePit::with_valid(&["/x"]);
        let now = Instant::now();
        engine.after_receive_interest(FaceId(100), &interest("/x"), &fib_ab(), &pit, now);
        pit.add_out_record("/x", FACE_A);
        engine.before_satisfy_interest(
            &Name::from_uri("/x"),
            FACE_A,
            &pit,
            now + Duration::from_millis(80),
        );
        assert!(engine.estimator("a").unwrap().mean_ms().is_some());

        engine.handle_interface_state("a", InterfaceState::Running, &pit, now);
        assert!(engine.estimator("a").unwrap().mean_ms().is_none());
    }

    #[test]
    fn interface_removal_drops_estimator_and_cancels_timers() {
        let mut engine = engine_ab();
        let pit = FakePit::with_valid(&["/x"]);
        let now = Instant::now();
        engine.after_receive_interest(FaceId(100), &interest("/x"), &fib_ab(), &pit, now);
        assert!(engine
            .pending()
            .get(&Name::from_uri("/x"))
            .unwrap()
            .next_hop(FACE_A)
            .unwrap()
            .retry_at
            .is_some());

        engine.handle_interface_removed("a");
        assert!(engine.estimator("a").is_none());
        // No timer may still reference the removed interface.
        let record = engine.pending().get(&Name::from_uri("/x")).unwrap();
        assert!(record.next_hop(FACE_A).unwrap().retry_at.is_none());
    }

    #[test]
    fn removed_face_goes_dead_and_stops_retrying() {
        let mut engine = engine_ab();
        let pit = FakePit::with_valid(&["/x"]);
        let now = Instant::now();
        engine.after_receive_interest(FaceId(100), &interest("/x"), &fib_ab(), &pit, now);

        engine.handle_face_removed(FACE_A);
        let actions = engine.poll_timers(&pit, now + Duration::from_secs(1));
        assert!(sends(&actions).is_empty());
        let record = engine.pending().get(&Name::from_uri("/x")).unwrap();
        assert!(record.next_hop(FACE_A).unwrap().dead);
    }

    #[test]
    fn missing_estimator_uses_seed_rto() {
        // Face on an interface the engine was never told about.
        let weights = [("ghost0".to_string(), 2)].into_iter().collect();
        let policy = WeightedRandomPolicy::with_rng(weights, StdRng::seed_from_u64(5));
        let mut engine = RetryEngine::new(policy, StrategyConfig::default());
        engine.handle_face_added(FaceId(7), "ghost0", TransportState::Up);
        let pit = FakePit::with_valid(&["/x"]);
        let now = Instant::now();

        let actions = engine.after_receive_interest(
            FaceId(100),
            &interest("/x"),
            &FibSnapshot::new(vec![FaceId(7)]),
            &pit,
            now,
        );
        assert!(actions.iter().any(|a| matches!(
            a,
            StrategyAction::Telemetry(TelemetryEvent::InterestSent { rto_ms: 500, .. })
        )));
    }
}
