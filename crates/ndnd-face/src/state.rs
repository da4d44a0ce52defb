//! The transport state machine.
//!
//! States move `Up <-> Down` while the local address flaps,
//! `-> Closing -> Closed` on an orderly close, and
//! `-> Failed -> Closed` on a fatal error. A `Permanent` transport
//! never takes the `Failed` edge: socket errors leave it where it is.

use tokio::sync::watch;
use tracing::debug;

use ndnd_fw::{Persistency, TransportState};

/// Shared, watchable transport state with transition legality checks.
#[derive(Debug)]
pub struct StateCell {
    tx: watch::Sender<TransportState>,
    name: String,
}

impl StateCell {
    pub fn new(name: impl Into<String>, initial: TransportState) -> Self {
        let (tx, _) = watch::channel(initial);
        Self {
            tx,
            name: name.into(),
        }
    }

    #[must_use]
    pub fn get(&self) -> TransportState {
        *self.tx.borrow()
    }

    /// Subscribe to state transitions.
    pub fn watch(&self) -> watch::Receiver<TransportState> {
        self.tx.subscribe()
    }

    /// Whether the transport has started shutting down.
    #[must_use]
    pub fn is_closing_or_closed(&self) -> bool {
        matches!(
            self.get(),
            TransportState::Closing | TransportState::Failed | TransportState::Closed
        )
    }

    /// Attempt a transition; illegal ones are ignored. Returns whether
    /// the state changed.
    pub fn transition(&self, to: TransportState) -> bool {
        let from = self.get();
        if from == to {
            return false;
        }
        let legal = match to {
            // The address tracker may flap Up/Down freely while the
            // transport is alive.
            TransportState::Up | TransportState::Down => !self.is_closing_or_closed(),
            TransportState::Closing => matches!(from, TransportState::Up | TransportState::Down),
            TransportState::Failed => !matches!(from, TransportState::Closed),
            TransportState::Closed => true,
        };
        if legal {
            debug!(transport = %self.name, ?from, ?to, "transport state change");
            let _ = self.tx.send(to);
        }
        legal
    }

    /// Apply the error policy for a non-aborted socket error. Returns
    /// true when the transport should shut down.
    pub fn on_socket_error(&self, persistency: Persistency) -> bool {
        if self.is_closing_or_closed() {
            return false;
        }
        if persistency == Persistency::Permanent {
            // Permanent faces tolerate socket errors.
            return false;
        }
        self.transition(TransportState::Failed);
        self.transition(TransportState::Closed);
        true
    }
}
