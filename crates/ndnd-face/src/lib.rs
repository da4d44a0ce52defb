//! Datagram transports for the ndnd daemon.
//!
//! A transport is the socket end of a face: it frames datagrams against
//! the maximum packet size, tracks a state machine the strategies can
//! watch, and rebinds itself as local addresses come and go.

pub mod error;
pub mod framing;
pub mod multicast;
pub mod netif;
pub mod state;
pub mod unicast;

pub use error::TransportError;
pub use multicast::{MulticastUdpConfig, MulticastUdpTransport};
pub use netif::{pick_local_address, NetifEvent, NetifInfo, NetifMonitor};
pub use state::StateCell;
pub use unicast::{UdpUnicastConfig, UnicastUdpTransport};
