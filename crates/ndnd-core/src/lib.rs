//! Wire-level types for the ndnd forwarding daemon.
//!
//! This crate is the dependency leaf: the NDN TLV codec, hierarchical
//! names, and the three packet types the forwarding plane moves around
//! (Interest, Data, Nack). No I/O, no async.

pub mod constants;
pub mod error;
pub mod name;
pub mod packet;
pub mod tlv;

pub use constants::MAX_PACKET_SIZE;
pub use error::TlvError;
pub use name::Name;
pub use packet::{Data, Interest, Nack, NackReason, Packet};
pub use tlv::{decode_element, encode_element, frame_datagram, Element};
