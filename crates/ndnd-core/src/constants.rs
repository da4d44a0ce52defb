//! Protocol constants.

/// Maximum size in bytes of a whole NDN packet on the wire.
///
/// A datagram transport rejects outbound payloads larger than this and
/// sizes its receive buffer to it.
pub const MAX_PACKET_SIZE: usize = 8800;

/// Default Interest lifetime in milliseconds when the packet omits the
/// InterestLifetime element.
pub const DEFAULT_INTEREST_LIFETIME_MS: u64 = 4000;

/// TLV type numbers used by the forwarding plane.
pub mod tlv_type {
    pub const INTEREST: u64 = 0x05;
    pub const DATA: u64 = 0x06;
    pub const NACK: u64 = 0x03;
    pub const NAME: u64 = 0x07;
    pub const NAME_COMPONENT: u64 = 0x08;
    pub const NONCE: u64 = 0x0A;
    pub const INTEREST_LIFETIME: u64 = 0x0C;
    pub const CONTENT: u64 = 0x15;
    pub const NACK_REASON: u64 = 0x0321;
}
