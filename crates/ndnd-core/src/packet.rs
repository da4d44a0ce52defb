//! Interest, Data and Nack packets.
//!
//! Only the fields the forwarding plane acts on are modeled: names,
//! nonces, lifetimes, opaque content and Nack reasons. Everything else
//! an endpoint may put in a packet rides along inside the opaque value
//! and is not interpreted here.

use std::time::Duration;

use rand::Rng;

use crate::constants::{tlv_type, DEFAULT_INTEREST_LIFETIME_MS};
use crate::error::TlvError;
use crate::name::Name;
use crate::tlv::{decode_element, encode_element, encode_nonneg, frame_datagram, read_nonneg};

/// An Interest: a request for a named piece of Data.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct Interest {
    pub name: Name,
    /// 4-byte nonce distinguishing retransmissions from loops.
    pub nonce: Option<u32>,
    /// How long the requester keeps waiting for Data.
    pub lifetime: Duration,
}

impl Interest {
    pub fn new(name: Name) -> Self {
        Self {
            name,
            nonce: None,
            lifetime: Duration::from_millis(DEFAULT_INTEREST_LIFETIME_MS),
        }
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Replace the nonce with a fresh random value.
    pub fn refresh_nonce(&mut self, rng: &mut impl Rng) {
        self.nonce = Some(rng.gen());
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut inner = self.name.encode();
        if let Some(nonce) = self.nonce {
            inner.extend_from_slice(&encode_element(tlv_type::NONCE, &nonce.to_be_bytes()));
        }
        let lifetime_ms = self.lifetime.as_millis() as u64;
        if lifetime_ms != DEFAULT_INTEREST_LIFETIME_MS {
            inner.extend_from_slice(&encode_element(
                tlv_type::INTEREST_LIFETIME,
                &encode_nonneg(lifetime_ms),
            ));
        }
        encode_element(tlv_type::INTEREST, &inner)
    }

    /// Decode from the value of an Interest element.
    pub fn decode_value(value: &[u8]) -> Result<Self, TlvError> {
        let mut name = None;
        let mut nonce = None;
        let mut lifetime = Duration::from_millis(DEFAULT_INTEREST_LIFETIME_MS);

        let mut rest = value;
        while !rest.is_empty() {
            let element = decode_element(rest)?;
            match element.typ {
                tlv_type::NAME => name = Some(Name::decode_value(element.value)?),
                tlv_type::NONCE => {
                    let raw: [u8; 4] = element.value.try_into().map_err(|_| {
                        TlvError::InvalidIntegerWidth(element.value.len())
                    })?;
                    nonce = Some(u32::from_be_bytes(raw));
                }
                tlv_type::INTEREST_LIFETIME => {
                    lifetime = Duration::from_millis(read_nonneg(element.value)?);
                }
                // Unknown elements (selectors, hop limits, ...) ride along.
                _ => {}
            }
            rest = &rest[element.size..];
        }

        Ok(Self {
            name: name.ok_or(TlvError::MissingElement(tlv_type::NAME))?,
            nonce,
            lifetime,
        })
    }
}

/// A Data packet: the named response to an Interest.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct Data {
    pub name: Name,
    pub content: Vec<u8>,
}

impl Data {
    pub fn new(name: Name, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name,
            content: content.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut inner = self.name.encode();
        inner.extend_from_slice(&encode_element(tlv_type::CONTENT, &self.content));
        encode_element(tlv_type::DATA, &inner)
    }

    pub fn decode_value(value: &[u8]) -> Result<Self, TlvError> {
        let mut name = None;
        let mut content = Vec::new();

        let mut rest = value;
        while !rest.is_empty() {
            let element = decode_element(rest)?;
            match element.typ {
                tlv_type::NAME => name = Some(Name::decode_value(element.value)?),
                tlv_type::CONTENT => content = element.value.to_vec(),
                _ => {}
            }
            rest = &rest[element.size..];
        }

        Ok(Self {
            name: name.ok_or(TlvError::MissingElement(tlv_type::NAME))?,
            content,
        })
    }
}

/// Reason carried in a Nack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NackReason {
    Congestion = 50,
    Duplicate = 100,
    NoRoute = 150,
}

impl NackReason {
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            50 => Some(NackReason::Congestion),
            100 => Some(NackReason::Duplicate),
            150 => Some(NackReason::NoRoute),
            _ => None,
        }
    }
}

/// A Nack: a negative acknowledgement wrapping the refused Interest.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct Nack {
    pub reason: NackReason,
    pub interest: Interest,
}

impl Nack {
    pub fn new(reason: NackReason, interest: Interest) -> Self {
        Self { reason, interest }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut inner = encode_element(tlv_type::NACK_REASON, &[self.reason as u8]);
        inner.extend_from_slice(&self.interest.encode());
        encode_element(tlv_type::NACK, &inner)
    }

    pub fn decode_value(value: &[u8]) -> Result<Self, TlvError> {
        let mut reason = None;
        let mut interest = None;

        let mut rest = value;
        while !rest.is_empty() {
            let element = decode_element(rest)?;
            match element.typ {
                tlv_type::NACK_REASON => {
                    reason = NackReason::from_code(read_nonneg(element.value)?);
                }
                tlv_type::INTEREST => interest = Some(Interest::decode_value(element.value)?),
                _ => {}
            }
            rest = &rest[element.size..];
        }

        Ok(Self {
            reason: reason.ok_or(TlvError::MissingElement(tlv_type::NACK_REASON))?,
            interest: interest.ok_or(TlvError::MissingElement(tlv_type::INTEREST))?,
        })
    }
}

/// Any packet the forwarding plane can receive from a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Packet {
    Interest(Interest),
    Data(Data),
    Nack(Nack),
}

impl Packet {
    /// Decode a whole datagram: exactly one outer element.
    pub fn decode(datagram: &[u8]) -> Result<Self, TlvError> {
        let element = frame_datagram(datagram)?;
        match element.typ {
            tlv_type::INTEREST => Ok(Packet::Interest(Interest::decode_value(element.value)?)),
            tlv_type::DATA => Ok(Packet::Data(Data::decode_value(element.value)?)),
            tlv_type::NACK => Ok(Packet::Nack(Nack::decode_value(element.value)?)),
            other => Err(TlvError::UnexpectedType {
                expected: tlv_type::INTEREST,
                found: other,
            }),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Packet::Interest(i) => i.encode(),
            Packet::Data(d) => d.encode(),
            Packet::Nack(n) => n.encode(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &Name {
        match self {
            Packet::Interest(i) => &i.name,
            Packet::Data(d) => &d.name,
            Packet::Nack(n) => &n.interest.name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn interest_roundtrip() {
        let mut interest = Interest::new(Name::from_uri("/sensors/temp/7"))
            .with_lifetime(Duration::from_millis(2000));
        let mut rng = StdRng::seed_from_u64(7);
        interest.refresh_nonce(&mut rng);

        let wire = interest.encode();
        match Packet::decode(&wire).unwrap() {
            Packet::Interest(decoded) => assert_eq!(decoded, interest),
            other => panic!("decoded wrong packet kind: {other:?}"),
        }
    }

    #[test]
    fn interest_default_lifetime_omitted_on_wire() {
        let interest = Interest::new(Name::from_uri("/a"));
        let wire = interest.encode();
        let decoded = match Packet::decode(&wire).unwrap() {
            Packet::Interest(i) => i,
            other => panic!("decoded wrong packet kind: {other:?}"),
        };
        assert_eq!(
            decoded.lifetime,
            Duration::from_millis(DEFAULT_INTEREST_LIFETIME_MS)
        );
    }

    #[test]
    fn interest_without_name_rejected() {
        let inner = encode_element(tlv_type::NONCE, &[1, 2, 3, 4]);
        let wire = encode_element(tlv_type::INTEREST, &inner);
        assert!(matches!(
            Packet::decode(&wire),
            Err(TlvError::MissingElement(t)) if t == tlv_type::NAME
        ));
    }

    #[test]
    fn interest_unknown_elements_tolerated() {
        let mut inner = Name::from_uri("/a/b").encode();
        inner.extend_from_slice(&encode_element(0x21, b"hop-limit-ish"));
        let wire = encode_element(tlv_type::INTEREST, &inner);
        assert!(Packet::decode(&wire).is_ok());
    }

    #[test]
    fn data_roundtrip() {
        let data = Data::new(Name::from_uri("/sensors/temp/7"), b"21.5C".to_vec());
        let wire = data.encode();
        match Packet::decode(&wire).unwrap() {
            Packet::Data(decoded) => assert_eq!(decoded, data),
            other => panic!("decoded wrong packet kind: {other:?}"),
        }
    }

    #[test]
    fn nack_roundtrip() {
        let nack = Nack::new(NackReason::Duplicate, Interest::new(Name::from_uri("/x")));
        let wire = nack.encode();
        match Packet::decode(&wire).unwrap() {
            Packet::Nack(decoded) => {
                assert_eq!(decoded.reason, NackReason::Duplicate);
                assert_eq!(decoded.interest.name, Name::from_uri("/x"));
            }
            other => panic!("decoded wrong packet kind: {other:?}"),
        }
    }

    #[test]
    fn unknown_outer_type_rejected() {
        let wire = encode_element(0x7F, b"mystery");
        assert!(matches!(
            Packet::decode(&wire),
            Err(TlvError::UnexpectedType { .. })
        ));
    }

    #[test]
    fn refresh_nonce_changes_value() {
        let mut interest = Interest::new(Name::from_uri("/n"));
        let mut rng = StdRng::seed_from_u64(1);
        interest.refresh_nonce(&mut rng);
        let first = interest.nonce;
        interest.refresh_nonce(&mut rng);
        assert_ne!(first, interest.nonce);
    }
}
