//! Hierarchical NDN names.
//!
//! A name is an ordered sequence of opaque byte components. Names key
//! the PIT: two Interests with equal names are the same pending
//! Interest as far as the forwarding plane is concerned.

use std::fmt;

use crate::constants::tlv_type;
use crate::error::TlvError;
use crate::tlv::{decode_element, encode_element, read_varnum};

/// An NDN name: an ordered list of byte components.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[must_use]
pub struct Name {
    components: Vec<Vec<u8>>,
}

impl Name {
    pub fn new() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Parse a URI like `/alpha/beta/gamma`. Percent-escapes (`%41`)
    /// decode to the escaped byte. An empty or `/` URI is the empty name.
    pub fn from_uri(uri: &str) -> Self {
        let mut name = Name::new();
        for part in uri.split('/').filter(|p| !p.is_empty()) {
            name.components.push(unescape(part));
        }
        name
    }

    /// Append one component.
    pub fn push(&mut self, component: impl Into<Vec<u8>>) {
        self.components.push(component.into());
    }

    /// Returns a new name with `component` appended.
    pub fn child(&self, component: impl Into<Vec<u8>>) -> Self {
        let mut name = self.clone();
        name.push(component);
        name
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    #[must_use]
    pub fn components(&self) -> &[Vec<u8>] {
        &self.components
    }

    /// Whether `self` is a prefix of `other` (every name is a prefix of
    /// itself).
    #[must_use]
    pub fn is_prefix_of(&self, other: &Name) -> bool {
        other.components.len() >= self.components.len()
            && other.components[..self.components.len()] == self.components[..]
    }

    /// Encode as a Name TLV element.
    pub fn encode(&self) -> Vec<u8> {
        let mut inner = Vec::new();
        for component in &self.components {
            inner.extend_from_slice(&encode_element(tlv_type::NAME_COMPONENT, component));
        }
        encode_element(tlv_type::NAME, &inner)
    }

    /// Decode the value of a Name TLV element.
    pub fn decode_value(value: &[u8]) -> Result<Self, TlvError> {
        let mut components = Vec::new();
        let mut rest = value;
        while !rest.is_empty() {
            let mut offset = 0;
            let typ = read_varnum(rest, &mut offset)?;
            if typ != tlv_type::NAME_COMPONENT {
                return Err(TlvError::UnexpectedType {
                    expected: tlv_type::NAME_COMPONENT,
                    found: typ,
                });
            }
            let element = decode_element(rest)?;
            components.push(element.value.to_vec());
            rest = &rest[element.size..];
        }
        Ok(Self { components })
    }

    /// Render as a URI (`/a/b/c`); the empty name renders as `/`.
    pub fn to_uri(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            return write!(f, "/");
        }
        for component in &self.components {
            write!(f, "/{}", escape(component))?;
        }
        Ok(())
    }
}

fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~')
}

fn escape(component: &[u8]) -> String {
    let mut out = String::with_capacity(component.len());
    for &b in component {
        if is_unreserved(b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

fn unescape(part: &str) -> Vec<u8> {
    let bytes = part.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let Some(b) = part
                .get(i + 1..i + 3)
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}
