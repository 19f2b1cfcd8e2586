// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Human-readable node addresses: lowercase base32z over the 32 byte
//! legacy pubkey, carrying the `.snode` suffix.

use crate::{error::Error, NodePubkey};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

const ALPHABET: &[u8; 32] = b"ybndrfg8ejkmcpqxot1uwisza345h769";

const SUFFIX: &str = ".snode";

/// Encode bytes as base32z, most significant bit first.
pub fn base32z_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 8 / 5 + 1);
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    for &byte in data {
        acc = (acc << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ALPHABET[((acc >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(ALPHABET[((acc << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

/// Decode base32z, dropping any partial trailing byte.
pub fn base32z_decode(s: &str) -> Result<Vec<u8>, Error> {
    let mut out = Vec::with_capacity(s.len() * 5 / 8);
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    for c in s.bytes() {
        let value = ALPHABET
            .iter()
            .position(|&a| a == c)
            .ok_or(Error::MalformedAddress)? as u32;
        acc = (acc << 5) | value;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push(((acc >> bits) & 0xff) as u8);
        }
    }
    Ok(out)
}

/// A node's published address: `<base32z(pubkey_legacy)>.snode`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnodeAddress(String);

impl SnodeAddress {
    /// Derive the address of a node from its legacy pubkey.
    pub fn from_pubkey(pubkey: &NodePubkey) -> Self {
        let mut s = base32z_encode(pubkey.as_bytes());
        s.push_str(SUFFIX);
        Self(s)
    }

    /// Accept an address received on the wire.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let encoded = s.strip_suffix(SUFFIX).ok_or(Error::MalformedAddress)?;
        if base32z_decode(encoded)?.len() != 32 {
            return Err(Error::MalformedAddress);
        }
        Ok(Self(s.to_owned()))
    }

    /// The full address string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The legacy pubkey this address was derived from.
    pub fn to_pubkey(&self) -> Result<NodePubkey, Error> {
        let encoded = self.0.strip_suffix(SUFFIX).ok_or(Error::MalformedAddress)?;
        let bytes = base32z_decode(encoded)?;
        let raw: [u8; 32] = bytes.try_into().map_err(|_| Error::MalformedAddress)?;
        Ok(NodePubkey::new(raw))
    }
}

impl Display for SnodeAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for SnodeAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_known_values() {
        assert_eq!(base32z_encode(&[]), "");
        assert_eq!(base32z_encode(&[0x00]), "yy");
        assert_eq!(base32z_encode(&[0xff]), "9h");
        assert_eq!(base32z_encode(&[0x00, 0x00]), "yyyy");
    }

    #[test]
    fn round_trips_pubkey_sized_input() {
        let bytes: Vec<u8> = (0u8..32).collect();
        let encoded = base32z_encode(&bytes);
        assert_eq!(encoded.len(), 52);
        assert_eq!(base32z_decode(&encoded).unwrap(), bytes);
    }

    #[test]
    fn rejects_foreign_characters() {
        assert!(base32z_decode("l0v2").is_err());
    }

    #[test]
    fn address_carries_snode_suffix_and_inverts() {
        let pk = NodePubkey::new([7u8; 32]);
        let addr = SnodeAddress::from_pubkey(&pk);
        assert!(addr.as_str().ends_with(".snode"));
        assert_eq!(addr.to_pubkey().unwrap(), pk);
        assert_eq!(SnodeAddress::parse(addr.as_str()).unwrap(), addr);
        assert!(SnodeAddress::parse("notanaddress").is_err());
    }
}
