// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Data model and wire format shared by every part of the swarm message
//! store: node records, swarm tables, block updates, messages and the
//! length-prefixed replication codec.

#[macro_use]
extern crate tracing;

/// base32z node addresses.
pub mod address;
/// Errors.
pub mod error;
/// Peer request surface: endpoints, relay headers, test payloads.
pub mod messages;
/// Length-prefixed binary codec for replicated message batches.
pub mod wire;

pub use address::SnodeAddress;
pub use error::Error;

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{
    fmt::{self, Debug, Display, Formatter},
    net::Ipv4Addr,
};

/// Maximum time-to-live of a stored message: 4 days, in milliseconds.
pub const MAX_TTL_MS: u64 = 345_600_000;

/// Permitted client clock drift on the message timestamp, in milliseconds.
pub const TIMESTAMP_SKEW_MS: u64 = 600_000;

/// Identifier of a swarm. Globally unique per epoch.
pub type SwarmId = u64;

/// Marker id for a node that is not (or no longer) assigned to any swarm.
pub const INVALID_SWARM_ID: SwarmId = SwarmId::MAX;

/// A 32 byte node key (legacy, x25519 or ed25519), hex encoded at the wire.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodePubkey([u8; 32]);

impl NodePubkey {
    /// Wrap raw key bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse from 64 hex characters.
    pub fn from_hex(s: &str) -> Result<Self, Error> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| Error::MalformedPubkey)?;
        Ok(Self(bytes))
    }

    /// The raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Display for NodePubkey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Debug for NodePubkey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        // The first few bytes are enough to identify a node in the logs.
        write!(f, "{}..", &self.to_hex()[..8])
    }
}

impl Serialize for NodePubkey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for NodePubkey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        NodePubkey::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// The recipient identifier a message is addressed to: 33 bytes,
/// carried as 66 ASCII hex characters everywhere on the wire.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MsgPubkey(String);

impl MsgPubkey {
    /// Number of hex characters in a recipient pubkey.
    pub const HEX_LEN: usize = 66;

    /// Validate and wrap a 66 character hex string.
    pub fn new(s: impl Into<String>) -> Result<Self, Error> {
        let s = s.into();
        if s.len() != Self::HEX_LEN || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::MalformedPubkey);
        }
        Ok(Self(s))
    }

    /// The hex form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 64 bit value used to map this recipient onto a swarm: the
    /// first 8 decoded bytes, little endian.
    pub fn to_u64(&self) -> u64 {
        let mut raw = [0u8; 8];
        // Validated on construction, the first 16 hex chars always decode.
        let _ = hex::decode_to_slice(&self.0[..16], &mut raw);
        u64::from_le_bytes(raw)
    }
}

impl TryFrom<String> for MsgPubkey {
    type Error = Error;
    fn try_from(s: String) -> Result<Self, Error> {
        MsgPubkey::new(s)
    }
}

impl From<MsgPubkey> for String {
    fn from(pk: MsgPubkey) -> String {
        pk.0
    }
}

impl Display for MsgPubkey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Debug for MsgPubkey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}..", &self.0[..8])
    }
}

/// One service node as published by the registry. Immutable per snapshot;
/// the total order over `pubkey_legacy` is what every deterministic
/// selection in the protocol relies on.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Long-term identity key; primary sort key.
    pub pubkey_legacy: NodePubkey,
    /// Transport pinning key.
    pub pubkey_x25519: NodePubkey,
    /// Request signing key.
    pub pubkey_ed25519: NodePubkey,
    /// Public storage endpoint.
    pub ip: Ipv4Addr,
    /// Public storage port.
    pub port: u16,
    /// Derived base32z address, used in relay headers and stats.
    pub address: SnodeAddress,
}

impl NodeRecord {
    /// Build a record, deriving the base32z address from the legacy key.
    pub fn new(
        pubkey_legacy: NodePubkey,
        pubkey_x25519: NodePubkey,
        pubkey_ed25519: NodePubkey,
        ip: Ipv4Addr,
        port: u16,
    ) -> Self {
        let address = SnodeAddress::from_pubkey(&pubkey_legacy);
        Self {
            pubkey_legacy,
            pubkey_x25519,
            pubkey_ed25519,
            ip,
            port,
            address,
        }
    }
}

impl PartialOrd for NodeRecord {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeRecord {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.pubkey_legacy.cmp(&other.pubkey_legacy)
    }
}

impl Display for NodeRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({:?})", self.ip, self.port, self.pubkey_legacy)
    }
}

impl Debug for NodeRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "NodeRecord({:?} @ {}:{})", self.pubkey_legacy, self.ip, self.port)
    }
}

/// One swarm: its id and member records, members sorted by legacy pubkey.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwarmInfo {
    /// Swarm identifier.
    pub id: SwarmId,
    /// Member nodes, kept sorted by `pubkey_legacy`.
    pub members: Vec<NodeRecord>,
}

impl SwarmInfo {
    /// Build a swarm, sorting its members.
    pub fn new(id: SwarmId, mut members: Vec<NodeRecord>) -> Self {
        members.sort();
        Self { id, members }
    }
}

/// Every swarm of the network at one registry snapshot, sorted by id.
/// Invariant: each active node appears in exactly one swarm.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwarmTable(Vec<SwarmInfo>);

impl SwarmTable {
    /// Build a table, sorting swarms by id.
    pub fn new(mut swarms: Vec<SwarmInfo>) -> Self {
        swarms.sort_by_key(|s| s.id);
        Self(swarms)
    }

    /// All swarms, ascending by id.
    pub fn swarms(&self) -> &[SwarmInfo] {
        &self.0
    }

    /// True when the table holds no swarm at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Swarm by id.
    pub fn get(&self, id: SwarmId) -> Option<&SwarmInfo> {
        self.0
            .binary_search_by_key(&id, |s| s.id)
            .ok()
            .map(|idx| &self.0[idx])
    }

    /// The swarm a given node currently belongs to, if any.
    pub fn swarm_of_node(&self, pubkey: &NodePubkey) -> Option<&SwarmInfo> {
        self.0.iter().find(|s| {
            s.members
                .binary_search_by(|m| m.pubkey_legacy.cmp(pubkey))
                .is_ok()
        })
    }

    /// Every node in the table.
    pub fn all_nodes(&self) -> impl Iterator<Item = &NodeRecord> {
        self.0.iter().flat_map(|s| s.members.iter())
    }

    /// The swarm that owns a recipient pubkey: the one whose id minimises
    /// the unsigned circular distance to the pubkey's 64 bit value, ties
    /// broken towards the smaller id. Stable under small membership
    /// changes because ids, not member sets, drive the mapping.
    pub fn swarm_for_pubkey(&self, pubkey: &MsgPubkey) -> Option<&SwarmInfo> {
        let pk = pubkey.to_u64();
        self.0
            .iter()
            .min_by_key(|s| (circular_distance(s.id, pk), s.id))
    }
}

fn circular_distance(a: u64, b: u64) -> u64 {
    a.wrapping_sub(b).min(b.wrapping_sub(a))
}

/// Immutable snapshot of the registry state consumed on every sync tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockUpdate {
    /// Chain height of the snapshot.
    pub height: u64,
    /// Height the daemon is syncing towards.
    pub target_height: u64,
    /// Hex encoded hash of the block at `height`.
    pub block_hash: String,
    /// Chain capability level; gates node readiness.
    pub hardfork: u16,
    /// Full swarm assignment at this height.
    pub swarms: SwarmTable,
}

/// Membership changes derived by diffing two consecutive swarm tables
/// from this node's perspective.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SwarmEvents {
    /// The swarm we sit in after the update, `INVALID_SWARM_ID` if none.
    pub our_swarm_id: SwarmId,
    /// We were in a swarm before and are in none now.
    pub decommissioned: bool,
    /// Nodes present now that were absent before.
    pub new_snodes: Vec<NodeRecord>,
    /// Swarm ids present now that were absent before.
    pub new_swarms: Vec<SwarmId>,
}

/// A message admitted into the store. `hash` is the content address and
/// the primary key; `timestamp + ttl` is the expiry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Recipient identifier.
    pub pubkey: MsgPubkey,
    /// Opaque ciphertext.
    pub data: Bytes,
    /// Content address produced by the proof of work.
    pub hash: String,
    /// Time to live, milliseconds.
    pub ttl: u64,
    /// Client timestamp, unix milliseconds.
    pub timestamp: u64,
    /// Proof of work nonce.
    pub nonce: String,
}

impl Message {
    /// Unix millisecond timestamp past which the message is dead.
    pub fn expiry(&self) -> u64 {
        self.timestamp.saturating_add(self.ttl)
    }
}

impl Debug for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("pubkey", &self.pubkey)
            .field("hash", &self.hash)
            .field("data_len", &self.data.len())
            .field("ttl", &self.ttl)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

/// One entry of the proof-of-work difficulty schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowDifficulty {
    /// Unix millisecond timestamp from which this difficulty applies.
    pub activation_ms: u64,
    /// Difficulty to enforce from `activation_ms` on.
    pub difficulty: i32,
}
