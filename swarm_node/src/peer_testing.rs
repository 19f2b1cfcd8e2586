// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Per-block tester/testee election. Every honest node must compute the
//! identical pair from the same swarm members and block hash, so the
//! PRNG is pinned to MT19937-64 and index selection uses plain modulo
//! with rejection of `testee == tester`.

use rand::RngCore;
use rand_mt::Mt19937GenRand64;
use swarm_protocol::NodeRecord;

/// Blockchain tests stay this many blocks behind the tip to avoid
/// racing nodes that have not seen the newest block yet.
pub const SAFETY_BUFFER_BLOCKS: u64 = 8;

/// The pair elected for one block round. `None` when the swarm is too
/// small for a round or the block hash is unusable.
pub fn derive_tester_testee(
    members: &[NodeRecord],
    block_hash: &str,
) -> Option<(NodeRecord, NodeRecord)> {
    if members.len() < 2 {
        return None;
    }
    let seed = seed_from_hash(block_hash)?;

    let mut sorted: Vec<&NodeRecord> = members.iter().collect();
    sorted.sort();

    let mut rng = Mt19937GenRand64::new(seed);
    let tester_idx = (rng.next_u64() % sorted.len() as u64) as usize;
    let testee_idx = loop {
        let candidate = (rng.next_u64() % sorted.len() as u64) as usize;
        if candidate != tester_idx {
            break candidate;
        }
    };

    Some((sorted[tester_idx].clone(), sorted[testee_idx].clone()))
}

/// The election seed: first 8 bytes of the block hash, little endian.
fn seed_from_hash(block_hash: &str) -> Option<u64> {
    let mut raw = [0u8; 8];
    match block_hash
        .get(..16)
        .and_then(|prefix| hex::decode_to_slice(prefix, &mut raw).ok())
    {
        Some(()) => Some(u64::from_le_bytes(raw)),
        None => {
            warn!("block hash {block_hash:?} is too short to seed an election");
            None
        }
    }
}
