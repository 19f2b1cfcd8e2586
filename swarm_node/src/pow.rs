// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The time-indexed proof-of-work difficulty schedule and the verifier
//! seam. The hash function itself lives outside the core; verification
//! runs on the blocking pool because it is the one CPU-bound step of
//! admission.

use swarm_protocol::{MsgPubkey, PowDifficulty};

/// Difficulty enforced before any schedule has been published.
pub const DEFAULT_DIFFICULTY: i32 = 100;

/// The concrete proof-of-work check. Pure: same inputs, same answer.
pub trait PowVerifier: Send + Sync {
    /// Verify the nonce against the difficulty; on success return the
    /// content hash the work commits to.
    fn verify(
        &self,
        nonce: &str,
        timestamp: u64,
        ttl: u64,
        pubkey: &MsgPubkey,
        data: &[u8],
        difficulty: i32,
    ) -> Option<String>;
}

/// Ordered difficulty schedule. The entry with the largest activation
/// time at or before a message's timestamp decides its difficulty.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PowSchedule(Vec<PowDifficulty>);

impl PowSchedule {
    /// Build a schedule, ordering entries by activation time.
    pub fn new(mut entries: Vec<PowDifficulty>) -> Self {
        entries.sort_by_key(|e| e.activation_ms);
        Self(entries)
    }

    /// The difficulty in force at `timestamp_ms`. A timestamp preceding
    /// every entry falls back to the earliest one; an empty schedule
    /// enforces [`DEFAULT_DIFFICULTY`].
    pub fn difficulty_at(&self, timestamp_ms: u64) -> i32 {
        let mut selected = match self.0.first() {
            Some(first) => first.difficulty,
            None => return DEFAULT_DIFFICULTY,
        };
        for entry in &self.0 {
            if entry.activation_ms <= timestamp_ms {
                selected = entry.difficulty;
            } else {
                break;
            }
        }
        selected
    }

    /// Number of schedule entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no schedule has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
