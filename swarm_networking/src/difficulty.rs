// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::Result;
use async_trait::async_trait;
use swarm_protocol::PowDifficulty;

/// Source of the network-wide proof-of-work difficulty schedule,
/// published out of band (a DNS TXT record in production). The node
/// refreshes through this on a timer and keeps its previous schedule
/// whenever a fetch fails.
#[async_trait]
pub trait DifficultyProvider: Send + Sync {
    /// Fetch the full schedule, sorted or not; the node orders it.
    async fn fetch_schedule(&self) -> Result<Vec<PowDifficulty>>;
}
