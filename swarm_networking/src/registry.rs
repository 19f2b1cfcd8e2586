// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The service-node registry daemon seam: the JSON-RPC snapshot shape
//! and its conversion into a [`BlockUpdate`]. The HTTP plumbing to the
//! daemon lives outside this crate.

use crate::{error::Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use swarm_protocol::{
    messages::BlockchainTestReply, BlockUpdate, NodePubkey, NodeRecord, SwarmId, SwarmInfo,
    SwarmTable,
};

/// Access to the local blockchain daemon.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Fetch the current registry snapshot.
    async fn snapshot(&self) -> Result<RegistrySnapshot>;

    /// Liveness ping so the daemon knows its storage server is up.
    async fn ping(&self) -> Result<()>;

    /// Resolve a blockchain test locally; both tester and testee call
    /// this with the same inputs and must get the same height back.
    async fn blockchain_test(&self, max_height: u64, seed: u64) -> Result<BlockchainTestReply>;
}

/// The `result` object of the registry RPC, as the daemon serves it.
#[derive(Clone, Debug, Deserialize)]
pub struct RegistrySnapshot {
    /// Current chain height.
    pub height: u64,
    /// Height the daemon is syncing towards.
    pub target_height: u64,
    /// Hash of the block at `height`, hex.
    pub block_hash: String,
    /// Chain capability level.
    pub hardfork: u16,
    /// Every registered service node.
    pub service_node_states: Vec<ServiceNodeState>,
}

/// One service node entry of the registry RPC.
#[derive(Clone, Debug, Deserialize)]
pub struct ServiceNodeState {
    /// Legacy identity pubkey, hex.
    pub service_node_pubkey: String,
    /// Transport pinning pubkey, hex.
    pub pubkeys_x25519: String,
    /// Request signing pubkey, hex.
    pub pubkeys_ed25519: String,
    /// Swarm this node is assigned to.
    pub swarm_id: SwarmId,
    /// Storage server port.
    pub storage_port: u16,
    /// Public IPv4 address.
    pub public_ip: String,
}

impl RegistrySnapshot {
    /// Parse a full RPC response body (`{"result": {...}}`).
    pub fn from_rpc_response(body: &[u8]) -> Result<Self> {
        #[derive(Deserialize)]
        struct Envelope {
            result: RegistrySnapshot,
        }
        let envelope: Envelope = serde_json::from_slice(body)
            .map_err(|err| Error::BadRegistryResponse(err.to_string()))?;
        Ok(envelope.result)
    }

    /// Turn the raw snapshot into the immutable per-tick value the node
    /// consumes. Any malformed entry fails the whole snapshot; the
    /// caller skips the tick and re-asks the daemon on the next one.
    pub fn into_block_update(self) -> Result<BlockUpdate> {
        let mut swarms: BTreeMap<SwarmId, Vec<NodeRecord>> = BTreeMap::new();
        for state in &self.service_node_states {
            swarms
                .entry(state.swarm_id)
                .or_default()
                .push(state.to_record()?);
        }

        let swarms = SwarmTable::new(
            swarms
                .into_iter()
                .map(|(id, members)| SwarmInfo::new(id, members))
                .collect(),
        );

        Ok(BlockUpdate {
            height: self.height,
            target_height: self.target_height,
            block_hash: self.block_hash,
            hardfork: self.hardfork,
            swarms,
        })
    }
}

impl ServiceNodeState {
    fn to_record(&self) -> Result<NodeRecord> {
        let pubkey_legacy = NodePubkey::from_hex(&self.service_node_pubkey)?;
        let pubkey_x25519 = NodePubkey::from_hex(&self.pubkeys_x25519)?;
        let pubkey_ed25519 = NodePubkey::from_hex(&self.pubkeys_ed25519)?;
        let ip = self
            .public_ip
            .parse()
            .map_err(|_| Error::BadRegistryResponse(format!("bad ip {}", self.public_ip)))?;
        Ok(NodeRecord::new(
            pubkey_legacy,
            pubkey_x25519,
            pubkey_ed25519,
            ip,
            self.storage_port,
        ))
    }
}
