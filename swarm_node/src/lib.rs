// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! One node of the swarm-replicated message store: swarm membership
//! tracking, message admission with proof of work, replication to swarm
//! peers, per-block peer testing and long-poll retrieval.

#[macro_use]
extern crate tracing;

mod error;
mod listeners;
mod node;
mod peer_testing;
mod pow;
mod stats;
mod storage;
mod swarm;

pub use self::{
    error::Error,
    listeners::Notification,
    node::{
        NodeBuilder, NodeConfig, NodeHandle, RelayMeta, RetrieveOutcome, ServiceNode,
        STORAGE_SERVER_HARDFORK,
    },
    peer_testing::{derive_tester_testee, SAFETY_BUFFER_BLOCKS},
    pow::{PowSchedule, PowVerifier, DEFAULT_DIFFICULTY},
    stats::TestKind,
    storage::{MemoryStore, MessageStore, StoreError},
    swarm::{derive_swarm_events, SwarmTracker},
};
