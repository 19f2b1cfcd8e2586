// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Outbound side of the swarm message store: the pinned transport seam,
//! signed relay headers, the push/retry replicator and the registry
//! daemon client interface.

#[macro_use]
extern crate tracing;

mod difficulty;
mod error;
mod registry;
mod replicator;
mod signing;
mod transport;

pub use self::{
    difficulty::DifficultyProvider,
    error::Error,
    registry::{RegistryClient, RegistrySnapshot, ServiceNodeState},
    replicator::{Replicator, ReplicatorConfig, ReplicatorEvent},
    signing::{verify_signature, RequestSigner},
    transport::{SnodeClient, SnodeRequest, SnodeResponse},
};

/// A specialised `Result` type for networking.
pub type Result<T, E = Error> = std::result::Result<T, E>;
