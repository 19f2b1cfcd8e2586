// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::storage::StoreError;
use thiserror::Error;

pub(super) type Result<T, E = Error> = std::result::Result<T, E>;

/// Internal error.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum Error {
    #[error("Protocol error {0}")]
    Protocol(#[from] swarm_protocol::Error),

    #[error("Network error {0}")]
    Network(#[from] swarm_networking::Error),

    #[error("Storage error {0}")]
    Storage(#[from] StoreError),

    /// The node driver is gone; no request can be served any more.
    #[error("Node driver has shut down")]
    DriverShutdown,
}
