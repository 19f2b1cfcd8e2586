// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use thiserror::Error;

/// Internal networking error. These never cross into admission results;
/// callers convert them into stats deltas and retry schedules.
#[derive(Debug, Error)]
pub enum Error {
    /// The outbound request did not complete within the request timeout.
    #[error("request timed out")]
    Timeout,

    /// The peer answered with a non-success status.
    #[error("peer rejected the request with status {status}")]
    PeerRejected {
        /// The status the peer returned.
        status: u16,
    },

    /// The transport could not reach the peer at all.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The registry daemon answered something we could not parse.
    #[error("registry response could not be parsed: {0}")]
    BadRegistryResponse(String),

    /// The registry daemon is not reachable.
    #[error("registry daemon unavailable: {0}")]
    DaemonUnavailable(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] swarm_protocol::Error),
}
