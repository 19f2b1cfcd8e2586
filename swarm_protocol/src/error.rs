// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::NodeRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A specialised `Result` type for protocol crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds surfaced to clients and peers. Serializable so the
/// transport layer can map them onto its own status codes.
#[derive(Error, Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The recipient maps to a different swarm; the correct members are
    /// included so the client can redirect.
    #[error("message belongs to another swarm ({} correct members attached)", members.len())]
    WrongSwarm {
        /// Members of the swarm that owns the recipient.
        members: Vec<NodeRecord>,
    },
    /// TTL out of the accepted range.
    #[error("invalid TTL")]
    InvalidTtl,
    /// Timestamp too far from this node's clock.
    #[error("invalid timestamp")]
    InvalidTimestamp,
    /// The proof of work does not meet the required difficulty.
    #[error("invalid proof of work")]
    InvalidPow,
    /// The proof of work verifies but yields a different content address.
    #[error("provided hash does not match the proof of work")]
    HashMismatch,
    /// This node is not ready to serve clients yet.
    #[error("service node is not ready")]
    ServiceUnavailable,
    /// The message database failed; transient.
    #[error("database failure")]
    Database,
    /// The peer's view is behind; re-ask on the next poll.
    #[error("retry later")]
    Retry,
    /// A test request arrived from a node that was not elected tester.
    #[error("request did not come from the elected tester")]
    WrongTester,
    /// Relay headers missing, unknown sender or bad signature.
    #[error("peer request is not authenticated")]
    UnauthorizedPeer,
    /// The request body did not decode.
    #[error("malformed request body")]
    BadRequest,
    /// A pubkey failed to parse.
    #[error("malformed pubkey")]
    MalformedPubkey,
    /// A base32z node address failed to parse.
    #[error("malformed snode address")]
    MalformedAddress,
}
