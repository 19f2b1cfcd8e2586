// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The peer-to-peer request surface: endpoint names for both protocol
//! generations, the signed relay headers and the test payloads.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Relay header carrying the sender's base32z address.
pub const SNODE_PUBKEY_HEADER: &str = "X-Loki-Snode-PubKey";

/// Relay header carrying the base64 signature over the request body.
pub const SNODE_SIGNATURE_HEADER: &str = "X-Loki-Snode-Signature";

/// The two replication endpoint generations that exist in the network.
/// New deployments speak [`ApiVersion::V1Suffix`]; the prefixed form is
/// kept for swarms that still contain older nodes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiVersion {
    /// `/swarms/<op>/v1`, the current form.
    #[default]
    V1Suffix,
    /// `/v1/swarms/<op>`, spoken by older nodes.
    LegacyPrefix,
}

/// A request one service node sends to another.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerRequest {
    /// Replicate a single encoded message.
    Push(Bytes),
    /// Replicate a batch of encoded messages.
    PushBatch(Bytes),
    /// Ask the testee to prove it holds a message.
    StorageTest(StorageTestRequest),
    /// Ask the testee to prove it follows the chain.
    BlockchainTest(BlockchainTestRequest),
}

impl PeerRequest {
    /// The POST target for this request under the given generation.
    pub fn endpoint(&self, api: ApiVersion) -> &'static str {
        match (api, self) {
            (ApiVersion::V1Suffix, PeerRequest::Push(_)) => "/swarms/push/v1",
            (ApiVersion::V1Suffix, PeerRequest::PushBatch(_)) => "/swarms/push_batch/v1",
            (ApiVersion::V1Suffix, PeerRequest::StorageTest(_)) => "/swarms/storage_test/v1",
            (ApiVersion::V1Suffix, PeerRequest::BlockchainTest(_)) => "/swarms/blockchain_test/v1",
            (ApiVersion::LegacyPrefix, PeerRequest::Push(_)) => "/v1/swarms/push",
            (ApiVersion::LegacyPrefix, PeerRequest::PushBatch(_)) => "/v1/swarms/push_batch",
            (ApiVersion::LegacyPrefix, PeerRequest::StorageTest(_)) => "/v1/swarms/storage_test",
            (ApiVersion::LegacyPrefix, PeerRequest::BlockchainTest(_)) => {
                "/v1/swarms/blockchain_test"
            }
        }
    }

    /// The request body as sent over the wire. Test requests are JSON;
    /// push bodies are already encoded.
    pub fn body(&self) -> Bytes {
        match self {
            PeerRequest::Push(body) | PeerRequest::PushBatch(body) => body.clone(),
            PeerRequest::StorageTest(req) => json_body(req),
            PeerRequest::BlockchainTest(req) => json_body(req),
        }
    }
}

fn json_body<T: Serialize>(value: &T) -> Bytes {
    // Both test payloads are two flat integers/strings; serialization
    // cannot fail.
    Bytes::from(serde_json::to_vec(value).unwrap_or_default())
}

/// Body of a storage test: which message of which block round to prove.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageTestRequest {
    /// Block height of the round this test belongs to.
    pub height: u64,
    /// Content address of the message the testee must produce.
    pub hash: String,
}

/// Body of a blockchain test.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockchainTestRequest {
    /// Upper bound on the height the daemon may answer from.
    pub max_height: u64,
    /// Shared seed; both sides must derive the same answer from it.
    pub seed: u64,
}

/// The daemon's answer to a blockchain test.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockchainTestReply {
    /// Height the daemon resolved the seed to.
    pub res_height: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_follow_the_selected_generation() {
        let push = PeerRequest::Push(Bytes::new());
        assert_eq!(push.endpoint(ApiVersion::V1Suffix), "/swarms/push/v1");
        assert_eq!(push.endpoint(ApiVersion::LegacyPrefix), "/v1/swarms/push");

        let test = PeerRequest::StorageTest(StorageTestRequest {
            height: 1,
            hash: "abc".into(),
        });
        assert_eq!(test.endpoint(ApiVersion::V1Suffix), "/swarms/storage_test/v1");
    }

    #[test]
    fn test_payloads_are_flat_json() {
        let req = PeerRequest::BlockchainTest(BlockchainTestRequest {
            max_height: 42,
            seed: 7,
        });
        let body = req.body();
        let parsed: BlockchainTestRequest = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.max_height, 42);
        assert_eq!(parsed.seed, 7);
    }
}
