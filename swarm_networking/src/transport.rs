// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The pinned HTTPS client seam. The concrete TLS transport lives
//! outside this crate; everything here is what the replication layer
//! needs to describe a request and judge a response.

use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::net::Ipv4Addr;

/// An outbound POST to another service node.
#[derive(Clone, Debug)]
pub struct SnodeRequest {
    /// Request target, e.g. `/swarms/push/v1`.
    pub target: &'static str,
    /// Request body.
    pub body: Bytes,
    /// Headers to attach; always includes the two relay headers.
    pub headers: Vec<(&'static str, String)>,
}

/// What came back from a peer.
#[derive(Clone, Debug)]
pub struct SnodeResponse {
    /// HTTP-level status code.
    pub status: u16,
    /// Response body.
    pub body: Bytes,
}

impl SnodeResponse {
    /// A successful empty response.
    pub fn ok(body: Bytes) -> Self {
        Self { status: 200, body }
    }

    /// Whether the peer accepted the request.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport towards other service nodes. Implementations MUST pin the
/// connection to `pin_x25519`: a peer presenting any other key is a
/// transport failure, not a response.
#[async_trait]
pub trait SnodeClient: Send + Sync {
    /// Issue one HTTPS POST to `ip:port`.
    async fn request(
        &self,
        ip: Ipv4Addr,
        port: u16,
        pin_x25519: &swarm_protocol::NodePubkey,
        request: SnodeRequest,
    ) -> Result<SnodeResponse>;
}
