// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Outbound replication: single pushes, bulk pushes and the bounded
//! retry machinery. Delivery is at-least-once and fire-and-forget; the
//! store protocol is idempotent on the message hash, so duplicate
//! arrivals at the peer are harmless.

use crate::{
    error::Error,
    signing::RequestSigner,
    transport::{SnodeClient, SnodeRequest, SnodeResponse},
    Result,
};
use bytes::BytesMut;
use std::{sync::Arc, time::Duration};
use swarm_protocol::{
    messages::{ApiVersion, PeerRequest},
    wire, Message, NodeRecord,
};
use tokio::sync::mpsc;

/// Retry delays (seconds) for the current protocol generation. Indexed
/// by attempt number, 1-based; after the last entry the push is given up.
const RETRY_INTERVALS: [u64; 8] = [1, 5, 10, 20, 40, 80, 160, 320];

/// Retry delays used by nodes still on the legacy endpoints.
const RETRY_INTERVALS_LEGACY: [u64; 5] = [5, 10, 20, 40, 80];

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const EVENT_CHANNEL_SIZE: usize = 100;

/// Tunables for the replicator; the default is the authoritative
/// `/swarms/.../v1` generation with the 8-entry retry table.
#[derive(Clone, Debug)]
pub struct ReplicatorConfig {
    /// Which endpoint generation to speak.
    pub api: ApiVersion,
    /// Delay before retry attempt i (1-indexed).
    pub retry_intervals: Vec<Duration>,
    /// Per-attempt request timeout; elapsing counts as a failure.
    pub request_timeout: Duration,
}

impl Default for ReplicatorConfig {
    fn default() -> Self {
        Self {
            api: ApiVersion::V1Suffix,
            retry_intervals: RETRY_INTERVALS.iter().map(|s| Duration::from_secs(*s)).collect(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ReplicatorConfig {
    /// The configuration older swarm members expect.
    pub fn legacy() -> Self {
        Self {
            api: ApiVersion::LegacyPrefix,
            retry_intervals: RETRY_INTERVALS_LEGACY
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Delivery outcomes the node turns into per-peer stats.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplicatorEvent {
    /// A first attempt against the peer failed; a retry task took over.
    RequestFailed {
        /// The peer that did not answer.
        peer: NodeRecord,
    },
    /// Every attempt failed; the push to this peer is abandoned.
    PushGivenUp {
        /// The peer the message could not be delivered to.
        peer: NodeRecord,
    },
}

/// Fans messages out to swarm peers and keeps retrying failed requests
/// on the fixed backoff table. Cheap to clone; every relay runs as its
/// own task holding only the immutable peer record and request payload.
#[derive(Clone)]
pub struct Replicator {
    client: Arc<dyn SnodeClient>,
    signer: Arc<RequestSigner>,
    config: Arc<ReplicatorConfig>,
    events: mpsc::Sender<ReplicatorEvent>,
}

impl Replicator {
    /// Build a replicator; the receiver side carries delivery outcomes
    /// back to the node driver.
    pub fn new(
        client: Arc<dyn SnodeClient>,
        signer: Arc<RequestSigner>,
        config: ReplicatorConfig,
    ) -> (Self, mpsc::Receiver<ReplicatorEvent>) {
        let (events, events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        (
            Self {
                client,
                signer,
                config: Arc::new(config),
                events,
            },
            events_rx,
        )
    }

    /// Encode `msg` once and push it to every peer concurrently.
    pub fn push_one(&self, msg: &Message, peers: &[NodeRecord]) {
        debug!("pushing {:?} to {} peer(s)", msg.hash, peers.len());
        let mut buf = BytesMut::new();
        wire::serialize_message(&mut buf, msg);
        let request = PeerRequest::Push(buf.freeze());
        for peer in peers {
            self.relay(peer.clone(), request.clone());
        }
    }

    /// Batch-encode `msgs` and push every batch to every peer.
    pub fn push_bulk(&self, msgs: &[Message], peers: &[NodeRecord]) {
        let batches = wire::serialize_messages(msgs);
        debug!(
            "bulk push of {} message(s) in {} batch(es) to {} peer(s)",
            msgs.len(),
            batches.len(),
            peers.len()
        );
        for batch in batches {
            let request = PeerRequest::PushBatch(batch);
            for peer in peers {
                self.relay(peer.clone(), request.clone());
            }
        }
    }

    /// Fire-and-forget: send to one peer, retrying on the backoff table.
    pub fn relay(&self, peer: NodeRecord, request: PeerRequest) {
        let this = self.clone();
        let _handle = tokio::spawn(async move {
            this.relay_with_retry(peer, request).await;
        });
    }

    /// One signed attempt against a peer, no retries. Peer tests use
    /// this directly: a failed test is simply recorded, the next block
    /// elects a fresh pair.
    pub async fn send(&self, peer: &NodeRecord, request: &PeerRequest) -> Result<SnodeResponse> {
        let body = request.body();
        let headers = self.signer.sign_headers(&body);
        let snode_request = SnodeRequest {
            target: request.endpoint(self.config.api),
            body,
            headers,
        };
        let pending = self
            .client
            .request(peer.ip, peer.port, &peer.pubkey_x25519, snode_request);
        match tokio::time::timeout(self.config.request_timeout, pending).await {
            Ok(Ok(response)) if response.is_success() => Ok(response),
            Ok(Ok(response)) => Err(Error::PeerRejected {
                status: response.status,
            }),
            Ok(Err(err)) => Err(err),
            Err(_elapsed) => Err(Error::Timeout),
        }
    }

    async fn relay_with_retry(self, peer: NodeRecord, request: PeerRequest) {
        match self.send(&peer, &request).await {
            Ok(_) => return,
            Err(err) => {
                warn!("could not relay to {peer}: {err}");
                self.emit(ReplicatorEvent::RequestFailed { peer: peer.clone() })
                    .await;
            }
        }

        for (attempt, delay) in self.config.retry_intervals.iter().enumerate() {
            tokio::time::sleep(*delay).await;
            match self.send(&peer, &request).await {
                Ok(_) => {
                    debug!("relay to {peer} succeeded on retry #{}", attempt + 1);
                    return;
                }
                Err(err) => {
                    debug!("relay to {peer} failed (attempt #{}): {err}", attempt + 1);
                }
            }
        }

        warn!(
            "giving up relaying to {peer} after {} retries",
            self.config.retry_intervals.len()
        );
        self.emit(ReplicatorEvent::PushGivenUp { peer }).await;
    }

    async fn emit(&self, event: ReplicatorEvent) {
        if self.events.send(event).await.is_err() {
            trace!("replicator event receiver dropped; node is shutting down");
        }
    }
}
