// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Scripted collaborators for driving a [`swarm_node::ServiceNode`]
//! without any real network, daemon or database.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use ed25519_dalek::SigningKey;
use std::{
    net::Ipv4Addr,
    sync::{Arc, Mutex},
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use swarm_networking::{
    RegistryClient, RegistrySnapshot, RequestSigner, ServiceNodeState, SnodeClient, SnodeRequest,
    SnodeResponse,
};
use swarm_node::{derive_tester_testee, PowVerifier, RelayMeta};
use swarm_protocol::{
    messages::BlockchainTestReply, Message, MsgPubkey, NodePubkey, NodeRecord, SnodeAddress,
    SwarmId,
};

/// One scripted network identity, with every key a node needs.
#[derive(Clone)]
pub struct TestNode {
    pub legacy: NodePubkey,
    pub ed_secret: [u8; 32],
    pub x25519: NodePubkey,
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl TestNode {
    pub fn new(i: u8) -> Self {
        Self {
            legacy: NodePubkey::new([i; 32]),
            ed_secret: [100 + i; 32],
            x25519: NodePubkey::new([50 + i; 32]),
            ip: Ipv4Addr::new(10, 0, 0, i),
            port: 22020 + u16::from(i),
        }
    }

    pub fn ed_public(&self) -> NodePubkey {
        NodePubkey::new(SigningKey::from_bytes(&self.ed_secret).verifying_key().to_bytes())
    }

    pub fn address(&self) -> SnodeAddress {
        SnodeAddress::from_pubkey(&self.legacy)
    }

    pub fn record(&self) -> NodeRecord {
        NodeRecord::new(self.legacy, self.x25519, self.ed_public(), self.ip, self.port)
    }

    pub fn registry_state(&self, swarm_id: SwarmId) -> ServiceNodeState {
        ServiceNodeState {
            service_node_pubkey: self.legacy.to_hex(),
            pubkeys_x25519: self.x25519.to_hex(),
            pubkeys_ed25519: self.ed_public().to_hex(),
            swarm_id,
            storage_port: self.port,
            public_ip: self.ip.to_string(),
        }
    }

    /// The relay headers this node would attach to `body`.
    pub fn relay_meta(&self, body: &[u8]) -> RelayMeta {
        let signer = RequestSigner::new(self.ed_secret, self.address());
        let headers = signer.sign_headers(body);
        RelayMeta {
            snode_pubkey: headers[0].1.clone(),
            signature: headers[1].1.clone(),
        }
    }
}

/// A block hash whose first 8 bytes carry `seed`.
pub fn block_hash(seed: u64) -> String {
    let mut hash = hex::encode(seed.to_le_bytes());
    hash.push_str(&"0".repeat(48));
    hash
}

/// Search for a block hash that elects `tester` in this member set;
/// returns the hash and the elected testee.
pub fn hash_electing(members: &[NodeRecord], tester: &NodePubkey) -> (String, NodeRecord) {
    for seed in 0u64..100_000 {
        let hash = block_hash(seed);
        if let Some((elected, testee)) = derive_tester_testee(members, &hash) {
            if elected.pubkey_legacy == *tester {
                return (hash, testee);
            }
        }
    }
    panic!("no electing hash found");
}

/// A full registry snapshot for the given swarm layout.
pub fn snapshot(
    height: u64,
    hash: &str,
    hardfork: u16,
    swarms: &[(SwarmId, &[&TestNode])],
) -> RegistrySnapshot {
    RegistrySnapshot {
        height,
        target_height: height,
        block_hash: hash.to_owned(),
        hardfork,
        service_node_states: swarms
            .iter()
            .flat_map(|(id, nodes)| nodes.iter().map(|n| n.registry_state(*id)))
            .collect(),
    }
}

/// Registry daemon whose snapshot the test can swap at any time.
pub struct MockRegistry {
    snapshot: Mutex<Option<RegistrySnapshot>>,
}

impl MockRegistry {
    pub fn new(initial: RegistrySnapshot) -> Arc<Self> {
        Arc::new(Self {
            snapshot: Mutex::new(Some(initial)),
        })
    }

    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            snapshot: Mutex::new(None),
        })
    }

    pub fn set(&self, snapshot: RegistrySnapshot) {
        *self.snapshot.lock().expect("lock") = Some(snapshot);
    }
}

#[async_trait]
impl RegistryClient for MockRegistry {
    async fn snapshot(&self) -> swarm_networking::Result<RegistrySnapshot> {
        self.snapshot
            .lock()
            .expect("lock")
            .clone()
            .ok_or_else(|| swarm_networking::Error::DaemonUnavailable("scripted away".into()))
    }

    async fn ping(&self) -> swarm_networking::Result<()> {
        Ok(())
    }

    async fn blockchain_test(
        &self,
        max_height: u64,
        _seed: u64,
    ) -> swarm_networking::Result<BlockchainTestReply> {
        Ok(BlockchainTestReply {
            res_height: max_height,
        })
    }
}

/// One outbound request the node made.
#[derive(Clone, Debug)]
pub struct Recorded {
    pub ip: Ipv4Addr,
    pub port: u16,
    pub target: String,
    pub body: Bytes,
}

type ResponderFn = dyn Fn(&SnodeRequest) -> swarm_networking::Result<SnodeResponse> + Send + Sync;

/// Transport double that records every request and answers through a
/// scripted responder.
pub struct RecordingClient {
    requests: Mutex<Vec<Recorded>>,
    responder: Box<ResponderFn>,
}

impl RecordingClient {
    /// Accept everything with an empty 200.
    pub fn accepting() -> Arc<Self> {
        Self::with(|_req| Ok(SnodeResponse::ok(Bytes::new())))
    }

    pub fn with<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&SnodeRequest) -> swarm_networking::Result<SnodeResponse> + Send + Sync + 'static,
    {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            responder: Box::new(responder),
        })
    }

    pub fn recorded(&self) -> Vec<Recorded> {
        self.requests.lock().expect("lock").clone()
    }

    pub fn recorded_for(&self, port: u16, target: &str) -> Vec<Recorded> {
        self.recorded()
            .into_iter()
            .filter(|r| r.port == port && r.target == target)
            .collect()
    }
}

#[async_trait]
impl SnodeClient for RecordingClient {
    async fn request(
        &self,
        ip: Ipv4Addr,
        port: u16,
        _pin_x25519: &NodePubkey,
        request: SnodeRequest,
    ) -> swarm_networking::Result<SnodeResponse> {
        self.requests.lock().expect("lock").push(Recorded {
            ip,
            port,
            target: request.target.to_owned(),
            body: request.body.clone(),
        });
        (self.responder)(&request)
    }
}

/// Deterministic stand-in for the proof-of-work function: the "hash" is
/// a readable digest over every input, so tests can precompute it.
pub fn content_hash(nonce: &str, timestamp: u64, ttl: u64, pubkey: &MsgPubkey, data: &[u8]) -> String {
    format!(
        "{timestamp}:{ttl}:{}:{}:{nonce}",
        pubkey.as_str(),
        hex::encode(data)
    )
}

pub struct TestPow;

impl PowVerifier for TestPow {
    fn verify(
        &self,
        nonce: &str,
        timestamp: u64,
        ttl: u64,
        pubkey: &MsgPubkey,
        data: &[u8],
        _difficulty: i32,
    ) -> Option<String> {
        Some(content_hash(nonce, timestamp, ttl, pubkey, data))
    }
}

/// A verifier that fails every nonce.
pub struct RejectPow;

impl PowVerifier for RejectPow {
    fn verify(
        &self,
        _nonce: &str,
        _timestamp: u64,
        _ttl: u64,
        _pubkey: &MsgPubkey,
        _data: &[u8],
        _difficulty: i32,
    ) -> Option<String> {
        None
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A message with a valid [`TestPow`] hash, timestamped now.
pub fn make_message(pubkey: &MsgPubkey, data: &[u8]) -> Message {
    let timestamp = now_ms();
    let ttl = 3_456_000;
    let nonce = "nonce".to_owned();
    let hash = content_hash(&nonce, timestamp, ttl, pubkey, data);
    Message {
        pubkey: pubkey.clone(),
        data: Bytes::from(data.to_vec()),
        hash,
        ttl,
        timestamp,
        nonce,
    }
}

/// A recipient pubkey with the given 64 bit swarm-mapping value.
pub fn pubkey_with_u64(value: u64) -> MsgPubkey {
    let mut hexstr = hex::encode(value.to_le_bytes());
    hexstr.push_str(&"0".repeat(MsgPubkey::HEX_LEN - 16));
    MsgPubkey::new(hexstr).expect("valid pubkey")
}

/// Poll `check` under paused time until it passes.
pub async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition never became true: {what}");
}

/// A node under test with handles on all its scripted collaborators.
pub struct Harness {
    pub handle: swarm_node::NodeHandle,
    pub store: Arc<swarm_node::MemoryStore>,
    pub registry: Arc<MockRegistry>,
    pub client: Arc<RecordingClient>,
}

/// Build and spawn a node driver around the scripted collaborators.
pub fn start_node(
    me: &TestNode,
    registry: Arc<MockRegistry>,
    client: Arc<RecordingClient>,
    pow: Arc<dyn PowVerifier>,
    config: swarm_node::NodeConfig,
) -> Harness {
    start_node_with_store(
        me,
        registry,
        client,
        pow,
        config,
        Arc::new(swarm_node::MemoryStore::new()),
    )
}

/// Like [`start_node`], but over a store the test has already filled,
/// for driving restart-with-data flows.
pub fn start_node_with_store(
    me: &TestNode,
    registry: Arc<MockRegistry>,
    client: Arc<RecordingClient>,
    pow: Arc<dyn PowVerifier>,
    config: swarm_node::NodeConfig,
    store: Arc<swarm_node::MemoryStore>,
) -> Harness {
    let mut builder = swarm_node::NodeBuilder::new(
        me.legacy,
        me.ed_secret,
        store.clone(),
        registry.clone(),
        client.clone(),
        pow,
    );
    builder.config(config);
    let (handle, node) = builder.build();
    drop(tokio::spawn(node.run()));
    Harness {
        handle,
        store,
        registry,
        client,
    }
}

/// Keep submitting `msg` until the node leaves `ServiceUnavailable`.
pub async fn store_when_ready(handle: &swarm_node::NodeHandle, msg: &Message) {
    for _ in 0..400 {
        match handle.client_store(msg.clone()).await {
            Ok(()) => return,
            Err(swarm_node::Error::Protocol(swarm_protocol::Error::ServiceUnavailable)) => {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
            Err(err) => panic!("unexpected store error: {err}"),
        }
    }
    panic!("node never became ready");
}
