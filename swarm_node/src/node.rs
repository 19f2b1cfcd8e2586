// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The service node orchestrator. One single-threaded driver task owns
//! every piece of mutable state (swarm view, stats, listeners, caches)
//! and is fed through a command channel; CPU-bound proof-of-work checks
//! run on the blocking pool and post their verdict back onto the same
//! channel. Requests enter through the cloneable [`NodeHandle`].

use crate::{
    error::{Error, Result},
    listeners::{ListenerRegistry, Notification},
    peer_testing::{derive_tester_testee, SAFETY_BUFFER_BLOCKS},
    pow::{PowSchedule, PowVerifier},
    stats::{AllStats, TestKind},
    storage::MessageStore,
    swarm::SwarmTracker,
};
use bytes::Bytes;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use swarm_networking::{
    verify_signature, DifficultyProvider, RegistryClient, Replicator, ReplicatorConfig,
    ReplicatorEvent, RequestSigner, SnodeClient,
};
use swarm_protocol::{
    error::Error as ProtocolError,
    messages::{BlockchainTestReply, BlockchainTestRequest, PeerRequest, StorageTestRequest},
    wire, BlockUpdate, Message, MsgPubkey, NodePubkey, NodeRecord, PowDifficulty, SnodeAddress,
    SwarmEvents, SwarmId, MAX_TTL_MS, TIMESTAMP_SKEW_MS,
};
use tokio::sync::{mpsc, oneshot};

/// Hardfork at which the chain starts requiring storage servers; below
/// it the node refuses client traffic.
pub const STORAGE_SERVER_HARDFORK: u16 = 12;

/// Bound on the height → block hash cache, oldest evicted.
const BLOCK_HASH_CACHE_SIZE: usize = 1024;

const SWARM_UPDATE_INTERVAL: Duration = Duration::from_secs(1);
const SWARM_UPDATE_INTERVAL_INTEGRATION: Duration = Duration::from_millis(200);
const DAEMON_PING_INTERVAL: Duration = Duration::from_secs(5 * 60);
const STATS_CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);
const POW_REFRESH_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Page size for client retrievals.
const RETRIEVE_PAGE_LIMIT: usize = 100;

const CMD_CHANNEL_SIZE: usize = 100;

/// Runtime switches; the defaults are what mainnet deployments run.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Serve client writes even while the ready predicate is false.
    pub force_start: bool,
    /// Integration testnets sync the registry at 200 ms instead of 1 s.
    pub integration_mode: bool,
    /// Replication endpoints and retry table.
    pub replicator: ReplicatorConfig,
    /// How long a long-poll retrieve hangs before reporting no news.
    pub retrieve_poll_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            force_start: false,
            integration_mode: false,
            replicator: ReplicatorConfig::default(),
            retrieve_poll_timeout: Duration::from_secs(20),
        }
    }
}

/// The two relay header values accompanying a peer request.
#[derive(Clone, Debug)]
pub struct RelayMeta {
    /// Value of the snode pubkey header: the sender's base32z address.
    pub snode_pubkey: String,
    /// Value of the signature header: base64 over the body's SHA-512.
    pub signature: String,
}

/// What a client retrieve resolved to.
#[derive(Debug, PartialEq, Eq)]
pub enum RetrieveOutcome {
    /// Messages since the supplied cursor.
    Messages(Vec<Message>),
    /// A bulk store invalidated the long-poll; ask again.
    Reset,
    /// Nothing arrived within the poll window.
    TimedOut,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StoreOrigin {
    Client,
    Peer,
}

enum RetrieveStage {
    Ready(std::result::Result<Vec<Message>, ProtocolError>),
    Wait(oneshot::Receiver<Notification>),
}

type Responder<T> = oneshot::Sender<std::result::Result<T, ProtocolError>>;

#[allow(clippy::large_enum_variant)]
enum NodeCmd {
    ClientStore {
        msg: Message,
        responder: Responder<()>,
    },
    ClientRetrieve {
        pubkey: MsgPubkey,
        last_hash: String,
        responder: oneshot::Sender<RetrieveStage>,
    },
    PeerPush {
        body: Bytes,
        meta: RelayMeta,
        responder: Responder<()>,
    },
    PeerPushBatch {
        body: Bytes,
        meta: RelayMeta,
        responder: Responder<()>,
    },
    PeerStorageTest {
        body: Bytes,
        meta: RelayMeta,
        responder: Responder<Bytes>,
    },
    PeerBlockchainTest {
        body: Bytes,
        meta: RelayMeta,
        responder: Responder<BlockchainTestReply>,
    },
    StatsJson {
        pretty: bool,
        responder: oneshot::Sender<String>,
    },
    Shutdown,

    // Internal postings back onto the driver, in submission order.
    RegistrySynced(Option<BlockUpdate>),
    StoreVerified {
        msg: Message,
        check: std::result::Result<(), ProtocolError>,
        origin: StoreOrigin,
        responder: Responder<()>,
    },
    BatchVerified {
        msgs: Vec<Message>,
        dropped: usize,
        responder: Responder<()>,
    },
    ScheduleFetched(Vec<PowDifficulty>),
    TestOutcome {
        peer: NodeRecord,
        kind: TestKind,
        success: bool,
    },
}

/// Helper to assemble a node from its collaborators.
pub struct NodeBuilder {
    legacy_pubkey: NodePubkey,
    ed25519_secret: [u8; 32],
    store: Arc<dyn MessageStore>,
    registry: Arc<dyn RegistryClient>,
    client: Arc<dyn SnodeClient>,
    pow: Arc<dyn PowVerifier>,
    difficulty_provider: Option<Arc<dyn DifficultyProvider>>,
    config: NodeConfig,
}

impl NodeBuilder {
    /// Instantiate the builder with the mandatory collaborators.
    pub fn new(
        legacy_pubkey: NodePubkey,
        ed25519_secret: [u8; 32],
        store: Arc<dyn MessageStore>,
        registry: Arc<dyn RegistryClient>,
        client: Arc<dyn SnodeClient>,
        pow: Arc<dyn PowVerifier>,
    ) -> Self {
        Self {
            legacy_pubkey,
            ed25519_secret,
            store,
            registry,
            client,
            pow,
            difficulty_provider: None,
            config: NodeConfig::default(),
        }
    }

    /// Override the default configuration.
    pub fn config(&mut self, config: NodeConfig) {
        self.config = config;
    }

    /// Wire the out-of-band difficulty schedule source.
    pub fn difficulty_provider(&mut self, provider: Arc<dyn DifficultyProvider>) {
        self.difficulty_provider = Some(provider);
    }

    /// Build the handle and the driver. The caller spawns
    /// [`ServiceNode::run`]; dropping the driver abandons outstanding
    /// retries and parked long-polls.
    pub fn build(self) -> (NodeHandle, ServiceNode) {
        let address = SnodeAddress::from_pubkey(&self.legacy_pubkey);
        let signer = Arc::new(RequestSigner::new(self.ed25519_secret, address));
        let (replicator, replicator_events) =
            Replicator::new(self.client, signer, self.config.replicator.clone());

        let (cmd_sender, cmd_receiver) = mpsc::channel(CMD_CHANNEL_SIZE);
        let handle = NodeHandle {
            cmd_sender: cmd_sender.clone(),
            retrieve_poll_timeout: self.config.retrieve_poll_timeout,
        };
        let node = ServiceNode {
            our_pubkey: self.legacy_pubkey,
            config: self.config,
            store: self.store,
            registry: self.registry,
            replicator,
            replicator_events,
            pow: self.pow,
            difficulty_provider: self.difficulty_provider,
            pow_schedule: PowSchedule::default(),
            swarm: SwarmTracker::new(self.legacy_pubkey),
            listeners: ListenerRegistry::default(),
            stats: AllStats::new(unix_secs()),
            current_block: None,
            block_hash_cache: BTreeMap::new(),
            hardfork: 0,
            syncing: true,
            sync_in_flight: false,
            cmd_sender,
            cmd_receiver,
        };
        (handle, node)
    }
}

/// Cloneable front door to the driver. The transport layer calls these;
/// every method resolves once the driver (and, for writes, the worker
/// verification) is done with the request.
#[derive(Clone)]
pub struct NodeHandle {
    cmd_sender: mpsc::Sender<NodeCmd>,
    retrieve_poll_timeout: Duration,
}

impl NodeHandle {
    /// Store a client message. Success is idempotent over duplicates.
    pub async fn client_store(&self, msg: Message) -> Result<()> {
        let (responder, rx) = oneshot::channel();
        self.send(NodeCmd::ClientStore { msg, responder }).await?;
        flatten(rx.await)
    }

    /// Retrieve messages since `last_hash`, long-polling when there is
    /// nothing yet.
    pub async fn client_retrieve(
        &self,
        pubkey: MsgPubkey,
        last_hash: String,
    ) -> Result<RetrieveOutcome> {
        let (responder, rx) = oneshot::channel();
        self.send(NodeCmd::ClientRetrieve {
            pubkey,
            last_hash,
            responder,
        })
        .await?;
        match rx.await.map_err(|_| Error::DriverShutdown)? {
            RetrieveStage::Ready(result) => result
                .map(RetrieveOutcome::Messages)
                .map_err(Error::from),
            RetrieveStage::Wait(waiter) => {
                match tokio::time::timeout(self.retrieve_poll_timeout, waiter).await {
                    Ok(Ok(Notification::Messages(msgs))) => Ok(RetrieveOutcome::Messages(msgs)),
                    Ok(Ok(Notification::Reset)) => Ok(RetrieveOutcome::Reset),
                    Ok(Err(_closed)) => Err(Error::DriverShutdown),
                    Err(_elapsed) => Ok(RetrieveOutcome::TimedOut),
                }
            }
        }
    }

    /// A single replicated message pushed by a swarm peer.
    pub async fn peer_push(&self, body: Bytes, meta: RelayMeta) -> Result<()> {
        let (responder, rx) = oneshot::channel();
        self.send(NodeCmd::PeerPush {
            body,
            meta,
            responder,
        })
        .await?;
        flatten(rx.await)
    }

    /// A batch of replicated messages pushed by a swarm peer.
    pub async fn peer_push_batch(&self, body: Bytes, meta: RelayMeta) -> Result<()> {
        let (responder, rx) = oneshot::channel();
        self.send(NodeCmd::PeerPushBatch {
            body,
            meta,
            responder,
        })
        .await?;
        flatten(rx.await)
    }

    /// Answer a storage test with the message data we hold.
    pub async fn peer_storage_test(&self, body: Bytes, meta: RelayMeta) -> Result<Bytes> {
        let (responder, rx) = oneshot::channel();
        self.send(NodeCmd::PeerStorageTest {
            body,
            meta,
            responder,
        })
        .await?;
        flatten(rx.await)
    }

    /// Answer a blockchain test through the local daemon.
    pub async fn peer_blockchain_test(
        &self,
        body: Bytes,
        meta: RelayMeta,
    ) -> Result<BlockchainTestReply> {
        let (responder, rx) = oneshot::channel();
        self.send(NodeCmd::PeerBlockchainTest {
            body,
            meta,
            responder,
        })
        .await?;
        flatten(rx.await)
    }

    /// The stats JSON snapshot.
    pub async fn stats_json(&self, pretty: bool) -> Result<String> {
        let (responder, rx) = oneshot::channel();
        self.send(NodeCmd::StatsJson { pretty, responder }).await?;
        rx.await.map_err(|_| Error::DriverShutdown)
    }

    /// Stop the driver. Outstanding retries are abandoned.
    pub async fn shutdown(&self) {
        let _ = self.cmd_sender.send(NodeCmd::Shutdown).await;
    }

    async fn send(&self, cmd: NodeCmd) -> Result<()> {
        self.cmd_sender
            .send(cmd)
            .await
            .map_err(|_| Error::DriverShutdown)
    }
}

fn flatten<T>(
    received: std::result::Result<std::result::Result<T, ProtocolError>, oneshot::error::RecvError>,
) -> Result<T> {
    received
        .map_err(|_| Error::DriverShutdown)?
        .map_err(Error::from)
}

/// The driver. Owns all mutable node state; run it on its own task.
pub struct ServiceNode {
    our_pubkey: NodePubkey,
    config: NodeConfig,
    store: Arc<dyn MessageStore>,
    registry: Arc<dyn RegistryClient>,
    replicator: Replicator,
    replicator_events: mpsc::Receiver<ReplicatorEvent>,
    pow: Arc<dyn PowVerifier>,
    difficulty_provider: Option<Arc<dyn DifficultyProvider>>,
    pow_schedule: PowSchedule,
    swarm: SwarmTracker,
    listeners: ListenerRegistry,
    stats: AllStats,
    current_block: Option<BlockUpdate>,
    block_hash_cache: BTreeMap<u64, String>,
    hardfork: u16,
    syncing: bool,
    sync_in_flight: bool,
    cmd_sender: mpsc::Sender<NodeCmd>,
    cmd_receiver: mpsc::Receiver<NodeCmd>,
}

impl ServiceNode {
    /// Drive the node until [`NodeHandle::shutdown`] is called. All
    /// timers are edge-triggered: a slow turn delays the next tick but
    /// never queues duplicates.
    pub async fn run(mut self) {
        let swarm_period = if self.config.integration_mode {
            SWARM_UPDATE_INTERVAL_INTEGRATION
        } else {
            SWARM_UPDATE_INTERVAL
        };
        let mut swarm_interval = tokio::time::interval(swarm_period);
        let mut ping_interval = tokio::time::interval(DAEMON_PING_INTERVAL);
        let mut cleanup_interval = tokio::time::interval(STATS_CLEANUP_INTERVAL);
        let mut pow_interval = tokio::time::interval(POW_REFRESH_INTERVAL);
        for interval in [
            &mut swarm_interval,
            &mut ping_interval,
            &mut cleanup_interval,
            &mut pow_interval,
        ] {
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        }

        loop {
            tokio::select! {
                cmd = self.cmd_receiver.recv() => match cmd {
                    None | Some(NodeCmd::Shutdown) => {
                        info!("service node driver stopping");
                        break;
                    }
                    Some(cmd) => self.handle_cmd(cmd),
                },
                event = self.replicator_events.recv() => {
                    if let Some(event) = event {
                        self.handle_replicator_event(event);
                    }
                },
                _ = swarm_interval.tick() => self.request_registry_snapshot(),
                _ = ping_interval.tick() => self.ping_daemon(),
                _ = cleanup_interval.tick() => self.stats.cleanup(unix_secs()),
                _ = pow_interval.tick() => self.request_schedule_refresh(),
            }
        }
    }

    fn handle_cmd(&mut self, cmd: NodeCmd) {
        match cmd {
            NodeCmd::ClientStore { msg, responder } => {
                self.stats.count_store_request();
                match self.check_store_preconditions(&msg) {
                    Ok(()) => self.spawn_pow_check(msg, StoreOrigin::Client, responder),
                    Err(err) => {
                        let _ = responder.send(Err(err));
                    }
                }
            }
            NodeCmd::ClientRetrieve {
                pubkey,
                last_hash,
                responder,
            } => self.handle_retrieve(pubkey, last_hash, responder),
            NodeCmd::PeerPush {
                body,
                meta,
                responder,
            } => match self.admit_peer_push(&body, &meta) {
                Ok(msg) => self.spawn_pow_check(msg, StoreOrigin::Peer, responder),
                Err(err) => {
                    let _ = responder.send(Err(err));
                }
            },
            NodeCmd::PeerPushBatch {
                body,
                meta,
                responder,
            } => self.handle_push_batch(body, meta, responder),
            NodeCmd::PeerStorageTest {
                body,
                meta,
                responder,
            } => {
                let result = self.process_storage_test(&body, &meta);
                let _ = responder.send(result);
            }
            NodeCmd::PeerBlockchainTest {
                body,
                meta,
                responder,
            } => self.handle_blockchain_test(body, meta, responder),
            NodeCmd::StatsJson { pretty, responder } => {
                let _ = responder.send(self.stats.to_json(pretty));
            }
            NodeCmd::Shutdown => unreachable!("handled by the run loop"),
            NodeCmd::RegistrySynced(update) => {
                self.sync_in_flight = false;
                if let Some(update) = update {
                    self.apply_block_update(update);
                }
            }
            NodeCmd::StoreVerified {
                msg,
                check,
                origin,
                responder,
            } => self.handle_store_verified(msg, check, origin, responder),
            NodeCmd::BatchVerified {
                msgs,
                dropped,
                responder,
            } => self.handle_batch_verified(msgs, dropped, responder),
            NodeCmd::ScheduleFetched(entries) => {
                trace!("difficulty schedule refreshed ({} entries)", entries.len());
                self.pow_schedule = PowSchedule::new(entries);
            }
            NodeCmd::TestOutcome {
                peer,
                kind,
                success,
            } => {
                debug!("{kind:?} test against {peer}: success = {success}");
                self.stats
                    .record_test(&peer.address, kind, success, unix_secs());
            }
        }
    }

    // ---- admission ----

    fn is_ready(&self) -> bool {
        self.hardfork >= STORAGE_SERVER_HARDFORK
            && self.swarm.our_swarm_id().is_some()
            && !self.syncing
    }

    fn check_store_preconditions(
        &self,
        msg: &Message,
    ) -> std::result::Result<(), ProtocolError> {
        if !self.is_ready() && !self.config.force_start {
            return Err(ProtocolError::ServiceUnavailable);
        }
        // Even force-started nodes cannot route without a registry view.
        if !self.swarm.synced() || self.swarm.table().is_empty() {
            return Err(ProtocolError::ServiceUnavailable);
        }
        if !self.swarm.is_pubkey_for_us(&msg.pubkey) {
            let members = self
                .swarm
                .table()
                .swarm_for_pubkey(&msg.pubkey)
                .map(|s| s.members.clone())
                .unwrap_or_default();
            debug!(
                "rejecting store for {:?}: belongs to another swarm",
                msg.pubkey
            );
            return Err(ProtocolError::WrongSwarm { members });
        }
        validate_message(msg, unix_ms())
    }

    fn admit_peer_push(
        &self,
        body: &Bytes,
        meta: &RelayMeta,
    ) -> std::result::Result<Message, ProtocolError> {
        let _sender = self.authenticate_peer(body, meta)?;
        let mut msgs =
            wire::deserialize_messages(body).map_err(|_| ProtocolError::BadRequest)?;
        if msgs.len() != 1 {
            return Err(ProtocolError::BadRequest);
        }
        let msg = msgs.remove(0);
        validate_message(&msg, unix_ms())?;
        Ok(msg)
    }

    fn spawn_pow_check(&self, msg: Message, origin: StoreOrigin, responder: Responder<()>) {
        let difficulty = self.pow_schedule.difficulty_at(msg.timestamp);
        let verifier = Arc::clone(&self.pow);
        let sender = self.cmd_sender.clone();
        let _handle = tokio::spawn(async move {
            let verified = tokio::task::spawn_blocking(move || {
                let check = check_pow(verifier.as_ref(), &msg, difficulty);
                (msg, check)
            })
            .await;
            let Ok((msg, check)) = verified else {
                error!("proof-of-work worker task failed");
                return;
            };
            let _ = sender
                .send(NodeCmd::StoreVerified {
                    msg,
                    check,
                    origin,
                    responder,
                })
                .await;
        });
    }

    fn handle_store_verified(
        &mut self,
        msg: Message,
        check: std::result::Result<(), ProtocolError>,
        origin: StoreOrigin,
        responder: Responder<()>,
    ) {
        if let Err(err) = check {
            let _ = responder.send(Err(err));
            return;
        }
        match self.store.store(&msg) {
            Err(err) => {
                error!("could not persist {:?}: {err}", msg.hash);
                let _ = responder.send(Err(ProtocolError::Database));
            }
            Ok(true) => {
                trace!("saved message {:?}", msg.hash);
                if origin == StoreOrigin::Client {
                    let peers = self.swarm.other_members();
                    if !peers.is_empty() {
                        self.replicator.push_one(&msg, &peers);
                    }
                    let pubkey = msg.pubkey.clone();
                    self.listeners.notify(&pubkey, vec![msg]);
                }
                let _ = responder.send(Ok(()));
            }
            // A duplicate: identical state, no pushes, still a success.
            Ok(false) => {
                let _ = responder.send(Ok(()));
            }
        }
    }

    fn handle_push_batch(&mut self, body: Bytes, meta: RelayMeta, responder: Responder<()>) {
        if let Err(err) = self.authenticate_peer(&body, &meta) {
            let _ = responder.send(Err(err));
            return;
        }
        let msgs = match wire::deserialize_messages(&body) {
            Ok(msgs) => msgs,
            Err(err) => {
                warn!("rejecting push batch: {err}");
                let _ = responder.send(Err(ProtocolError::BadRequest));
                return;
            }
        };
        debug!(
            "got {} message(s) from peers, size: {}",
            msgs.len(),
            body.len()
        );
        let schedule = self.pow_schedule.clone();
        let verifier = Arc::clone(&self.pow);
        let sender = self.cmd_sender.clone();
        let _handle = tokio::spawn(async move {
            let filtered = tokio::task::spawn_blocking(move || {
                let total = msgs.len();
                let kept: Vec<Message> = msgs
                    .into_iter()
                    .filter(|msg| {
                        check_pow(
                            verifier.as_ref(),
                            msg,
                            schedule.difficulty_at(msg.timestamp),
                        )
                        .is_ok()
                    })
                    .collect();
                let dropped = total - kept.len();
                (kept, dropped)
            })
            .await;
            let Ok((msgs, dropped)) = filtered else {
                error!("proof-of-work worker task failed");
                return;
            };
            let _ = sender
                .send(NodeCmd::BatchVerified {
                    msgs,
                    dropped,
                    responder,
                })
                .await;
        });
    }

    fn handle_batch_verified(
        &mut self,
        msgs: Vec<Message>,
        dropped: usize,
        responder: Responder<()>,
    ) {
        if dropped > 0 {
            warn!("dropped {dropped} batch message(s) failing proof of work");
        }
        if let Err(err) = self.store.bulk_store(&msgs) {
            error!("failed to save batch to the database: {err}");
            let _ = responder.send(Err(ProtocolError::Database));
            return;
        }
        trace!("saved messages count: {}", msgs.len());
        // The set of newly stored messages is unknown for a batch, so
        // every parked long-poll is reset instead of notified.
        self.listeners.reset_all();
        let _ = responder.send(Ok(()));
    }

    fn handle_retrieve(
        &mut self,
        pubkey: MsgPubkey,
        last_hash: String,
        responder: oneshot::Sender<RetrieveStage>,
    ) {
        self.stats.count_retrieve_request();
        let stage = match self.store.retrieve(&pubkey, &last_hash, RETRIEVE_PAGE_LIMIT) {
            Err(err) => {
                error!("retrieve failed: {err}");
                RetrieveStage::Ready(Err(ProtocolError::Database))
            }
            Ok(msgs) if !msgs.is_empty() => RetrieveStage::Ready(Ok(msgs)),
            Ok(_) => {
                let (tx, rx) = oneshot::channel();
                self.listeners.register(pubkey, tx);
                RetrieveStage::Wait(rx)
            }
        };
        let _ = responder.send(stage);
    }

    // ---- peer authentication & tests ----

    fn authenticate_peer(
        &self,
        body: &[u8],
        meta: &RelayMeta,
    ) -> std::result::Result<NodeRecord, ProtocolError> {
        let address = SnodeAddress::parse(&meta.snode_pubkey)
            .map_err(|_| ProtocolError::UnauthorizedPeer)?;
        let record = self
            .swarm
            .table()
            .all_nodes()
            .find(|n| n.address == address)
            .cloned()
            .ok_or(ProtocolError::UnauthorizedPeer)?;
        if !verify_signature(&record.pubkey_ed25519, body, &meta.signature) {
            warn!("bad relay signature from {address}");
            return Err(ProtocolError::UnauthorizedPeer);
        }
        Ok(record)
    }

    fn process_storage_test(
        &self,
        body: &Bytes,
        meta: &RelayMeta,
    ) -> std::result::Result<Bytes, ProtocolError> {
        let sender = self.authenticate_peer(body, meta)?;
        let req: StorageTestRequest =
            serde_json::from_slice(body).map_err(|_| ProtocolError::BadRequest)?;

        let Some(block) = &self.current_block else {
            return Err(ProtocolError::Retry);
        };
        if req.height > block.height {
            debug!(
                "storage test for height {} but we are at {}",
                req.height, block.height
            );
            return Err(ProtocolError::Retry);
        }
        let Some(block_hash) = self.block_hash_cache.get(&req.height) else {
            warn!("storage test for height {} outside our cache", req.height);
            return Err(ProtocolError::WrongTester);
        };
        let members = self.swarm.our_swarm_members();
        let Some((tester, _testee)) = derive_tester_testee(&members, block_hash) else {
            return Err(ProtocolError::WrongTester);
        };
        if tester.pubkey_legacy != sender.pubkey_legacy {
            warn!("storage test from {sender}, but the elected tester is {tester}");
            return Err(ProtocolError::WrongTester);
        }

        match self.store.retrieve_by_hash(&req.hash) {
            Ok(Some(msg)) => Ok(msg.data),
            Ok(None) => Err(ProtocolError::Retry),
            Err(err) => {
                error!("storage test lookup failed: {err}");
                Err(ProtocolError::Database)
            }
        }
    }

    fn handle_blockchain_test(
        &mut self,
        body: Bytes,
        meta: RelayMeta,
        responder: Responder<BlockchainTestReply>,
    ) {
        if let Err(err) = self.authenticate_peer(&body, &meta) {
            let _ = responder.send(Err(err));
            return;
        }
        let req: BlockchainTestRequest = match serde_json::from_slice(&body) {
            Ok(req) => req,
            Err(_) => {
                let _ = responder.send(Err(ProtocolError::BadRequest));
                return;
            }
        };
        let registry = Arc::clone(&self.registry);
        let _handle = tokio::spawn(async move {
            match registry.blockchain_test(req.max_height, req.seed).await {
                Ok(reply) => {
                    let _ = responder.send(Ok(reply));
                }
                Err(err) => {
                    warn!("could not answer blockchain test: {err}");
                    let _ = responder.send(Err(ProtocolError::Retry));
                }
            }
        });
    }

    fn initiate_peer_tests(&mut self) {
        let Some(block) = self.current_block.clone() else {
            return;
        };
        let members = self.swarm.our_swarm_members();
        let Some((tester, testee)) = derive_tester_testee(&members, &block.block_hash) else {
            return;
        };
        if tester.pubkey_legacy != self.our_pubkey {
            trace!("not the elected tester at height {}", block.height);
            return;
        }
        debug!("elected tester at height {}; testing {testee}", block.height);
        self.start_storage_test(block.height, testee.clone());
        self.start_blockchain_test(block.height, testee);
    }

    fn start_storage_test(&self, height: u64, testee: NodeRecord) {
        let count = match self.store.count() {
            Ok(count) => count,
            Err(err) => {
                error!("cannot pick a storage test message: {err}");
                return;
            }
        };
        if count == 0 {
            debug!("skipping storage test: nothing stored yet");
            return;
        }
        let index = SmallRng::from_entropy().gen_range(0..count);
        let msg = match self.store.retrieve_by_index(index) {
            Ok(Some(msg)) => msg,
            _ => return,
        };
        let request = PeerRequest::StorageTest(StorageTestRequest {
            height,
            hash: msg.hash.clone(),
        });
        let replicator = self.replicator.clone();
        let sender = self.cmd_sender.clone();
        let _handle = tokio::spawn(async move {
            let success = match replicator.send(&testee, &request).await {
                Ok(response) => response.body == msg.data,
                Err(err) => {
                    debug!("storage test against {testee} did not complete: {err}");
                    false
                }
            };
            let _ = sender
                .send(NodeCmd::TestOutcome {
                    peer: testee,
                    kind: TestKind::Storage,
                    success,
                })
                .await;
        });
    }

    fn start_blockchain_test(&self, height: u64, testee: NodeRecord) {
        if height <= SAFETY_BUFFER_BLOCKS {
            debug!("chain too close to genesis for a blockchain test");
            return;
        }
        let request = BlockchainTestRequest {
            max_height: height - SAFETY_BUFFER_BLOCKS,
            seed: SmallRng::from_entropy().gen(),
        };
        let registry = Arc::clone(&self.registry);
        let replicator = self.replicator.clone();
        let sender = self.cmd_sender.clone();
        let _handle = tokio::spawn(async move {
            // The expected answer comes from our own daemon; if that
            // fails there is nothing to hold against the testee.
            let expected = match registry.blockchain_test(request.max_height, request.seed).await {
                Ok(reply) => reply,
                Err(err) => {
                    warn!("skipping blockchain test, local daemon said: {err}");
                    return;
                }
            };
            let success = match replicator
                .send(&testee, &PeerRequest::BlockchainTest(request))
                .await
            {
                Ok(response) => serde_json::from_slice::<BlockchainTestReply>(&response.body)
                    .map(|reply| reply.res_height == expected.res_height)
                    .unwrap_or(false),
                Err(err) => {
                    debug!("blockchain test against {testee} did not complete: {err}");
                    false
                }
            };
            let _ = sender
                .send(NodeCmd::TestOutcome {
                    peer: testee,
                    kind: TestKind::Blockchain,
                    success,
                })
                .await;
        });
    }

    // ---- registry sync & membership ----

    fn request_registry_snapshot(&mut self) {
        if self.sync_in_flight {
            trace!("registry sync still in flight, skipping tick");
            return;
        }
        self.sync_in_flight = true;
        let registry = Arc::clone(&self.registry);
        let sender = self.cmd_sender.clone();
        let _handle = tokio::spawn(async move {
            let update = match registry.snapshot().await {
                Ok(snapshot) => match snapshot.into_block_update() {
                    Ok(update) => Some(update),
                    Err(err) => {
                        warn!("discarding unusable registry snapshot: {err}");
                        None
                    }
                },
                Err(err) => {
                    warn!("registry snapshot failed: {err}");
                    None
                }
            };
            let _ = sender.send(NodeCmd::RegistrySynced(update)).await;
        });
    }

    fn apply_block_update(&mut self, update: BlockUpdate) {
        self.hardfork = update.hardfork;
        self.syncing = update.height < update.target_height;

        let same_block = self
            .current_block
            .as_ref()
            .is_some_and(|b| b.block_hash == update.block_hash);
        if same_block {
            self.current_block = Some(update);
            return;
        }

        debug!(
            "new block at height {} ({})",
            update.height, update.block_hash
        );
        let _ = self
            .block_hash_cache
            .insert(update.height, update.block_hash.clone());
        while self.block_hash_cache.len() > BLOCK_HASH_CACHE_SIZE {
            let _ = self.block_hash_cache.pop_first();
        }

        let events = self.swarm.update(update.swarms.clone());
        self.current_block = Some(update);
        self.apply_swarm_events(events);
        self.initiate_peer_tests();
    }

    fn apply_swarm_events(&mut self, events: SwarmEvents) {
        let new_peers: Vec<NodeRecord> = events
            .new_snodes
            .into_iter()
            .filter(|n| n.pubkey_legacy != self.our_pubkey)
            .collect();
        if !new_peers.is_empty() {
            self.bootstrap_peers(&new_peers);
        }
        if !events.new_swarms.is_empty() {
            self.bootstrap_swarms(Some(&events.new_swarms));
        }
        if events.decommissioned {
            info!("we are no longer in any swarm; salvaging all local data");
            self.bootstrap_swarms(None);
        }
    }

    /// Bring peers that just joined the network up to date with
    /// everything we hold.
    fn bootstrap_peers(&self, peers: &[NodeRecord]) {
        let msgs = match self.store.retrieve_all() {
            Ok(msgs) => msgs,
            Err(err) => {
                error!("could not read local messages for bootstrap: {err}");
                return;
            }
        };
        if msgs.is_empty() {
            return;
        }
        info!(
            "bootstrapping {} new peer(s) with {} message(s)",
            peers.len(),
            msgs.len()
        );
        self.replicator.push_bulk(&msgs, peers);
    }

    /// Re-home every local message onto its (possibly new) owning swarm.
    /// `None` means all swarms, used on decommission.
    fn bootstrap_swarms(&self, only: Option<&[SwarmId]>) {
        match only {
            Some(ids) => info!("bootstrapping swarms {ids:?}"),
            None => info!("bootstrapping all swarms"),
        }
        let msgs = match self.store.retrieve_all() {
            Ok(msgs) => msgs,
            Err(err) => {
                error!("could not retrieve entries from the database: {err}");
                return;
            }
        };
        let table = self.swarm.table();

        let mut owner_cache: HashMap<String, SwarmId> = HashMap::new();
        let mut to_relay: BTreeMap<SwarmId, Vec<Message>> = BTreeMap::new();
        for msg in msgs {
            let owner = match owner_cache.get(msg.pubkey.as_str()) {
                Some(id) => *id,
                None => match table.swarm_for_pubkey(&msg.pubkey) {
                    Some(swarm) => {
                        let _ = owner_cache.insert(msg.pubkey.as_str().to_owned(), swarm.id);
                        swarm.id
                    }
                    None => continue,
                },
            };
            if only.map_or(true, |ids| ids.contains(&owner)) {
                to_relay.entry(owner).or_default().push(msg);
            }
        }

        trace!("bootstrapping {} swarm(s)", to_relay.len());
        for (swarm_id, batch) in to_relay {
            let Some(info) = table.get(swarm_id) else {
                continue;
            };
            let members: Vec<NodeRecord> = info
                .members
                .iter()
                .filter(|m| m.pubkey_legacy != self.our_pubkey)
                .cloned()
                .collect();
            if members.is_empty() {
                continue;
            }
            self.replicator.push_bulk(&batch, &members);
        }
    }

    // ---- timers ----

    fn ping_daemon(&self) {
        let registry = Arc::clone(&self.registry);
        let _handle = tokio::spawn(async move {
            if let Err(err) = registry.ping().await {
                warn!("registry daemon ping failed: {err}");
            }
        });
    }

    fn request_schedule_refresh(&self) {
        let Some(provider) = self.difficulty_provider.clone() else {
            return;
        };
        let sender = self.cmd_sender.clone();
        let _handle = tokio::spawn(async move {
            match provider.fetch_schedule().await {
                Ok(entries) => {
                    let _ = sender.send(NodeCmd::ScheduleFetched(entries)).await;
                }
                // Keep the previous schedule on any fetch failure.
                Err(err) => debug!("difficulty refresh failed: {err}"),
            }
        });
    }

    fn handle_replicator_event(&mut self, event: ReplicatorEvent) {
        match event {
            ReplicatorEvent::RequestFailed { peer } => {
                self.stats.record_request_failed(&peer.address);
            }
            ReplicatorEvent::PushGivenUp { peer } => {
                self.stats.record_push_failed(&peer.address);
            }
        }
    }
}

fn validate_message(msg: &Message, now_ms: u64) -> std::result::Result<(), ProtocolError> {
    if msg.ttl == 0 || msg.ttl > MAX_TTL_MS {
        return Err(ProtocolError::InvalidTtl);
    }
    if now_ms.abs_diff(msg.timestamp) > TIMESTAMP_SKEW_MS {
        return Err(ProtocolError::InvalidTimestamp);
    }
    Ok(())
}

fn check_pow(
    verifier: &dyn PowVerifier,
    msg: &Message,
    difficulty: i32,
) -> std::result::Result<(), ProtocolError> {
    match verifier.verify(
        &msg.nonce,
        msg.timestamp,
        msg.ttl,
        &msg.pubkey,
        &msg.data,
        difficulty,
    ) {
        None => Err(ProtocolError::InvalidPow),
        Some(hash) if hash != msg.hash => Err(ProtocolError::HashMismatch),
        Some(_) => Ok(()),
    }
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn unix_secs() -> u64 {
    unix_ms() / 1000
}
