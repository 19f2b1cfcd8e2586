// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Rolling per-peer accounting: relay failures and peer-test outcomes
//! over a 60 minute window, exposed as a JSON snapshot keyed by the
//! peers' base32z addresses.

use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use swarm_protocol::SnodeAddress;

/// Test results older than this fall out of the snapshot.
const ROLLING_WINDOW_SECS: u64 = 60 * 60;

/// One recorded peer test.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub struct TestResult {
    /// Unix seconds when the test concluded.
    pub timestamp: u64,
    /// Whether the testee answered correctly.
    pub success: bool,
}

/// The two peer test flavours.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TestKind {
    /// Prove possession of a stored message.
    Storage,
    /// Prove the node follows the chain.
    Blockchain,
}

#[derive(Default, Serialize)]
struct PeerReport {
    requests_failed: u64,
    pushes_failed: u64,
    storage_tests: VecDeque<TestResult>,
    blockchain_tests: VecDeque<TestResult>,
}

/// All in-memory counters of this node. Mutated only on the node
/// driver, so no locking.
pub struct AllStats {
    reset_time: u64,
    client_store_requests: u64,
    client_retrieve_requests: u64,
    peers: BTreeMap<SnodeAddress, PeerReport>,
}

impl AllStats {
    /// Fresh counters, anchored at `now` (unix seconds).
    pub fn new(now: u64) -> Self {
        Self {
            reset_time: now,
            client_store_requests: 0,
            client_retrieve_requests: 0,
            peers: BTreeMap::new(),
        }
    }

    /// Count one client store request.
    pub fn count_store_request(&mut self) {
        self.client_store_requests += 1;
    }

    /// Count one client retrieve request.
    pub fn count_retrieve_request(&mut self) {
        self.client_retrieve_requests += 1;
    }

    /// A first relay attempt against `peer` failed.
    pub fn record_request_failed(&mut self, peer: &SnodeAddress) {
        self.peers.entry(peer.clone()).or_default().requests_failed += 1;
    }

    /// Every relay attempt against `peer` failed; the push was dropped.
    pub fn record_push_failed(&mut self, peer: &SnodeAddress) {
        self.peers.entry(peer.clone()).or_default().pushes_failed += 1;
    }

    /// Record a peer test outcome.
    pub fn record_test(&mut self, peer: &SnodeAddress, kind: TestKind, success: bool, now: u64) {
        let report = self.peers.entry(peer.clone()).or_default();
        let result = TestResult {
            timestamp: now,
            success,
        };
        match kind {
            TestKind::Storage => report.storage_tests.push_back(result),
            TestKind::Blockchain => report.blockchain_tests.push_back(result),
        }
    }

    /// Drop test results that left the rolling window.
    pub fn cleanup(&mut self, now: u64) {
        let cutoff = now.saturating_sub(ROLLING_WINDOW_SECS);
        for report in self.peers.values_mut() {
            prune(&mut report.storage_tests, cutoff);
            prune(&mut report.blockchain_tests, cutoff);
        }
    }

    /// The JSON snapshot served by the stats endpoint.
    pub fn to_json(&self, pretty: bool) -> String {
        let peers: BTreeMap<&str, &PeerReport> = self
            .peers
            .iter()
            .map(|(addr, report)| (addr.as_str(), report))
            .collect();
        let snapshot = serde_json::json!({
            "client_store_requests": self.client_store_requests,
            "client_retrieve_requests": self.client_retrieve_requests,
            "reset_time": self.reset_time,
            "peers": peers,
        });
        let rendered = if pretty {
            serde_json::to_string_pretty(&snapshot)
        } else {
            serde_json::to_string(&snapshot)
        };
        // json! output over scalar counters always renders.
        rendered.unwrap_or_else(|_| "{}".to_owned())
    }
}

fn prune(tests: &mut VecDeque<TestResult>, cutoff: u64) {
    while tests.front().is_some_and(|t| t.timestamp <= cutoff) {
        let _ = tests.pop_front();
    }
}
