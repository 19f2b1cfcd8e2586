// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Client-facing admission and retrieval against a driven node.

mod common;

use common::*;
use std::{sync::Arc, time::Duration};
use swarm_node::{Error, NodeConfig, RetrieveOutcome};
use swarm_protocol::error::Error as ProtocolError;

const HARDFORK: u16 = 12;

#[tokio::test(start_paused = true)]
async fn store_then_retrieve_returns_the_message() {
    let me = TestNode::new(1);
    let registry = MockRegistry::new(snapshot(5, &block_hash(1), HARDFORK, &[(7, &[&me])]));
    let node = start_node(
        &me,
        registry,
        RecordingClient::accepting(),
        Arc::new(TestPow),
        NodeConfig::default(),
    );

    let pubkey = pubkey_with_u64(42);
    let msg = make_message(&pubkey, b"hi");
    store_when_ready(&node.handle, &msg).await;

    let outcome = node
        .handle
        .client_retrieve(pubkey, String::new())
        .await
        .expect("retrieve");
    assert_eq!(outcome, RetrieveOutcome::Messages(vec![msg]));
}

#[tokio::test(start_paused = true)]
async fn wrong_swarm_reports_the_correct_members() {
    let me = TestNode::new(1);
    let other = TestNode::new(2);
    // Two swarms at opposite ends of the id ring; the recipient below
    // maps onto the other one.
    let registry = MockRegistry::new(snapshot(
        5,
        &block_hash(1),
        HARDFORK,
        &[(0, &[&me]), (1 << 63, &[&other])],
    ));
    let node = start_node(
        &me,
        registry,
        RecordingClient::accepting(),
        Arc::new(TestPow),
        NodeConfig::default(),
    );

    let foreign = pubkey_with_u64(0x7000_0000_0000_0000);
    let msg = make_message(&foreign, b"lost");
    // Let the node sync, then expect the redirect.
    for _ in 0..400 {
        match node.handle.client_store(msg.clone()).await {
            Err(Error::Protocol(ProtocolError::ServiceUnavailable)) => {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
            Err(Error::Protocol(ProtocolError::WrongSwarm { members })) => {
                assert_eq!(members, vec![other.record()]);
                return;
            }
            unexpected => panic!("expected a wrong-swarm redirect, got {unexpected:?}"),
        }
    }
    panic!("node never answered the store");
}

#[tokio::test(start_paused = true)]
async fn duplicate_store_is_idempotent_and_pushes_once() {
    let me = TestNode::new(1);
    let peer = TestNode::new(2);
    let registry = MockRegistry::new(snapshot(
        5,
        &block_hash(1),
        HARDFORK,
        &[(7, &[&me, &peer])],
    ));
    let node = start_node(
        &me,
        registry,
        RecordingClient::accepting(),
        Arc::new(TestPow),
        NodeConfig::default(),
    );

    let msg = make_message(&pubkey_with_u64(9), b"payload");
    store_when_ready(&node.handle, &msg).await;
    node.handle.client_store(msg.clone()).await.expect("second store");

    eventually("push relayed to the peer", || {
        node.client
            .recorded_for(peer.port, "/swarms/push/v1")
            .len()
            == 1
    })
    .await;

    // Extra settling time: the duplicate must not have queued another.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(
        node.client.recorded_for(peer.port, "/swarms/push/v1").len(),
        1
    );
    use swarm_node::MessageStore;
    assert_eq!(node.store.count().expect("count"), 1);
}

#[tokio::test(start_paused = true)]
async fn not_ready_refuses_client_writes_unless_forced() {
    let me = TestNode::new(1);
    // Hardfork below the storage gate: never ready.
    let registry = MockRegistry::new(snapshot(5, &block_hash(1), 11, &[(7, &[&me])]));
    let node = start_node(
        &me,
        registry.clone(),
        RecordingClient::accepting(),
        Arc::new(TestPow),
        NodeConfig::default(),
    );

    let msg = make_message(&pubkey_with_u64(1), b"early");
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(matches!(
        node.handle.client_store(msg.clone()).await,
        Err(Error::Protocol(ProtocolError::ServiceUnavailable))
    ));

    // The same chain state with force_start accepts the write.
    let forced = start_node(
        &me,
        registry,
        RecordingClient::accepting(),
        Arc::new(TestPow),
        NodeConfig {
            force_start: true,
            ..NodeConfig::default()
        },
    );
    store_when_ready(&forced.handle, &msg).await;
}

#[tokio::test(start_paused = true)]
async fn admission_rejects_bad_ttl_timestamp_and_pow() {
    let me = TestNode::new(1);
    let registry = MockRegistry::new(snapshot(5, &block_hash(1), HARDFORK, &[(7, &[&me])]));
    let node = start_node(
        &me,
        registry,
        RecordingClient::accepting(),
        Arc::new(TestPow),
        NodeConfig::default(),
    );

    let pubkey = pubkey_with_u64(3);
    let good = make_message(&pubkey, b"ok");
    store_when_ready(&node.handle, &good).await;

    let mut zero_ttl = make_message(&pubkey, b"a");
    zero_ttl.ttl = 0;
    assert!(matches!(
        node.handle.client_store(zero_ttl).await,
        Err(Error::Protocol(ProtocolError::InvalidTtl))
    ));

    let mut stale = make_message(&pubkey, b"b");
    stale.timestamp -= 3_600_000;
    assert!(matches!(
        node.handle.client_store(stale).await,
        Err(Error::Protocol(ProtocolError::InvalidTimestamp))
    ));

    let mut tampered = make_message(&pubkey, b"c");
    tampered.hash = "not-the-pow-hash".into();
    assert!(matches!(
        node.handle.client_store(tampered).await,
        Err(Error::Protocol(ProtocolError::HashMismatch))
    ));
}

#[tokio::test(start_paused = true)]
async fn failed_pow_is_rejected_outright() {
    let me = TestNode::new(1);
    let registry = MockRegistry::new(snapshot(5, &block_hash(1), HARDFORK, &[(7, &[&me])]));
    let node = start_node(
        &me,
        registry,
        RecordingClient::accepting(),
        Arc::new(RejectPow),
        NodeConfig::default(),
    );

    let msg = make_message(&pubkey_with_u64(3), b"never");
    for _ in 0..400 {
        match node.handle.client_store(msg.clone()).await {
            Err(Error::Protocol(ProtocolError::ServiceUnavailable)) => {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
            Err(Error::Protocol(ProtocolError::InvalidPow)) => return,
            other => panic!("expected an invalid-pow rejection, got {other:?}"),
        }
    }
    panic!("node never answered the store");
}

#[tokio::test(start_paused = true)]
async fn long_poll_wakes_on_a_new_store() {
    let me = TestNode::new(1);
    let registry = MockRegistry::new(snapshot(5, &block_hash(1), HARDFORK, &[(7, &[&me])]));
    let node = start_node(
        &me,
        registry,
        RecordingClient::accepting(),
        Arc::new(TestPow),
        NodeConfig {
            // Keep the poll window out of the way of the wake-up.
            retrieve_poll_timeout: Duration::from_secs(600),
            ..NodeConfig::default()
        },
    );

    let pubkey = pubkey_with_u64(12);
    // Warm the node up with an unrelated recipient.
    store_when_ready(&node.handle, &make_message(&pubkey_with_u64(99), b"warmup")).await;

    let handle = node.handle.clone();
    let poll_pubkey = pubkey.clone();
    let waiter = tokio::spawn(async move {
        handle
            .client_retrieve(poll_pubkey, String::new())
            .await
            .expect("retrieve")
    });
    // Give the poll time to park.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let msg = make_message(&pubkey, b"news");
    node.handle.client_store(msg.clone()).await.expect("store");

    let outcome = waiter.await.expect("join");
    assert_eq!(outcome, RetrieveOutcome::Messages(vec![msg]));
}

#[tokio::test(start_paused = true)]
async fn long_poll_times_out_quietly() {
    let me = TestNode::new(1);
    let registry = MockRegistry::new(snapshot(5, &block_hash(1), HARDFORK, &[(7, &[&me])]));
    let node = start_node(
        &me,
        registry,
        RecordingClient::accepting(),
        Arc::new(TestPow),
        NodeConfig::default(),
    );
    store_when_ready(&node.handle, &make_message(&pubkey_with_u64(99), b"warmup")).await;

    let outcome = node
        .handle
        .client_retrieve(pubkey_with_u64(5), String::new())
        .await
        .expect("retrieve");
    assert_eq!(outcome, RetrieveOutcome::TimedOut);
}

#[tokio::test(start_paused = true)]
async fn stats_snapshot_counts_client_requests() {
    let me = TestNode::new(1);
    let registry = MockRegistry::new(snapshot(5, &block_hash(1), HARDFORK, &[(7, &[&me])]));
    let node = start_node(
        &me,
        registry,
        RecordingClient::accepting(),
        Arc::new(TestPow),
        NodeConfig::default(),
    );

    let pubkey = pubkey_with_u64(1);
    store_when_ready(&node.handle, &make_message(&pubkey, b"x")).await;
    let _ = node
        .handle
        .client_retrieve(pubkey, String::new())
        .await
        .expect("retrieve");

    let json: serde_json::Value =
        serde_json::from_str(&node.handle.stats_json(false).await.expect("stats"))
            .expect("valid json");
    assert!(json["client_store_requests"].as_u64().expect("count") >= 1);
    assert_eq!(json["client_retrieve_requests"], 1);
}

// Cursor semantics across stores: the second page starts after the
// acknowledged hash.
#[tokio::test(start_paused = true)]
async fn retrieve_resumes_from_the_cursor() {
    let me = TestNode::new(1);
    let registry = MockRegistry::new(snapshot(5, &block_hash(1), HARDFORK, &[(7, &[&me])]));
    let node = start_node(
        &me,
        registry,
        RecordingClient::accepting(),
        Arc::new(TestPow),
        NodeConfig::default(),
    );

    let pubkey = pubkey_with_u64(77);
    let first = make_message(&pubkey, b"one");
    let second = make_message(&pubkey, b"two");
    store_when_ready(&node.handle, &first).await;
    node.handle.client_store(second.clone()).await.expect("store");

    let outcome = node
        .handle
        .client_retrieve(pubkey, first.hash.clone())
        .await
        .expect("retrieve");
    assert_eq!(outcome, RetrieveOutcome::Messages(vec![second]));
}
