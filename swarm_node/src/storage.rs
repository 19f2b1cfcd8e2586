// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The message store seam. The node only ever talks to the
//! [`MessageStore`] trait; production deployments back it with a single
//! database file under the data dir, while [`MemoryStore`] serves tests
//! and embedded use.

use std::{
    collections::HashMap,
    sync::Mutex,
};
use swarm_protocol::{Message, MsgPubkey};
use thiserror::Error;

/// Storage failure. The node reports these to clients as a transient
/// database error.
#[derive(Debug, Error)]
#[error("message store failure: {0}")]
pub struct StoreError(pub String);

/// Persistent message storage, keyed by the content hash. Accessed only
/// from the node driver; implementations must serialize internally if
/// they are not single-threaded themselves.
pub trait MessageStore: Send + Sync {
    /// Insert a message. Returns `true` when the hash was not present
    /// before, `false` on a duplicate (which must leave state unchanged).
    fn store(&self, msg: &Message) -> Result<bool, StoreError>;

    /// Insert many messages, ignoring duplicates.
    fn bulk_store(&self, msgs: &[Message]) -> Result<(), StoreError>;

    /// Messages for `pubkey` stored after the message with hash
    /// `last_hash`, in insertion order, at most `limit`. An empty or
    /// unknown `last_hash` starts from the beginning.
    fn retrieve(
        &self,
        pubkey: &MsgPubkey,
        last_hash: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;

    /// Lookup by content hash.
    fn retrieve_by_hash(&self, hash: &str) -> Result<Option<Message>, StoreError>;

    /// Number of stored messages.
    fn count(&self) -> Result<u64, StoreError>;

    /// The i-th stored message in insertion order, if `i < count()`.
    fn retrieve_by_index(&self, index: u64) -> Result<Option<Message>, StoreError>;

    /// Every stored message, insertion order.
    fn retrieve_all(&self) -> Result<Vec<Message>, StoreError>;
}

#[derive(Default)]
struct Inner {
    // Insertion order drives both the retrieval cursor and the storage
    // test's index selection.
    messages: Vec<Message>,
    by_hash: HashMap<String, usize>,
}

/// In-memory [`MessageStore`]: insertion-ordered, duplicate-free on the
/// content hash.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every message whose expiry has passed. Not part of the
    /// store interface; embedders wire this to their own maintenance
    /// schedule. Returns how many messages were removed.
    pub fn purge_expired(&self, now_ms: u64) -> usize {
        let mut inner = self.lock();
        let before = inner.messages.len();
        inner.messages.retain(|m| m.expiry() > now_ms);
        let purged = before - inner.messages.len();
        if purged > 0 {
            let reindexed = inner
                .messages
                .iter()
                .enumerate()
                .map(|(i, m)| (m.hash.clone(), i))
                .collect();
            inner.by_hash = reindexed;
            debug!("purged {purged} expired message(s)");
        }
        purged
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Keep serving the data even if a writer panicked.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl MessageStore for MemoryStore {
    fn store(&self, msg: &Message) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        if inner.by_hash.contains_key(&msg.hash) {
            return Ok(false);
        }
        let idx = inner.messages.len();
        inner.by_hash.insert(msg.hash.clone(), idx);
        inner.messages.push(msg.clone());
        Ok(true)
    }

    fn bulk_store(&self, msgs: &[Message]) -> Result<(), StoreError> {
        for msg in msgs {
            let _ = self.store(msg)?;
        }
        Ok(())
    }

    fn retrieve(
        &self,
        pubkey: &MsgPubkey,
        last_hash: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let inner = self.lock();
        let start = if last_hash.is_empty() {
            0
        } else {
            // An unknown cursor restarts from the beginning, matching
            // the behaviour clients rely on after a reset.
            inner.by_hash.get(last_hash).map(|i| i + 1).unwrap_or(0)
        };
        Ok(inner.messages[start.min(inner.messages.len())..]
            .iter()
            .filter(|m| &m.pubkey == pubkey)
            .take(limit)
            .cloned()
            .collect())
    }

    fn retrieve_by_hash(&self, hash: &str) -> Result<Option<Message>, StoreError> {
        let inner = self.lock();
        Ok(inner.by_hash.get(hash).map(|&i| inner.messages[i].clone()))
    }

    fn count(&self) -> Result<u64, StoreError> {
        Ok(self.lock().messages.len() as u64)
    }

    fn retrieve_by_index(&self, index: u64) -> Result<Option<Message>, StoreError> {
        let inner = self.lock();
        Ok(inner.messages.get(index as usize).cloned())
    }

    fn retrieve_all(&self) -> Result<Vec<Message>, StoreError> {
        Ok(self.lock().messages.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn msg(pk_prefix: &str, hash: &str, timestamp: u64) -> Message {
        let pubkey = format!("{pk_prefix}{}", "0".repeat(MsgPubkey::HEX_LEN - pk_prefix.len()));
        Message {
            pubkey: MsgPubkey::new(pubkey).expect("valid"),
            data: Bytes::from(hash.as_bytes().to_vec()),
            hash: hash.to_owned(),
            ttl: 1000,
            timestamp,
            nonce: String::new(),
        }
    }

    #[test]
    fn duplicate_store_is_a_noop_returning_false() {
        let store = MemoryStore::new();
        assert!(store.store(&msg("05", "a", 1)).expect("store"));
        assert!(!store.store(&msg("05", "a", 1)).expect("store"));
        assert_eq!(store.count().expect("count"), 1);
    }

    #[test]
    fn retrieve_resumes_after_the_cursor() {
        let store = MemoryStore::new();
        for hash in ["a", "b", "c", "d"] {
            let _ = store.store(&msg("05", hash, 1)).expect("store");
        }
        let _ = store.store(&msg("06", "other", 1)).expect("store");

        let pk = msg("05", "x", 1).pubkey;
        let all = store.retrieve(&pk, "", usize::MAX).expect("retrieve");
        assert_eq!(all.len(), 4);

        let after_b = store.retrieve(&pk, "b", usize::MAX).expect("retrieve");
        let hashes: Vec<&str> = after_b.iter().map(|m| m.hash.as_str()).collect();
        assert_eq!(hashes, vec!["c", "d"]);

        // Unknown cursor starts over; limit caps the page.
        let paged = store.retrieve(&pk, "gone", 2).expect("retrieve");
        assert_eq!(paged.len(), 2);
        assert_eq!(paged[0].hash, "a");
    }

    #[test]
    fn index_lookup_follows_insertion_order() {
        let store = MemoryStore::new();
        let _ = store.store(&msg("05", "first", 1)).expect("store");
        let _ = store.store(&msg("05", "second", 1)).expect("store");
        assert_eq!(
            store.retrieve_by_index(1).expect("index").expect("some").hash,
            "second"
        );
        assert!(store.retrieve_by_index(2).expect("index").is_none());
    }

    #[test]
    fn purge_drops_only_expired_messages() {
        let store = MemoryStore::new();
        let _ = store.store(&msg("05", "old", 1_000)).expect("store"); // expires at 2000
        let _ = store.store(&msg("05", "new", 10_000)).expect("store");
        assert_eq!(store.purge_expired(5_000), 1);
        assert!(store.retrieve_by_hash("old").expect("get").is_none());
        assert_eq!(
            store.retrieve_by_index(0).expect("index").expect("some").hash,
            "new"
        );
    }
}
