// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Swarm membership from this node's point of view: the current table,
//! the diff against the previous one, and the resulting events the
//! orchestrator acts on.

use std::collections::BTreeSet;
use swarm_protocol::{
    MsgPubkey, NodePubkey, NodeRecord, SwarmEvents, SwarmTable, INVALID_SWARM_ID,
};

/// Diff two consecutive swarm tables from the perspective of `me`.
pub fn derive_swarm_events(
    prior: &SwarmTable,
    new: &SwarmTable,
    me: &NodePubkey,
) -> SwarmEvents {
    let our_swarm_id = new
        .swarm_of_node(me)
        .map(|s| s.id)
        .unwrap_or(INVALID_SWARM_ID);
    let decommissioned = our_swarm_id == INVALID_SWARM_ID && prior.swarm_of_node(me).is_some();

    let prior_nodes: BTreeSet<&NodePubkey> =
        prior.all_nodes().map(|n| &n.pubkey_legacy).collect();
    let new_snodes: Vec<NodeRecord> = new
        .all_nodes()
        .filter(|n| !prior_nodes.contains(&n.pubkey_legacy))
        .cloned()
        .collect();

    let prior_ids: BTreeSet<u64> = prior.swarms().iter().map(|s| s.id).collect();
    let new_swarms: Vec<u64> = new
        .swarms()
        .iter()
        .map(|s| s.id)
        .filter(|id| !prior_ids.contains(id))
        .collect();

    SwarmEvents {
        our_swarm_id,
        decommissioned,
        new_snodes,
        new_swarms,
    }
}

/// Owns the current swarm table and answers every membership question
/// the orchestrator has. The first registry view is diffed against the
/// empty starting table, so a node restarting with data on disk treats
/// its whole swarm as newly seen and pushes everything it holds back
/// out to its peers.
pub struct SwarmTracker {
    our_pubkey: NodePubkey,
    table: SwarmTable,
    synced_once: bool,
}

impl SwarmTracker {
    /// A tracker that has not seen the registry yet.
    pub fn new(our_pubkey: NodePubkey) -> Self {
        Self {
            our_pubkey,
            table: SwarmTable::default(),
            synced_once: false,
        }
    }

    /// Swap in a fresh table, returning the derived events.
    pub fn update(&mut self, new_table: SwarmTable) -> SwarmEvents {
        if !self.synced_once {
            trace!("initialized our swarm view");
        }
        let events = derive_swarm_events(&self.table, &new_table, &self.our_pubkey);
        self.table = new_table;
        self.synced_once = true;
        events
    }

    /// The current table.
    pub fn table(&self) -> &SwarmTable {
        &self.table
    }

    /// True once the registry has been seen at least once.
    pub fn synced(&self) -> bool {
        self.synced_once
    }

    /// The id of the swarm we currently serve in.
    pub fn our_swarm_id(&self) -> Option<u64> {
        self.table.swarm_of_node(&self.our_pubkey).map(|s| s.id)
    }

    /// Our own registry record, while we are listed.
    pub fn our_record(&self) -> Option<&NodeRecord> {
        self.table
            .swarm_of_node(&self.our_pubkey)
            .and_then(|swarm| {
                swarm
                    .members
                    .iter()
                    .find(|m| m.pubkey_legacy == self.our_pubkey)
            })
    }

    /// Every member of our swarm, ourselves included, sorted.
    pub fn our_swarm_members(&self) -> Vec<NodeRecord> {
        self.table
            .swarm_of_node(&self.our_pubkey)
            .map(|s| s.members.clone())
            .unwrap_or_default()
    }

    /// The members we replicate to: our swarm minus ourselves.
    pub fn other_members(&self) -> Vec<NodeRecord> {
        self.table
            .swarm_of_node(&self.our_pubkey)
            .map(|s| {
                s.members
                    .iter()
                    .filter(|m| m.pubkey_legacy != self.our_pubkey)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether this recipient belongs to the swarm we serve in.
    pub fn is_pubkey_for_us(&self, pubkey: &MsgPubkey) -> bool {
        match (self.our_swarm_id(), self.table.swarm_for_pubkey(pubkey)) {
            (Some(ours), Some(owner)) => ours == owner.id,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use swarm_protocol::SwarmInfo;

    fn record(pk_byte: u8) -> NodeRecord {
        let mut key = [0u8; 32];
        key[0] = pk_byte;
        NodeRecord::new(
            NodePubkey::new(key),
            NodePubkey::new([10u8; 32]),
            NodePubkey::new([11u8; 32]),
            Ipv4Addr::new(10, 0, 0, pk_byte),
            22020,
        )
    }

    fn table(swarms: &[(u64, &[u8])]) -> SwarmTable {
        SwarmTable::new(
            swarms
                .iter()
                .map(|(id, members)| {
                    SwarmInfo::new(*id, members.iter().map(|b| record(*b)).collect())
                })
                .collect(),
        )
    }

    #[test]
    fn events_are_the_set_differences() {
        let me = record(1).pubkey_legacy;
        let prior = table(&[(10, &[1, 2]), (20, &[3])]);
        let new = table(&[(10, &[1, 2, 4]), (20, &[3]), (30, &[5])]);

        let events = derive_swarm_events(&prior, &new, &me);
        assert_eq!(events.our_swarm_id, 10);
        assert!(!events.decommissioned);
        let new_pks: Vec<u8> = events
            .new_snodes
            .iter()
            .map(|n| n.pubkey_legacy.as_bytes()[0])
            .collect();
        assert_eq!(new_pks, vec![4, 5]);
        assert_eq!(events.new_swarms, vec![30]);
    }

    #[test]
    fn decommission_is_present_before_and_absent_now() {
        let me = record(1).pubkey_legacy;
        let prior = table(&[(10, &[1, 2])]);
        let new = table(&[(10, &[2])]);
        let events = derive_swarm_events(&prior, &new, &me);
        assert!(events.decommissioned);
        assert_eq!(events.our_swarm_id, INVALID_SWARM_ID);

        // Never having been a member is not a decommission.
        let events = derive_swarm_events(&new, &new, &me);
        assert!(!events.decommissioned);
    }

    #[test]
    fn first_sync_diffs_against_the_empty_table() {
        let mut tracker = SwarmTracker::new(record(1).pubkey_legacy);
        assert!(!tracker.synced());

        // Everything in the first view counts as new, ourselves
        // included; the orchestrator filters self before pushing.
        let events = tracker.update(table(&[(10, &[1, 2])]));
        assert_eq!(events.our_swarm_id, 10);
        assert_eq!(events.new_snodes.len(), 2);
        assert_eq!(events.new_swarms, vec![10]);
        assert!(!events.decommissioned);

        // Later updates diff against the previous view.
        let events = tracker.update(table(&[(10, &[1, 2, 3])]));
        assert_eq!(events.new_snodes.len(), 1);
        assert!(events.new_swarms.is_empty());
    }

    #[test]
    fn membership_queries_exclude_self_where_needed() {
        let mut tracker = SwarmTracker::new(record(1).pubkey_legacy);
        let _ = tracker.update(table(&[(10, &[1, 2, 3])]));

        assert_eq!(tracker.our_swarm_id(), Some(10));
        assert_eq!(tracker.our_record().expect("listed").port, 22020);
        assert_eq!(tracker.our_swarm_members().len(), 3);
        let others = tracker.other_members();
        assert_eq!(others.len(), 2);
        assert!(others.iter().all(|n| n.pubkey_legacy != record(1).pubkey_legacy));
    }
}
