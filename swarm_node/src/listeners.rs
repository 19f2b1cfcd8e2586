// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Long-poll plumbing: retrievals that found nothing park a one-shot
//! continuation here and are woken by the next store for their pubkey.

use std::collections::HashMap;
use swarm_protocol::{Message, MsgPubkey};
use tokio::sync::oneshot;

/// What a parked retrieval is woken with.
#[derive(Debug, PartialEq, Eq)]
pub enum Notification {
    /// Freshly stored messages for the polled pubkey.
    Messages(Vec<Message>),
    /// A bulk store happened and the new message set is unknown;
    /// the client should issue a fresh retrieve.
    Reset,
}

/// Waiting retrieval continuations, per recipient pubkey. Continuations
/// are single-shot: a notify drains every waiter for that pubkey. A
/// receiver that has already been dropped (client went away) is skipped
/// without error.
#[derive(Default)]
pub struct ListenerRegistry {
    waiting: HashMap<MsgPubkey, Vec<oneshot::Sender<Notification>>>,
}

impl ListenerRegistry {
    /// Park a continuation for `pubkey`.
    pub fn register(&mut self, pubkey: MsgPubkey, listener: oneshot::Sender<Notification>) {
        let entry = self.waiting.entry(pubkey).or_default();
        entry.push(listener);
        trace!(
            "registered listener ({} waiter(s), {} pubkey(s) total)",
            entry.len(),
            self.waiting.len()
        );
    }

    /// Wake every waiter for `pubkey` with the given messages and
    /// forget them.
    pub fn notify(&mut self, pubkey: &MsgPubkey, messages: Vec<Message>) {
        if let Some(listeners) = self.waiting.remove(pubkey) {
            debug!("notifying {} listener(s) for {pubkey:?}", listeners.len());
            for listener in listeners {
                let _ = listener.send(Notification::Messages(messages.clone()));
            }
        }
    }

    /// Wake every waiter with a reset and clear the registry. Used
    /// after bulk stores, where working out which waiters got new
    /// messages is not worth it.
    pub fn reset_all(&mut self) {
        for (_pubkey, listeners) in self.waiting.drain() {
            for listener in listeners {
                let _ = listener.send(Notification::Reset);
            }
        }
    }

    /// Number of pubkeys with parked waiters.
    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    /// True when nobody is waiting.
    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }
}
