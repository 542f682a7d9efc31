//! Bookkeeping of peers known to host models.

use std::sync::Mutex;

use libp2p::PeerId;

use crate::catalog::ContentAddress;

/// "This peer hosts the model at this content address." Equality is by
/// value of the pair, so the directory behaves as a true set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PeerRecord {
    pub peer: PeerId,
    pub address: ContentAddress,
}

/// Set of peer records, preserving insertion order. Mutated from multiple
/// notification tasks, hence the internal lock.
#[derive(Default)]
pub struct PeerDirectory {
    records: Mutex<Vec<PeerRecord>>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the pair if absent. Returns `true` when a record was inserted.
    pub fn add(&self, peer: PeerId, address: ContentAddress) -> bool {
        let record = PeerRecord { peer, address };
        let mut records = self.records.lock().expect("directory poisoned");
        if records.contains(&record) {
            return false;
        }
        records.push(record);
        true
    }

    /// Removes every record for the peer, atomically. Returns the number of
    /// records removed. Called on disconnect notifications.
    pub fn remove_all(&self, peer: &PeerId) -> usize {
        let mut records = self.records.lock().expect("directory poisoned");
        let before = records.len();
        records.retain(|r| r.peer != *peer);
        before - records.len()
    }

    /// Peers with a record for the address, in insertion order. Selection is
    /// first-match by design; no fairness across peers hosting the same
    /// model.
    pub fn peers_for(&self, address: &ContentAddress) -> Vec<PeerId> {
        self.records
            .lock()
            .expect("directory poisoned")
            .iter()
            .filter(|r| r.address == *address)
            .map(|r| r.peer)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("directory poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
