//! Correlates request packets with their responses and bounds each
//! exchange with a deadline.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use libp2p::PeerId;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::NetworkError;
use crate::packet::Packet;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

struct Pending {
    target: PeerId,
    reply_tx: oneshot::Sender<Result<Packet, NetworkError>>,
}

/// Tracks in-flight correlated requests. An entry exists only between
/// `start` and its completion or timeout; whichever fires first takes the
/// entry out of the map under the lock, so delivery is exactly-once and a
/// timeout wins a concurrent race.
pub struct RequestCorrelator {
    timeout: Duration,
    pending: Arc<Mutex<HashMap<String, Pending>>>,
}

impl RequestCorrelator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Allocates a fresh request id, registers the pending entry and arms
    /// its timer. The returned handle resolves to the response packet, or
    /// to `NetworkError::Timeout` if none arrives before the deadline.
    pub fn start(&self, target: PeerId) -> PendingHandle {
        let request_id = Uuid::new_v4().to_string();
        let (reply_tx, reply_rx) = oneshot::channel();

        {
            let mut pending = self.pending.lock().expect("pending map poisoned");
            pending.insert(request_id.clone(), Pending { target, reply_tx });
        }

        let map = Arc::clone(&self.pending);
        let id = request_id.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let expired = map.lock().expect("pending map poisoned").remove(&id);
            if let Some(entry) = expired {
                tracing::warn!(request_id = %id, target = %entry.target, "request timed out");
                let _ = entry.reply_tx.send(Err(NetworkError::Timeout(timeout)));
            }
        });

        PendingHandle {
            request_id,
            timeout,
            reply_rx,
        }
    }

    /// Delivers a response to the waiter. Idempotent: returns `false` when
    /// the id is unknown or already completed/expired, in which case the
    /// packet is ignored.
    pub fn complete(&self, request_id: &str, packet: Packet) -> bool {
        let entry = self
            .pending
            .lock()
            .expect("pending map poisoned")
            .remove(request_id);
        match entry {
            Some(entry) => {
                let _ = entry.reply_tx.send(Ok(packet));
                true
            }
            None => false,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("pending map poisoned").len()
    }
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}

pub struct PendingHandle {
    request_id: String,
    timeout: Duration,
    reply_rx: oneshot::Receiver<Result<Packet, NetworkError>>,
}

impl PendingHandle {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub async fn wait(self) -> Result<Packet, NetworkError> {
        match self.reply_rx.await {
            Ok(result) => result,
            // The correlator itself was dropped; nothing can answer anymore.
            Err(_) => Err(NetworkError::Timeout(self.timeout)),
        }
    }
}
