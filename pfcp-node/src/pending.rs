use parking_lot::Mutex;
use rand::Rng;
use rustc_hash::FxHashMap;
use std::{
    net::SocketAddr,
    sync::atomic::{AtomicU32, Ordering},
    time::{Duration, Instant},
};
use tokio::sync::oneshot;

use pfcp_common::constants::MAX_SEQUENCE;
use pfcp_wire::Message;

/// Outbound requests waiting for their response, keyed by sequence number.
#[derive(Debug)]
pub(crate) struct PendingRequests {
    /// Sequence counter for outgoing requests. Only the low 24 bits are used on the wire.
    sequence: AtomicU32,
    requests: Mutex<FxHashMap<u32, PendingRequest>>,
}

#[derive(Debug)]
struct PendingRequest {
    peer: SocketAddr,
    start: Instant,
    sender: oneshot::Sender<Message>,
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self {
            sequence: AtomicU32::new(rand::thread_rng().gen_range(0..=MAX_SEQUENCE)),
            requests: Mutex::default(),
        }
    }
}

impl PendingRequests {
    pub(crate) fn next_sequence(&self) -> u32 {
        self.sequence.fetch_add(1, Ordering::Relaxed) & MAX_SEQUENCE
    }

    /// Registers a request sent to `peer`. The returned receiver resolves with the first
    /// response carrying the same sequence number from the same peer.
    pub(crate) fn register(&self, sequence: u32, peer: SocketAddr) -> oneshot::Receiver<Message> {
        let (sender, receiver) = oneshot::channel();
        let start = Instant::now();
        self.requests.lock().insert(sequence, PendingRequest { peer, start, sender });
        receiver
    }

    /// Hands a response to its waiting request. Returns the round trip time, or `None` if no
    /// request from `peer` is waiting on that sequence number.
    pub(crate) fn complete(&self, peer: SocketAddr, response: Message) -> Option<Duration> {
        let mut requests = self.requests.lock();
        let sequence = response.sequence();
        if requests.get(&sequence)?.peer != peer {
            return None;
        }

        let pending = requests.remove(&sequence)?;
        let rtt = pending.start.elapsed();
        let _ = pending.sender.send(response);
        Some(rtt)
    }

    pub(crate) fn remove(&self, sequence: u32) {
        self.requests.lock().remove(&sequence);
    }

    /// Drops every pending request. Waiting callers observe a closed channel.
    pub(crate) fn clear(&self) {
        self.requests.lock().clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.requests.lock().len()
    }
}

/// Removes a pending request when the waiting caller goes away, whether it got its response,
/// timed out or was cancelled.
pub(crate) struct PendingGuard<'a> {
    pub(crate) pending: &'a PendingRequests,
    pub(crate) sequence: u32,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.sequence);
    }
}
