use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::{
    collections::VecDeque,
    net::SocketAddr,
    time::{Duration, Instant},
};

use pfcp_wire::{Message, MessageType};

/// Responses sent recently, keyed by requester and request sequence number.
///
/// A request arriving again with the same sequence number from the same peer is a
/// retransmission. It is answered with the cached response instead of being handled twice.
#[derive(Debug)]
pub(crate) struct ResponseCache {
    ttl: Duration,
    inner: Mutex<Responses>,
}

#[derive(Debug, Default)]
struct Responses {
    by_request: FxHashMap<(SocketAddr, u32), (Instant, Message)>,
    /// Insertion order, oldest first.
    order: VecDeque<(Instant, SocketAddr, u32)>,
}

impl Responses {
    fn prune(&mut self, now: Instant, ttl: Duration) {
        while let Some(&(sent, peer, sequence)) = self.order.front() {
            if now.duration_since(sent) < ttl {
                break;
            }
            self.order.pop_front();
            // The entry may have been replaced by a newer response since.
            if self.by_request.get(&(peer, sequence)).is_some_and(|(at, _)| *at == sent) {
                self.by_request.remove(&(peer, sequence));
            }
        }
    }
}

impl ResponseCache {
    /// Creates a cache keeping responses for `ttl`, which should cover the retransmission
    /// window of the peers.
    pub(crate) fn new(ttl: Duration) -> Self {
        Self { ttl, inner: Mutex::default() }
    }

    pub(crate) fn insert(&self, peer: SocketAddr, response: Message) {
        let now = Instant::now();
        let sequence = response.sequence();

        let mut inner = self.inner.lock();
        inner.prune(now, self.ttl);
        inner.by_request.insert((peer, sequence), (now, response));
        inner.order.push_back((now, peer, sequence));
    }

    /// Returns the response already sent for the request `request_type` with `sequence` from
    /// `peer`, if it is still cached.
    pub(crate) fn get(
        &self,
        peer: SocketAddr,
        request_type: MessageType,
        sequence: u32,
    ) -> Option<Message> {
        let mut inner = self.inner.lock();
        inner.prune(Instant::now(), self.ttl);

        let (_, response) = inner.by_request.get(&(peer, sequence))?;
        (request_type.response_type() == Some(response.message_type())).then(|| response.clone())
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().by_request.len()
    }
}
