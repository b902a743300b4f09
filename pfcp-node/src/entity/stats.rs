use std::sync::atomic::{AtomicUsize, Ordering};

/// Statistics for a PFCP entity.
/// These are shared between the receive loop, the liveness monitors and the entity handles.
#[derive(Debug, Default)]
pub struct EntityStats {
    /// Total bytes sent
    bytes_tx: AtomicUsize,
    /// Total bytes received
    bytes_rx: AtomicUsize,
    /// Datagrams received that could not be decoded
    decode_failures: AtomicUsize,
    /// Requests without a registered handler
    unhandled_messages: AtomicUsize,
    /// Handler invocations that returned an error
    handler_errors: AtomicUsize,
    /// Requests sent again after a timeout
    retransmissions: AtomicUsize,
    /// Retransmitted requests answered from the response cache
    duplicate_requests: AtomicUsize,
    /// Associations currently in the association table
    active_associations: AtomicUsize,
}

impl EntityStats {
    #[inline]
    pub(crate) fn increment_tx(&self, bytes: usize) {
        self.bytes_tx.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_rx(&self, bytes: usize) {
        self.bytes_rx.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_decode_failures(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_unhandled_messages(&self) {
        self.unhandled_messages.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_handler_errors(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_retransmissions(&self) {
        self.retransmissions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_duplicate_requests(&self) {
        self.duplicate_requests.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_active_associations(&self) {
        self.active_associations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn decrement_active_associations(&self) {
        self.active_associations.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn bytes_tx(&self) -> usize {
        self.bytes_tx.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn bytes_rx(&self) -> usize {
        self.bytes_rx.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn decode_failures(&self) -> usize {
        self.decode_failures.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn unhandled_messages(&self) -> usize {
        self.unhandled_messages.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn handler_errors(&self) -> usize {
        self.handler_errors.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn retransmissions(&self) -> usize {
        self.retransmissions.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn duplicate_requests(&self) -> usize {
        self.duplicate_requests.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn active_associations(&self) -> usize {
        self.active_associations.load(Ordering::Relaxed)
    }
}
