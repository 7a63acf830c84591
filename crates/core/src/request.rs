//! Tracking of in-flight `propose()` calls.

/// Opaque identifier for tracking client requests through the system.
///
/// The runner keeps a map of `RequestId` -> oneshot sender so `propose()`
/// callers can await the outcome while the state machine stays synchronous.
///
/// ```ignore
/// let request_id = RequestId::new(self.next_request_id.fetch_add(1, Ordering::Relaxed));
/// let (result_tx, result_rx) = oneshot::channel();
/// self.pending.insert(request_id, result_tx);
/// self.event_tx.send(Event::ProposalRequested { payload, priority, request_id }).await?;
///
/// // Later, on Action::EmitProposalResult { request_id, result }:
/// if let Some((_, tx)) = self.pending.remove(&request_id) {
///     let _ = tx.send(result);
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

impl RequestId {
    /// Create a new request ID.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req-{}", self.0)
    }
}
