//! The event stream collaborator contract.

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::sequence::Sequence;

/// Resolves the "start" half of [`EventStream::background_fetch`] into its
/// "finalize" half.
///
/// Invoking the closure (a) integrates whatever was fetched into the
/// stream's local buffer and (b) returns `true` iff more events may still be
/// available upstream (the fetch did not reach the tail). Splitting fetch
/// into start + finalize lets a caller overlap CPU-bound catch-up work with
/// I/O-bound fetching.
pub type Finalize = Box<dyn FnOnce() -> bool + Send>;

/// A sequence-numbered append log with background prefetch and optimistic
/// write, consumed by [`crate::wrapper::StreamWrapper`].
///
/// Every method takes `&self`: implementations are expected to use interior
/// mutability (an `Arc<Mutex<..>>`-style local buffer), since the stream may
/// be cloned and shared, and because [`background_fetch`](EventStream::background_fetch)
/// needs to keep mutating the stream's local buffer from a spawned task
/// concurrently with the caller draining it via
/// [`try_get_next`](EventStream::try_get_next).
#[async_trait]
pub trait EventStream: Send + Sync {
    /// The domain event type this stream carries. Opaque to the stream
    /// itself; never inspected, only stored and returned. `Clone` is
    /// required because a copy must sometimes be retained independently of
    /// the original: once per rejecting projection in the quarantine, and
    /// again across a conflict-triggered retry of an append/transaction
    /// builder.
    type Event: Clone + Send + Sync;

    /// The error a deserialization or I/O failure surfaces as.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns the next locally buffered event, advancing
    /// [`sequence`](EventStream::sequence) by one, or `Ok(None)` if the
    /// local buffer is currently empty.
    ///
    /// Implementations must advance their sequence counter even when
    /// returning `Err` (the slot is consumed either way).
    fn try_get_next(&self) -> Result<Option<Self::Event>, Self::Error>;

    /// Starts a background fetch from the upstream store. The fetch itself
    /// begins concurrently with the returned future (e.g. on a spawned
    /// task), not when that future is polled, so that a caller can overlap
    /// I/O-bound fetching with its own CPU-bound catch-up work.
    fn background_fetch(&self, cancel: CancellationToken) -> BoxFuture<'static, Finalize>;

    /// Fast-forwards the local view past `sequence - 1` without delivering
    /// those events to a caller, returning the highest sequence the store is
    /// aware of. Used once, right after a snapshot load.
    async fn discard_up_to(&self, sequence: Sequence, cancel: CancellationToken) -> Sequence;

    /// Optimistically appends `events`. On success, returns the sequence of
    /// the last appended event. On conflict (the store has grown since this
    /// stream's last read), returns `Ok(None)` -- the caller must catch up
    /// and retry. Non-retriable failures are returned as `Err`.
    async fn write(
        &self,
        events: Vec<Self::Event>,
        cancel: CancellationToken,
    ) -> Result<Option<Sequence>, Self::Error>;

    /// The sequence of the last event this stream has observed locally,
    /// whether or not it has been delivered via
    /// [`try_get_next`](EventStream::try_get_next).
    fn sequence(&self) -> Sequence;

    /// Clears local state and sequence, forcing a fresh fetch from the
    /// beginning on the next [`background_fetch`](EventStream::background_fetch).
    fn reset(&self);
}
