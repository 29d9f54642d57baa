//! An in-memory [`EventStream`], backed by a shared `Vec` standing in for
//! the remote store.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::sequence::Sequence;
use crate::stream::{EventStream, Finalize};

/// Raised by [`MemoryStream::try_get_next`] for a sequence previously
/// marked with [`MemoryStream::corrupt`] -- a test hook simulating a
/// deserialization failure on an otherwise-ordinary slot.
#[derive(Debug, Error)]
#[error("event at sequence {0} could not be deserialized")]
pub struct MemoryStreamError(pub Sequence);

struct Local<E> {
    buffer: VecDeque<E>,
    sequence: Sequence,
    fetched_up_to: Sequence,
}

/// A reference [`EventStream`] implementation over a shared in-process
/// `Vec<Event>`. Cloning a `MemoryStream` is a cheap, shareable handle onto
/// the same remote backing store and local buffer (both held behind `Arc`).
pub struct MemoryStream<E> {
    remote: Arc<Mutex<Vec<E>>>,
    local: Arc<Mutex<Local<E>>>,
    corrupt: Arc<Mutex<HashSet<Sequence>>>,
}

impl<E> Clone for MemoryStream<E> {
    fn clone(&self) -> Self {
        Self {
            remote: Arc::clone(&self.remote),
            local: Arc::clone(&self.local),
            corrupt: Arc::clone(&self.corrupt),
        }
    }
}

impl<E: Clone + Send + Sync + 'static> Default for MemoryStream<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone + Send + Sync + 'static> MemoryStream<E> {
    /// Creates an empty stream.
    pub fn new() -> Self {
        Self {
            remote: Arc::new(Mutex::new(Vec::new())),
            local: Arc::new(Mutex::new(Local {
                buffer: VecDeque::new(),
                sequence: 0,
                fetched_up_to: 0,
            })),
            corrupt: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Appends directly to the remote backing store, bypassing any
    /// conflict check. Used by tests to simulate a second, concurrent
    /// writer racing the wrapper under test.
    pub fn seed(&self, events: impl IntoIterator<Item = E>) {
        self.remote.lock().unwrap().extend(events);
    }

    /// Marks `sequence` so that the next [`try_get_next`](EventStream::try_get_next)
    /// reaching it returns [`MemoryStreamError`] instead of the event,
    /// simulating a corrupt/undeserializable slot.
    pub fn corrupt(&self, sequence: Sequence) {
        self.corrupt.lock().unwrap().insert(sequence);
    }

    /// The number of events currently held by the remote backing store.
    pub fn remote_len(&self) -> Sequence {
        self.remote.lock().unwrap().len() as Sequence
    }

    /// Returns a new handle onto the same durable backing store, with its
    /// own local view reset to sequence 0. Models a fresh process
    /// connecting to the same durable stream after a restart: every event
    /// previously written through any handle is still there, but nothing is
    /// buffered or fetched yet from this handle's perspective.
    pub fn reconnect(&self) -> Self {
        Self {
            remote: Arc::clone(&self.remote),
            local: Arc::new(Mutex::new(Local {
                buffer: VecDeque::new(),
                sequence: 0,
                fetched_up_to: 0,
            })),
            corrupt: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}

#[async_trait]
impl<E: Clone + Send + Sync + 'static> EventStream for MemoryStream<E> {
    type Event = E;
    type Error = MemoryStreamError;

    fn try_get_next(&self) -> Result<Option<Self::Event>, Self::Error> {
        let mut local = self.local.lock().unwrap();

        let Some(event) = local.buffer.pop_front() else {
            return Ok(None);
        };

        local.sequence += 1;
        let sequence = local.sequence;

        if self.corrupt.lock().unwrap().remove(&sequence) {
            return Err(MemoryStreamError(sequence));
        }

        Ok(Some(event))
    }

    fn background_fetch(&self, cancel: CancellationToken) -> BoxFuture<'static, Finalize> {
        let remote = Arc::clone(&self.remote);
        let local = Arc::clone(&self.local);

        // The "network" half: snapshot whatever the remote currently
        // holds. `tokio::spawn` starts this running right now, on the
        // runtime, rather than when the returned future is first polled --
        // so a caller that does its own local catch-up work before
        // awaiting this future genuinely overlaps the two, matching a real
        // network fetch racing ahead of local CPU-bound draining.
        let fetch = tokio::spawn(async move {
            if cancel.is_cancelled() {
                return None;
            }

            Some(remote.lock().unwrap().clone())
        });

        Box::pin(async move {
            // The "finalize" half: integrate whatever the spawned task
            // captured into the local buffer. A cancelled or panicked
            // fetch finalizes to a no-op that reports no more upstream.
            let Ok(Some(snapshot)) = fetch.await else {
                return Box::new(|| false) as Finalize;
            };

            Box::new(move || {
                let mut local = local.lock().unwrap();
                let have = local.fetched_up_to as usize;

                if have < snapshot.len() {
                    local.buffer.extend(snapshot[have..].iter().cloned());
                    local.fetched_up_to = snapshot.len() as Sequence;
                }

                false
            }) as Finalize
        })
    }

    async fn discard_up_to(&self, sequence: Sequence, cancel: CancellationToken) -> Sequence {
        let remote_len = self.remote_len();

        if cancel.is_cancelled() {
            return remote_len;
        }

        let target = sequence.saturating_sub(1).min(remote_len);
        let mut local = self.local.lock().unwrap();
        local.sequence = target;
        local.fetched_up_to = target;
        local.buffer.clear();

        remote_len
    }

    async fn write(
        &self,
        events: Vec<Self::Event>,
        _cancel: CancellationToken,
    ) -> Result<Option<Sequence>, Self::Error> {
        let mut remote = self.remote.lock().unwrap();
        let known_tip = self.local.lock().unwrap().sequence;

        if remote.len() as Sequence != known_tip {
            return Ok(None);
        }

        remote.extend(events);
        Ok(Some(remote.len() as Sequence))
    }

    fn sequence(&self) -> Sequence {
        self.local.lock().unwrap().sequence
    }

    fn reset(&self) {
        let mut local = self.local.lock().unwrap();
        local.buffer.clear();
        local.sequence = 0;
        local.fetched_up_to = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn background_fetch_then_get_next_drains_remote() {
        let stream = MemoryStream::<&'static str>::new();
        stream.seed(["a", "b", "c"]);

        let cancel = CancellationToken::new();
        let finish = stream.background_fetch(cancel).await;
        assert!(!finish());

        assert_eq!(stream.try_get_next().unwrap(), Some("a"));
        assert_eq!(stream.try_get_next().unwrap(), Some("b"));
        assert_eq!(stream.try_get_next().unwrap(), Some("c"));
        assert_eq!(stream.try_get_next().unwrap(), None);
        assert_eq!(stream.sequence(), 3);
    }

    #[tokio::test]
    async fn write_conflicts_when_remote_outgrew_local_view() {
        let stream = MemoryStream::<&'static str>::new();
        stream.seed(["a"]);

        // Local view hasn't consumed "a" yet, so its known tip is still 0
        // while the remote already holds one event: a write must conflict.
        let cancel = CancellationToken::new();
        let result = stream.write(vec!["b"], cancel).await.unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn write_succeeds_once_local_view_matches_remote() {
        let stream = MemoryStream::<&'static str>::new();
        let cancel = CancellationToken::new();

        let result = stream.write(vec!["a", "b"], cancel).await.unwrap();
        assert_eq!(result, Some(2));
    }

    #[tokio::test]
    async fn corrupted_slot_surfaces_once_and_still_advances_sequence() {
        let stream = MemoryStream::<&'static str>::new();
        stream.seed(["a", "b"]);
        stream.corrupt(1);

        let cancel = CancellationToken::new();
        let finish = stream.background_fetch(cancel).await;
        finish();

        assert!(stream.try_get_next().is_err());
        assert_eq!(stream.sequence(), 1);
        assert_eq!(stream.try_get_next().unwrap(), Some("b"));
        assert_eq!(stream.sequence(), 2);
    }

    // The "network" half is started by `tokio::spawn` as soon as
    // `background_fetch` is called, not lazily when the returned future is
    // first polled -- so it keeps running (and doesn't panic or hang) even
    // if a caller abandons that future without ever polling it, exactly as
    // a real fetch racing ahead on the runtime would.
    #[tokio::test]
    async fn background_fetch_is_started_eagerly_not_on_first_poll() {
        let stream = MemoryStream::<&'static str>::new();
        stream.seed(["a"]);

        let cancel = CancellationToken::new();
        let fut = stream.background_fetch(cancel);
        drop(fut);

        tokio::task::yield_now().await;

        let finish = stream.background_fetch(CancellationToken::new()).await;
        finish();
        assert_eq!(stream.try_get_next().unwrap(), Some("a"));
    }
}
