//! The Stream Wrapper: the single-threaded coordinator that binds an event
//! stream, a reified projection group, and an optional snapshot cache into a
//! consistent read/write engine.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cache::ProjectionCache;
use crate::error::{AppendResult, RoundTripError, WrapperError};
use crate::group::{ProjectionGroup, Snapshot};
use crate::notify::RefreshNotifier;
use crate::quarantine::Quarantine;
use crate::sequence::Sequence;
use crate::stream::EventStream;
use crate::transaction::Transaction;

/// Tunables for a [`StreamWrapper`].
#[derive(Debug, Clone, Copy)]
pub struct StreamWrapperConfig {
    /// How many events must be applied during a single [`catch_up`](StreamWrapper::catch_up)
    /// call before a save/load cycle is triggered. `None`
    /// means "never" -- snapshotting is opt-in. Because the applied-event
    /// counter resets between `catch_up` invocations, this threshold
    /// practically only fires during the initial bulk catch-up of a cold
    /// stream, not during steady-state single-event appends.
    pub events_between_cache_saves: Option<u64>,
}

impl Default for StreamWrapperConfig {
    fn default() -> Self {
        Self {
            events_between_cache_saves: None,
        }
    }
}

/// Binds an [`EventStream`], a [`ProjectionGroup`] and an optional
/// [`ProjectionCache`] into a single coordinator.
///
/// Not `Sync` by contract even where the compiler would allow it: every
/// public method assumes exclusive, non-reentrant access: concurrent entry
/// into any wrapper operation is undefined. Upper layers are expected to
/// serialize calls onto a single task -- that façade is out of scope for
/// this crate.
pub struct StreamWrapper<S>
where
    S: EventStream,
{
    stream: S,
    group: ProjectionGroup<S::Event>,
    cache: Arc<dyn ProjectionCache>,
    quarantine: Quarantine<S::Event>,
    notifier: RefreshNotifier,
    config: StreamWrapperConfig,
    events_since_cache_cycle: u64,
}

impl<S> StreamWrapper<S>
where
    S: EventStream,
{
    /// Builds a wrapper from its three collaborators. Call
    /// [`initialize`](StreamWrapper::initialize) before using it: a freshly
    /// built wrapper has not yet loaded a snapshot or observed the stream.
    pub fn new(
        stream: S,
        group: ProjectionGroup<S::Event>,
        cache: Arc<dyn ProjectionCache>,
        config: StreamWrapperConfig,
    ) -> Self {
        Self {
            stream,
            group,
            cache,
            quarantine: Quarantine::new(),
            notifier: RefreshNotifier::new(),
            config,
            events_since_cache_cycle: 0,
        }
    }

    /// A read-only view of the current projection state. Safe to call
    /// concurrently with any in-flight wrapper operation: the returned
    /// [`Snapshot`] shares its state by `Arc` and is never mutated in place.
    pub fn current(&self) -> Snapshot<S::Event> {
        self.group.snapshot()
    }

    /// The sequence of the last event this wrapper's stream has observed
    /// locally, equivalently `stream.sequence()`.
    pub fn sequence(&self) -> Sequence {
        self.stream.sequence()
    }

    /// The configured save/load cycle threshold.
    pub fn events_between_cache_saves(&self) -> Option<u64> {
        self.config.events_between_cache_saves
    }

    /// The durable record of events skipped due to deserialization or
    /// apply failures.
    pub fn quarantine(&self) -> &Quarantine<S::Event> {
        &self.quarantine
    }

    /// Whether at least one caller is currently parked in
    /// [`wait_for_state`](StreamWrapper::wait_for_state).
    pub fn waiting_for_state(&self) -> bool {
        self.notifier.waiting()
    }

    /// Waits for the next moment this wrapper's state catches up to the
    /// stream tail. Resolves no earlier than the next such moment after the
    /// call was made; never resolves due to cancellation.
    pub async fn wait_for_state(&self) {
        self.notifier.wait().await;
    }

    /// Rewinds both the stream and the projection group to sequence 0 and
    /// initial state. The quarantine is an audit log, not working state, and
    /// survives a reset.
    pub fn reset(&mut self) {
        self.stream.reset();
        self.group.reset();
        self.events_since_cache_cycle = 0;
    }

    /// Manually triggers a snapshot save, bypassing the
    /// [`events_between_cache_saves`](StreamWrapperConfig) cadence. Returns
    /// `false` on failure; never fatal.
    pub async fn try_save(&self, cancel: CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }

        self.group.try_save(self.cache.as_ref()).await
    }

    /// Loads a snapshot (if any), fast-forwards the stream past it, and
    /// brings the projection group up to the stream tail.
    pub async fn initialize(&mut self, cancel: CancellationToken) -> Result<(), WrapperError> {
        let loaded = self.group.try_load(self.cache.as_ref()).await;

        if !loaded {
            #[cfg(feature = "tracing")]
            tracing::debug!("no usable projection snapshot found; starting from initial state");

            self.stream.reset();
            self.group.reset();
        }

        let max_known_sequence = self
            .stream
            .discard_up_to(self.group.sequence() + 1, cancel.clone())
            .await;

        if cancel.is_cancelled() {
            return Err(WrapperError::Cancelled);
        }

        if max_known_sequence < self.group.sequence() {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                snapshot_sequence = self.group.sequence(),
                store_sequence = max_known_sequence,
                "projection snapshot is ahead of the event store; discarding it and replaying from the beginning"
            );

            self.stream.reset();
            self.group.reset();
        }

        self.catch_up(cancel).await
    }

    /// Brings the projection group up to the stream's latest known
    /// sequence, then up to the remote tail, overlapping a background
    /// fetch with local application on every iteration. Fires the refresh
    /// notifier on successful completion.
    pub async fn catch_up(&mut self, cancel: CancellationToken) -> Result<(), WrapperError> {
        loop {
            if cancel.is_cancelled() {
                return Err(WrapperError::Cancelled);
            }

            let fetch_task = self.stream.background_fetch(cancel.clone());

            self.drain_local_buffer();

            if let Some(threshold) = self.config.events_between_cache_saves {
                if self.events_since_cache_cycle >= threshold {
                    self.save_load_cycle(cancel.clone()).await?;
                    self.events_since_cache_cycle = 0;
                }
            }

            let finish_fetch = fetch_task.await;

            if cancel.is_cancelled() {
                return Err(WrapperError::Cancelled);
            }

            // Integrate whatever this fetch delivered and drain it
            // immediately: otherwise a fetch that both delivers a final
            // batch and reports "no more upstream" would leave that batch
            // stranded in the local buffer until some later catch-up call
            // happened to drain it, breaking the guarantee that
            // group.sequence equals stream.sequence once catch_up returns.
            let more_upstream = finish_fetch();
            self.drain_local_buffer();

            if let Some(threshold) = self.config.events_between_cache_saves {
                if self.events_since_cache_cycle >= threshold {
                    self.save_load_cycle(cancel.clone()).await?;
                    self.events_since_cache_cycle = 0;
                }
            }

            if !more_upstream {
                break;
            }
        }

        self.events_since_cache_cycle = 0;
        self.notifier.notify();
        Ok(())
    }

    /// Drains whatever the stream currently has buffered locally, applying
    /// each event to the group in order. Corrupt events and rejected
    /// applies are quarantined rather than propagated.
    fn drain_local_buffer(&mut self) {
        loop {
            match self.stream.try_get_next() {
                Ok(None) => break,
                Ok(Some(event)) => {
                    let sequence = self.stream.sequence();

                    if sequence <= self.group.sequence() {
                        // Already covered by a loaded snapshot; discard.
                        continue;
                    }

                    let failures = self.group.apply(sequence, &event);
                    self.events_since_cache_cycle += 1;

                    // One quarantine entry per rejecting projection: each
                    // entry owns its own copy of the event, since the
                    // quarantine outlives this loop iteration.
                    for failure in failures {
                        #[cfg(feature = "tracing")]
                        tracing::error!(
                            sequence,
                            error = %failure,
                            "projection rejected event; quarantining"
                        );

                        self.quarantine
                            .record(sequence, Some(event.clone()), anyhow::Error::new(failure));
                    }
                }
                Err(error) => {
                    let sequence = self.stream.sequence();

                    #[cfg(feature = "tracing")]
                    tracing::error!(sequence, %error, "failed to deserialize event; quarantining");

                    self.group.set_possibly_inconsistent();
                    self.quarantine
                        .record(sequence, None, anyhow::Error::new(error));
                }
            }
        }
    }

    /// Save/load cycle run inside [`catch_up`](StreamWrapper::catch_up) once
    /// the applied-event counter crosses the configured threshold. A failed
    /// save is advisory and skipped silently (beyond logging); a save that
    /// does not round-trip is a fatal invariant violation.
    async fn save_load_cycle(&mut self, cancel: CancellationToken) -> Result<(), WrapperError> {
        let saved = self.group.try_save(self.cache.as_ref()).await;

        if !saved {
            #[cfg(feature = "tracing")]
            tracing::warn!("projection snapshot save failed; skipping cache cycle");
            return Ok(());
        }

        if cancel.is_cancelled() {
            return Err(WrapperError::Cancelled);
        }

        let expected_sequence = self.stream.sequence();

        self.group.reset();
        self.group.try_load(self.cache.as_ref()).await;

        if self.group.sequence() != expected_sequence {
            return Err(WrapperError::Fatal(RoundTripError {
                saved: expected_sequence,
                reloaded: self.group.sequence(),
            }));
        }

        Ok(())
    }

    /// Builds a candidate batch of events against the current state,
    /// pre-flight validates it against a clone, then optimistically
    /// appends; on conflict, catches up and re-runs the builder against the
    /// now-current state.
    ///
    /// `builder` may be invoked more than once (once per retry), so it must
    /// be `Fn`, not `FnOnce`. Errors from `builder` are propagated unchanged
    /// and never logged; cancellation likewise. Any other failure is logged
    /// then propagated.
    pub async fn append_events<B, R>(
        &mut self,
        builder: B,
        cancel: CancellationToken,
    ) -> Result<AppendResult<R>, WrapperError>
    where
        B: Fn(&Snapshot<S::Event>) -> anyhow::Result<(Vec<S::Event>, R)>,
    {
        loop {
            if cancel.is_cancelled() {
                return Err(WrapperError::Cancelled);
            }

            let snapshot = self.group.snapshot();
            let (events, user_result) = builder(&snapshot).map_err(WrapperError::builder)?;

            if events.is_empty() {
                return Ok(AppendResult {
                    added: 0,
                    end_sequence: None,
                    result: user_result,
                });
            }

            self.group.try_apply(self.stream.sequence(), &events)?;

            let added = events.len();
            let written = self.stream.write(events, cancel.clone()).await.map_err(|error| {
                #[cfg(feature = "tracing")]
                tracing::error!(%error, "event stream write failed");
                WrapperError::Other(anyhow::Error::new(error))
            })?;

            match written {
                None => {
                    self.catch_up(cancel.clone()).await?;
                    continue;
                }
                Some(end_sequence) => {
                    self.catch_up(cancel.clone()).await?;
                    return Ok(AppendResult {
                        added,
                        end_sequence: Some(end_sequence),
                        result: user_result,
                    });
                }
            }
        }
    }

    /// Runs `builder` against a [`Transaction`] scratchpad cloned from the
    /// current group, optimistically appending whatever it staged. Because
    /// the clone is taken fresh on every retry, each retry observes any
    /// events a concurrent writer appended in the meantime.
    pub async fn transaction<B, R>(
        &mut self,
        builder: B,
        cancel: CancellationToken,
    ) -> Result<AppendResult<R>, WrapperError>
    where
        B: Fn(&mut Transaction<S::Event>) -> anyhow::Result<R>,
    {
        loop {
            if cancel.is_cancelled() {
                return Err(WrapperError::Cancelled);
            }

            let mut tx = Transaction::new(self.group.clone());
            let user_result = builder(&mut tx).map_err(WrapperError::builder)?;

            if tx.is_empty() {
                return Ok(AppendResult {
                    added: 0,
                    end_sequence: None,
                    result: user_result,
                });
            }

            let events = tx.into_events();
            let added = events.len();

            let written = self.stream.write(events, cancel.clone()).await.map_err(|error| {
                #[cfg(feature = "tracing")]
                tracing::error!(%error, "event stream write failed");
                WrapperError::Other(anyhow::Error::new(error))
            })?;

            match written {
                None => {
                    self.catch_up(cancel.clone()).await?;
                    continue;
                }
                Some(end_sequence) => {
                    self.catch_up(cancel.clone()).await?;
                    return Ok(AppendResult {
                        added,
                        end_sequence: Some(end_sequence),
                        result: user_result,
                    });
                }
            }
        }
    }
}
