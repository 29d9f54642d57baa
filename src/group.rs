//! The reified projection group: an in-memory holder of one or more
//! [`Projection`]s sharing an event type but differing in state type.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::ProjectionCache;
use crate::projection::Projection;
use crate::sequence::Sequence;

type ErasedState = Arc<dyn Any + Send + Sync>;

/// Raised when a single projection's `apply` rejects an event.
#[derive(Debug, thiserror::Error)]
#[error("projection \"{projection}\" rejected the event at sequence {sequence}: {source}")]
pub struct ProjectionFailure {
    /// [`Projection::full_name`] of the projection that failed.
    pub projection: String,
    /// The sequence of the event that was rejected.
    pub sequence: Sequence,
    #[source]
    pub source: anyhow::Error,
}

/// Object-safe capability set a [`ProjectionGroup`] drives a registered
/// projection through: the dynamic-dispatch counterpart of [`Projection`]'s
/// statically-typed methods. Not implemented directly; obtained by
/// registering a [`Projection`] with [`ProjectionGroup::builder`].
#[async_trait]
trait ProjectionHandle<Event>: Send + Sync {
    fn full_name(&self) -> &str;
    /// Identifies this handle's *own* registered projection type `P`, not
    /// its state type: two distinct projections may well share a concrete
    /// `State` (two `i64` counters, two `bool` flags), and keying by state
    /// type would collide them into the same map entry.
    fn handle_type(&self) -> TypeId;
    fn initial_state(&self) -> ErasedState;
    fn apply(&self, state: &ErasedState, sequence: Sequence, event: &Event) -> Result<ErasedState, ProjectionFailure>;
    async fn try_load(&self, cache: &dyn ProjectionCache) -> Option<(ErasedState, Sequence)>;
    async fn try_save(&self, cache: &dyn ProjectionCache, state: &ErasedState, sequence: Sequence) -> bool;
}

struct Adapter<P, Event> {
    projection: P,
    _event: PhantomData<fn(Event)>,
}

#[async_trait]
impl<P, Event> ProjectionHandle<Event> for Adapter<P, Event>
where
    P: Projection<Event>,
    Event: Send + Sync + 'static,
{
    fn full_name(&self) -> &str {
        self.projection.full_name()
    }

    fn handle_type(&self) -> TypeId {
        TypeId::of::<P>()
    }

    fn initial_state(&self) -> ErasedState {
        Arc::new(self.projection.initial())
    }

    fn apply(&self, state: &ErasedState, sequence: Sequence, event: &Event) -> Result<ErasedState, ProjectionFailure> {
        let typed = state
            .downcast_ref::<P::State>()
            .expect("projection state type must match the handle it was registered under")
            .clone();

        let next = self
            .projection
            .apply(typed, sequence, event)
            .map_err(|error| ProjectionFailure {
                projection: self.projection.full_name().to_string(),
                sequence,
                source: anyhow::Error::new(error),
            })?;

        Ok(Arc::new(next))
    }

    async fn try_load(&self, cache: &dyn ProjectionCache) -> Option<(ErasedState, Sequence)> {
        let (state, sequence) = self.projection.try_load(cache).await?;
        Some((Arc::new(state) as ErasedState, sequence))
    }

    async fn try_save(&self, cache: &dyn ProjectionCache, state: &ErasedState, sequence: Sequence) -> bool {
        let typed = state
            .downcast_ref::<P::State>()
            .expect("projection state type must match the handle it was registered under")
            .clone();

        self.projection.try_save(cache, &typed, sequence).await
    }
}

/// Builds a [`ProjectionGroup`] from one or more [`Projection`]s.
pub struct ProjectionGroupBuilder<Event> {
    handles: Vec<Box<dyn ProjectionHandle<Event>>>,
}

impl<Event: Send + Sync + 'static> ProjectionGroupBuilder<Event> {
    /// Registers `projection` with the group under construction.
    pub fn with<P>(mut self, projection: P) -> Self
    where
        P: Projection<Event>,
    {
        self.handles.push(Box::new(Adapter {
            projection,
            _event: PhantomData,
        }));
        self
    }

    /// Finalizes the group. Every registered projection starts in its
    /// `initial()` state at sequence 0.
    pub fn build(self) -> ProjectionGroup<Event> {
        let handles = Arc::new(self.handles);
        let states = handles
            .iter()
            .map(|handle| (handle.handle_type(), handle.initial_state()))
            .collect();

        ProjectionGroup {
            handles,
            states,
            sequence: 0,
            possibly_inconsistent: false,
        }
    }
}

/// A read-only view over a [`ProjectionGroup`]'s current state, obtained via
/// [`ProjectionGroup::snapshot`] or [`crate::wrapper::StreamWrapper::current`].
///
/// Cheap to hold on to: every state inside is `Arc`-shared with the group it
/// was taken from, so a `Snapshot` remains valid (and unchanged) even as the
/// group continues to advance.
#[derive(Clone)]
pub struct Snapshot<Event> {
    states: HashMap<TypeId, ErasedState>,
    sequence: Sequence,
    possibly_inconsistent: bool,
    _event: PhantomData<fn(Event)>,
}

impl<Event> Snapshot<Event> {
    /// Returns the current state of the registered projection `P`, or
    /// `None` if `P` was never registered with the group this snapshot was
    /// taken from.
    pub fn state<P>(&self) -> Option<Arc<P::State>>
    where
        P: Projection<Event>,
    {
        self.states
            .get(&TypeId::of::<P>())
            .cloned()
            .and_then(|state| state.downcast::<P::State>().ok())
    }

    /// The group's logical sequence at the time this snapshot was taken.
    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    /// Whether the group was flagged possibly inconsistent at the time this
    /// snapshot was taken.
    pub fn is_possibly_inconsistent(&self) -> bool {
        self.possibly_inconsistent
    }
}

/// An in-memory holder of one or more [`Projection`]s sharing an event type,
/// tracking one logical sequence for the whole group.
///
/// Each projection's state is independently addressable by its concrete type
/// (see [`Snapshot::state`]) rather than folded into a single user-defined
/// composite, while the group still tracks one logical sequence shared by
/// every registered projection.
pub struct ProjectionGroup<Event> {
    handles: Arc<Vec<Box<dyn ProjectionHandle<Event>>>>,
    states: HashMap<TypeId, ErasedState>,
    sequence: Sequence,
    possibly_inconsistent: bool,
}

impl<Event: Send + Sync + 'static> ProjectionGroup<Event> {
    /// Starts building a group with no registered projections.
    pub fn builder() -> ProjectionGroupBuilder<Event> {
        ProjectionGroupBuilder { handles: Vec::new() }
    }

    /// The sequence of the last event successfully routed to every
    /// registered projection.
    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    /// Whether at least one projection has ever rejected an event since the
    /// group was last [`reset`](ProjectionGroup::reset).
    pub fn is_possibly_inconsistent(&self) -> bool {
        self.possibly_inconsistent
    }

    /// Sets the possibly-inconsistent flag. Sticky: cleared only by
    /// [`reset`](ProjectionGroup::reset) or a fresh
    /// [`try_load`](ProjectionGroup::try_load).
    pub fn set_possibly_inconsistent(&mut self) {
        self.possibly_inconsistent = true;
    }

    /// Takes a read-only [`Snapshot`] of the group's current state.
    pub fn snapshot(&self) -> Snapshot<Event> {
        Snapshot {
            states: self.states.clone(),
            sequence: self.sequence,
            possibly_inconsistent: self.possibly_inconsistent,
            _event: PhantomData,
        }
    }

    /// Advances the group by one event. Precondition: `sequence >
    /// self.sequence()`, enforced by callers (the wrapper never calls this
    /// out of order).
    ///
    /// Every registered projection is given the event, independently of
    /// whether any other projection fails: a failing projection's state is
    /// left unchanged (it will see the *next* event against its last good
    /// state), while every other projection still advances normally. The
    /// group's own sequence advances regardless of any individual failure
    /// -- the event is "consumed" either way. Returns one
    /// [`ProjectionFailure`] per projection that rejected the event.
    pub fn apply(&mut self, sequence: Sequence, event: &Event) -> Vec<ProjectionFailure> {
        let mut failures = Vec::new();

        for handle in self.handles.iter() {
            let current = self
                .states
                .get(&handle.handle_type())
                .expect("every registered handle has an entry in `states`");

            match handle.apply(current, sequence, event) {
                Ok(next) => {
                    self.states.insert(handle.handle_type(), next);
                }
                Err(failure) => failures.push(failure),
            }
        }

        self.sequence = sequence;
        if !failures.is_empty() {
            self.possibly_inconsistent = true;
        }

        failures
    }

    /// Dry-runs `events` against a clone of this group, starting at
    /// `base_sequence + 1`. Fails fast on the first projection rejection,
    /// leaving `self` untouched either way (the dry run only ever mutates
    /// its own clone).
    pub fn try_apply(&self, base_sequence: Sequence, events: &[Event]) -> Result<(), ProjectionFailure> {
        let mut trial = self.clone();

        for (offset, event) in events.iter().enumerate() {
            let sequence = base_sequence + 1 + offset as Sequence;
            let mut failures = trial.apply(sequence, event);
            if let Some(failure) = failures.drain(..).next() {
                return Err(failure);
            }
        }

        Ok(())
    }

    /// Returns every registered projection to its `initial()` state at
    /// sequence 0, and clears the possibly-inconsistent flag.
    pub fn reset(&mut self) {
        self.states = self
            .handles
            .iter()
            .map(|handle| (handle.handle_type(), handle.initial_state()))
            .collect();
        self.sequence = 0;
        self.possibly_inconsistent = false;
    }

    /// Attempts to rehydrate every registered projection from `cache`,
    /// atomically: either every projection reports a snapshot and they all
    /// agree on the same sequence, or the whole attempt fails and `self` is
    /// left completely untouched.
    pub async fn try_load(&mut self, cache: &dyn ProjectionCache) -> bool {
        if self.handles.is_empty() {
            return true;
        }

        let mut loaded = HashMap::with_capacity(self.handles.len());
        let mut common_sequence: Option<Sequence> = None;

        for handle in self.handles.iter() {
            let Some((state, sequence)) = handle.try_load(cache).await else {
                return false;
            };

            match common_sequence {
                None => common_sequence = Some(sequence),
                Some(expected) if expected != sequence => return false,
                Some(_) => {}
            }

            loaded.insert(handle.handle_type(), state);
        }

        self.states = loaded;
        self.sequence = common_sequence.unwrap_or(0);
        self.possibly_inconsistent = false;
        true
    }

    /// Attempts to persist every registered projection's current state to
    /// `cache`. Succeeds only if every projection saves successfully;
    /// never fatal either way.
    pub async fn try_save(&self, cache: &dyn ProjectionCache) -> bool {
        for handle in self.handles.iter() {
            let state = self
                .states
                .get(&handle.handle_type())
                .expect("every registered handle has an entry in `states`");

            if !handle.try_save(cache, state, self.sequence).await {
                return false;
            }
        }

        true
    }
}

impl<Event> Clone for ProjectionGroup<Event> {
    /// Cheap structural clone: the handle list is `Arc`-shared and every
    /// projection's state is an `Arc` clone, so only the mutable
    /// bookkeeping (sequence, possibly-inconsistent flag) is actually
    /// duplicated. Used to build [`crate::transaction::Transaction`]
    /// scratchpads and [`ProjectionGroup::try_apply`] dry runs.
    fn clone(&self) -> Self {
        Self {
            handles: Arc::clone(&self.handles),
            states: self.states.clone(),
            sequence: self.sequence,
            possibly_inconsistent: self.possibly_inconsistent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCache;

    #[derive(Debug, thiserror::Error)]
    #[error("negative counter")]
    struct NegativeCounter;

    struct Counter;

    #[async_trait]
    impl Projection<i64> for Counter {
        type State = i64;
        type Error = NegativeCounter;

        fn initial(&self) -> i64 {
            0
        }

        fn apply(&self, state: i64, _sequence: Sequence, event: &i64) -> Result<i64, NegativeCounter> {
            let next = state + event;
            if next < 0 {
                return Err(NegativeCounter);
            }
            Ok(next)
        }

        fn full_name(&self) -> &str {
            "counter-1"
        }

        async fn try_load(&self, cache: &dyn ProjectionCache) -> Option<(i64, Sequence)> {
            let blob = cache.load(self.full_name()).await.ok()??;
            let text = String::from_utf8(blob).ok()?;
            let (state, sequence) = text.split_once(':')?;
            Some((state.parse().ok()?, sequence.parse().ok()?))
        }

        async fn try_save(&self, cache: &dyn ProjectionCache, state: &i64, sequence: Sequence) -> bool {
            cache
                .save(self.full_name(), format!("{state}:{sequence}").into_bytes())
                .await
                .is_ok()
        }
    }

    struct AlwaysRejects;

    #[async_trait]
    impl Projection<i64> for AlwaysRejects {
        type State = ();
        type Error = NegativeCounter;

        fn initial(&self) {}

        fn apply(&self, _state: (), _sequence: Sequence, _event: &i64) -> Result<(), NegativeCounter> {
            Err(NegativeCounter)
        }

        fn full_name(&self) -> &str {
            "always-rejects-1"
        }

        async fn try_load(&self, _cache: &dyn ProjectionCache) -> Option<((), Sequence)> {
            None
        }

        async fn try_save(&self, _cache: &dyn ProjectionCache, _state: &(), _sequence: Sequence) -> bool {
            true
        }
    }

    // A second projection sharing `Counter`'s concrete `State` type (`i64`),
    // but a distinct `full_name` and fold: it tracks a running product
    // instead of a sum. Used to prove the group keys its state map by the
    // registered projection type, not its `State` type -- two projections
    // that happen to share a `State` must not collide.
    struct Doubler;

    #[async_trait]
    impl Projection<i64> for Doubler {
        type State = i64;
        type Error = NegativeCounter;

        fn initial(&self) -> i64 {
            1
        }

        fn apply(&self, state: i64, _sequence: Sequence, event: &i64) -> Result<i64, NegativeCounter> {
            Ok(state * event)
        }

        fn full_name(&self) -> &str {
            "doubler-1"
        }

        async fn try_load(&self, _cache: &dyn ProjectionCache) -> Option<(i64, Sequence)> {
            None
        }

        async fn try_save(&self, _cache: &dyn ProjectionCache, _state: &i64, _sequence: Sequence) -> bool {
            false
        }
    }

    #[test]
    fn two_projections_sharing_a_state_type_are_kept_independent() {
        let mut group = ProjectionGroup::<i64>::builder()
            .with(Counter)
            .with(Doubler)
            .build();

        // Distinct initial states despite the shared `i64` state type.
        assert_eq!(*group.snapshot().state::<Counter>().unwrap(), 0);
        assert_eq!(*group.snapshot().state::<Doubler>().unwrap(), 1);

        assert!(group.apply(1, &3).is_empty());
        assert!(group.apply(2, &4).is_empty());

        // Counter summed; Doubler multiplied -- neither overwrote the
        // other's map entry.
        assert_eq!(*group.snapshot().state::<Counter>().unwrap(), 7);
        assert_eq!(*group.snapshot().state::<Doubler>().unwrap(), 12);
    }

    // Both projections reject the same event: each must surface its own
    // `ProjectionFailure`, not just the first one encountered.
    struct AlwaysRejectsToo;

    #[async_trait]
    impl Projection<i64> for AlwaysRejectsToo {
        type State = ();
        type Error = NegativeCounter;

        fn initial(&self) {}

        fn apply(&self, _state: (), _sequence: Sequence, _event: &i64) -> Result<(), NegativeCounter> {
            Err(NegativeCounter)
        }

        fn full_name(&self) -> &str {
            "always-rejects-too-1"
        }

        async fn try_load(&self, _cache: &dyn ProjectionCache) -> Option<((), Sequence)> {
            None
        }

        async fn try_save(&self, _cache: &dyn ProjectionCache, _state: &(), _sequence: Sequence) -> bool {
            true
        }
    }

    #[test]
    fn apply_reports_one_failure_per_rejecting_projection() {
        let mut group = ProjectionGroup::<i64>::builder()
            .with(AlwaysRejects)
            .with(AlwaysRejectsToo)
            .build();

        let failures = group.apply(1, &10);

        assert_eq!(failures.len(), 2);
        let names: Vec<&str> = failures.iter().map(|f| f.projection.as_str()).collect();
        assert!(names.contains(&"always-rejects-1"));
        assert!(names.contains(&"always-rejects-too-1"));
    }

    #[test]
    fn apply_advances_sequence_and_folds_state() {
        let mut group = ProjectionGroup::<i64>::builder().with(Counter).build();

        assert!(group.apply(1, &10).is_empty());
        assert!(group.apply(2, &5).is_empty());

        assert_eq!(group.sequence(), 2);
        assert_eq!(*group.snapshot().state::<Counter>().unwrap(), 15);
        assert!(!group.is_possibly_inconsistent());
    }

    #[test]
    fn apply_failure_still_advances_sequence_and_flags_inconsistent() {
        let mut group = ProjectionGroup::<i64>::builder().with(Counter).build();

        let failures = group.apply(1, &-100);

        assert_eq!(failures.len(), 1);
        assert_eq!(group.sequence(), 1);
        assert!(group.is_possibly_inconsistent());
        // The rejecting projection's state is left unchanged.
        assert_eq!(*group.snapshot().state::<Counter>().unwrap(), 0);
    }

    #[test]
    fn one_projection_rejecting_does_not_stop_others_from_advancing() {
        let mut group = ProjectionGroup::<i64>::builder()
            .with(Counter)
            .with(AlwaysRejects)
            .build();

        let failures = group.apply(1, &10);

        assert_eq!(failures.len(), 1);
        assert_eq!(*group.snapshot().state::<Counter>().unwrap(), 10);
    }

    #[test]
    fn try_apply_dry_runs_without_mutating_self() {
        let group = ProjectionGroup::<i64>::builder().with(Counter).build();

        assert!(group.try_apply(0, &[10, -100]).is_err());
        // The real group is untouched by the failed dry run.
        assert_eq!(group.sequence(), 0);

        assert!(group.try_apply(0, &[10, 20]).is_ok());
        assert_eq!(group.sequence(), 0);
    }

    #[test]
    fn reset_returns_to_initial_state_and_clears_inconsistent_flag() {
        let mut group = ProjectionGroup::<i64>::builder().with(Counter).build();
        group.apply(1, &-100);
        assert!(group.is_possibly_inconsistent());

        group.reset();

        assert_eq!(group.sequence(), 0);
        assert!(!group.is_possibly_inconsistent());
        assert_eq!(*group.snapshot().state::<Counter>().unwrap(), 0);
    }

    #[tokio::test]
    async fn save_then_load_round_trips_state_and_sequence() {
        let cache = MemoryCache::new();
        let mut group = ProjectionGroup::<i64>::builder().with(Counter).build();
        group.apply(1, &7);
        group.apply(2, &3);

        assert!(group.try_save(&cache).await);

        let mut reloaded = ProjectionGroup::<i64>::builder().with(Counter).build();
        assert!(reloaded.try_load(&cache).await);

        assert_eq!(reloaded.sequence(), 2);
        assert_eq!(*reloaded.snapshot().state::<Counter>().unwrap(), 10);
    }

    #[tokio::test]
    async fn try_load_reports_failure_without_mutating_group_on_missing_snapshot() {
        let cache = MemoryCache::new();
        let mut group = ProjectionGroup::<i64>::builder().with(Counter).build();
        group.apply(1, &7);

        assert!(!group.try_load(&cache).await);
        // Left untouched: still at whatever it was before the failed load.
        assert_eq!(group.sequence(), 1);
    }

    #[test]
    fn clone_shares_state_but_duplicates_bookkeeping() {
        let mut group = ProjectionGroup::<i64>::builder().with(Counter).build();
        group.apply(1, &10);

        let mut clone = group.clone();
        clone.apply(2, &5);

        assert_eq!(group.sequence(), 1);
        assert_eq!(clone.sequence(), 2);
        assert_eq!(*group.snapshot().state::<Counter>().unwrap(), 10);
        assert_eq!(*clone.snapshot().state::<Counter>().unwrap(), 15);
    }
}
