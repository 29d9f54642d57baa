//! The transaction object: a trial scratchpad built from a clone of a
//! [`ProjectionGroup`] and a growable list of staged events.

use crate::group::{ProjectionFailure, ProjectionGroup, Snapshot};
use crate::projection::Projection;
use crate::sequence::Sequence;

/// A builder callback runs against a `Transaction`, staging events by
/// calling [`add`](Transaction::add). Each staged event is applied to an
/// internal clone of the projection group immediately, so the callback
/// observes the post-event state on its very next read.
pub struct Transaction<Event> {
    group: ProjectionGroup<Event>,
    events: Vec<Event>,
}

impl<Event: Send + Sync + 'static> Transaction<Event> {
    pub(crate) fn new(group: ProjectionGroup<Event>) -> Self {
        Self {
            group,
            events: Vec::new(),
        }
    }

    /// Applies `event` to the transaction's internal clone and stages it for
    /// append. Fails without staging the event if any registered projection
    /// rejects it.
    pub fn add(&mut self, event: Event) -> Result<(), ProjectionFailure> {
        let sequence = self.group.sequence() + 1;
        let mut failures = self.group.apply(sequence, &event);

        if let Some(failure) = failures.drain(..).next() {
            return Err(failure);
        }

        self.events.push(event);
        Ok(())
    }

    /// Reads the current state of registered projection `P`, reflecting
    /// every event staged so far.
    pub fn state<P>(&self) -> Option<std::sync::Arc<P::State>>
    where
        P: Projection<Event>,
    {
        self.group.snapshot().state::<P>()
    }

    /// A read-only snapshot reflecting every event staged so far.
    pub fn snapshot(&self) -> Snapshot<Event> {
        self.group.snapshot()
    }

    /// The events staged so far, in the order they were added.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Whether any event has been staged.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub(crate) fn into_events(self) -> Vec<Event> {
        self.events
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::cache::ProjectionCache;

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

        async fn try_load(&self, _cache: &dyn ProjectionCache) -> Option<(i64, Sequence)> {
            None
        }

        async fn try_save(&self, _cache: &dyn ProjectionCache, _state: &i64, _sequence: Sequence) -> bool {
            false
        }
    }

    #[test]
    fn add_applies_immediately_and_stages_the_event() {
        let group = ProjectionGroup::<i64>::builder().with(Counter).build();
        let mut tx = Transaction::new(group);

        assert!(tx.is_empty());
        tx.add(10).unwrap();
        assert_eq!(*tx.state::<Counter>().unwrap(), 10);

        tx.add(5).unwrap();
        assert_eq!(*tx.state::<Counter>().unwrap(), 15);

        assert_eq!(tx.events(), &[10, 5]);
        assert!(!tx.is_empty());
    }

    #[test]
    fn add_rejects_without_staging_on_projection_failure() {
        let group = ProjectionGroup::<i64>::builder().with(Counter).build();
        let mut tx = Transaction::new(group);

        tx.add(10).unwrap();
        assert!(tx.add(-100).is_err());

        // The rejected event was never staged, and state is unaffected.
        assert_eq!(tx.events(), &[10]);
        assert_eq!(*tx.state::<Counter>().unwrap(), 10);
    }

    #[test]
    fn into_events_returns_staged_events_in_order() {
        let group = ProjectionGroup::<i64>::builder().with(Counter).build();
        let mut tx = Transaction::new(group);
        tx.add(1).unwrap();
        tx.add(2).unwrap();
        tx.add(3).unwrap();

        assert_eq!(tx.into_events(), vec![1, 2, 3]);
    }
}
