//! The projection contract consumed by the [`crate::group::ProjectionGroup`].

use async_trait::async_trait;

use crate::cache::ProjectionCache;
use crate::sequence::Sequence;

/// A deterministic fold of events into a state value.
///
/// `apply` must be pure and deterministic, and must tolerate being handed
/// events out of the order it would prefer, or gaps in that order: the
/// group guarantees strictly ascending sequence numbers across calls, but
/// makes no guarantee that every sequence is represented (a corrupt or
/// apply-rejected event is still "consumed" and does not retry).
///
/// `try_load`/`try_save` own their own (de)serialization format; this crate
/// never dictates one. Failure of either is always non-fatal to the
/// projection's caller.
#[async_trait]
pub trait Projection<Event>: Send + Sync + 'static {
    /// The materialized state this projection folds events into.
    type State: Clone + Send + Sync + 'static;

    /// The error produced when `apply` rejects an event.
    type Error: std::error::Error + Send + Sync + 'static;

    /// The state before any event has been applied.
    fn initial(&self) -> Self::State;

    /// Folds one event into `state`, producing the next state.
    fn apply(
        &self,
        state: Self::State,
        sequence: Sequence,
        event: &Event,
    ) -> Result<Self::State, Self::Error>;

    /// A stable identifier for this projection's snapshots, matching
    /// `[A-Za-z0-9-]+` with a trailing `-<version>` suffix. Bump the version
    /// suffix to invalidate every snapshot saved by a previous code version.
    fn full_name(&self) -> &str;

    /// Attempts to rehydrate `(state, sequence)` from `cache`. Returns
    /// `None` on any failure (missing snapshot, corrupt bytes, version
    /// mismatch baked into [`full_name`](Projection::full_name)); never
    /// fatal.
    async fn try_load(&self, cache: &dyn ProjectionCache) -> Option<(Self::State, Sequence)>;

    /// Attempts to persist `(state, sequence)` to `cache`. Returns `true` on
    /// success; a `false` return is logged by the caller and otherwise
    /// ignored.
    async fn try_save(&self, cache: &dyn ProjectionCache, state: &Self::State, sequence: Sequence) -> bool;
}

/// Checks that `name` matches the `full_name` convention documented on
/// [`Projection::full_name`]: one or more `[A-Za-z0-9-]` characters,
/// ending in a `-<version>` suffix where `<version>` is one or more ASCII
/// digits.
pub fn is_valid_full_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }

    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-')
    {
        return false;
    }

    match name.rsplit_once('-') {
        Some((prefix, version)) => !prefix.is_empty() && !version.is_empty() && version.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::is_valid_full_name;

    #[test]
    fn accepts_name_with_version_suffix() {
        assert!(is_valid_full_name("order-summary-1"));
        assert!(is_valid_full_name("OrderSummary-12"));
    }

    #[test]
    fn rejects_missing_or_malformed_version_suffix() {
        assert!(!is_valid_full_name("order-summary"));
        assert!(!is_valid_full_name("order-summary-"));
        assert!(!is_valid_full_name("-1"));
        assert!(!is_valid_full_name("order summary-1"));
        assert!(!is_valid_full_name(""));
    }
}
