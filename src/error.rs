//! Errors surfaced by [`crate::wrapper::StreamWrapper`] and the result type
//! of its append/transaction paths.

use thiserror::Error;

use crate::group::ProjectionFailure;
use crate::sequence::Sequence;

/// Raised when a save/load round-trip inside a save/load cycle comes back
/// at a different sequence than the one just saved. This is the one
/// failure mode the wrapper treats as fatal: anything else is either
/// recoverable (quarantine the event and move on) or advisory (skip the
/// cache cycle and keep running).
#[derive(Debug, Error)]
#[error(
    "projection snapshot did not round-trip: saved at sequence {saved}, \
     reloaded at sequence {reloaded}"
)]
pub struct RoundTripError {
    /// The sequence the group was at when [`try_save`](crate::group::ProjectionGroup::try_save) ran.
    pub saved: Sequence,
    /// The sequence observed immediately after the following `reset` + `try_load`.
    pub reloaded: Sequence,
}

/// Errors that can escape a [`crate::wrapper::StreamWrapper`] public method.
#[derive(Debug, Error)]
pub enum WrapperError {
    /// The caller's cancellation token fired mid-operation. Never logged:
    /// the caller asked for this.
    #[error("operation cancelled")]
    Cancelled,

    /// A registered projection rejected an event during the pre-flight
    /// dry run ([`append_events`](crate::wrapper::StreamWrapper::append_events))
    /// or while staging a transaction event
    /// ([`crate::transaction::Transaction::add`]). The run is not retried:
    /// the caller's builder produced an event that does not fit the current
    /// state.
    #[error(transparent)]
    RejectedEvent(#[from] ProjectionFailure),

    /// The user-supplied builder closure itself returned an error.
    /// Propagated unchanged and never logged -- the caller already knows
    /// why its own closure failed.
    #[error(transparent)]
    Builder(anyhow::Error),

    /// A save/load cycle's round trip failed; see [`RoundTripError`]. The
    /// run is broken and must not continue silently.
    #[error(transparent)]
    Fatal(#[from] RoundTripError),

    /// Any other failure from the stream or cache collaborators (a
    /// non-retriable write error, for instance). Logged, then propagated.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WrapperError {
    /// Wraps an error returned by the caller's append/transaction builder.
    pub fn builder(error: impl Into<anyhow::Error>) -> Self {
        WrapperError::Builder(error.into())
    }
}

/// Outcome of [`StreamWrapper::append_events`](crate::wrapper::StreamWrapper::append_events)
/// or [`StreamWrapper::transaction`](crate::wrapper::StreamWrapper::transaction).
#[derive(Debug, Clone)]
pub struct AppendResult<R> {
    /// How many events were actually appended (`0` if the builder staged
    /// nothing -- a no-op success, not an error).
    pub added: usize,
    /// The sequence of the last appended event, or `None` if `added == 0`.
    pub end_sequence: Option<Sequence>,
    /// The value returned by the caller's builder callback.
    pub result: R,
}
