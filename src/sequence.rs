//! Sequence numbers assigned to events by the event stream.

/// A monotonically increasing position in an event stream.
///
/// The first event ever appended to a stream is assigned sequence `1`.
/// Sequence `0` is reserved and means "before the beginning" -- no events
/// have been observed yet.
pub type Sequence = u64;
