//! Durable, operator-inspectable record of events that could not be
//! deserialized or applied.

use crate::sequence::Sequence;

/// A single skipped event: either it failed to deserialize (in which case
/// `event` is `None`), or it deserialized but at least one projection's
/// `apply` rejected it (in which case `event` is the offending payload).
#[derive(Debug)]
pub struct QuarantineEntry<Event> {
    /// The sequence at which the failure occurred.
    pub sequence: Sequence,
    /// The event payload, if it was successfully deserialized.
    pub event: Option<Event>,
    /// The cause of the failure.
    pub error: anyhow::Error,
}

/// An append-only list of [`QuarantineEntry`] values.
///
/// Grows without bound for the lifetime of a [`crate::wrapper::StreamWrapper`];
/// it is the durable record referenced by the "every gap is explained by
/// exactly one quarantine entry" invariant, and survives
/// [`StreamWrapper::reset`](crate::wrapper::StreamWrapper::reset) since it is
/// an audit log, not working state.
#[derive(Debug)]
pub struct Quarantine<Event> {
    entries: Vec<QuarantineEntry<Event>>,
}

impl<Event> Default for Quarantine<Event> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<Event> Quarantine<Event> {
    /// Creates an empty quarantine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new entry.
    pub fn record(&mut self, sequence: Sequence, event: Option<Event>, error: anyhow::Error) {
        self.entries.push(QuarantineEntry {
            sequence,
            event,
            error,
        });
    }

    /// Returns all recorded entries, oldest first.
    pub fn entries(&self) -> &[QuarantineEntry<Event>] {
        &self.entries
    }

    /// Returns `true` if no event has ever been quarantined.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the number of quarantined entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
