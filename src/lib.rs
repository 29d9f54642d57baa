//! An embeddable event-sourcing client.
//!
//! Applications persist their history as an append-only sequence of domain
//! events in a remote, blob-like store (the [`stream::EventStream`]
//! collaborator) and maintain one or more in-memory materialized views (the
//! [`projection::Projection`]s held by a [`group::ProjectionGroup`]) kept in
//! lock-step with that sequence. [`wrapper::StreamWrapper`] is the
//! single-threaded coordinator binding the two together, plus an optional
//! [`cache::ProjectionCache`], into a consistent read/write engine with
//! optimistic-concurrency transactions and automatic rebase on conflict.
//!
//! Out of scope, by design: a multi-threaded façade serializing concurrent
//! client calls onto one wrapper instance; concrete storage drivers; event
//! serialization formats; migration tooling. This crate specifies and
//! implements only the coordinator and the contracts its collaborators must
//! satisfy -- see [`stream`], [`cache`] and [`projection`].
//!
//! [`memory`] ships reference in-memory implementations of both
//! collaborator contracts, used throughout this crate's own test suite and
//! suitable for prototyping against before wiring in a real store.

pub mod cache;
pub mod error;
pub mod group;
pub mod memory;
pub mod notify;
pub mod projection;
pub mod quarantine;
pub mod sequence;
pub mod stream;
pub mod transaction;
pub mod wrapper;

pub use cache::ProjectionCache;
pub use error::{AppendResult, WrapperError};
pub use group::{ProjectionGroup, Snapshot};
pub use projection::Projection;
pub use quarantine::{Quarantine, QuarantineEntry};
pub use sequence::Sequence;
pub use stream::EventStream;
pub use transaction::Transaction;
pub use wrapper::{StreamWrapper, StreamWrapperConfig};
