//! At-least-once delivery queues over interchangeable storage engines.
//!
//! Every engine implements the same [Queue] contract. A consumer that calls [Queue::take] receives
//! a message that is hidden from all other consumers (moved to "ephemeral" storage) until it is
//! either acknowledged with [Queue::finish] or returned with [Queue::requeue]. Messages that stay
//! in flight longer than expected can be listed with [Queue::orphans] and recovered explicitly
//! with [Queue::move_to_queue]. Nothing in this crate recovers orphans on its own: a slow consumer
//! may still be working on them.
//!
//! # Lifecycle
//!
//! ```text
//!            queue/requeue            take
//!   (new) ---------------> Visible ----------> InFlight ----------> Gone
//!                             ^                   |        finish
//!                             |                   |
//!                             +-------------------+
//!                        requeue / requeue_silent / move_to_queue
//! ```
//!
//! # Engines
//!
//! - [memory::Memory]: a deque guarded by a mutex, optionally bounded.
//! - [ring::Ring]: a fixed-capacity circular buffer with independent put-side and take-side locks.
//! - [embedded::Embedded]: a durable engine over an embedded ordered key-value store with a
//!   persisted read cursor.
//! - [relational::Relational]: a single-table SQL engine that claims rows optimistically and
//!   retries on lock contention.
//! - [broker::BrokerQueue]: an adapter over an external broker client (see [broker::Broker]).
//!
//! # Status
//!
//! `quay-queue` is **ALPHA** software and is not yet recommended for production use. Developers
//! should expect breaking changes and occasional instability.

use std::time::Duration;
use thiserror::Error;

pub mod broker;
pub mod codec;
pub mod embedded;
pub mod ephemeral;
pub mod factory;
pub mod id;
pub mod memory;
mod message;
pub mod metrics;
pub mod relational;
pub mod ring;
mod time;

#[cfg(test)]
mod conformance;

pub use id::{Generator, Id, StringId};
pub use message::Message;

/// Errors that can occur when interacting with a [Queue].
#[derive(Debug, Error)]
pub enum Error {
    /// The main store is bounded and at capacity. Retrying later is safe.
    #[error("queue full")]
    QueueFull,
    /// The in-flight store is bounded and at capacity. The pending message stays visible.
    #[error("ephemeral storage full")]
    EphemeralFull,
    /// The engine does not support the operation. Retrying will not help.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
    /// Storage contention persisted after every configured retry.
    #[error("conflict retries exhausted: {op} failed after {attempts} attempts")]
    ConflictExhausted { op: &'static str, attempts: usize },
    #[error("codec error: {0}")]
    Codec(#[from] commonware_codec::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("embedded store error: {0}")]
    Embedded(#[from] redb::Error),
    #[error("sql error: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("broker error: {0}")]
    Broker(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The operations every engine provides.
///
/// Calls that accept a [Message] (`queue`, `requeue`, `requeue_silent`) copy it before storing,
/// so callers may keep mutating their own value without affecting the engine.
pub trait Queue<I: Id>: Send + Sync {
    /// Make a copy of `message` visible.
    ///
    /// The copy has its requeue counter reset and both timestamps set to now. Messages without
    /// an id are assigned one by the engine.
    ///
    /// # Errors
    ///
    /// Returns [Error::QueueFull] if the engine is bounded and at capacity.
    fn queue(&self, message: &Message<I>) -> Result<(), Error>;

    /// Take the next visible message, moving it in flight.
    ///
    /// Returns `None` if nothing is visible right now. This never blocks waiting for a message.
    ///
    /// # Errors
    ///
    /// Returns [Error::EphemeralFull] if the in-flight store is bounded and full. The capacity
    /// is checked before anything is removed, so the next message remains visible.
    fn take(&self) -> Result<Option<Message<I>>, Error>;

    /// Acknowledge an in-flight message. Finishing the same message twice is a no-op.
    fn finish(&self, message: &Message<I>) -> Result<(), Error>;

    /// Return an in-flight message to the queue, incrementing its requeue counter.
    fn requeue(&self, message: &Message<I>) -> Result<(), Error>;

    /// Return an in-flight message to the queue without touching its requeue counter.
    fn requeue_silent(&self, message: &Message<I>) -> Result<(), Error>;

    /// List in-flight messages taken more than `threshold` ago.
    ///
    /// Returns `None` when ephemeral tracking is disabled and `Some` (possibly empty) otherwise.
    /// This is a pure read: nothing is moved or removed.
    fn orphans(&self, threshold: Duration) -> Result<Option<Vec<Message<I>>>, Error>;

    /// Move an in-flight message back to the queue without touching its requeue counter.
    ///
    /// Returns `false` if the message is no longer in flight (for example, it was finished
    /// concurrently).
    fn move_to_queue(&self, message: &Message<I>) -> Result<bool, Error>;

    /// Number of visible messages, or `None` if the engine cannot report it cheaply.
    fn queue_size(&self) -> Result<Option<usize>, Error>;

    /// Number of in-flight messages, or `None` if the engine cannot report it cheaply.
    fn ephemeral_size(&self) -> Result<Option<usize>, Error>;
}
