//! A durable queue over an embedded ordered key-value store.
//!
//! [Embedded] keeps every message in a single database file (`<directory>/<name>.redb`) split
//! across three tables:
//!
//! - `queue`: visible messages keyed by a time-ordered `u64` (see [Generator](crate::Generator)).
//! - `ephemeral`: in-flight messages keyed by their encoded id. Each record starts with the time
//!   the message was taken (milliseconds since the Unix epoch).
//! - `meta`: the read cursor (the last queue key consumed).
//!
//! # Ordering
//!
//! Queue keys are drawn and committed under a single put lock, so a key is never committed
//! after a larger one. `take` reads the first key after the cursor and, in the same write
//! transaction, deletes it, advances the cursor and (if tracking is enabled) records the
//! message as in flight. Requeued and moved messages always receive a fresh key above the
//! cursor, so they are delivered after everything queued before them.
//!
//! # Recovery
//!
//! Every operation commits before returning. On restart the cursor is reloaded, the key
//! generator resumes above both the cursor and the largest key still queued, and messages that
//! were in flight when the process stopped remain in the `ephemeral` table where
//! [Queue::orphans](crate::Queue::orphans) will report them.
//!
//! # Capacity
//!
//! Unlike the in-process engines, the `max_size` check on in-flight messages happens inside the
//! write transaction of `take`, so the bound is never exceeded.
//!
//! # Example
//!
//! ```rust
//! use prometheus_client::registry::Registry;
//! use quay_queue::{embedded::{Config, Embedded}, Message, Queue};
//!
//! let dir = std::env::temp_dir().join("quay-embedded-doc");
//! let mut registry = Registry::default();
//! let queue = Embedded::<u64>::init(&mut registry, Config {
//!     directory: dir.clone(),
//!     name: "jobs".into(),
//!     ephemeral: Default::default(),
//! }).unwrap();
//!
//! queue.queue(&Message::new("hello")).unwrap();
//! let message = queue.take().unwrap().unwrap();
//! queue.finish(&message).unwrap();
//! # drop(queue);
//! # std::fs::remove_dir_all(dir).unwrap();
//! ```

mod storage;

use crate::{ephemeral, Error};
use std::path::PathBuf;
pub use storage::Embedded;

/// Configuration for [Embedded].
#[derive(Clone, Debug)]
pub struct Config {
    /// Directory holding the database file (created if missing).
    pub directory: PathBuf,

    /// Name of the database file, without extension.
    pub name: String,

    /// In-flight tracking.
    pub ephemeral: ephemeral::Config,
}

impl From<redb::DatabaseError> for Error {
    fn from(err: redb::DatabaseError) -> Self {
        Error::Embedded(err.into())
    }
}

impl From<redb::TransactionError> for Error {
    fn from(err: redb::TransactionError) -> Self {
        Error::Embedded(err.into())
    }
}

impl From<redb::TableError> for Error {
    fn from(err: redb::TableError) -> Self {
        Error::Embedded(err.into())
    }
}

impl From<redb::StorageError> for Error {
    fn from(err: redb::StorageError) -> Self {
        Error::Embedded(err.into())
    }
}

impl From<redb::CommitError> for Error {
    fn from(err: redb::CommitError) -> Self {
        Error::Embedded(err.into())
    }
}
