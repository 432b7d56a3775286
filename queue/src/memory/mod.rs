//! An in-memory queue backed by a deque.
//!
//! [Memory] keeps visible messages in a `VecDeque` guarded by a single mutex and in-flight
//! messages in an [ephemeral::Tracker](crate::ephemeral::Tracker). Nothing survives a restart.
//!
//! # Example
//!
//! ```rust
//! use prometheus_client::registry::Registry;
//! use quay_queue::{memory::{Config, Memory}, Message, Queue};
//!
//! let mut registry = Registry::default();
//! let queue = Memory::<u64>::init(&mut registry, Config::default());
//!
//! queue.queue(&Message::new("hello")).unwrap();
//! let message = queue.take().unwrap().unwrap();
//! queue.finish(&message).unwrap();
//! ```

mod storage;

use crate::ephemeral;
pub use storage::Memory;

/// Configuration for [Memory].
#[derive(Clone, Debug, Default)]
pub struct Config {
    /// Maximum number of visible messages (`0` for unbounded).
    pub boundary: usize,

    /// In-flight tracking.
    pub ephemeral: ephemeral::Config,
}
