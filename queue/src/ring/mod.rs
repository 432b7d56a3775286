//! An in-memory queue over a fixed-capacity circular buffer.
//!
//! [Ring] stores visible messages in a [Buffer] whose capacity is rounded up to the next power of
//! two. Two independent locks serialize the put side and the take side:
//!
//! - **Put**: fails immediately with [Error](crate::Error)::QueueFull when the writer would lap
//!   the slowest consumed position. There is no blocking and no internal retry.
//! - **Take**: reads the slot at the next sequence if it has been published, clears the slot and
//!   advances the consumed position (which is what lets the writer reuse it). If the cached
//!   published position is stale, it is refreshed once from the live cursor before reporting an
//!   empty ring.
//!
//! Messages are delivered in publish order. Concurrent producers are ordered by the order in
//! which they acquire the put lock.
//!
//! In-flight messages are tracked with an [ephemeral::Tracker](crate::ephemeral::Tracker).
//!
//! # Example
//!
//! ```rust
//! use prometheus_client::registry::Registry;
//! use quay_queue::{ring::{Config, Ring}, Message, Queue};
//! use std::num::NonZeroUsize;
//!
//! let mut registry = Registry::default();
//! let queue = Ring::<u64>::init(&mut registry, Config {
//!     ring_size: NonZeroUsize::new(1000).unwrap(),
//!     ephemeral: Default::default(),
//! }).unwrap();
//! assert_eq!(queue.capacity(), 1024);
//!
//! queue.queue(&Message::new("hello")).unwrap();
//! let message = queue.take().unwrap().unwrap();
//! queue.finish(&message).unwrap();
//! ```

mod buffer;
mod storage;

use crate::ephemeral;
pub use buffer::Buffer;
use std::num::NonZeroUsize;
pub use storage::Ring;

/// Configuration for [Ring].
#[derive(Clone, Debug)]
pub struct Config {
    /// Requested number of slots (rounded up to the next power of two).
    pub ring_size: NonZeroUsize,

    /// In-flight tracking.
    pub ephemeral: ephemeral::Config,
}
