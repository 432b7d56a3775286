//! Adapter from an external message broker to the [Queue](crate::Queue) contract.
//!
//! Brokers deliver messages on their own terms, so [BrokerQueue] only needs a client that can
//! publish a payload and poll for the next one (see [Broker]). Messages cross the boundary in the
//! [codec](crate::codec) format.
//!
//! Acknowledgement and redelivery are left to the broker:
//!
//! - `finish` does nothing.
//! - `requeue` and `requeue_silent` publish a fresh copy.
//! - `orphans` returns `None` (no in-flight tracking).
//! - `move_to_queue` fails with [Error](crate::Error)::Unsupported.
//! - `queue_size` and `ephemeral_size` return `None`.
//!
//! No broker client ships with this crate.

mod storage;

use crate::Error;
use bytes::Bytes;
use std::time::Duration;
pub use storage::BrokerQueue;

/// The client side of a broker.
pub trait Broker: Send + Sync {
    /// Publish `payload`, returning once the broker has accepted it.
    fn put(&self, payload: Bytes) -> Result<(), Error>;

    /// Wait up to `timeout` for the next payload.
    fn poll(&self, timeout: Duration) -> Result<Option<Bytes>, Error>;
}

/// Configuration for [BrokerQueue].
#[derive(Clone, Debug)]
pub struct Config {
    /// How long `take` waits for the broker before returning `None`.
    pub poll_timeout: Duration,

    /// Largest payload accepted from the broker, in bytes.
    pub max_payload: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(100),
            max_payload: 1024 * 1024,
        }
    }
}
