use super::{buffer::Buffer, Config};
use crate::{ephemeral::Tracker, metrics::Metrics, Error, Generator, Id, Message, Queue};
use prometheus_client::registry::Registry;
use std::time::{Duration, SystemTime};
use tracing::debug;

/// A [Queue] over a fixed-capacity circular [Buffer].
///
/// Puts and takes are serialized independently, so producers never wait on consumers (and vice
/// versa). A put into a full buffer fails immediately with [Error::QueueFull]; retrying is up to
/// the caller.
pub struct Ring<I: Id> {
    buffer: Buffer<Message<I>>,
    ephemeral: Tracker<I>,
    generator: Generator,
    metrics: Metrics,
}

impl<I: Id> Ring<I> {
    /// Create an empty ring, registering its metrics with `registry`.
    ///
    /// The capacity is `ring_size` rounded up to the next power of two.
    ///
    /// # Errors
    ///
    /// Returns [Error::Config] if the rounded capacity does not fit in a `usize`.
    pub fn init(registry: &mut Registry, cfg: Config) -> Result<Self, Error> {
        let capacity = cfg.ring_size.get().checked_next_power_of_two().ok_or_else(|| {
            Error::Config(format!("ring size too large: {}", cfg.ring_size))
        })?;
        debug!(requested = cfg.ring_size.get(), capacity, "initialized ring");
        Ok(Self {
            buffer: Buffer::new(capacity),
            ephemeral: Tracker::new(cfg.ephemeral),
            generator: Generator::new(),
            metrics: Metrics::init(registry),
        })
    }

    /// Number of slots in the ring.
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    fn put(&self, message: Message<I>) -> Result<(), Error> {
        if self.buffer.put(message).is_err() {
            self.metrics.rejected.inc();
            debug!(capacity = self.buffer.capacity(), "ring full");
            return Err(Error::QueueFull);
        }
        Ok(())
    }

    /// Shared path of `requeue` and `requeue_silent`.
    ///
    /// Releases the in-flight entry before the copy becomes visible.
    fn put_back(&self, message: Message<I>) -> Result<(), Error> {
        let tracked = message.id().and_then(|id| self.ephemeral.remove(id));
        if let Err(err) = self.put(message) {
            if let Some(tracked) = tracked {
                self.ephemeral.insert(tracked);
            }
            self.record_sizes();
            return Err(err);
        }
        self.metrics.requeued.inc();
        self.record_sizes();
        Ok(())
    }

    fn id_of(&self, message: &Message<I>) -> I {
        message
            .id()
            .cloned()
            .unwrap_or_else(|| I::generate(&self.generator))
    }

    fn record_sizes(&self) {
        self.metrics
            .sizes(self.buffer.len(), self.ephemeral.len());
    }
}

impl<I: Id> Queue<I> for Ring<I> {
    fn queue(&self, message: &Message<I>) -> Result<(), Error> {
        let message = message.enqueued(self.id_of(message), SystemTime::now());
        self.put(message)?;
        self.metrics.queued.inc();
        self.metrics.size.set(self.buffer.len() as i64);
        Ok(())
    }

    fn take(&self) -> Result<Option<Message<I>>, Error> {
        if let Err(err) = self.ephemeral.reserve() {
            self.metrics.rejected.inc();
            return Err(err);
        }
        let Some(message) = self.buffer.take() else {
            return Ok(None);
        };
        self.ephemeral.insert(message.clone());
        self.metrics.taken.inc();
        self.record_sizes();
        Ok(Some(message))
    }

    fn finish(&self, message: &Message<I>) -> Result<(), Error> {
        if let Some(id) = message.id() {
            if self.ephemeral.remove(id).is_some() {
                self.metrics.finished.inc();
            }
        }
        self.metrics.ephemeral.set(self.ephemeral.len() as i64);
        Ok(())
    }

    fn requeue(&self, message: &Message<I>) -> Result<(), Error> {
        let message = message.requeued(self.id_of(message), SystemTime::now());
        self.put_back(message)
    }

    fn requeue_silent(&self, message: &Message<I>) -> Result<(), Error> {
        let message = message.requeued_silently(self.id_of(message), SystemTime::now());
        self.put_back(message)
    }

    fn orphans(&self, threshold: Duration) -> Result<Option<Vec<Message<I>>>, Error> {
        Ok(self.ephemeral.orphans(threshold))
    }

    fn move_to_queue(&self, message: &Message<I>) -> Result<bool, Error> {
        let Some(id) = message.id() else {
            return Ok(false);
        };
        let Some(tracked) = self.ephemeral.remove(id) else {
            return Ok(false);
        };
        if let Err(tracked) = self.buffer.put(tracked) {
            // Keep it in flight rather than dropping it
            self.ephemeral.insert(tracked);
            self.metrics.rejected.inc();
            return Err(Error::QueueFull);
        }
        self.metrics.requeued.inc();
        self.record_sizes();
        Ok(true)
    }

    fn queue_size(&self) -> Result<Option<usize>, Error> {
        Ok(Some(self.buffer.len()))
    }

    fn ephemeral_size(&self) -> Result<Option<usize>, Error> {
        Ok(Some(self.ephemeral.len()))
    }
}
