use super::Config;
use crate::{ephemeral::Tracker, metrics::Metrics, Error, Generator, Id, Message, Queue};
use prometheus_client::registry::Registry;
use std::{
    collections::VecDeque,
    sync::Mutex,
    time::{Duration, SystemTime},
};
use tracing::debug;

/// An in-memory [Queue] backed by a deque.
pub struct Memory<I: Id> {
    boundary: usize,
    queue: Mutex<VecDeque<Message<I>>>,
    ephemeral: Tracker<I>,
    generator: Generator,
    metrics: Metrics,
}

impl<I: Id> Memory<I> {
    /// Create an empty queue, registering its metrics with `registry`.
    pub fn init(registry: &mut Registry, cfg: Config) -> Self {
        let queue = if cfg.boundary > 0 {
            VecDeque::with_capacity(cfg.boundary)
        } else {
            VecDeque::new()
        };
        Self {
            boundary: cfg.boundary,
            queue: Mutex::new(queue),
            ephemeral: Tracker::new(cfg.ephemeral),
            generator: Generator::new(),
            metrics: Metrics::init(registry),
        }
    }

    /// Append `message` (already copied) to the deque.
    fn put(&self, message: Message<I>) -> Result<(), Error> {
        let mut queue = self.queue.lock().unwrap();
        if self.boundary > 0 && queue.len() >= self.boundary {
            self.metrics.rejected.inc();
            debug!(boundary = self.boundary, "queue full");
            return Err(Error::QueueFull);
        }
        queue.push_back(message);
        self.metrics.size.set(queue.len() as i64);
        Ok(())
    }

    /// Shared path of `requeue` and `requeue_silent`.
    ///
    /// The in-flight entry is released before the copy becomes visible, so a consumer that takes
    /// the copy right away is tracked.
    fn put_back(&self, message: Message<I>) -> Result<(), Error> {
        let tracked = message.id().and_then(|id| self.ephemeral.remove(id));
        if let Err(err) = self.put(message) {
            if let Some(tracked) = tracked {
                self.ephemeral.insert(tracked);
            }
            return Err(err);
        }
        self.metrics.requeued.inc();
        self.metrics.ephemeral.set(self.ephemeral.len() as i64);
        Ok(())
    }

    fn id_of(&self, message: &Message<I>) -> I {
        message
            .id()
            .cloned()
            .unwrap_or_else(|| I::generate(&self.generator))
    }
}

impl<I: Id> Queue<I> for Memory<I> {
    fn queue(&self, message: &Message<I>) -> Result<(), Error> {
        let message = message.enqueued(self.id_of(message), SystemTime::now());
        self.put(message)?;
        self.metrics.queued.inc();
        Ok(())
    }

    fn take(&self) -> Result<Option<Message<I>>, Error> {
        if let Err(err) = self.ephemeral.reserve() {
            self.metrics.rejected.inc();
            return Err(err);
        }
        let message = {
            let mut queue = self.queue.lock().unwrap();
            let message = queue.pop_front();
            self.metrics.size.set(queue.len() as i64);
            message
        };
        let Some(message) = message else {
            return Ok(None);
        };
        self.ephemeral.insert(message.clone());
        self.metrics.taken.inc();
        self.metrics.ephemeral.set(self.ephemeral.len() as i64);
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
        if let Err(err) = self.put(tracked.clone()) {
            // Keep it in flight rather than dropping it
            self.ephemeral.insert(tracked);
            return Err(err);
        }
        self.metrics.requeued.inc();
        self.metrics.ephemeral.set(self.ephemeral.len() as i64);
        Ok(true)
    }

    fn queue_size(&self) -> Result<Option<usize>, Error> {
        Ok(Some(self.queue.lock().unwrap().len()))
    }

    fn ephemeral_size(&self) -> Result<Option<usize>, Error> {
        Ok(Some(self.ephemeral.len()))
    }
}
