//! A thread-safe cache of [Queue] instances keyed by configuration.
//!
//! Opening an engine can be expensive (files, tables, connections), and two instances over the
//! same storage in one process would only contend with each other. [Factory] builds each queue
//! at most once per key and hands out shared handles.
//!
//! # Example
//!
//! ```rust
//! use prometheus_client::registry::Registry;
//! use quay_queue::{factory::Factory, memory::{Config, Memory}, Queue};
//! use std::sync::Arc;
//!
//! let mut registry = Registry::default();
//! let factory = Factory::<u64>::default();
//! let queue = factory
//!     .get_or_init("jobs", || {
//!         let registry = registry.sub_registry_with_prefix("jobs");
//!         let queue: Arc<dyn Queue<u64>> = Arc::new(Memory::<u64>::init(registry, Config::default()));
//!         Ok(queue)
//!     })
//!     .unwrap();
//! let same = factory.get("jobs").unwrap();
//! assert!(Arc::ptr_eq(&queue, &same));
//! ```

use crate::{Error, Id, Queue};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tracing::debug;

/// A shared handle to some engine.
pub type Handle<I> = Arc<dyn Queue<I>>;

/// Queues built so far, by key.
pub struct Factory<I: Id> {
    queues: Mutex<HashMap<String, Handle<I>>>,
}

impl<I: Id> Default for Factory<I> {
    fn default() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
        }
    }
}

impl<I: Id> Factory<I> {
    /// Return the queue cached under `key`, building it with `builder` if there is none.
    ///
    /// The builder runs at most once per key even when called concurrently. If it fails, the
    /// error is returned and nothing is cached.
    pub fn get_or_init<F>(&self, key: &str, builder: F) -> Result<Handle<I>, Error>
    where
        F: FnOnce() -> Result<Handle<I>, Error>,
    {
        let mut queues = self.queues.lock().unwrap();
        if let Some(queue) = queues.get(key) {
            return Ok(queue.clone());
        }
        let queue = builder()?;
        queues.insert(key.to_string(), queue.clone());
        debug!(key, cached = queues.len(), "built queue");
        Ok(queue)
    }

    /// Return the queue cached under `key`, if any.
    pub fn get(&self, key: &str) -> Option<Handle<I>> {
        self.queues.lock().unwrap().get(key).cloned()
    }

    /// Drop the cached queue under `key`. Outstanding handles keep working.
    pub fn remove(&self, key: &str) -> Option<Handle<I>> {
        self.queues.lock().unwrap().remove(key)
    }

    /// Number of cached queues.
    pub fn len(&self) -> usize {
        self.queues.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
