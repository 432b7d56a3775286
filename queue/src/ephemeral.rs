//! Tracking of in-flight ("ephemeral") messages.
//!
//! A message returned by [Queue::take](crate::Queue::take) is invisible to other consumers until
//! it is finished or requeued. In-process engines keep those messages in a [Tracker], while
//! persistent engines keep them in their own storage and only share [Config].
//!
//! # Capacity
//!
//! When `max_size` is non-zero, `take` checks the capacity before removing anything from the
//! main store. A full ephemeral store therefore never loses a message: it stays visible and
//! [Error::EphemeralFull] is returned instead.
//!
//! The check and the insert are not a single atomic step, so concurrent takes may briefly exceed
//! `max_size` by up to the number of racing consumers. Treat the bound as advisory.

use crate::{time::expired, Error, Id, Message};
use commonware_utils::SystemTimeExt;
use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, SystemTime},
};
use tracing::debug;

/// Configuration of ephemeral tracking, shared by all engines.
#[derive(Clone, Debug, Default)]
pub struct Config {
    /// Disable tracking entirely. Taken messages are considered gone, `finish` does nothing and
    /// `orphans` returns `None`.
    pub disabled: bool,

    /// Maximum number of in-flight messages (`0` for unbounded).
    pub max_size: usize,
}

impl Config {
    /// Tracking enabled with at most `max_size` in-flight messages (`0` for unbounded).
    pub fn bounded(max_size: usize) -> Self {
        Self {
            disabled: false,
            max_size,
        }
    }

    /// Tracking disabled.
    pub fn disabled() -> Self {
        Self {
            disabled: true,
            max_size: 0,
        }
    }

    pub fn enabled(&self) -> bool {
        !self.disabled
    }

    /// Returns [Error::EphemeralFull] if `current` in-flight messages leave no room for another.
    pub fn check_capacity(&self, current: usize) -> Result<(), Error> {
        if self.disabled || self.max_size == 0 || current < self.max_size {
            return Ok(());
        }
        debug!(current, max = self.max_size, "ephemeral storage full");
        Err(Error::EphemeralFull)
    }
}

struct Entry<I> {
    message: Message<I>,
    taken_at: SystemTime,
}

/// In-memory map of in-flight messages, keyed by id.
pub struct Tracker<I: Id> {
    cfg: Config,
    entries: Mutex<HashMap<I, Entry<I>>>,
}

impl<I: Id> Tracker<I> {
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.cfg.enabled()
    }

    /// Ensure there is room for one more in-flight message.
    pub fn reserve(&self) -> Result<(), Error> {
        if !self.cfg.enabled() || self.cfg.max_size == 0 {
            return Ok(());
        }
        let current = self.entries.lock().unwrap().len();
        self.cfg.check_capacity(current)
    }

    /// Record `message` as taken now. Messages without an id cannot be tracked and are ignored.
    pub fn insert(&self, message: Message<I>) {
        self.insert_at(message, SystemTime::now());
    }

    fn insert_at(&self, message: Message<I>, taken_at: SystemTime) {
        if !self.cfg.enabled() {
            return;
        }
        let Some(id) = message.id().cloned() else {
            return;
        };
        self.entries
            .lock()
            .unwrap()
            .insert(id, Entry { message, taken_at });
    }

    /// Stop tracking `id`, returning the tracked message if it was in flight.
    pub fn remove(&self, id: &I) -> Option<Message<I>> {
        if !self.cfg.enabled() {
            return None;
        }
        self.entries
            .lock()
            .unwrap()
            .remove(id)
            .map(|entry| entry.message)
    }

    /// Messages taken more than `threshold` ago, ordered by id (`None` if tracking is disabled).
    pub fn orphans(&self, threshold: Duration) -> Option<Vec<Message<I>>> {
        if !self.cfg.enabled() {
            return None;
        }
        let now = SystemTime::now();
        let entries = self.entries.lock().unwrap();
        let mut orphans: Vec<_> = entries
            .values()
            .filter(|entry| expired(entry.taken_at, threshold, now))
            .map(|entry| entry.message.clone())
            .collect();
        orphans.sort_by(|a, b| a.id().cmp(&b.id()));
        debug!(
            count = orphans.len(),
            threshold_ms = threshold.as_millis() as u64,
            now_ms = now.epoch_millis(),
            "scanned for orphans"
        );
        Some(orphans)
    }

    /// Number of in-flight messages (`0` if tracking is disabled).
    pub fn len(&self) -> usize {
        if !self.cfg.enabled() {
            return 0;
        }
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
