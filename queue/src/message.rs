use crate::Id;
use bytes::Bytes;
use std::time::SystemTime;

/// A unit of work moved through a [Queue](crate::Queue).
///
/// `timestamp` is set once, when the message is first queued. `queue_timestamp` is refreshed
/// every time the message is (re)queued. `num_requeues` only ever grows, by one per
/// [Queue::requeue](crate::Queue::requeue).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message<I> {
    id: Option<I>,
    data: Bytes,
    timestamp: SystemTime,
    queue_timestamp: SystemTime,
    num_requeues: u32,
    partition_key: Option<String>,
}

impl<I: Id> Message<I> {
    /// Create a message whose id will be assigned by the engine it is queued on.
    pub fn new(data: impl Into<Bytes>) -> Self {
        let now = SystemTime::now();
        Self {
            id: None,
            data: data.into(),
            timestamp: now,
            queue_timestamp: now,
            num_requeues: 0,
            partition_key: None,
        }
    }

    /// Create a message with a producer-assigned id.
    pub fn with_id(id: I, data: impl Into<Bytes>) -> Self {
        Self {
            id: Some(id),
            ..Self::new(data)
        }
    }

    /// Attach a partition key (used by broker-backed engines to route related messages).
    pub fn with_partition_key(mut self, key: impl Into<String>) -> Self {
        self.partition_key = Some(key.into());
        self
    }

    /// Reassemble a message read back from storage.
    pub(crate) fn from_parts(
        id: Option<I>,
        data: Bytes,
        timestamp: SystemTime,
        queue_timestamp: SystemTime,
        num_requeues: u32,
        partition_key: Option<String>,
    ) -> Self {
        Self {
            id,
            data,
            timestamp,
            queue_timestamp,
            num_requeues,
            partition_key,
        }
    }

    pub fn id(&self) -> Option<&I> {
        self.id.as_ref()
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Replace the payload.
    ///
    /// Only the caller's copy changes: engines store their own copy of every queued message.
    pub fn set_data(&mut self, data: impl Into<Bytes>) {
        self.data = data.into();
    }

    /// Time the message was first queued.
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Time the message was last queued or requeued.
    pub fn queue_timestamp(&self) -> SystemTime {
        self.queue_timestamp
    }

    pub fn num_requeues(&self) -> u32 {
        self.num_requeues
    }

    pub fn partition_key(&self) -> Option<&str> {
        self.partition_key.as_deref()
    }

    /// Copy made by `queue`: assigns `id`, resets the counter and both timestamps.
    pub(crate) fn enqueued(&self, id: I, now: SystemTime) -> Self {
        Self {
            id: Some(id),
            data: self.data.clone(),
            timestamp: now,
            queue_timestamp: now,
            num_requeues: 0,
            partition_key: self.partition_key.clone(),
        }
    }

    /// Copy made by `requeue`: increments the counter and refreshes the queue timestamp.
    pub(crate) fn requeued(&self, id: I, now: SystemTime) -> Self {
        Self {
            num_requeues: self.num_requeues.saturating_add(1),
            ..self.requeued_silently(id, now)
        }
    }

    /// Copy made by `requeue_silent`: refreshes the queue timestamp only.
    pub(crate) fn requeued_silently(&self, id: I, now: SystemTime) -> Self {
        Self {
            id: Some(id),
            data: self.data.clone(),
            timestamp: self.timestamp,
            queue_timestamp: now,
            num_requeues: self.num_requeues,
            partition_key: self.partition_key.clone(),
        }
    }
}
