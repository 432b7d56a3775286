use super::Config;
use crate::{
    metrics::Metrics,
    time::{expired, from_millis},
    Error, Generator, Id, Message, Queue,
};
use commonware_codec::{Decode, Encode, EncodeSize, FixedSize, RangeCfg, ReadExt, Write};
use commonware_utils::SystemTimeExt;
use prometheus_client::registry::Registry;
use redb::{
    Database, ReadableTable, ReadableTableMetadata, Table, TableDefinition, WriteTransaction,
};
use std::{
    marker::PhantomData,
    path::PathBuf,
    sync::Mutex,
    time::{Duration, SystemTime},
};
use tracing::{debug, warn};

/// Visible messages: time-ordered key to encoded message.
const QUEUE_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("queue");

/// In-flight messages: encoded id to taken-at (u64 millis) followed by the encoded message.
const EPHEMERAL_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("ephemeral");

/// Engine metadata.
const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Metadata key of the last consumed queue key.
const CURSOR_KEY: &str = "cursor";

/// File extension of the database file.
const EXTENSION: &str = "redb";

/// A durable [Queue] over an embedded ordered key-value store.
///
/// See the [module documentation](super) for the storage layout and recovery guarantees.
pub struct Embedded<I: Id> {
    db: Database,
    path: PathBuf,
    cfg: Config,

    /// Generates both queue keys and engine-assigned ids. Queue keys are only drawn while
    /// holding `put_lock`.
    generator: Generator,

    /// Serializes writes to the queue keyspace so keys are committed in increasing order.
    put_lock: Mutex<()>,

    /// Serializes takes and holds the last consumed queue key.
    take_lock: Mutex<u64>,

    metrics: Metrics,
    _id: PhantomData<fn() -> I>,
}

impl<I: Id> Embedded<I> {
    /// Open (or create) the store described by `cfg`, registering metrics with `registry`.
    ///
    /// On restart, reading resumes after the persisted cursor and generated keys resume above
    /// both the cursor and the largest key still queued.
    ///
    /// # Errors
    ///
    /// Returns [Error::Config] if `directory` or `name` is empty, or an I/O or store error if
    /// the database cannot be opened.
    pub fn init(registry: &mut Registry, cfg: Config) -> Result<Self, Error> {
        if cfg.directory.as_os_str().is_empty() {
            return Err(Error::Config("embedded directory is empty".into()));
        }
        if cfg.name.is_empty() {
            return Err(Error::Config("embedded name is empty".into()));
        }
        std::fs::create_dir_all(&cfg.directory)?;
        let path = cfg.directory.join(format!("{}.{EXTENSION}", cfg.name));
        let db = Database::create(&path)?;

        // Create tables and load the cursor
        let txn = db.begin_write()?;
        let (cursor, last) = {
            let queue = txn.open_table(QUEUE_TABLE)?;
            txn.open_table(EPHEMERAL_TABLE)?;
            let meta = txn.open_table(META_TABLE)?;
            let cursor = meta.get(CURSOR_KEY)?.map(|v| v.value()).unwrap_or(0);
            let last = queue.last()?.map(|(k, _)| k.value()).unwrap_or(0);
            (cursor, last)
        };
        txn.commit()?;

        let metrics = Metrics::init(registry);
        let engine = Self {
            db,
            path,
            cfg,
            generator: Generator::after(cursor.max(last)),
            put_lock: Mutex::new(()),
            take_lock: Mutex::new(cursor),
            metrics,
            _id: PhantomData,
        };
        let (size, ephemeral) = engine.sizes()?;
        engine.metrics.sizes(size, ephemeral);
        debug!(
            path = %engine.path.display(),
            cursor,
            last,
            size,
            ephemeral,
            "opened embedded queue"
        );
        Ok(engine)
    }

    /// Path of the database file.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Last consumed queue key (persisted with every take).
    pub fn cursor(&self) -> u64 {
        *self.take_lock.lock().unwrap()
    }

    fn sizes(&self) -> Result<(usize, usize), Error> {
        let txn = self.db.begin_read()?;
        let queue = txn.open_table(QUEUE_TABLE)?.len()?;
        let ephemeral = txn.open_table(EPHEMERAL_TABLE)?.len()?;
        Ok((queue as usize, ephemeral as usize))
    }

    fn record_sizes(&self) {
        match self.sizes() {
            Ok((size, ephemeral)) => self.metrics.sizes(size, ephemeral),
            Err(err) => warn!(?err, "failed to read sizes"),
        }
    }

    fn id_of(&self, message: &Message<I>) -> I {
        message
            .id()
            .cloned()
            .unwrap_or_else(|| I::generate(&self.generator))
    }

    /// Write `message` under a fresh queue key. If `release` is set, the in-flight record of the
    /// message is deleted in the same transaction.
    ///
    /// Must be called while holding `put_lock`.
    fn put(&self, message: &Message<I>, release: bool) -> Result<u64, Error> {
        let key = self.generator.next();
        let encoded = message.encode();
        let txn = self.db.begin_write()?;
        {
            let mut queue = txn.open_table(QUEUE_TABLE)?;
            queue.insert(key, encoded.as_ref())?;
            if release && self.cfg.ephemeral.enabled() {
                if let Some(id) = message.id() {
                    let mut ephemeral = txn.open_table(EPHEMERAL_TABLE)?;
                    ephemeral.remove(id.encode().as_ref())?;
                }
            }
        }
        txn.commit()?;
        Ok(key)
    }

    /// Shared path of `requeue` and `requeue_silent`.
    fn put_back(&self, message: Message<I>) -> Result<(), Error> {
        let _guard = self.put_lock.lock().unwrap();
        let key = self.put(&message, true)?;
        debug!(key, id = ?message.id(), requeues = message.num_requeues(), "requeued message");
        self.metrics.requeued.inc();
        self.record_sizes();
        Ok(())
    }

    /// Read the first queued entry after `cursor`.
    fn first_after(
        queue: &Table<'_, u64, &'static [u8]>,
        cursor: u64,
    ) -> Result<Option<(u64, Message<I>)>, Error> {
        let mut range = queue.range(cursor.saturating_add(1)..)?;
        let Some(entry) = range.next() else {
            return Ok(None);
        };
        let (key, value) = entry?;
        let message = Message::decode_cfg(value.value(), &RangeCfg::from(..))?;
        Ok(Some((key.value(), message)))
    }

    /// Move the first queued entry after `cursor` in flight within `txn`.
    fn claim(
        &self,
        txn: &WriteTransaction,
        cursor: u64,
    ) -> Result<Option<(u64, Message<I>)>, Error> {
        let enabled = self.cfg.ephemeral.enabled();
        let mut ephemeral = txn.open_table(EPHEMERAL_TABLE)?;
        if enabled {
            self.cfg.ephemeral.check_capacity(ephemeral.len()? as usize)?;
        }

        let mut queue = txn.open_table(QUEUE_TABLE)?;
        let Some((key, message)) = Self::first_after(&queue, cursor)? else {
            return Ok(None);
        };
        queue.remove(key)?;
        txn.open_table(META_TABLE)?.insert(CURSOR_KEY, key)?;
        if enabled {
            if let Some(id) = message.id() {
                let mut record = Vec::with_capacity(u64::SIZE + message.encode_size());
                SystemTime::now().epoch_millis().write(&mut record);
                message.write(&mut record);
                ephemeral.insert(id.encode().as_ref(), record.as_slice())?;
            }
        }
        Ok(Some((key, message)))
    }

    /// Decode an in-flight record into its taken-at time and message.
    fn decode_record(mut record: &[u8]) -> Result<(SystemTime, Message<I>), Error> {
        let taken_at = from_millis(u64::read(&mut record)?);
        let message = Message::decode_cfg(record, &RangeCfg::from(..))?;
        Ok((taken_at, message))
    }
}

impl<I: Id> Queue<I> for Embedded<I> {
    fn queue(&self, message: &Message<I>) -> Result<(), Error> {
        let _guard = self.put_lock.lock().unwrap();
        let message = message.enqueued(self.id_of(message), SystemTime::now());
        let key = self.put(&message, false)?;
        debug!(key, id = ?message.id(), "queued message");
        self.metrics.queued.inc();
        self.metrics.size.inc();
        Ok(())
    }

    fn take(&self) -> Result<Option<Message<I>>, Error> {
        let mut cursor = self.take_lock.lock().unwrap();
        let txn = self.db.begin_write()?;
        let claimed = match self.claim(&txn, *cursor) {
            Ok(claimed) => claimed,
            Err(err) => {
                txn.abort()?;
                if matches!(err, Error::EphemeralFull) {
                    self.metrics.rejected.inc();
                }
                return Err(err);
            }
        };
        let Some((key, message)) = claimed else {
            txn.abort()?;
            return Ok(None);
        };
        txn.commit()?;

        // Only advance in memory once the batch is durable
        *cursor = key;
        drop(cursor);
        debug!(key, id = ?message.id(), "took message");
        self.metrics.taken.inc();
        self.record_sizes();
        Ok(Some(message))
    }

    fn finish(&self, message: &Message<I>) -> Result<(), Error> {
        if !self.cfg.ephemeral.enabled() {
            return Ok(());
        }
        let Some(id) = message.id() else {
            return Ok(());
        };
        let txn = self.db.begin_write()?;
        let removed = {
            let mut ephemeral = txn.open_table(EPHEMERAL_TABLE)?;
            let removed = ephemeral.remove(id.encode().as_ref())?.is_some();
            removed
        };
        txn.commit()?;
        if removed {
            self.metrics.finished.inc();
            self.metrics.ephemeral.dec();
        }
        Ok(())
    }

    fn requeue(&self, message: &Message<I>) -> Result<(), Error> {
        self.put_back(message.requeued(self.id_of(message), SystemTime::now()))
    }

    fn requeue_silent(&self, message: &Message<I>) -> Result<(), Error> {
        self.put_back(message.requeued_silently(self.id_of(message), SystemTime::now()))
    }

    fn orphans(&self, threshold: Duration) -> Result<Option<Vec<Message<I>>>, Error> {
        if !self.cfg.ephemeral.enabled() {
            return Ok(None);
        }
        let now = SystemTime::now();
        let txn = self.db.begin_read()?;
        let ephemeral = txn.open_table(EPHEMERAL_TABLE)?;
        let mut orphans = Vec::new();
        for entry in ephemeral.iter()? {
            let (_, record) = entry?;
            let (taken_at, message) = Self::decode_record(record.value())?;
            if expired(taken_at, threshold, now) {
                orphans.push(message);
            }
        }
        debug!(count = orphans.len(), "scanned for orphans");
        Ok(Some(orphans))
    }

    fn move_to_queue(&self, message: &Message<I>) -> Result<bool, Error> {
        if !self.cfg.ephemeral.enabled() {
            return Ok(false);
        }
        let Some(id) = message.id() else {
            return Ok(false);
        };
        let _guard = self.put_lock.lock().unwrap();
        let key = self.generator.next();
        let txn = self.db.begin_write()?;
        let moved = {
            let mut ephemeral = txn.open_table(EPHEMERAL_TABLE)?;
            let record = ephemeral
                .remove(id.encode().as_ref())?
                .map(|record| record.value().to_vec());
            match record {
                Some(record) => {
                    // The stored copy is authoritative
                    let (_, tracked) = Self::decode_record(&record)?;
                    let encoded = tracked.encode();
                    txn.open_table(QUEUE_TABLE)?
                        .insert(key, encoded.as_ref())?;
                    true
                }
                None => false,
            }
        };
        if !moved {
            txn.abort()?;
            return Ok(false);
        }
        txn.commit()?;
        debug!(key, ?id, "moved message back to queue");
        self.metrics.requeued.inc();
        self.record_sizes();
        Ok(true)
    }

    fn queue_size(&self) -> Result<Option<usize>, Error> {
        let txn = self.db.begin_read()?;
        let len = txn.open_table(QUEUE_TABLE)?.len()?;
        Ok(Some(len as usize))
    }

    fn ephemeral_size(&self) -> Result<Option<usize>, Error> {
        if !self.cfg.ephemeral.enabled() {
            return Ok(Some(0));
        }
        let txn = self.db.begin_read()?;
        let len = txn.open_table(EPHEMERAL_TABLE)?.len()?;
        Ok(Some(len as usize))
    }
}
