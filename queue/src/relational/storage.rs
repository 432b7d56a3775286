use super::{
    metrics::Metrics as ContentionMetrics,
    retry::{self, Outcome},
    Config,
};
use crate::{
    metrics::Metrics,
    time::from_millis,
    Error, Generator, Id, Message, Queue,
};
use bytes::Bytes;
use commonware_codec::{DecodeExt, Encode};
use commonware_utils::SystemTimeExt;
use prometheus_client::registry::Registry;
use rand::Rng;
use rusqlite::{params, Connection, TransactionBehavior};
use std::{
    marker::PhantomData,
    time::{Duration, SystemTime},
};
use tracing::debug;

/// Columns read back into a [Message], in order.
const COLUMNS: &str = "id, data, timestamp, queue_timestamp, num_requeues, partition_key";

/// Raw column values of a row.
type Row = (Vec<u8>, Vec<u8>, i64, i64, u32, Option<String>);

/// Statements over the configured table, rendered once at init.
struct Statements {
    create: String,
    insert: String,
    claim: String,
    claimed: String,
    delete: String,
    requeue: String,
    requeue_silent: String,
    release: String,
    orphans: String,
    visible: String,
    in_flight: String,
}

impl Statements {
    fn new(table: &str, fifo: bool) -> Self {
        let order = if fifo { "ORDER BY timestamp, id " } else { "" };
        Self {
            create: format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id BLOB PRIMARY KEY,
                    ephemeral_id INTEGER NOT NULL DEFAULT 0,
                    data BLOB NOT NULL,
                    timestamp INTEGER NOT NULL,
                    queue_timestamp INTEGER NOT NULL,
                    num_requeues INTEGER NOT NULL DEFAULT 0,
                    partition_key TEXT,
                    taken_at INTEGER
                );
                CREATE INDEX IF NOT EXISTS {table}_ephemeral_id ON {table} (ephemeral_id, timestamp);"
            ),
            insert: format!(
                "INSERT INTO {table} (id, ephemeral_id, data, timestamp, queue_timestamp, num_requeues, partition_key, taken_at) \
                 VALUES (?1, 0, ?2, ?3, ?4, ?5, ?6, NULL)"
            ),
            claim: format!(
                "UPDATE {table} SET ephemeral_id = ?1, taken_at = ?2 \
                 WHERE id = (SELECT id FROM {table} WHERE ephemeral_id = 0 {order}LIMIT 1) AND ephemeral_id = 0"
            ),
            claimed: format!("SELECT {COLUMNS} FROM {table} WHERE ephemeral_id = ?1"),
            delete: format!("DELETE FROM {table} WHERE id = ?1"),
            requeue: format!(
                "UPDATE {table} SET ephemeral_id = 0, taken_at = NULL, num_requeues = num_requeues + 1, queue_timestamp = ?2 \
                 WHERE id = ?1 AND ephemeral_id != 0"
            ),
            requeue_silent: format!(
                "UPDATE {table} SET ephemeral_id = 0, taken_at = NULL, queue_timestamp = ?2 \
                 WHERE id = ?1 AND ephemeral_id != 0"
            ),
            release: format!(
                "UPDATE {table} SET ephemeral_id = 0, taken_at = NULL WHERE id = ?1 AND ephemeral_id != 0"
            ),
            orphans: format!(
                "SELECT {COLUMNS} FROM {table} WHERE ephemeral_id != 0 AND taken_at < ?1 ORDER BY id"
            ),
            visible: format!("SELECT COUNT(*) FROM {table} WHERE ephemeral_id = 0"),
            in_flight: format!("SELECT COUNT(*) FROM {table} WHERE ephemeral_id != 0"),
        }
    }
}

/// A [Queue] over a single SQL table.
///
/// See the [module documentation](super) for the claim protocol and retry behavior.
pub struct Relational<I: Id> {
    cfg: Config,
    statements: Statements,
    generator: Generator,
    metrics: Metrics,
    contention: ContentionMetrics,
    _id: PhantomData<fn() -> I>,
}

impl<I: Id> Relational<I> {
    /// Create the table (if missing) described by `cfg`, registering metrics with `registry`.
    ///
    /// # Errors
    ///
    /// Returns [Error::Config] if `path` is empty or `table` is not a plain identifier, or a
    /// SQL error if the database cannot be opened.
    pub fn init(registry: &mut Registry, cfg: Config) -> Result<Self, Error> {
        cfg.validate()?;
        let statements = Statements::new(&cfg.table, cfg.fifo);

        let conn = Connection::open(&cfg.path)?;
        conn.busy_timeout(cfg.busy_timeout)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.execute_batch(&statements.create)?;
        debug!(
            path = %cfg.path.display(),
            table = %cfg.table,
            mode = %mode,
            "opened relational queue"
        );

        Ok(Self {
            statements,
            generator: Generator::new(),
            metrics: Metrics::init(registry),
            contention: ContentionMetrics::init(registry),
            cfg,
            _id: PhantomData,
        })
    }

    fn connect(&self) -> Result<Connection, Error> {
        let conn = Connection::open(&self.cfg.path)?;
        conn.busy_timeout(self.cfg.busy_timeout)?;
        Ok(conn)
    }

    fn id_of(&self, message: &Message<I>) -> I {
        message
            .id()
            .cloned()
            .unwrap_or_else(|| I::generate(&self.generator))
    }

    fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))
    }

    fn to_message(row: Row) -> Result<Message<I>, Error> {
        let (id, data, timestamp, queue_timestamp, num_requeues, partition_key) = row;
        Ok(Message::from_parts(
            Some(I::decode(id.as_slice())?),
            Bytes::from(data),
            from_millis(timestamp as u64),
            from_millis(queue_timestamp as u64),
            num_requeues,
            partition_key,
        ))
    }

    /// Insert `message` as a visible row.
    fn insert(&self, conn: &Connection, key: &[u8], message: &Message<I>) -> Result<(), Error> {
        conn.execute(
            &self.statements.insert,
            params![
                key,
                message.data().as_ref(),
                message.timestamp().epoch_millis() as i64,
                message.queue_timestamp().epoch_millis() as i64,
                message.num_requeues(),
                message.partition_key(),
            ],
        )?;
        Ok(())
    }

    fn count(&self, conn: &Connection, sql: &str) -> Result<usize, Error> {
        let count: i64 = conn.query_row(sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Claim one visible row, returning it.
    fn claim(&self) -> Result<Option<Message<I>>, Error> {
        let mut conn = self.connect()?;
        let txn = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let enabled = self.cfg.ephemeral.enabled();
        if enabled && self.cfg.ephemeral.max_size > 0 {
            let current = self.count(&txn, &self.statements.in_flight)?;
            self.cfg.ephemeral.check_capacity(current)?;
        }

        // Mark the row with an id only this attempt knows, then read it back
        let ephemeral_id = rand::thread_rng().gen_range(1..=i64::MAX);
        let now = SystemTime::now().epoch_millis() as i64;
        if txn.execute(&self.statements.claim, params![ephemeral_id, now])? == 0 {
            return Ok(None);
        }
        let row = txn.query_row(&self.statements.claimed, [ephemeral_id], Self::read_row)?;
        if !enabled {
            txn.execute(&self.statements.delete, [&row.0])?;
        }
        txn.commit()?;
        Self::to_message(row).map(Some)
    }

    /// Shared path of `requeue` and `requeue_silent`.
    ///
    /// An in-flight row is released in place. Otherwise the copy is inserted, and a row that is
    /// already visible wins.
    fn put_back(
        &self,
        op: &'static str,
        sql: &str,
        key: Vec<u8>,
        copy: Message<I>,
    ) -> Result<(), Error> {
        let queue_timestamp = copy.queue_timestamp().epoch_millis() as i64;
        let outcome = retry::run(op, self.cfg.max_retries, &self.contention, || {
            let conn = self.connect()?;
            if conn.execute(sql, params![key, queue_timestamp])? == 0 {
                self.insert(&conn, &key, &copy)?;
            }
            Ok(())
        })?;
        if outcome == Outcome::Duplicate {
            debug!(op, id = ?copy.id(), "message already visible");
        }
        debug!(op, id = ?copy.id(), requeues = copy.num_requeues(), "requeued message");
        self.metrics.requeued.inc();
        Ok(())
    }
}

impl<I: Id> Queue<I> for Relational<I> {
    fn queue(&self, message: &Message<I>) -> Result<(), Error> {
        let id = self.id_of(message);
        let key = id.encode().to_vec();
        let message = message.enqueued(id, SystemTime::now());
        let outcome = retry::run("queue", self.cfg.max_retries, &self.contention, || {
            let conn = self.connect()?;
            self.insert(&conn, &key, &message)
        })?;
        match outcome {
            Outcome::Done(()) => {
                debug!(id = ?message.id(), "queued message");
                self.metrics.queued.inc();
            }
            Outcome::Duplicate => debug!(id = ?message.id(), "message already queued"),
        }
        Ok(())
    }

    fn take(&self) -> Result<Option<Message<I>>, Error> {
        let claimed = match retry::run("take", self.cfg.max_retries, &self.contention, || {
            self.claim()
        }) {
            Ok(Outcome::Done(claimed)) => claimed,
            Ok(Outcome::Duplicate) => None,
            Err(Error::EphemeralFull) => {
                self.metrics.rejected.inc();
                return Err(Error::EphemeralFull);
            }
            Err(err) => return Err(err),
        };
        if let Some(message) = &claimed {
            debug!(id = ?message.id(), "took message");
            self.metrics.taken.inc();
        }
        Ok(claimed)
    }

    fn finish(&self, message: &Message<I>) -> Result<(), Error> {
        if !self.cfg.ephemeral.enabled() {
            return Ok(());
        }
        let Some(id) = message.id() else {
            return Ok(());
        };
        let key = id.encode().to_vec();
        let outcome = retry::run("finish", self.cfg.max_retries, &self.contention, || {
            let conn = self.connect()?;
            Ok(conn.execute(&self.statements.delete, [&key])?)
        })?;
        if matches!(outcome, Outcome::Done(1)) {
            debug!(?id, "finished message");
            self.metrics.finished.inc();
        }
        Ok(())
    }

    fn requeue(&self, message: &Message<I>) -> Result<(), Error> {
        let id = self.id_of(message);
        let key = id.encode().to_vec();
        let copy = message.requeued(id, SystemTime::now());
        self.put_back("requeue", &self.statements.requeue, key, copy)
    }

    fn requeue_silent(&self, message: &Message<I>) -> Result<(), Error> {
        let id = self.id_of(message);
        let key = id.encode().to_vec();
        let copy = message.requeued_silently(id, SystemTime::now());
        self.put_back("requeue_silent", &self.statements.requeue_silent, key, copy)
    }

    fn orphans(&self, threshold: Duration) -> Result<Option<Vec<Message<I>>>, Error> {
        if !self.cfg.ephemeral.enabled() {
            return Ok(None);
        }
        let cutoff = SystemTime::now()
            .epoch_millis()
            .saturating_sub(threshold.as_millis() as u64);
        let conn = self.connect()?;
        let mut statement = conn.prepare(&self.statements.orphans)?;
        let rows = statement
            .query_map([cutoff as i64], Self::read_row)?
            .collect::<Result<Vec<_>, _>>()?;
        let orphans = rows
            .into_iter()
            .map(Self::to_message)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(count = orphans.len(), cutoff, "scanned for orphans");
        Ok(Some(orphans))
    }

    fn move_to_queue(&self, message: &Message<I>) -> Result<bool, Error> {
        if !self.cfg.ephemeral.enabled() {
            return Ok(false);
        }
        let Some(id) = message.id() else {
            return Ok(false);
        };
        let key = id.encode().to_vec();
        let outcome = retry::run("move_to_queue", self.cfg.max_retries, &self.contention, || {
            let conn = self.connect()?;
            Ok(conn.execute(&self.statements.release, [&key])?)
        })?;
        let moved = matches!(outcome, Outcome::Done(1));
        if moved {
            debug!(?id, "moved message back to queue");
            self.metrics.requeued.inc();
        }
        Ok(moved)
    }

    fn queue_size(&self) -> Result<Option<usize>, Error> {
        let conn = self.connect()?;
        self.count(&conn, &self.statements.visible).map(Some)
    }

    fn ephemeral_size(&self) -> Result<Option<usize>, Error> {
        if !self.cfg.ephemeral.enabled() {
            return Ok(Some(0));
        }
        let conn = self.connect()?;
        self.count(&conn, &self.statements.in_flight).map(Some)
    }
}

impl<I: Id> Relational<I> {
    /// Whether a row with `message`'s id exists at all (visible or in flight).
    #[cfg(test)]
    pub(crate) fn contains(&self, message: &Message<I>) -> Result<bool, Error> {
        use rusqlite::OptionalExtension;

        let Some(id) = message.id() else {
            return Ok(false);
        };
        let conn = self.connect()?;
        let found = conn
            .query_row(
                &format!("SELECT 1 FROM {} WHERE id = ?1", self.cfg.table),
                [id.encode().to_vec()],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}
