//! A queue over a single SQL table that claims rows without an in-process lock.
//!
//! [Relational] stores visible and in-flight messages in the same table (SQLite, in WAL mode).
//! A row is in flight iff its `ephemeral_id` column is non-zero:
//!
//! ```text
//! id BLOB PRIMARY KEY | ephemeral_id | data | timestamp | queue_timestamp | num_requeues | partition_key | taken_at
//! ```
//!
//! # Claiming
//!
//! `take` runs in an immediate transaction. It stamps one visible row with a random
//! `ephemeral_id` (optionally choosing the oldest by `timestamp` when [Config::fifo] is set)
//! and then selects the row back by that value. When ephemeral tracking is disabled the claimed
//! row is deleted before the transaction commits. Because the capacity check runs inside the
//! same transaction, `max_size` is never exceeded.
//!
//! `requeue`, `requeue_silent` and `move_to_queue` only release rows that are currently in
//! flight, so two racing requeues of the same message cannot both apply.
//!
//! # Conflicts
//!
//! There is no in-process lock: every logical operation opens its own connection and is
//! retried as a whole when SQLite reports the database as busy or locked, up to
//! [Config::max_retries] times with a small jittered backoff. A primary key violation means
//! another actor already wrote the same message and is reported as success.
//!
//! FIFO order is best effort: `timestamp` has millisecond resolution and ties are broken by id.
//!
//! # Example
//!
//! ```rust
//! use prometheus_client::registry::Registry;
//! use quay_queue::{relational::{Config, Relational}, Message, Queue};
//!
//! let dir = std::env::temp_dir().join("quay-relational-doc");
//! std::fs::create_dir_all(&dir).unwrap();
//! let mut registry = Registry::default();
//! let cfg = Config::new(dir.join("queue.db"), "jobs");
//! let queue = Relational::<u64>::init(&mut registry, cfg).unwrap();
//!
//! queue.queue(&Message::new("hello")).unwrap();
//! let message = queue.take().unwrap().unwrap();
//! queue.finish(&message).unwrap();
//! # drop(queue);
//! # std::fs::remove_dir_all(dir).unwrap();
//! ```

mod metrics;
mod retry;
mod storage;

use crate::{ephemeral, Error};
pub use metrics::Metrics;
use std::{path::PathBuf, time::Duration};
pub use storage::Relational;

/// Configuration for [Relational].
#[derive(Clone, Debug)]
pub struct Config {
    /// Path of the database file. In-memory databases are rejected: every operation opens its
    /// own connection.
    pub path: PathBuf,

    /// Name of the table (letters, digits and `_`, not starting with a digit).
    pub table: String,

    /// Take the oldest visible row (by original enqueue time) instead of any visible row.
    pub fifo: bool,

    /// Number of times an operation is retried after a conflict before failing with
    /// [Error::ConflictExhausted].
    pub max_retries: usize,

    /// How long a statement waits on a locked database before reporting a conflict.
    pub busy_timeout: Duration,

    /// In-flight tracking.
    pub ephemeral: ephemeral::Config,
}

impl Config {
    /// Configuration with default retry settings, natural order and tracking enabled.
    pub fn new(path: impl Into<PathBuf>, table: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            table: table.into(),
            fifo: false,
            max_retries: 5,
            busy_timeout: Duration::from_secs(5),
            ephemeral: ephemeral::Config::default(),
        }
    }

    fn validate(&self) -> Result<(), Error> {
        let path = self.path.as_os_str();
        if path.is_empty() || path == ":memory:" {
            return Err(Error::Config(format!(
                "relational path must name a file: {:?}",
                self.path
            )));
        }
        let mut chars = self.table.chars();
        let valid = match chars.next() {
            Some(first) => {
                (first.is_ascii_alphabetic() || first == '_')
                    && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            None => false,
        };
        if !valid {
            return Err(Error::Config(format!(
                "invalid relational table name: {:?}",
                self.table
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{conformance, metrics::encode, Message, Queue, StringId};
    use commonware_macros::test_traced;
    use prometheus_client::registry::Registry;
    use rusqlite::Connection;
    use std::{path::Path, sync::Arc};
    use tempfile::TempDir;
    use test_case::test_case;

    fn config(dir: &Path) -> Config {
        Config {
            fifo: true,
            ..Config::new(dir.join("queue.db"), "messages")
        }
    }

    fn init(cfg: Config) -> Relational<u64> {
        let mut registry = Registry::default();
        Relational::init(&mut registry, cfg).unwrap()
    }

    fn tempdir() -> TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test_traced]
    fn test_queue_then_take() {
        let dir = tempdir();
        conformance::queue_then_take(&init(config(dir.path())));
    }

    #[test_traced]
    fn test_take_empty() {
        let dir = tempdir();
        conformance::take_empty(&init(config(dir.path())));
    }

    #[test_traced]
    fn test_finish_clears() {
        let dir = tempdir();
        conformance::finish_clears(&init(config(dir.path())));
    }

    #[test_traced]
    fn test_copies_on_queue() {
        let dir = tempdir();
        conformance::copies_on_queue(&init(config(dir.path())));
    }

    #[test_traced]
    fn test_fifo() {
        let dir = tempdir();
        conformance::fifo(&init(config(dir.path())));
    }

    #[test_traced("INFO")]
    fn test_orphans_after_threshold() {
        let dir = tempdir();
        conformance::orphans_after_threshold(&init(config(dir.path())));
    }

    #[test_traced]
    fn test_ephemeral_bound() {
        let dir = tempdir();
        let queue = init(Config {
            ephemeral: ephemeral::Config::bounded(3),
            ..config(dir.path())
        });
        conformance::ephemeral_bound(&queue, 3);
    }

    #[test_traced]
    fn test_requeue_counts() {
        let dir = tempdir();
        conformance::requeue_counts(&init(config(dir.path())));
    }

    #[test_traced]
    fn test_move_to_queue() {
        let dir = tempdir();
        conformance::move_to_queue(&init(config(dir.path())));
    }

    #[test_traced]
    fn test_ephemeral_disabled() {
        let dir = tempdir();
        let queue = init(Config {
            ephemeral: ephemeral::Config::disabled(),
            ..config(dir.path())
        });
        conformance::ephemeral_disabled(&queue);
    }

    #[test_traced("INFO")]
    fn test_concurrent_drain() {
        let dir = tempdir();
        let queue = Arc::new(init(config(dir.path())));
        conformance::concurrent_drain(queue, 2, 2, 25);
    }

    #[test_traced]
    fn test_requeue_while_taking() {
        let dir = tempdir();
        conformance::requeue_while_taking(&init(config(dir.path())), 2, 20);
    }

    #[test_traced]
    fn test_duplicate_queue_is_success() {
        let dir = tempdir();
        let queue = init(config(dir.path()));
        queue.queue(&Message::with_id(1, "first")).unwrap();
        queue.queue(&Message::with_id(1, "second")).unwrap();
        assert_eq!(queue.queue_size().unwrap(), Some(1));

        // The original row is untouched
        let taken = queue.take().unwrap().unwrap();
        assert_eq!(taken.data().as_ref(), b"first");
        queue.finish(&taken).unwrap();
        assert!(queue.take().unwrap().is_none());
    }

    #[test_traced]
    fn test_double_requeue() {
        let dir = tempdir();
        let queue = init(config(dir.path()));
        queue.queue(&Message::with_id(5, "job")).unwrap();
        let taken = queue.take().unwrap().unwrap();

        // The second requeue finds the row already visible
        queue.requeue(&taken).unwrap();
        queue.requeue(&taken).unwrap();
        assert_eq!(queue.queue_size().unwrap(), Some(1));
        assert_eq!(queue.ephemeral_size().unwrap(), Some(0));

        let taken = queue.take().unwrap().unwrap();
        assert_eq!(taken.num_requeues(), 1);
    }

    #[test_traced]
    fn test_requeue_after_finish_reinserts() {
        let dir = tempdir();
        let queue = init(config(dir.path()));
        queue.queue(&Message::with_id(9, "job")).unwrap();
        let taken = queue.take().unwrap().unwrap();
        queue.finish(&taken).unwrap();
        assert!(!queue.contains(&taken).unwrap());

        queue.requeue(&taken).unwrap();
        assert!(queue.contains(&taken).unwrap());
        let again = queue.take().unwrap().unwrap();
        assert_eq!(again.id(), Some(&9));
        assert_eq!(again.num_requeues(), 1);
    }

    #[test_traced]
    fn test_fifo_prefers_oldest() {
        let dir = tempdir();
        let queue = init(config(dir.path()));
        for i in 0..3u8 {
            queue.queue(&Message::new(vec![i])).unwrap();
        }

        // A requeued message keeps its original enqueue time
        let first = queue.take().unwrap().unwrap();
        queue.requeue_silent(&first).unwrap();
        let again = queue.take().unwrap().unwrap();
        assert_eq!(again.id(), first.id());
        assert_eq!(again.data().as_ref(), &[0]);
    }

    #[test_traced]
    fn test_conflict_exhausted() {
        let dir = tempdir();
        let cfg = Config {
            max_retries: 2,
            busy_timeout: Duration::ZERO,
            ..config(dir.path())
        };
        let mut registry = Registry::default();
        let queue = Relational::<u64>::init(&mut registry, cfg.clone()).unwrap();

        // Hold the write lock from another connection
        let blocker = Connection::open(&cfg.path).unwrap();
        blocker.execute_batch("BEGIN IMMEDIATE").unwrap();
        assert!(matches!(
            queue.queue(&Message::new("blocked")),
            Err(Error::ConflictExhausted {
                op: "queue",
                attempts: 3
            })
        ));
        let buffer = encode(&registry);
        assert!(buffer.contains("conflicts_total 3"));
        assert!(buffer.contains("retries_total 2"));

        // Released
        blocker.execute_batch("COMMIT").unwrap();
        queue.queue(&Message::new("unblocked")).unwrap();
        assert_eq!(queue.queue_size().unwrap(), Some(1));
    }

    #[test_traced]
    fn test_shared_between_instances() {
        let dir = tempdir();
        let producer = init(config(dir.path()));
        let consumer = init(config(dir.path()));

        producer.queue(&Message::with_id(1, "shared")).unwrap();
        let taken = consumer.take().unwrap().unwrap();
        assert_eq!(taken.data().as_ref(), b"shared");
        assert_eq!(producer.ephemeral_size().unwrap(), Some(1));

        // Either instance can acknowledge
        producer.finish(&taken).unwrap();
        assert_eq!(consumer.ephemeral_size().unwrap(), Some(0));
    }

    #[test_traced]
    fn test_natural_order() {
        let dir = tempdir();
        let queue = init(Config {
            fifo: false,
            ..config(dir.path())
        });
        for i in 0..3u8 {
            queue.queue(&Message::new(vec![i])).unwrap();
        }

        let mut taken = Vec::new();
        while let Some(message) = queue.take().unwrap() {
            taken.push(message);
        }
        let mut payloads: Vec<_> = taken.iter().map(|m| m.data()[0]).collect();
        payloads.sort();
        assert_eq!(payloads, vec![0, 1, 2]);
        assert_eq!(queue.queue_size().unwrap(), Some(0));
        assert_eq!(queue.ephemeral_size().unwrap(), Some(3));

        for message in &taken {
            queue.finish(message).unwrap();
        }
        assert!(queue.take().unwrap().is_none());
        assert_eq!(queue.ephemeral_size().unwrap(), Some(0));
    }

    #[test_traced]
    fn test_string_ids() {
        let dir = tempdir();
        let mut registry = Registry::default();
        let queue = Relational::<StringId>::init(&mut registry, config(dir.path())).unwrap();
        queue
            .queue(&Message::with_id(StringId::from("order-1"), "a").with_partition_key("eu"))
            .unwrap();
        queue.queue(&Message::new("b")).unwrap();

        let first = queue.take().unwrap().unwrap();
        assert_eq!(first.id().map(StringId::as_str), Some("order-1"));
        assert_eq!(first.partition_key(), Some("eu"));
        let second = queue.take().unwrap().unwrap();
        assert!(second.id().is_some());
        assert_eq!(second.partition_key(), None);
    }

    #[test_case("" ; "empty")]
    #[test_case("1table" ; "leading digit")]
    #[test_case("messages; DROP TABLE x" ; "injection")]
    #[test_case("with-dash" ; "dash")]
    fn test_invalid_table(table: &str) {
        let dir = tempdir();
        let mut registry = Registry::default();
        let result = Relational::<u64>::init(
            &mut registry,
            Config::new(dir.path().join("queue.db"), table),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test_case("" ; "empty")]
    #[test_case(":memory:" ; "in memory")]
    fn test_invalid_path(path: &str) {
        let mut registry = Registry::default();
        let result = Relational::<u64>::init(&mut registry, Config::new(path, "messages"));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test_traced]
    fn test_metrics() {
        let dir = tempdir();
        let mut registry = Registry::default();
        let queue = Relational::<u64>::init(&mut registry, config(dir.path())).unwrap();
        queue.queue(&Message::new("a")).unwrap();
        queue.queue(&Message::new("b")).unwrap();
        let taken = queue.take().unwrap().unwrap();
        queue.requeue(&taken).unwrap();
        let taken = queue.take().unwrap().unwrap();
        queue.finish(&taken).unwrap();

        let buffer = encode(&registry);
        assert!(buffer.contains("queued_total 2"));
        assert!(buffer.contains("taken_total 2"));
        assert!(buffer.contains("requeued_total 1"));
        assert!(buffer.contains("finished_total 1"));
        assert!(buffer.contains("conflicts_total 0"));
    }
}
