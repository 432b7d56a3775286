//! Bounded retry of logical operations on storage contention.

use super::metrics::Metrics;
use crate::Error;
use rand::Rng;
use rusqlite::{ffi, ErrorCode};
use std::{thread, time::Duration};
use tracing::warn;

/// Base delay between attempts (multiplied by the attempt number).
const BACKOFF: Duration = Duration::from_millis(5);

/// Upper bound of the random delay added to each backoff.
const JITTER_MILLIS: u64 = 5;

/// How a failed attempt should be handled.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Signal {
    /// Transient contention: retry the whole operation.
    Conflict,
    /// The row already exists: another actor completed the same write.
    Duplicate,
    /// Anything else.
    Fatal,
}

/// Result of a logical operation that completed without error.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Outcome<T> {
    Done(T),
    Duplicate,
}

/// Classify an error returned by an attempt.
pub(crate) fn classify(err: &Error) -> Signal {
    let Error::Sql(rusqlite::Error::SqliteFailure(failure, _)) = err else {
        return Signal::Fatal;
    };
    match failure.code {
        ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => Signal::Conflict,
        ErrorCode::ConstraintViolation
            if failure.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                || failure.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            Signal::Duplicate
        }
        _ => Signal::Fatal,
    }
}

/// Run `attempt` until it succeeds, fails with anything but a conflict, or has been tried
/// `max_retries + 1` times.
///
/// Each attempt must be a complete logical operation (its own connection and transaction) so
/// that retrying it from the start is safe.
pub(crate) fn run<T>(
    op: &'static str,
    max_retries: usize,
    metrics: &Metrics,
    mut attempt: impl FnMut() -> Result<T, Error>,
) -> Result<Outcome<T>, Error> {
    let attempts = max_retries.saturating_add(1);
    let mut rng = rand::thread_rng();
    for current in 1..=attempts {
        let err = match attempt() {
            Ok(value) => return Ok(Outcome::Done(value)),
            Err(err) => err,
        };
        match classify(&err) {
            Signal::Duplicate => return Ok(Outcome::Duplicate),
            Signal::Fatal => return Err(err),
            Signal::Conflict => {
                metrics.conflicts.inc();
                if current == attempts {
                    break;
                }
                metrics.retries.inc();
                let delay = BACKOFF * current as u32
                    + Duration::from_millis(rng.gen_range(0..=JITTER_MILLIS));
                warn!(op, attempt = current, ?delay, ?err, "conflict, retrying");
                thread::sleep(delay);
            }
        }
    }
    warn!(op, attempts, "conflict retries exhausted");
    Err(Error::ConflictExhausted { op, attempts })
}
