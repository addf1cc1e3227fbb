//! # Retry-Safe Persistence
//!
//! Every write in the engine is a *unit of work* run inside one SQLite
//! transaction. SQLite allows a single writer; a second writer gets
//! SQLITE_BUSY once the busy timeout elapses. Instead of surfacing that as a
//! hard failure, the whole unit of work is rolled back and re-run.
//!
//! Transactions start with `BEGIN IMMEDIATE`, taking the write lock up
//! front. A deferred transaction that reads first and then writes cannot
//! wait out a concurrent commit in WAL mode (SQLITE_BUSY_SNAPSHOT comes back
//! at once); an immediate one queues on the busy timeout instead.
//!
//! ## Attempt Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  attempt 1 ── BEGIN IMMEDIATE ─► unit(conn) ─► COMMIT ───► Ok(value)    │
//! │                  │                      │                               │
//! │                  └──── Locked ──────────┘                               │
//! │                           │                                             │
//! │                    ROLLBACK, sleep(base_delay × 1)                      │
//! │                           │                                             │
//! │  attempt 2 ── ...         ▼          sleep(base_delay × 2)              │
//! │                                                                         │
//! │  attempt N fails Locked ─────────────────► Err(RetriesExhausted)        │
//! │  any other error ─► ROLLBACK ────────────► Err(error) (no retry)        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The unit of work is a closure so it can be re-run from scratch; it must
//! only capture owned data.

use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use sqlx::{Connection, SqliteConnection, SqlitePool};
use tracing::{debug, error, warn};

use crate::error::{DbError, DbResult};

/// Retry budget for write transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts before giving up.
    pub max_retries: u32,
    /// Linear backoff unit: attempt `n` sleeps `n × base_delay`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        RetryPolicy {
            max_retries: max_retries.max(1),
            base_delay,
        }
    }

    /// Backoff after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// Runs `unit` in a transaction on `pool`, retrying lock failures.
pub(crate) async fn run_with_retry<T, F>(
    pool: &SqlitePool,
    policy: RetryPolicy,
    operation: &str,
    mut unit: F,
) -> DbResult<T>
where
    F: for<'c> FnMut(&'c mut SqliteConnection) -> BoxFuture<'c, DbResult<T>>,
{
    let attempts = policy.max_retries.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match run_once(pool, &mut unit).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "Write succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_locked() => {
                if attempt >= attempts {
                    error!(operation, attempts = attempt, error = %err, "Giving up on locked database");
                    return Err(DbError::RetriesExhausted {
                        operation: operation.to_string(),
                        attempts: attempt,
                    });
                }

                let delay = policy.delay_for(attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Database locked, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// One attempt: BEGIN IMMEDIATE, unit of work, COMMIT (or ROLLBACK on any
/// error).
async fn run_once<T, F>(pool: &SqlitePool, unit: &mut F) -> DbResult<T>
where
    F: for<'c> FnMut(&'c mut SqliteConnection) -> BoxFuture<'c, DbResult<T>>,
{
    let mut tx = pool.begin_with("BEGIN IMMEDIATE").await?;

    match unit(&mut *tx).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "Rollback failed");
            }
            Err(err)
        }
    }
}

/// Runs `unit` in a savepoint on a connection that already has a
/// transaction open. A failing unit only undoes its own statements.
pub(crate) async fn savepoint<T, F>(conn: &mut SqliteConnection, unit: F) -> DbResult<T>
where
    F: for<'s> FnOnce(&'s mut SqliteConnection) -> BoxFuture<'s, DbResult<T>>,
{
    let mut sp = conn.begin().await?;

    match unit(&mut *sp).await {
        Ok(value) => {
            sp.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = sp.rollback().await {
                warn!(error = %rollback_err, "Savepoint rollback failed");
            }
            Err(err)
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::{TimeZone, Utc};
    use meridian_core::{FixedClock, Money};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    async fn test_db() -> Database {
        Database::new(DbConfig::in_memory())
            .await
            .unwrap()
            .with_retry(RetryPolicy::new(3, Duration::from_millis(1)))
    }

    async fn category_count(db: &Database) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM categories")
            .fetch_one(db.pool())
            .await
            .unwrap()
    }

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(3), Duration::from_millis(300));
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_retries, 1);
    }

    #[tokio::test]
    async fn test_lock_then_success_reruns_unit_of_work() {
        let db = test_db().await;
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result = db
            .write("insert_category", move |conn| {
                let counter = counter.clone();
                Box::pin(async move {
                    sqlx::query("INSERT INTO categories (name, tax_rate_bps) VALUES ('Drinks', 1400)")
                        .execute(&mut *conn)
                        .await?;
                    // First attempt hits contention after its insert
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        return Err(DbError::Locked("database is locked".into()));
                    }
                    Ok("done")
                })
            })
            .await
            .unwrap();

        assert_eq!(result, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // The failed attempt was rolled back, so exactly one row exists
        assert_eq!(category_count(&db).await, 1);
    }

    #[tokio::test]
    async fn test_lock_exhaustion() {
        let db = test_db().await;
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let err = db
            .write("always_locked", move |_conn| {
                let counter = counter.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(DbError::Locked("database is locked".into()))
                })
            })
            .await
            .unwrap_err();

        assert!(matches!(err, DbError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let db = test_db().await;
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let err = db
            .write("bad_insert", move |conn| {
                let counter = counter.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    sqlx::query("INSERT INTO categories (name, tax_rate_bps) VALUES ('Drinks', 1400)")
                        .execute(&mut *conn)
                        .await?;
                    // Out of range tax rate violates the CHECK constraint
                    sqlx::query("INSERT INTO categories (name, tax_rate_bps) VALUES ('Bad', 20000)")
                        .execute(&mut *conn)
                        .await?;
                    Ok::<(), DbError>(())
                })
            })
            .await
            .unwrap_err();

        assert!(!err.is_locked());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(category_count(&db).await, 0);
    }

    #[tokio::test]
    async fn test_failed_savepoint_keeps_outer_work() {
        let db = test_db().await;

        db.write("savepoints", |conn| {
            Box::pin(async move {
                sqlx::query("INSERT INTO categories (name, tax_rate_bps) VALUES ('Food', 500)")
                    .execute(&mut *conn)
                    .await?;
                let failed = savepoint(&mut *conn, |sp| {
                    Box::pin(async move {
                        sqlx::query("INSERT INTO categories (name, tax_rate_bps) VALUES ('Tmp', 0)")
                            .execute(&mut *sp)
                            .await?;
                        Err::<(), _>(DbError::Internal("row failed".into()))
                    })
                })
                .await;
                assert!(failed.is_err());
                Ok::<(), DbError>(())
            })
        })
        .await
        .unwrap();

        assert_eq!(category_count(&db).await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_tills_on_a_wal_file() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap(),
        ));
        let db = Database::new(DbConfig::new(dir.path().join("till.db")).max_connections(8))
            .await
            .unwrap()
            .with_clock(clock);
        let cashier = db.users().create("cashier", "till-pass", "cashier").await.unwrap();
        let manager = db.users().create("manager", "boss-pass", "manager").await.unwrap();

        let mut creates = Vec::new();
        for _ in 0..5 {
            let orders = db.orders();
            let user = cashier.clone();
            creates.push(tokio::spawn(async move {
                orders.create_order(&user, None, None).await
            }));
        }
        let mut numbers = Vec::new();
        for task in creates {
            numbers.push(task.await.unwrap().unwrap().order_number);
        }
        numbers.sort();
        let expected: Vec<String> = (1..=5).map(|n| format!("ORD-20250101-{n:03}")).collect();
        assert_eq!(numbers, expected);

        let mut opens = Vec::new();
        for round in 0..6 {
            let shifts = db.shifts();
            let user = if round % 2 == 0 { cashier.clone() } else { manager.clone() };
            opens.push(tokio::spawn(async move {
                shifts.open_shift(&user, Money::from_cents(1_000)).await
            }));
        }
        let mut opened = 0;
        for task in opens {
            if task.await.unwrap().unwrap().is_some() {
                opened += 1;
            }
        }
        assert_eq!(opened, 1);

        let open_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM shifts WHERE status = 'open'")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(open_rows, 1);

        db.close().await;
    }
}
