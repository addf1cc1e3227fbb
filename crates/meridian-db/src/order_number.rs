//! # Order Number Allocator
//!
//! Derives the next `ORD-YYYYMMDD-NNN` number inside the caller's write
//! transaction.
//!
//! ```text
//!   scan numbers with today's prefix ─► max parsed suffix + 1
//!        │                                   │
//!        │ (non-lock error)                  ▼
//!        ▼                           probe: taken? ─yes─► +1, probe again
//!   fallback ORD-{YYYYMMDDHHMMSS}-{8hex}     │no
//!   (probed the same way)                    ▼
//!                                         number
//! ```
//!
//! The scan is not a reservation. Two writers can derive the same number;
//! the UNIQUE index on `orders.order_number` rejects the second insert and
//! `OrderLifecycleManager` allocates again.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqliteConnection;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::DbResult;
use crate::repository::order;
use meridian_core::order_number::{daily_prefix, fallback_number, format_daily, next_daily_sequence};

/// Fallback candidates tried before giving the last one to the UNIQUE index.
const FALLBACK_ATTEMPTS: u32 = 5;

/// Allocates the next free daily number for `today`.
///
/// Lock errors propagate so the surrounding write is retried; any other
/// scan failure falls back to a timestamped random number.
pub async fn allocate(
    conn: &mut SqliteConnection,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> DbResult<String> {
    match next_daily(conn, today).await {
        Ok(number) => {
            debug!(order_number = %number, "Allocated order number");
            Ok(number)
        }
        Err(err) if err.is_locked() => Err(err),
        Err(err) => {
            warn!(error = %err, "Order number scan failed, using fallback");
            fallback(conn, now).await
        }
    }
}

async fn next_daily(conn: &mut SqliteConnection, today: NaiveDate) -> DbResult<String> {
    let prefix = daily_prefix(today);
    let existing = order::numbers_with_prefix(&mut *conn, &prefix).await?;
    let mut sequence = next_daily_sequence(&prefix, existing.iter().map(String::as_str));

    loop {
        let candidate = format_daily(today, sequence);
        if !order::number_exists(&mut *conn, &candidate).await? {
            return Ok(candidate);
        }
        sequence = sequence.saturating_add(1);
    }
}

async fn fallback(conn: &mut SqliteConnection, now: DateTime<Utc>) -> DbResult<String> {
    let mut candidate = random_fallback(now);

    for _ in 1..FALLBACK_ATTEMPTS {
        match order::number_exists(&mut *conn, &candidate).await {
            Ok(false) => break,
            Ok(true) => candidate = random_fallback(now),
            Err(err) if err.is_locked() => return Err(err),
            // The UNIQUE index still guards the insert
            Err(_) => break,
        }
    }

    Ok(candidate)
}

fn random_fallback(now: DateTime<Utc>) -> String {
    let token = Uuid::new_v4().as_u128() as u32;
    fallback_number(now, token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::TimeZone;

    async fn insert_number(db: &Database, number: &str) {
        sqlx::query(
            "INSERT INTO orders (order_number, status, created_at, updated_at) \
             VALUES (?, 'active', '2025-01-01T00:00:00+00:00', '2025-01-01T00:00:00+00:00')",
        )
        .bind(number)
        .execute(db.pool())
        .await
        .unwrap();
    }

    fn new_year() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
    }

    #[tokio::test]
    async fn test_first_number_of_the_day() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap();

        let number = allocate(&mut conn, new_year(), now).await.unwrap();
        assert_eq!(number, "ORD-20250101-001");
    }

    #[tokio::test]
    async fn test_skips_malformed_and_other_days() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        insert_number(&db, "ORD-20250101-004").await;
        insert_number(&db, "ORD-20250101-xyz").await;
        insert_number(&db, "ORD-20241231-050").await;
        insert_number(&db, "SALE-000009").await;

        let mut conn = db.pool().acquire().await.unwrap();
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap();
        let number = allocate(&mut conn, new_year(), now).await.unwrap();
        assert_eq!(number, "ORD-20250101-005");
    }

    #[test]
    fn test_fallback_shape() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 9, 30, 15).unwrap();
        let number = random_fallback(now);
        assert!(number.starts_with("ORD-20250101093015-"));
        assert_eq!(number.len(), "ORD-20250101093015-".len() + 8);
    }
}
