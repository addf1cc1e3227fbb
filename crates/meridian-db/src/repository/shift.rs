//! Shift Repository

use chrono::{DateTime, Utc};
use sqlx::{Executor, Sqlite};

use crate::error::DbResult;
use meridian_core::Shift;

const SELECT_SHIFT: &str = "SELECT id, user_id, open_time, close_time, opening_amount_cents, \
    closing_amount_cents, status FROM shifts";

pub async fn find_by_id<'e, E>(executor: E, id: i64) -> DbResult<Option<Shift>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let shift = sqlx::query_as::<_, Shift>(&format!("{SELECT_SHIFT} WHERE id = ?"))
        .bind(id)
        .fetch_optional(executor)
        .await?;
    Ok(shift)
}

pub async fn find_open_for_user<'e, E>(executor: E, user_id: i64) -> DbResult<Option<Shift>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let shift = sqlx::query_as::<_, Shift>(&format!(
        "{SELECT_SHIFT} WHERE user_id = ? AND status = 'open' ORDER BY open_time DESC LIMIT 1"
    ))
    .bind(user_id)
    .fetch_optional(executor)
    .await?;
    Ok(shift)
}

/// Global single shift: whichever shift is open, for any user.
pub async fn find_any_open<'e, E>(executor: E) -> DbResult<Option<Shift>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let shift = sqlx::query_as::<_, Shift>(&format!("{SELECT_SHIFT} WHERE status = 'open' LIMIT 1"))
        .fetch_optional(executor)
        .await?;
    Ok(shift)
}

pub async fn history<'e, E>(executor: E, user_id: i64, limit: u32) -> DbResult<Vec<Shift>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let shifts = sqlx::query_as::<_, Shift>(&format!(
        "{SELECT_SHIFT} WHERE user_id = ? ORDER BY open_time DESC, id DESC LIMIT ?"
    ))
    .bind(user_id)
    .bind(limit as i64)
    .fetch_all(executor)
    .await?;
    Ok(shifts)
}

pub async fn insert_open<'e, E>(
    executor: E,
    user_id: i64,
    opening_amount_cents: i64,
    now: DateTime<Utc>,
) -> DbResult<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO shifts (user_id, open_time, opening_amount_cents, status) \
         VALUES (?, ?, ?, 'open') RETURNING id",
    )
    .bind(user_id)
    .bind(now)
    .bind(opening_amount_cents)
    .fetch_one(executor)
    .await?;
    Ok(id)
}

/// OPEN → CLOSED. Returns rows affected (0 when already closed).
pub async fn close<'e, E>(
    executor: E,
    id: i64,
    closing_amount_cents: i64,
    now: DateTime<Utc>,
) -> DbResult<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE shifts SET status = 'closed', close_time = ?, closing_amount_cents = ? \
         WHERE id = ? AND status = 'open'",
    )
    .bind(now)
    .bind(closing_amount_cents)
    .bind(id)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}
