//! # Sale Repository
//!
//! SQL for `sales` and `sale_products`.
//!
//! ```text
//!   insert()       ──► sales row (id = SALE-NNNNNN source)
//!   insert_item()  ──► one sale_products row per cart line
//!   link_order()   ──► sales.order_id once the order side is written
//!   find_recent_duplicate() ──► idempotency probe (same user, recent,
//!                               total within tolerance)
//! ```

use chrono::{DateTime, Utc};
use sqlx::{Executor, Sqlite};

use crate::error::DbResult;
use meridian_core::{Money, Sale, SaleLineItem};

const SELECT_SALE: &str =
    "SELECT id, total_cents, user_id, payment_method, timestamp, order_id FROM sales";

pub async fn find_by_id<'e, E>(executor: E, id: i64) -> DbResult<Option<Sale>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sale = sqlx::query_as::<_, Sale>(&format!("{SELECT_SALE} WHERE id = ?"))
        .bind(id)
        .fetch_optional(executor)
        .await?;
    Ok(sale)
}

/// Most recent sale by `user_id` since `since` whose total is within
/// `tolerance` of `total`.
pub async fn find_recent_duplicate<'e, E>(
    executor: E,
    user_id: i64,
    total: Money,
    tolerance: Money,
    since: DateTime<Utc>,
) -> DbResult<Option<Sale>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let tolerance = tolerance.abs().cents();
    let sale = sqlx::query_as::<_, Sale>(&format!(
        "{SELECT_SALE} WHERE user_id = ? AND timestamp >= ? AND total_cents BETWEEN ? AND ? \
         ORDER BY timestamp DESC, id DESC LIMIT 1"
    ))
    .bind(user_id)
    .bind(since)
    .bind(total.cents().saturating_sub(tolerance))
    .bind(total.cents().saturating_add(tolerance))
    .fetch_optional(executor)
    .await?;
    Ok(sale)
}

/// Sales in `[from, to)`, oldest first.
pub async fn list_between<'e, E>(
    executor: E,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> DbResult<Vec<Sale>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sales = sqlx::query_as::<_, Sale>(&format!(
        "{SELECT_SALE} WHERE timestamp >= ? AND timestamp < ? ORDER BY timestamp, id"
    ))
    .bind(from)
    .bind(to)
    .fetch_all(executor)
    .await?;
    Ok(sales)
}

pub async fn items<'e, E>(executor: E, sale_id: i64) -> DbResult<Vec<SaleLineItem>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let items = sqlx::query_as::<_, SaleLineItem>(
        "SELECT id, sale_id, product_id, quantity, price_at_sale_cents FROM sale_products \
         WHERE sale_id = ? ORDER BY id",
    )
    .bind(sale_id)
    .fetch_all(executor)
    .await?;
    Ok(items)
}

pub async fn insert<'e, E>(
    executor: E,
    user_id: i64,
    total: Money,
    payment_method: Option<&str>,
    timestamp: DateTime<Utc>,
) -> DbResult<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO sales (total_cents, user_id, payment_method, timestamp) \
         VALUES (?, ?, ?, ?) RETURNING id",
    )
    .bind(total.cents())
    .bind(user_id)
    .bind(payment_method)
    .bind(timestamp)
    .fetch_one(executor)
    .await?;
    Ok(id)
}

pub async fn link_order<'e, E>(executor: E, sale_id: i64, order_id: i64) -> DbResult<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("UPDATE sales SET order_id = ? WHERE id = ?")
        .bind(order_id)
        .bind(sale_id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

pub async fn insert_item<'e, E>(
    executor: E,
    sale_id: i64,
    product_id: i64,
    quantity: i64,
    price_at_sale_cents: i64,
) -> DbResult<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO sale_products (sale_id, product_id, quantity, price_at_sale_cents) \
         VALUES (?, ?, ?, ?) RETURNING id",
    )
    .bind(sale_id)
    .bind(product_id)
    .bind(quantity)
    .bind(price_at_sale_cents)
    .fetch_one(executor)
    .await?;
    Ok(id)
}
