//! # Order Repository
//!
//! SQL for `orders` and `order_products`. Every function takes an executor
//! so the lifecycle manager can run it inside its write transaction and
//! readers can run it straight on the pool.
//!
//! State checks live in the `UPDATE ... WHERE status = 'active'` clauses:
//! a zero `rows_affected` means another writer got there first.

use chrono::{DateTime, Utc};
use sqlx::{Executor, Sqlite, SqliteConnection};
use tracing::debug;

use crate::error::DbResult;
use meridian_core::pricing::OrderTotals;
use meridian_core::{Order, OrderLineItem, OrderStatus};

const SELECT_ORDER: &str = "SELECT id, order_number, status, customer_name, notes, \
    subtotal_cents, discount_cents, tax_cents, total_cents, user_id, archived, archived_at, \
    created_at, updated_at, completed_at, cancelled_at, cancelled_by, cancelled_reason \
    FROM orders";

const SELECT_ITEM: &str =
    "SELECT id, order_id, product_id, quantity, price_at_order_cents, notes FROM order_products";

/// Column values for a new `orders` row.
#[derive(Debug, Clone)]
pub struct OrderInsert {
    pub order_number: String,
    pub status: OrderStatus,
    pub customer_name: Option<String>,
    pub notes: Option<String>,
    pub totals: OrderTotals,
    pub user_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Lookups
// =============================================================================

pub async fn find_by_id<'e, E>(executor: E, id: i64) -> DbResult<Option<Order>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let order = sqlx::query_as::<_, Order>(&format!("{SELECT_ORDER} WHERE id = ?"))
        .bind(id)
        .fetch_optional(executor)
        .await?;
    Ok(order)
}

pub async fn find_by_number<'e, E>(executor: E, number: &str) -> DbResult<Option<Order>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let order = sqlx::query_as::<_, Order>(&format!("{SELECT_ORDER} WHERE order_number = ?"))
        .bind(number)
        .fetch_optional(executor)
        .await?;
    Ok(order)
}

/// All order numbers starting with `prefix`.
pub async fn numbers_with_prefix<'e, E>(executor: E, prefix: &str) -> DbResult<Vec<String>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let numbers = sqlx::query_scalar::<_, String>(
        "SELECT order_number FROM orders WHERE substr(order_number, 1, length(?1)) = ?1",
    )
    .bind(prefix)
    .fetch_all(executor)
    .await?;
    Ok(numbers)
}

pub async fn number_exists<'e, E>(executor: E, number: &str) -> DbResult<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let exists: i64 =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM orders WHERE order_number = ?)")
            .bind(number)
            .fetch_one(executor)
            .await?;
    Ok(exists != 0)
}

/// Non-archived orders in `status`, newest first.
pub async fn list_by_status<'e, E>(executor: E, status: OrderStatus) -> DbResult<Vec<Order>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let orders = sqlx::query_as::<_, Order>(&format!(
        "{SELECT_ORDER} WHERE status = ? AND archived = 0 AND \
         (notes IS NULL OR substr(notes, 1, 10) <> '[ARCHIVED]') \
         ORDER BY created_at DESC, id DESC"
    ))
    .bind(status)
    .fetch_all(executor)
    .await?;
    Ok(orders)
}

/// Every non-archived order, newest first.
pub async fn list_unarchived<'e, E>(executor: E) -> DbResult<Vec<Order>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let orders = sqlx::query_as::<_, Order>(&format!(
        "{SELECT_ORDER} WHERE archived = 0 ORDER BY created_at DESC, id DESC"
    ))
    .fetch_all(executor)
    .await?;
    Ok(orders)
}

/// Orders created in `[from, to)`, archived ones included.
pub async fn list_between<'e, E>(
    executor: E,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> DbResult<Vec<Order>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let orders = sqlx::query_as::<_, Order>(&format!(
        "{SELECT_ORDER} WHERE created_at >= ? AND created_at < ? ORDER BY created_at, id"
    ))
    .bind(from)
    .bind(to)
    .fetch_all(executor)
    .await?;
    Ok(orders)
}

/// Terminal orders last touched before `cutoff`.
pub async fn expired_terminal_ids<'e, E>(executor: E, cutoff: DateTime<Utc>) -> DbResult<Vec<i64>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let ids = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM orders WHERE status IN ('completed', 'cancelled') AND updated_at < ? \
         ORDER BY id",
    )
    .bind(cutoff)
    .fetch_all(executor)
    .await?;
    Ok(ids)
}

pub async fn items<'e, E>(executor: E, order_id: i64) -> DbResult<Vec<OrderLineItem>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let items = sqlx::query_as::<_, OrderLineItem>(&format!(
        "{SELECT_ITEM} WHERE order_id = ? ORDER BY id"
    ))
    .bind(order_id)
    .fetch_all(executor)
    .await?;
    Ok(items)
}

// =============================================================================
// Writes
// =============================================================================

pub async fn insert<'e, E>(executor: E, row: &OrderInsert) -> DbResult<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    debug!(order_number = %row.order_number, status = %row.status, "Inserting order");

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO orders (order_number, status, customer_name, notes, \
            subtotal_cents, discount_cents, tax_cents, total_cents, user_id, \
            archived, created_at, updated_at, completed_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?) RETURNING id",
    )
    .bind(&row.order_number)
    .bind(row.status)
    .bind(&row.customer_name)
    .bind(&row.notes)
    .bind(row.totals.subtotal.cents())
    .bind(row.totals.discount.cents())
    .bind(row.totals.tax.cents())
    .bind(row.totals.total.cents())
    .bind(row.user_id)
    .bind(row.created_at)
    .bind(row.created_at)
    .bind(row.completed_at)
    .fetch_one(executor)
    .await?;
    Ok(id)
}

pub async fn insert_item<'e, E>(
    executor: E,
    order_id: i64,
    product_id: i64,
    quantity: i64,
    price_at_order_cents: i64,
    notes: Option<&str>,
) -> DbResult<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO order_products (order_id, product_id, quantity, price_at_order_cents, notes) \
         VALUES (?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(order_id)
    .bind(product_id)
    .bind(quantity)
    .bind(price_at_order_cents)
    .bind(notes)
    .fetch_one(executor)
    .await?;
    Ok(id)
}

pub async fn delete_items<'e, E>(executor: E, order_id: i64) -> DbResult<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM order_products WHERE order_id = ?")
        .bind(order_id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

pub async fn delete_product_items<'e, E>(executor: E, order_id: i64, product_id: i64) -> DbResult<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM order_products WHERE order_id = ? AND product_id = ?")
        .bind(order_id)
        .bind(product_id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

pub async fn update_totals<'e, E>(
    executor: E,
    order_id: i64,
    totals: &OrderTotals,
    now: DateTime<Utc>,
) -> DbResult<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "UPDATE orders SET subtotal_cents = ?, discount_cents = ?, tax_cents = ?, \
         total_cents = ?, updated_at = ? WHERE id = ?",
    )
    .bind(totals.subtotal.cents())
    .bind(totals.discount.cents())
    .bind(totals.tax.cents())
    .bind(totals.total.cents())
    .bind(now)
    .bind(order_id)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn update_details<'e, E>(
    executor: E,
    order_id: i64,
    customer_name: Option<&str>,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> DbResult<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE orders SET customer_name = ?, notes = ?, updated_at = ? \
         WHERE id = ? AND status = 'active'",
    )
    .bind(customer_name)
    .bind(notes)
    .bind(now)
    .bind(order_id)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

/// ACTIVE → COMPLETED. Returns rows affected (0 when not ACTIVE).
pub async fn mark_completed<'e, E>(executor: E, order_id: i64, now: DateTime<Utc>) -> DbResult<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE orders SET status = 'completed', completed_at = ?1, updated_at = ?1 \
         WHERE id = ?2 AND status = 'active'",
    )
    .bind(now)
    .bind(order_id)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

/// ACTIVE → CANCELLED. Returns rows affected (0 when not ACTIVE).
pub async fn mark_cancelled<'e, E>(
    executor: E,
    order_id: i64,
    actor_id: i64,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> DbResult<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE orders SET status = 'cancelled', cancelled_at = ?1, updated_at = ?1, \
         cancelled_by = ?2, cancelled_reason = ?3 WHERE id = ?4 AND status = 'active'",
    )
    .bind(now)
    .bind(actor_id)
    .bind(reason)
    .bind(order_id)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

/// Forces an open (ACTIVE or PENDING) order into CANCELLED.
pub async fn force_cancel<'e, E>(
    executor: E,
    order_id: i64,
    actor_id: i64,
    reason: &str,
    now: DateTime<Utc>,
) -> DbResult<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE orders SET status = 'cancelled', cancelled_at = ?1, updated_at = ?1, \
         cancelled_by = ?2, cancelled_reason = ?3 \
         WHERE id = ?4 AND status IN ('active', 'pending')",
    )
    .bind(now)
    .bind(actor_id)
    .bind(reason)
    .bind(order_id)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

/// Sets the archive flag and the notes marker.
pub async fn mark_archived<'e, E>(
    executor: E,
    order_id: i64,
    notes: &str,
    now: DateTime<Utc>,
) -> DbResult<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE orders SET archived = 1, archived_at = ?1, notes = ?2, updated_at = ?1 \
         WHERE id = ?3 AND archived = 0",
    )
    .bind(now)
    .bind(notes)
    .bind(order_id)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

/// Hard-deletes an order, line items first.
pub async fn delete_with_items(conn: &mut SqliteConnection, order_id: i64) -> DbResult<u64> {
    delete_items(&mut *conn, order_id).await?;
    let result = sqlx::query("DELETE FROM orders WHERE id = ?")
        .bind(order_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}
