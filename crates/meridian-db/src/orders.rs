//! # Order Lifecycle Manager
//!
//! Creates orders, edits their lines while they are ACTIVE, moves them to a
//! terminal state, archives them and purges old terminal orders.
//!
//! ## State Machine
//! ```text
//!              complete                    archive
//!   ACTIVE ─────────────────► COMPLETED ─────────────► COMPLETED + archived
//!     │
//!     │ cancel(actor, reason)              archive
//!     └─────────────────────► CANCELLED ─────────────► CANCELLED + archived
//!     │
//!     │ archive (reset)
//!     └──► CANCELLED ("Archived by administrative reset") + archived
//!
//!   terminal orders older than the retention window ──► hard delete
//! ```
//!
//! Every mutation is one `Database::write` unit of work. Multi-row
//! operations (adding lines, reset, cleanup) run each row in its own
//! savepoint: a failing row is reported in the outcome's `errors` and the
//! rest still commit.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use meridian_core::pricing::{order_totals, OrderTotals};
use meridian_core::validation::{
    validate_amount_cents, validate_customer_name, validate_notes, validate_price_cents,
    validate_quantity, validate_reason,
};
use meridian_core::{
    Money, NewOrderItem, Order, OrderLineItem, OrderStatus, OrderWithItems, User,
    ValidationError, ARCHIVED_MARKER,
};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::order_number;
use crate::pool::Database;
use crate::repository::order::{self, OrderInsert};
use crate::repository::product;
use crate::retry::savepoint;

/// Reason recorded on ACTIVE orders cancelled by a reset.
pub const RESET_CANCEL_REASON: &str = "Archived by administrative reset";

/// Default age after which terminal orders are purged.
pub const DEFAULT_RETENTION_HOURS: i64 = 24;

/// Attempts at inserting an order before a number collision is fatal.
const MAX_NUMBER_ATTEMPTS: u32 = 5;

// =============================================================================
// Outcomes
// =============================================================================

/// Which orders a reset touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetScope {
    /// Archive ACTIVE orders (forcing them to CANCELLED).
    Active,
    Completed,
    Cancelled,
    /// Only purge terminal orders past the retention window.
    Old,
    /// Purge, then archive every remaining order.
    All,
}

impl ResetScope {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ResetScope::Active => "active",
            ResetScope::Completed => "completed",
            ResetScope::Cancelled => "cancelled",
            ResetScope::Old => "old",
            ResetScope::All => "all",
        }
    }

    fn archives(&self, status: OrderStatus) -> bool {
        match self {
            ResetScope::Active => matches!(status, OrderStatus::Active | OrderStatus::Pending),
            ResetScope::Completed => status == OrderStatus::Completed,
            ResetScope::Cancelled => status == OrderStatus::Cancelled,
            ResetScope::Old => false,
            ResetScope::All => true,
        }
    }

    fn purges(&self) -> bool {
        matches!(self, ResetScope::Old | ResetScope::All)
    }
}

impl fmt::Display for ResetScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResetScope {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(ResetScope::Active),
            "completed" => Ok(ResetScope::Completed),
            "cancelled" => Ok(ResetScope::Cancelled),
            "old" => Ok(ResetScope::Old),
            "all" => Ok(ResetScope::All),
            other => Err(ValidationError::InvalidFormat {
                field: "scope".to_string(),
                reason: format!("unknown reset scope '{other}'"),
            }),
        }
    }
}

/// Result of [`OrderLifecycleManager::reset`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResetReport {
    pub archived_active: usize,
    pub archived_completed: usize,
    pub archived_cancelled: usize,
    /// Orders hard-deleted by the retention cleanup.
    pub cleared: usize,
    pub errors: Vec<String>,
}

impl ResetReport {
    /// True when no row failed.
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn archived_total(&self) -> usize {
        self.archived_active + self.archived_completed + self.archived_cancelled
    }
}

/// Result of [`OrderLifecycleManager::cleanup_old`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub deleted: usize,
    pub errors: Vec<String>,
}

impl CleanupReport {
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Result of adding or replacing order lines.
#[derive(Debug, Clone, Serialize)]
pub struct ItemsOutcome {
    /// The order with recomputed totals.
    pub order: Order,
    /// Lines written.
    pub added: usize,
    /// One entry per rejected line.
    pub errors: Vec<String>,
}

impl ItemsOutcome {
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

// =============================================================================
// Manager
// =============================================================================

/// Owns the order state machine.
#[derive(Debug, Clone)]
pub struct OrderLifecycleManager {
    db: Database,
    retention: Duration,
}

impl OrderLifecycleManager {
    pub fn new(db: Database) -> Self {
        OrderLifecycleManager {
            db,
            retention: Duration::hours(DEFAULT_RETENTION_HOURS),
        }
    }

    /// Replaces the retention window used by `reset`.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Persists a new ACTIVE order with the next daily number.
    pub async fn create_order(
        &self,
        user: &User,
        customer_name: Option<&str>,
        notes: Option<&str>,
    ) -> DbResult<Order> {
        if !user.is_active {
            return Err(ValidationError::InactiveUser(user.id).into());
        }
        let customer_name = validate_customer_name(customer_name)?;
        let notes = validate_notes(notes)?;

        let user_id = user.id;
        let now = self.db.clock().now();
        let today = self.db.clock().today();

        let order = self
            .db
            .write("create_order", move |conn| {
                let draft = NewOrder {
                    user_id,
                    customer_name: customer_name.clone(),
                    notes: notes.clone(),
                    today,
                    now,
                };
                Box::pin(create_in(conn, draft))
            })
            .await?;

        info!(
            order_id = order.id,
            order_number = %order.order_number,
            user_id,
            "Order created"
        );
        Ok(order)
    }

    /// Appends lines to an ACTIVE order and recomputes its totals.
    ///
    /// Lines without an explicit unit price take the product's current
    /// price. Rejected lines are listed in `errors`; the others commit.
    pub async fn add_items(&self, order_id: i64, items: Vec<NewOrderItem>) -> DbResult<ItemsOutcome> {
        self.write_items("add_items", order_id, items, false).await
    }

    /// Replaces every line of an ACTIVE order.
    pub async fn replace_items(
        &self,
        order_id: i64,
        items: Vec<NewOrderItem>,
    ) -> DbResult<ItemsOutcome> {
        self.write_items("replace_items", order_id, items, true).await
    }

    async fn write_items(
        &self,
        operation: &str,
        order_id: i64,
        items: Vec<NewOrderItem>,
        replace: bool,
    ) -> DbResult<ItemsOutcome> {
        let now = self.db.clock().now();
        let outcome = self
            .db
            .write(operation, move |conn| {
                Box::pin(write_items_in(conn, order_id, items.clone(), replace, now))
            })
            .await?;

        if outcome.success() {
            debug!(order_id, added = outcome.added, "Order lines written");
        } else {
            warn!(
                order_id,
                added = outcome.added,
                rejected = outcome.errors.len(),
                "Some order lines were rejected"
            );
        }
        Ok(outcome)
    }

    /// Removes every line of `product_id` from an ACTIVE order.
    pub async fn remove_item(&self, order_id: i64, product_id: i64) -> DbResult<Order> {
        let now = self.db.clock().now();
        self.db
            .write("remove_item", move |conn| {
                Box::pin(remove_item_in(conn, order_id, product_id, now))
            })
            .await
    }

    /// Sets the order-level discount (capped at the subtotal).
    pub async fn set_discount(&self, order_id: i64, discount: Money) -> DbResult<Order> {
        validate_amount_cents("discount", discount.cents())?;
        let now = self.db.clock().now();
        self.db
            .write("set_discount", move |conn| {
                Box::pin(async move {
                    require_active(&mut *conn, order_id, "discount").await?;
                    recompute_totals(conn, order_id, Some(discount), now).await
                })
            })
            .await
    }

    pub async fn update_details(
        &self,
        order_id: i64,
        customer_name: Option<&str>,
        notes: Option<&str>,
    ) -> DbResult<Order> {
        let customer_name = validate_customer_name(customer_name)?;
        let notes = validate_notes(notes)?;
        let now = self.db.clock().now();

        self.db
            .write("update_details", move |conn| {
                let (customer_name, notes) = (customer_name.clone(), notes.clone());
                Box::pin(async move {
                    let current = require_active(&mut *conn, order_id, "edit").await?;
                    let updated = order::update_details(
                        &mut *conn,
                        order_id,
                        customer_name.as_deref(),
                        notes.as_deref(),
                        now,
                    )
                    .await?;
                    if updated == 0 {
                        return Err(DbError::invalid_transition(order_id, current.status, "edit"));
                    }
                    load(conn, order_id).await
                })
            })
            .await
    }

    /// ACTIVE → COMPLETED.
    pub async fn complete_order(&self, order_id: i64) -> DbResult<Order> {
        let now = self.db.clock().now();
        let order = self
            .db
            .write("complete_order", move |conn| {
                Box::pin(complete_in(conn, order_id, now))
            })
            .await?;

        info!(order_id, order_number = %order.order_number, "Order completed");
        Ok(order)
    }

    /// ACTIVE → CANCELLED, recording who cancelled it and why.
    pub async fn cancel_order(
        &self,
        order_id: i64,
        actor: &User,
        reason: Option<&str>,
    ) -> DbResult<Order> {
        let reason = validate_reason(reason)?;
        let actor_id = actor.id;
        let now = self.db.clock().now();

        let order = self
            .db
            .write("cancel_order", move |conn| {
                let reason = reason.clone();
                Box::pin(async move {
                    let current = load(&mut *conn, order_id).await?;
                    let cancelled = order::mark_cancelled(
                        &mut *conn,
                        order_id,
                        actor_id,
                        reason.as_deref(),
                        now,
                    )
                    .await?;
                    if cancelled == 0 {
                        return Err(DbError::invalid_transition(
                            order_id,
                            current.status,
                            "cancel",
                        ));
                    }
                    load(conn, order_id).await
                })
            })
            .await?;

        info!(
            order_id,
            order_number = %order.order_number,
            user_id = actor_id,
            "Order cancelled"
        );
        Ok(order)
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    pub async fn get_order(&self, order_id: i64) -> DbResult<OrderWithItems> {
        let order = order::find_by_id(self.db.pool(), order_id)
            .await?
            .ok_or_else(|| DbError::not_found("Order", order_id))?;
        let items = order::items(self.db.pool(), order_id).await?;
        Ok(OrderWithItems { order, items })
    }

    pub async fn get_order_by_number(&self, order_number: &str) -> DbResult<OrderWithItems> {
        let order = order::find_by_number(self.db.pool(), order_number)
            .await?
            .ok_or_else(|| DbError::not_found("Order", order_number))?;
        let items = order::items(self.db.pool(), order.id).await?;
        Ok(OrderWithItems { order, items })
    }

    pub async fn order_items(&self, order_id: i64) -> DbResult<Vec<OrderLineItem>> {
        order::items(self.db.pool(), order_id).await
    }

    /// Non-archived orders in `status`, newest first.
    pub async fn list_orders(&self, status: OrderStatus) -> DbResult<Vec<Order>> {
        order::list_by_status(self.db.pool(), status).await
    }

    /// Orders created in `[from, to)`, archived ones included.
    pub async fn list_orders_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DbResult<Vec<Order>> {
        order::list_between(self.db.pool(), from, to).await
    }

    // -------------------------------------------------------------------------
    // Maintenance
    // -------------------------------------------------------------------------

    /// Hard-deletes COMPLETED/CANCELLED orders not touched within
    /// `retention`, line items first.
    pub async fn cleanup_old(&self, retention: Duration) -> DbResult<CleanupReport> {
        let cutoff = self.db.clock().now() - retention;
        let report = self
            .db
            .write("cleanup_old_orders", move |conn| {
                Box::pin(cleanup_in(conn, cutoff))
            })
            .await?;

        info!(
            deleted = report.deleted,
            failed = report.errors.len(),
            retention_hours = retention.num_hours(),
            "Old orders cleaned up"
        );
        Ok(report)
    }

    /// Archives orders by `scope`; `old` and `all` also purge expired
    /// terminal orders (before archiving).
    pub async fn reset(&self, scope: ResetScope, actor: &User) -> DbResult<ResetReport> {
        let mut report = ResetReport::default();

        if scope.purges() {
            let cleanup = self.cleanup_old(self.retention).await?;
            report.cleared = cleanup.deleted;
            report.errors.extend(cleanup.errors);
        }

        if scope != ResetScope::Old {
            let actor_id = actor.id;
            let now = self.db.clock().now();
            let archived = self
                .db
                .write("reset_orders", move |conn| {
                    Box::pin(archive_in(conn, scope, actor_id, now))
                })
                .await?;
            report.archived_active = archived.archived_active;
            report.archived_completed = archived.archived_completed;
            report.archived_cancelled = archived.archived_cancelled;
            report.errors.extend(archived.errors);
        }

        info!(
            scope = %scope,
            user_id = actor.id,
            archived = report.archived_total(),
            cleared = report.cleared,
            failed = report.errors.len(),
            "Order reset finished"
        );
        Ok(report)
    }
}

// =============================================================================
// Units of work
// =============================================================================
//
// Free functions over the transaction's connection so the sale coordinator
// can reuse them inside its own write.

struct NewOrder {
    user_id: i64,
    customer_name: Option<String>,
    notes: Option<String>,
    today: NaiveDate,
    now: DateTime<Utc>,
}

pub(crate) async fn load(conn: &mut SqliteConnection, order_id: i64) -> DbResult<Order> {
    order::find_by_id(&mut *conn, order_id)
        .await?
        .ok_or_else(|| DbError::not_found("Order", order_id))
}

async fn require_active(
    conn: &mut SqliteConnection,
    order_id: i64,
    action: &'static str,
) -> DbResult<Order> {
    let order = load(conn, order_id).await?;
    if order.status != OrderStatus::Active || order.is_archived() {
        return Err(DbError::invalid_transition(order_id, order.status, action));
    }
    Ok(order)
}

async fn create_in(conn: &mut SqliteConnection, draft: NewOrder) -> DbResult<Order> {
    for attempt in 1..=MAX_NUMBER_ATTEMPTS {
        let order_number = order_number::allocate(&mut *conn, draft.today, draft.now).await?;
        let row = OrderInsert {
            order_number: order_number.clone(),
            status: OrderStatus::Active,
            customer_name: draft.customer_name.clone(),
            notes: draft.notes.clone(),
            totals: order_totals(std::iter::empty(), Money::zero()),
            user_id: Some(draft.user_id),
            created_at: draft.now,
            completed_at: None,
        };

        match order::insert(&mut *conn, &row).await {
            Ok(id) => return load(conn, id).await,
            Err(err) if err.is_unique_violation_on("order_number") => {
                warn!(attempt, order_number = %order_number, "Order number taken, allocating again");
            }
            Err(err) => return Err(err),
        }
    }

    Err(DbError::Consistency(format!(
        "no free order number after {MAX_NUMBER_ATTEMPTS} attempts"
    )))
}

async fn write_items_in(
    conn: &mut SqliteConnection,
    order_id: i64,
    items: Vec<NewOrderItem>,
    replace: bool,
    now: DateTime<Utc>,
) -> DbResult<ItemsOutcome> {
    require_active(&mut *conn, order_id, "change items of").await?;
    if replace {
        let removed = order::delete_items(&mut *conn, order_id).await?;
        debug!(order_id, removed, "Cleared order lines");
    }

    let mut added = 0;
    let mut errors = Vec::new();
    for (index, item) in items.into_iter().enumerate() {
        let product_id = item.product_id;
        match savepoint(&mut *conn, move |sp| Box::pin(insert_line(sp, order_id, item))).await {
            Ok(line_id) => {
                debug!(order_id, product_id, line_id, "Order line added");
                added += 1;
            }
            Err(err) if err.is_locked() => return Err(err),
            Err(err) => {
                warn!(order_id, product_id, error = %err, "Order line rejected");
                errors.push(format!("line {} (product {product_id}): {err}", index + 1));
            }
        }
    }

    let order = recompute_totals(conn, order_id, None, now).await?;
    Ok(ItemsOutcome {
        order,
        added,
        errors,
    })
}

async fn insert_line(
    conn: &mut SqliteConnection,
    order_id: i64,
    item: NewOrderItem,
) -> DbResult<i64> {
    validate_quantity(item.quantity)?;
    let notes = validate_notes(item.notes.as_deref())?;

    let unit_price = match item.unit_price_cents {
        Some(cents) => {
            validate_price_cents(cents)?;
            cents
        }
        None => {
            product::find(&mut *conn, item.product_id)
                .await?
                .ok_or_else(|| DbError::not_found("Product", item.product_id))?
                .price_cents
        }
    };

    order::insert_item(
        &mut *conn,
        order_id,
        item.product_id,
        item.quantity,
        unit_price,
        notes.as_deref(),
    )
    .await
}

async fn remove_item_in(
    conn: &mut SqliteConnection,
    order_id: i64,
    product_id: i64,
    now: DateTime<Utc>,
) -> DbResult<Order> {
    require_active(&mut *conn, order_id, "remove items from").await?;
    let removed = order::delete_product_items(&mut *conn, order_id, product_id).await?;
    if removed == 0 {
        return Err(DbError::not_found(
            "Order line",
            format!("{order_id}/{product_id}"),
        ));
    }
    debug!(order_id, product_id, removed, "Order lines removed");
    recompute_totals(conn, order_id, None, now).await
}

/// Recomputes totals from the persisted lines and each product's live tax
/// rate. `discount` replaces the stored discount when given.
async fn recompute_totals(
    conn: &mut SqliteConnection,
    order_id: i64,
    discount: Option<Money>,
    now: DateTime<Utc>,
) -> DbResult<Order> {
    let current = load(&mut *conn, order_id).await?;
    let items = order::items(&mut *conn, order_id).await?;

    let mut lines = Vec::with_capacity(items.len());
    for item in &items {
        let rate = product::tax_rate(&mut *conn, item.product_id).await?;
        lines.push((item.line_total(), rate));
    }

    let totals: OrderTotals = order_totals(lines, discount.unwrap_or_else(|| current.discount()));
    order::update_totals(&mut *conn, order_id, &totals, now).await?;
    debug!(
        order_id,
        subtotal = totals.subtotal.cents(),
        tax = totals.tax.cents(),
        total = totals.total.cents(),
        "Order totals recomputed"
    );
    load(conn, order_id).await
}

/// ACTIVE → COMPLETED inside the caller's transaction.
pub(crate) async fn complete_in(
    conn: &mut SqliteConnection,
    order_id: i64,
    now: DateTime<Utc>,
) -> DbResult<Order> {
    let current = load(&mut *conn, order_id).await?;
    if current.status != OrderStatus::Active {
        return Err(DbError::invalid_transition(order_id, current.status, "complete"));
    }
    if order::mark_completed(&mut *conn, order_id, now).await? == 0 {
        return Err(DbError::invalid_transition(order_id, current.status, "complete"));
    }
    load(conn, order_id).await
}

async fn cleanup_in(conn: &mut SqliteConnection, cutoff: DateTime<Utc>) -> DbResult<CleanupReport> {
    let ids = order::expired_terminal_ids(&mut *conn, cutoff).await?;
    let mut report = CleanupReport::default();

    for id in ids {
        match savepoint(&mut *conn, move |sp| Box::pin(order::delete_with_items(sp, id))).await {
            Ok(_) => {
                debug!(order_id = id, "Expired order deleted");
                report.deleted += 1;
            }
            Err(err) if err.is_locked() => return Err(err),
            Err(err) => {
                warn!(order_id = id, error = %err, "Could not delete expired order");
                report.errors.push(format!("order {id}: {err}"));
            }
        }
    }

    Ok(report)
}

async fn archive_in(
    conn: &mut SqliteConnection,
    scope: ResetScope,
    actor_id: i64,
    now: DateTime<Utc>,
) -> DbResult<ResetReport> {
    let candidates: Vec<Order> = order::list_unarchived(&mut *conn)
        .await?
        .into_iter()
        .filter(|o| scope.archives(o.status))
        .collect();

    let mut report = ResetReport::default();
    for candidate in candidates {
        let (id, status) = (candidate.id, candidate.status);
        match savepoint(&mut *conn, move |sp| {
            Box::pin(archive_one(sp, candidate, actor_id, now))
        })
        .await
        {
            Ok(()) => match status {
                OrderStatus::Active | OrderStatus::Pending => report.archived_active += 1,
                OrderStatus::Completed => report.archived_completed += 1,
                OrderStatus::Cancelled => report.archived_cancelled += 1,
            },
            Err(err) if err.is_locked() => return Err(err),
            Err(err) => {
                warn!(order_id = id, error = %err, "Could not archive order");
                report.errors.push(format!("order {id}: {err}"));
            }
        }
    }

    Ok(report)
}

async fn archive_one(
    conn: &mut SqliteConnection,
    order: Order,
    actor_id: i64,
    now: DateTime<Utc>,
) -> DbResult<()> {
    if !order.status.is_terminal() {
        order::force_cancel(&mut *conn, order.id, actor_id, RESET_CANCEL_REASON, now).await?;
    }

    let notes = archived_notes(order.notes.as_deref());
    if order::mark_archived(&mut *conn, order.id, &notes, now).await? == 0 {
        return Err(DbError::Consistency(format!(
            "order {} was archived concurrently",
            order.id
        )));
    }
    debug!(order_id = order.id, "Order archived");
    Ok(())
}

/// Notes with the archive marker in front (added once).
fn archived_notes(notes: Option<&str>) -> String {
    match notes.map(str::trim).filter(|n| !n.is_empty()) {
        Some(n) if n.starts_with(ARCHIVED_MARKER) => n.to_string(),
        Some(n) => format!("{ARCHIVED_MARKER} {n}"),
        None => ARCHIVED_MARKER.to_string(),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
