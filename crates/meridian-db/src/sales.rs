//! # Sale Transaction Coordinator
//!
//! Turns a priced cart into a persisted sale.
//!
//! ## Finalize Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  cart ──► price_cart ──► grand total                                    │
//! │                              │                                          │
//! │  db.write("finalize_sale") ──┼──────────────────────────────────────┐   │
//! │  │                           ▼                                      │   │
//! │  │  same user, last 2 min, total ± 1 cent? ──yes──► replay sale ────┤   │
//! │  │                           │ no                                   │   │
//! │  │                           ▼                                      │   │
//! │  │  INSERT sales, INSERT sale_products (one per cart line)          │   │
//! │  │                           │                                      │   │
//! │  │  SAVEPOINT mirror:        ▼                                      │   │
//! │  │    loaded order? ─yes─► complete it                              │   │
//! │  │         │ no                                                     │   │
//! │  │         └──────────► INSERT COMPLETED order SALE-NNNNNN + lines   │   │
//! │  │    (failure: WARN, savepoint rolled back, sale kept)             │   │
//! │  └──────────────────────────────────────────────────────── COMMIT ──┘   │
//! │                              │                                          │
//! │                         cart.clear()                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The sale is the financial record. The mirrored order only feeds order
//! reporting, so its failure never fails the sale.

use chrono::{DateTime, Duration, Utc};
use meridian_core::order_number::sale_order_number;
use meridian_core::pricing::{price_cart, CartPricing, OrderTotals};
use meridian_core::{Cart, Money, OrderStatus, Sale, SaleLineItem, User, ValidationError};
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::orders;
use crate::pool::Database;
use crate::repository::order::{self, OrderInsert};
use crate::repository::sale;
use crate::retry::savepoint;

/// How far back a matching sale counts as a double submission.
pub const DEFAULT_DUPLICATE_WINDOW_SECS: i64 = 120;

/// Totals closer than this are treated as equal.
pub const DEFAULT_DUPLICATE_TOLERANCE_CENTS: i64 = 1;

/// Longest accepted payment method tag.
const MAX_PAYMENT_METHOD_LEN: usize = 50;

/// A committed (or replayed) sale.
#[derive(Debug, Clone, Serialize)]
pub struct FinalizedSale {
    pub sale: Sale,
    pub items: Vec<SaleLineItem>,
    /// The order completed or created for this sale, if mirroring worked.
    pub mirrored_order_id: Option<i64>,
    /// True when an identical recent sale was returned instead of a new one.
    pub replayed: bool,
}

/// Owned inputs of one finalize attempt.
#[derive(Debug, Clone)]
struct SaleDraft {
    user_id: i64,
    payment_method: Option<String>,
    loaded_order: Option<i64>,
    lines: Vec<DraftLine>,
    pricing: CartPricing,
    timestamp: DateTime<Utc>,
    since: DateTime<Utc>,
    tolerance: Money,
}

#[derive(Debug, Clone, Copy)]
struct DraftLine {
    product_id: i64,
    quantity: i64,
    unit_price_cents: i64,
}

/// Finalizes carts into sales.
#[derive(Debug, Clone)]
pub struct SaleTransactionCoordinator {
    db: Database,
    window: Duration,
    tolerance: Money,
}

impl SaleTransactionCoordinator {
    pub fn new(db: Database) -> Self {
        SaleTransactionCoordinator {
            db,
            window: Duration::seconds(DEFAULT_DUPLICATE_WINDOW_SECS),
            tolerance: Money::from_cents(DEFAULT_DUPLICATE_TOLERANCE_CENTS),
        }
    }

    /// Replaces the double-submission window and total tolerance.
    pub fn with_idempotency(mut self, window: Duration, tolerance: Money) -> Self {
        self.window = window;
        self.tolerance = tolerance.abs();
        self
    }

    /// Persists `cart` as a sale by `user` and clears the cart.
    ///
    /// When `loaded_order` is given that order is completed instead of a
    /// `SALE-NNNNNN` order being created. A recent sale by the same user
    /// with the same total is returned as-is (`replayed`).
    pub async fn finalize(
        &self,
        cart: &mut Cart,
        user: &User,
        loaded_order: Option<i64>,
        payment_method: Option<&str>,
    ) -> DbResult<FinalizedSale> {
        if cart.is_empty() {
            return Err(ValidationError::EmptyCart.into());
        }
        if !user.is_active {
            return Err(ValidationError::InactiveUser(user.id).into());
        }
        let payment_method = normalize_payment_method(payment_method)?;

        let now = self.db.clock().now();
        let draft = SaleDraft {
            user_id: user.id,
            payment_method,
            loaded_order,
            lines: cart
                .items
                .iter()
                .map(|line| DraftLine {
                    product_id: line.product_id,
                    quantity: line.quantity,
                    unit_price_cents: line.unit_price_cents,
                })
                .collect(),
            pricing: price_cart(cart),
            timestamp: now,
            since: now - self.window,
            tolerance: self.tolerance,
        };
        let total = draft.pricing.grand_total;

        let finalized = self
            .db
            .write("finalize_sale", move |conn| {
                Box::pin(finalize_in(conn, draft.clone()))
            })
            .await?;

        cart.clear();

        if finalized.replayed {
            warn!(
                sale_id = finalized.sale.id,
                user_id = user.id,
                total = total.cents(),
                "Duplicate sale submission, returning existing sale"
            );
        } else {
            info!(
                sale_id = finalized.sale.id,
                user_id = user.id,
                total = total.cents(),
                order_id = finalized.mirrored_order_id,
                "Sale finalized"
            );
        }
        Ok(finalized)
    }

    pub async fn get_sale(&self, sale_id: i64) -> DbResult<Sale> {
        sale::find_by_id(self.db.pool(), sale_id)
            .await?
            .ok_or_else(|| DbError::not_found("Sale", sale_id))
    }

    pub async fn sale_items(&self, sale_id: i64) -> DbResult<Vec<SaleLineItem>> {
        sale::items(self.db.pool(), sale_id).await
    }

    /// Sales in `[from, to)`, oldest first.
    pub async fn sales_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DbResult<Vec<Sale>> {
        sale::list_between(self.db.pool(), from, to).await
    }
}

fn normalize_payment_method(method: Option<&str>) -> DbResult<Option<String>> {
    let method = method.map(str::trim).filter(|m| !m.is_empty());
    match method {
        Some(m) if m.chars().count() > MAX_PAYMENT_METHOD_LEN => Err(ValidationError::TooLong {
            field: "payment_method".to_string(),
            max: MAX_PAYMENT_METHOD_LEN,
        }
        .into()),
        other => Ok(other.map(str::to_string)),
    }
}

async fn finalize_in(conn: &mut SqliteConnection, draft: SaleDraft) -> DbResult<FinalizedSale> {
    let total = draft.pricing.grand_total;

    if let Some(existing) =
        sale::find_recent_duplicate(&mut *conn, draft.user_id, total, draft.tolerance, draft.since)
            .await?
    {
        let items = sale::items(&mut *conn, existing.id).await?;
        return Ok(FinalizedSale {
            mirrored_order_id: existing.order_id,
            sale: existing,
            items,
            replayed: true,
        });
    }

    let sale_id = sale::insert(
        &mut *conn,
        draft.user_id,
        total,
        draft.payment_method.as_deref(),
        draft.timestamp,
    )
    .await?;
    for line in &draft.lines {
        sale::insert_item(
            &mut *conn,
            sale_id,
            line.product_id,
            line.quantity,
            line.unit_price_cents,
        )
        .await?;
    }
    debug!(sale_id, lines = draft.lines.len(), "Sale rows written");

    let mirror = draft.clone();
    let mirrored_order_id =
        match savepoint(&mut *conn, move |sp| Box::pin(mirror_in(sp, sale_id, mirror))).await {
            Ok(order_id) => Some(order_id),
            Err(err) if err.is_locked() => return Err(err),
            Err(err) => {
                warn!(sale_id, error = %err, "Order mirroring failed, sale kept");
                None
            }
        };

    let sale = sale::find_by_id(&mut *conn, sale_id)
        .await?
        .ok_or_else(|| DbError::not_found("Sale", sale_id))?;
    let items = sale::items(&mut *conn, sale_id).await?;

    Ok(FinalizedSale {
        sale,
        items,
        mirrored_order_id,
        replayed: false,
    })
}

/// Completes the loaded order, or records a COMPLETED `SALE-NNNNNN` order
/// carrying the cart totals and lines, and links the sale to it.
async fn mirror_in(conn: &mut SqliteConnection, sale_id: i64, draft: SaleDraft) -> DbResult<i64> {
    if let Some(order_id) = draft.loaded_order {
        let order = orders::complete_in(&mut *conn, order_id, draft.timestamp).await?;
        sale::link_order(&mut *conn, sale_id, order.id).await?;
        debug!(sale_id, order_id = order.id, "Loaded order completed by sale");
        return Ok(order.id);
    }

    let pricing = &draft.pricing;
    let row = OrderInsert {
        order_number: sale_order_number(sale_id),
        status: OrderStatus::Completed,
        customer_name: None,
        notes: None,
        totals: OrderTotals {
            subtotal: pricing.subtotal,
            discount: pricing.total_discount,
            tax: pricing.tax,
            total: pricing.grand_total,
        },
        user_id: Some(draft.user_id),
        created_at: draft.timestamp,
        completed_at: Some(draft.timestamp),
    };
    let order_id = order::insert(&mut *conn, &row).await?;

    for line in &draft.lines {
        order::insert_item(
            &mut *conn,
            order_id,
            line.product_id,
            line.quantity,
            line.unit_price_cents,
            None,
        )
        .await?;
    }

    sale::link_order(&mut *conn, sale_id, order_id).await?;
    debug!(sale_id, order_id, order_number = %row.order_number, "Sale mirrored as order");
    Ok(order_id)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fixture, Fixture};
    use meridian_core::{Clock, NewOrderItem, Percentage};

    fn scenario_cart(fx: &Fixture) -> Cart {
        let mut cart = Cart::new();
        cart.add_item(&fx.product_x, 2).unwrap();
        cart.add_item(&fx.product_y, 1).unwrap();
        cart.set_item_discount(fx.product_x.id, Percentage::from_bps(2000), Money::zero())
            .unwrap();
        cart
    }

    async fn count(db: &Database, sql: &str) -> i64 {
        sqlx::query_scalar(sql).fetch_one(db.pool()).await.unwrap()
    }

    #[tokio::test]
    async fn test_finalize_records_sale_and_mirror_order() {
        let fx = fixture().await;
        let mut cart = scenario_cart(&fx);

        let done = fx
            .db
            .sales()
            .finalize(&mut cart, &fx.cashier, None, Some("cash"))
            .await
            .unwrap();

        assert!(!done.replayed);
        assert!(cart.is_empty());
        assert_eq!(done.sale.total_cents, 2394);
        assert_eq!(done.sale.user_id, fx.cashier.id);
        assert_eq!(done.sale.payment_method.as_deref(), Some("cash"));
        assert_eq!(done.items.len(), 2);
        assert_eq!(done.items[0].price_at_sale_cents, 1000);
        assert_eq!(done.items[0].quantity, 2);

        let order_id = done.mirrored_order_id.unwrap();
        let mirrored = fx.db.orders().get_order(order_id).await.unwrap();
        assert_eq!(mirrored.order.order_number, sale_order_number(done.sale.id));
        assert_eq!(mirrored.order.status, OrderStatus::Completed);
        assert_eq!(mirrored.order.subtotal_cents, 2500);
        assert_eq!(mirrored.order.discount_cents, 400);
        assert_eq!(mirrored.order.tax_cents, 294);
        assert_eq!(mirrored.order.total_cents, 2394);
        assert!(mirrored.order.totals_consistent());
        assert_eq!(mirrored.order.created_at, done.sale.timestamp);
        assert_eq!(mirrored.order.completed_at, Some(done.sale.timestamp));
        assert_eq!(mirrored.items.len(), 2);
    }

    #[tokio::test]
    async fn test_double_submit_returns_same_sale() {
        let fx = fixture().await;
        let sales = fx.db.sales();

        let mut cart = scenario_cart(&fx);
        let first = sales.finalize(&mut cart, &fx.cashier, None, None).await.unwrap();

        fx.clock.advance(Duration::seconds(30));
        let mut cart = scenario_cart(&fx);
        let second = sales.finalize(&mut cart, &fx.cashier, None, None).await.unwrap();

        assert_eq!(first.sale.id, second.sale.id);
        assert!(second.replayed);
        assert_eq!(second.mirrored_order_id, first.mirrored_order_id);
        assert!(cart.is_empty());
        assert_eq!(count(&fx.db, "SELECT COUNT(*) FROM sales").await, 1);
        assert_eq!(
            count(&fx.db, "SELECT COUNT(*) FROM orders WHERE status = 'completed'").await,
            1
        );
    }

    #[tokio::test]
    async fn test_same_total_outside_window_is_a_new_sale() {
        let fx = fixture().await;
        let sales = fx.db.sales();

        let mut cart = scenario_cart(&fx);
        let first = sales.finalize(&mut cart, &fx.cashier, None, None).await.unwrap();

        fx.clock.advance(Duration::minutes(3));
        let mut cart = scenario_cart(&fx);
        let second = sales.finalize(&mut cart, &fx.cashier, None, None).await.unwrap();

        assert_ne!(first.sale.id, second.sale.id);
        assert!(!second.replayed);

        // Another cashier never matches
        let mut cart = scenario_cart(&fx);
        let third = sales.finalize(&mut cart, &fx.manager, None, None).await.unwrap();
        assert!(!third.replayed);
        assert_eq!(count(&fx.db, "SELECT COUNT(*) FROM sales").await, 3);
        assert_eq!(
            count(&fx.db, "SELECT COUNT(*) FROM orders WHERE status = 'completed'").await,
            3
        );
    }

    #[tokio::test]
    async fn test_loaded_order_is_completed_not_duplicated() {
        let fx = fixture().await;
        let orders = fx.db.orders();
        let order = orders.create_order(&fx.cashier, Some("Ana"), None).await.unwrap();
        orders
            .add_items(order.id, vec![NewOrderItem::new(fx.product_x.id, 1)])
            .await
            .unwrap();

        let mut cart = Cart::new();
        cart.add_item(&fx.product_x, 1).unwrap();
        let done = fx
            .db
            .sales()
            .finalize(&mut cart, &fx.cashier, Some(order.id), Some("card"))
            .await
            .unwrap();

        assert_eq!(done.mirrored_order_id, Some(order.id));
        assert_eq!(done.sale.total_cents, 1140);
        let completed = orders.get_order(order.id).await.unwrap().order;
        assert_eq!(completed.status, OrderStatus::Completed);
        assert_eq!(completed.completed_at, Some(done.sale.timestamp));
        assert_eq!(count(&fx.db, "SELECT COUNT(*) FROM orders").await, 1);
    }

    #[tokio::test]
    async fn test_replay_of_loaded_order_sale_reports_that_order() {
        let fx = fixture().await;
        let orders = fx.db.orders();
        let sales = fx.db.sales();
        let order = orders.create_order(&fx.cashier, None, None).await.unwrap();

        let mut cart = Cart::new();
        cart.add_item(&fx.product_y, 2).unwrap();
        let first = sales
            .finalize(&mut cart, &fx.cashier, Some(order.id), None)
            .await
            .unwrap();
        assert_eq!(first.sale.order_id, Some(order.id));

        fx.clock.advance(Duration::seconds(10));
        let mut cart = Cart::new();
        cart.add_item(&fx.product_y, 2).unwrap();
        let again = sales
            .finalize(&mut cart, &fx.cashier, Some(order.id), None)
            .await
            .unwrap();

        assert!(again.replayed);
        assert_eq!(again.sale.id, first.sale.id);
        assert_eq!(again.mirrored_order_id, Some(order.id));
    }

    #[tokio::test]
    async fn test_mirroring_failure_keeps_sale() {
        let fx = fixture().await;
        let orders = fx.db.orders();
        let order = orders.create_order(&fx.cashier, None, None).await.unwrap();
        orders.cancel_order(order.id, &fx.manager, None).await.unwrap();

        let mut cart = Cart::new();
        cart.add_item(&fx.product_y, 3).unwrap();
        let done = fx
            .db
            .sales()
            .finalize(&mut cart, &fx.cashier, Some(order.id), None)
            .await
            .unwrap();

        assert_eq!(done.mirrored_order_id, None);
        assert_eq!(done.sale.order_id, None);
        assert!(fx.db.sales().get_sale(done.sale.id).await.is_ok());
        assert_eq!(fx.db.sales().sale_items(done.sale.id).await.unwrap().len(), 1);
        let untouched = orders.get_order(order.id).await.unwrap().order;
        assert_eq!(untouched.status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_empty_cart_and_inactive_user_are_rejected() {
        let fx = fixture().await;
        let sales = fx.db.sales();

        let mut empty = Cart::new();
        let err = sales.finalize(&mut empty, &fx.cashier, None, None).await.unwrap_err();
        assert!(matches!(err, DbError::Validation(ValidationError::EmptyCart)));

        let mut retired = fx.cashier.clone();
        retired.is_active = false;
        let mut cart = scenario_cart(&fx);
        let err = sales.finalize(&mut cart, &retired, None, None).await.unwrap_err();
        assert!(matches!(err, DbError::Validation(ValidationError::InactiveUser(_))));
        // Rejected carts are left for the cashier to fix
        assert!(!cart.is_empty());

        assert_eq!(count(&fx.db, "SELECT COUNT(*) FROM sales").await, 0);
    }

    #[tokio::test]
    async fn test_sales_between() {
        let fx = fixture().await;
        let sales = fx.db.sales();
        let start = fx.clock.now();

        let mut cart = scenario_cart(&fx);
        sales.finalize(&mut cart, &fx.cashier, None, None).await.unwrap();
        fx.clock.advance(Duration::hours(2));
        let mut cart = Cart::new();
        cart.add_item(&fx.product_y, 1).unwrap();
        sales.finalize(&mut cart, &fx.cashier, None, None).await.unwrap();

        let all = sales
            .sales_between(start, start + Duration::hours(3))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        let first_hour = sales
            .sales_between(start, start + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(first_hour.len(), 1);
    }
}
