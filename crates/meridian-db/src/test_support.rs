//! Shared fixtures for the component tests.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use meridian_core::{FixedClock, Percentage, Product, User};

use crate::pool::{Database, DbConfig};
use crate::retry::RetryPolicy;

pub(crate) struct Fixture {
    pub db: Database,
    pub clock: Arc<FixedClock>,
    pub cashier: User,
    pub manager: User,
    /// 10.00, 14% category
    pub product_x: Product,
    /// 5.00, 14% category
    pub product_y: Product,
}

/// In-memory database pinned to 2025-01-01 09:00 UTC with two users and
/// two products in a 14% category.
pub(crate) async fn fixture() -> Fixture {
    let clock = Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap(),
    ));
    let db = Database::new(DbConfig::in_memory())
        .await
        .unwrap()
        .with_retry(RetryPolicy::new(3, Duration::from_millis(1)))
        .with_clock(clock.clone());

    let products = db.products();
    let general = products
        .insert_category("General", Percentage::from_bps(1400))
        .await
        .unwrap();
    let product_x = products
        .insert_product("Product X", 1000, Some(general.id))
        .await
        .unwrap();
    let product_y = products
        .insert_product("Product Y", 500, Some(general.id))
        .await
        .unwrap();

    let cashier = db.users().create("cashier", "till-pass", "cashier").await.unwrap();
    let manager = db.users().create("manager", "boss-pass", "manager").await.unwrap();

    Fixture {
        db,
        clock,
        cashier,
        manager,
        product_x,
        product_y,
    }
}
