//! # Domain Types
//!
//! Core domain types used throughout Meridian POS.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │     Order       │   │      Sale       │   │     Shift       │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  order_number   │   │  total_cents    │   │  user_id        │       │
//! │  │  status         │   │  user_id        │   │  opening/closing│       │
//! │  │  subtotal/tax.. │   │  timestamp      │   │  status         │       │
//! │  │  archived       │   └────────┬────────┘   └─────────────────┘       │
//! │  └────────┬────────┘            │                                       │
//! │           │ 1..n                │ 1..n                                  │
//! │  ┌────────▼────────┐   ┌────────▼────────┐                             │
//! │  │ OrderLineItem   │   │  SaleLineItem   │                             │
//! │  │ price_at_order  │   │  price_at_sale  │                             │
//! │  └─────────────────┘   └─────────────────┘                             │
//! │                                                                         │
//! │  Product ──► Category.tax_rate (live rate, read at pricing time)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Row types carry integer `*_cents` columns and expose [`Money`] accessors,
//! so they map 1:1 onto the SQLite schema.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::money::Money;
use crate::ARCHIVED_MARKER;

// =============================================================================
// Percentage
// =============================================================================

/// A rate in basis points (1 bps = 0.01%), clamped to 0..=100%.
///
/// ## Why Basis Points?
/// 1400 bps = 14% exactly; no float rounding when the rate is stored or
/// compared. Used for both discount percentages and category tax rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Percentage(u32);

/// Tax rates are percentages attached to a product category.
pub type TaxRate = Percentage;

impl Percentage {
    /// Upper bound: 100%.
    pub const MAX_BPS: u32 = 10_000;

    /// Creates a percentage from basis points, clamped to 100%.
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        if bps > Self::MAX_BPS {
            Percentage(Self::MAX_BPS)
        } else {
            Percentage(bps)
        }
    }

    /// Creates a percentage from a stored (possibly out-of-range) integer.
    pub fn from_stored_bps(bps: i64) -> Self {
        Percentage(bps.clamp(0, Self::MAX_BPS as i64) as u32)
    }

    /// Creates a percentage from a decimal percent value (e.g. `14.0`),
    /// clamped to [0, 100].
    pub fn from_percent(pct: f64) -> Self {
        if !pct.is_finite() {
            return Percentage(0);
        }
        Percentage((pct.clamp(0.0, 100.0) * 100.0).round() as u32)
    }

    /// Returns the rate in basis points.
    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Returns the rate as a percentage (for display only).
    #[inline]
    pub fn percent(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    #[inline]
    pub const fn zero() -> Self {
        Percentage(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

// =============================================================================
// Category & Product (read-only collaborators)
// =============================================================================

/// Product category; owns the tax rate applied to its products.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Category {
    pub id: i64,
    pub name: String,
    /// Tax rate in basis points (1400 = 14%).
    pub tax_rate_bps: i64,
}

impl Category {
    #[inline]
    pub fn tax_rate(&self) -> TaxRate {
        Percentage::from_stored_bps(self.tax_rate_bps)
    }
}

/// A product available for sale, joined with its category's live tax rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub price_cents: i64,
    pub category_id: Option<i64>,
    /// Tax rate of the product's category at read time; 0 when uncategorised.
    pub tax_rate_bps: i64,
    pub is_active: bool,
}

impl Product {
    /// Builds an in-memory product (tests, seeding, ad-hoc items).
    pub fn new(id: i64, name: impl Into<String>, price_cents: i64, tax_rate: TaxRate) -> Self {
        Product {
            id,
            name: name.into(),
            price_cents,
            category_id: None,
            tax_rate_bps: tax_rate.bps() as i64,
            is_active: true,
        }
    }

    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }

    #[inline]
    pub fn tax_rate(&self) -> TaxRate {
        Percentage::from_stored_bps(self.tax_rate_bps)
    }
}

// =============================================================================
// User
// =============================================================================

/// An authenticated actor (cashier, manager).
///
/// The password hash never leaves the database layer in serialized form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub role: String,
    pub is_active: bool,
}

// =============================================================================
// Order Status
// =============================================================================

/// Lifecycle state of an order.
///
/// ```text
///   ACTIVE ──complete──► COMPLETED ─┐
///     │                             ├──archive──► same status + archived
///     └────cancel──────► CANCELLED ─┘
///
///   ACTIVE ──archive──► CANCELLED + archived (system reason)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Active,
    Completed,
    Cancelled,
    /// Parked orders imported from older data; treated like ACTIVE for
    /// listing but never produced by this engine.
    Pending,
}

impl OrderStatus {
    /// Storage representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Active => "active",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Pending => "pending",
        }
    }

    /// COMPLETED and CANCELLED are terminal.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }
}

impl Default for OrderStatus {
    fn default() -> Self {
        OrderStatus::Active
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Order
// =============================================================================

/// A customer order tracked through its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Order {
    pub id: i64,
    /// `ORD-YYYYMMDD-NNN` for orders created at the till, `SALE-NNNNNN`
    /// for orders mirrored from a direct sale.
    pub order_number: String,
    pub status: OrderStatus,
    pub customer_name: Option<String>,
    pub notes: Option<String>,
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    /// User who created the order.
    pub user_id: Option<i64>,
    pub archived: bool,
    #[ts(as = "Option<String>")]
    pub archived_at: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub completed_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<i64>,
    pub cancelled_reason: Option<String>,
}

impl Order {
    #[inline]
    pub fn subtotal(&self) -> Money {
        Money::from_cents(self.subtotal_cents)
    }

    #[inline]
    pub fn discount(&self) -> Money {
        Money::from_cents(self.discount_cents)
    }

    #[inline]
    pub fn tax(&self) -> Money {
        Money::from_cents(self.tax_cents)
    }

    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }

    /// `total == subtotal − discount + tax` and `0 ≤ discount ≤ subtotal`.
    pub fn totals_consistent(&self) -> bool {
        let discount_ok = self.discount_cents >= 0 && self.discount_cents <= self.subtotal_cents;
        let expected = self.subtotal_cents - self.discount_cents + self.tax_cents;
        discount_ok && (self.total_cents - expected).abs() <= 1
    }

    /// Archived either through the dedicated column or, for rows written
    /// by older tooling, through the notes marker.
    pub fn is_archived(&self) -> bool {
        self.archived
            || self
                .notes
                .as_deref()
                .is_some_and(|n| n.starts_with(ARCHIVED_MARKER))
    }
}

/// A product line on an order (`order_products` row).
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct OrderLineItem {
    pub id: i64,
    pub order_id: i64,
    pub product_id: i64,
    pub quantity: i64,
    /// Unit price frozen when the line was added.
    pub price_at_order_cents: i64,
    pub notes: Option<String>,
}

impl OrderLineItem {
    #[inline]
    pub fn line_total(&self) -> Money {
        Money::from_cents(self.price_at_order_cents) * self.quantity
    }
}

/// Input for appending a line to an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub product_id: i64,
    pub quantity: i64,
    /// Overrides the product's current price when set.
    pub unit_price_cents: Option<i64>,
    pub notes: Option<String>,
}

impl NewOrderItem {
    pub fn new(product_id: i64, quantity: i64) -> Self {
        NewOrderItem {
            product_id,
            quantity,
            unit_price_cents: None,
            notes: None,
        }
    }

    pub fn with_price(mut self, unit_price_cents: i64) -> Self {
        self.unit_price_cents = Some(unit_price_cents);
        self
    }
}

/// An order together with its ordered line items.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OrderWithItems {
    pub order: Order,
    pub items: Vec<OrderLineItem>,
}

// =============================================================================
// Sale
// =============================================================================

/// A finalized sale: the financial record of truth.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Sale {
    pub id: i64,
    /// Grand total including tax.
    pub total_cents: i64,
    pub user_id: i64,
    /// Free-text tender tag ("cash", "card", ...).
    pub payment_method: Option<String>,
    #[ts(as = "String")]
    pub timestamp: DateTime<Utc>,
    /// The order this sale completed or was mirrored into.
    pub order_id: Option<i64>,
}

impl Sale {
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }
}

/// A product line on a sale (`sale_products` row).
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SaleLineItem {
    pub id: i64,
    pub sale_id: i64,
    pub product_id: i64,
    pub quantity: i64,
    pub price_at_sale_cents: i64,
}

// =============================================================================
// Shift
// =============================================================================

/// Shift state. A closed shift is never reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShiftStatus {
    Open,
    Closed,
}

impl ShiftStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ShiftStatus::Open => "open",
            ShiftStatus::Closed => "closed",
        }
    }
}

/// A cashier's open-to-close working session.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Shift {
    pub id: i64,
    pub user_id: i64,
    #[ts(as = "String")]
    pub open_time: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub close_time: Option<DateTime<Utc>>,
    pub opening_amount_cents: i64,
    pub closing_amount_cents: Option<i64>,
    pub status: ShiftStatus,
}

impl Shift {
    #[inline]
    pub fn is_open(&self) -> bool {
        self.status == ShiftStatus::Open
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn order(subtotal: i64, discount: i64, tax: i64, total: i64) -> Order {
        let now = Utc::now();
        Order {
            id: 1,
            order_number: "ORD-20250101-001".to_string(),
            status: OrderStatus::Active,
            customer_name: None,
            notes: None,
            subtotal_cents: subtotal,
            discount_cents: discount,
            tax_cents: tax,
            total_cents: total,
            user_id: Some(1),
            archived: false,
            archived_at: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            cancelled_at: None,
            cancelled_by: None,
            cancelled_reason: None,
        }
    }

    #[test]
    fn test_percentage_clamps() {
        assert_eq!(Percentage::from_bps(20_000).bps(), 10_000);
        assert_eq!(Percentage::from_percent(-5.0).bps(), 0);
        assert_eq!(Percentage::from_percent(14.0).bps(), 1400);
        assert_eq!(Percentage::from_percent(150.0).bps(), 10_000);
        assert_eq!(Percentage::from_stored_bps(-3).bps(), 0);
        assert!((Percentage::from_bps(825).percent() - 8.25).abs() < 1e-9);
    }

    #[test]
    fn test_order_status_terminal() {
        assert!(!OrderStatus::Active.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(OrderStatus::Completed.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert_eq!(OrderStatus::default(), OrderStatus::Active);
    }

    #[test]
    fn test_status_serializes_upper_case() {
        let json = serde_json::to_string(&OrderStatus::Cancelled).unwrap();
        assert_eq!(json, "\"CANCELLED\"");
        let json = serde_json::to_string(&ShiftStatus::Open).unwrap();
        assert_eq!(json, "\"OPEN\"");
    }

    #[test]
    fn test_totals_consistency() {
        assert!(order(2500, 400, 294, 2394).totals_consistent());
        assert!(!order(2500, 400, 294, 2500).totals_consistent());
        // discount larger than subtotal is never consistent
        assert!(!order(100, 200, 0, -100).totals_consistent());
    }

    #[test]
    fn test_archived_marker_detection() {
        let mut o = order(0, 0, 0, 0);
        assert!(!o.is_archived());
        o.notes = Some(format!("{} table 4", ARCHIVED_MARKER));
        assert!(o.is_archived());
        o.notes = None;
        o.archived = true;
        assert!(o.is_archived());
    }

    #[test]
    fn test_user_hash_not_serialized() {
        let user = User {
            id: 7,
            username: "ana".to_string(),
            password_hash: "$argon2id$secret".to_string(),
            role: "cashier".to_string(),
            is_active: true,
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("argon2"));
    }
}
