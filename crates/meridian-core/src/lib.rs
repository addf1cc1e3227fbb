//! # meridian-core: Pure Business Logic for Meridian POS
//!
//! This crate holds every rule of the order/transaction engine that can be
//! expressed without touching storage: money arithmetic, cart pricing,
//! order-number formatting, validation and the domain types that the
//! database layer persists.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Meridian POS Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │          Presentation (dialogs, receipts, reports)              │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    meridian-db                                  │   │
//! │  │   OrderLifecycleManager  SaleTransactionCoordinator             │   │
//! │  │   ShiftConcurrencyGuard  RetrySafePersistence                   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              ★ meridian-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   types    money    cart    pricing    order_number             │   │
//! │  │   validation    clock    error                                  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Order, Sale, Shift, Product, ...)
//! - [`money`] - Money type with integer arithmetic (cents)
//! - [`cart`] - The ephemeral cart owned by one checkout session
//! - [`pricing`] - Subtotal, discount, tax and grand-total computation
//! - [`order_number`] - `ORD-YYYYMMDD-NNN` / `SALE-NNNNNN` numbering rules
//! - [`validation`] - Input validation
//! - [`clock`] - Injectable source of "now"
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use meridian_core::cart::Cart;
//! use meridian_core::pricing::price_cart;
//! use meridian_core::types::{Percentage, Product};
//!
//! let product = Product::new(1, "Espresso", 350, Percentage::from_bps(1400));
//!
//! let mut cart = Cart::new();
//! cart.add_item(&product, 2).unwrap();
//!
//! let pricing = price_cart(&cart);
//! assert_eq!(pricing.subtotal.cents(), 700);
//! assert_eq!(pricing.tax.cents(), 98);
//! assert_eq!(pricing.grand_total.cents(), 798);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cart;
pub mod clock;
pub mod error;
pub mod money;
pub mod order_number;
pub mod pricing;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use cart::{Cart, CartLineItem};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{CoreError, ValidationError};
pub use money::Money;
pub use pricing::{CartPricing, LinePricing, OrderTotals};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum distinct product lines allowed in a single cart.
pub const MAX_CART_ITEMS: usize = 100;

/// Maximum quantity of a single product line.
///
/// Catches keying mistakes such as 1000 instead of 10.
pub const MAX_ITEM_QUANTITY: i64 = 999;

/// Text marker written at the front of `orders.notes` when an order is
/// archived. Reporting readers that predate the `archived` column parse it.
pub const ARCHIVED_MARKER: &str = "[ARCHIVED]";
