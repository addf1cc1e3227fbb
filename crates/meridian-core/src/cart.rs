//! # Cart
//!
//! The ephemeral cart built up during checkout. Never persisted; it is
//! owned by the session that created it and must not be shared across
//! threads (wrap it yourself if a UI needs shared access).
//!
//! ## Cart Operations
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Action                      Cart change                                │
//! │  ──────                      ───────────                                │
//! │  add_item(product, n)    ──► merge into existing line or push new line  │
//! │  update_quantity(id, n)  ──► set quantity (0 removes the line)          │
//! │  set_item_discount(..)   ──► per-line percentage + fixed amount         │
//! │  set_cart_discount(..)   ──► cart-wide percentage + fixed amount        │
//! │  clear()                 ──► empty cart, discounts reset                │
//! │                                                                         │
//! │  Totals are never stored here; see `pricing::price_cart`.              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::types::{Percentage, Product, TaxRate};
use crate::validation::validate_price_cents;
use crate::{MAX_CART_ITEMS, MAX_ITEM_QUANTITY};

/// A product line in the cart.
///
/// Name, unit price and tax rate are frozen when the product is added, so
/// the cart prices consistently even if the catalogue changes meanwhile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLineItem {
    pub product_id: i64,
    pub name: String,
    pub unit_price_cents: i64,
    pub tax_rate: TaxRate,
    pub quantity: i64,
    pub discount_percentage: Percentage,
    pub discount_amount_cents: i64,
}

impl CartLineItem {
    /// Creates a line from a product and quantity.
    pub fn from_product(product: &Product, quantity: i64) -> Self {
        CartLineItem {
            product_id: product.id,
            name: product.name.clone(),
            unit_price_cents: product.price_cents,
            tax_rate: product.tax_rate(),
            quantity,
            discount_percentage: Percentage::zero(),
            discount_amount_cents: 0,
        }
    }

    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    #[inline]
    pub fn discount_amount(&self) -> Money {
        Money::from_cents(self.discount_amount_cents)
    }
}

/// The shopping cart.
///
/// ## Invariants
/// - Lines are unique by `product_id`
/// - Every line has `1 ..= MAX_ITEM_QUANTITY` units
/// - At most `MAX_CART_ITEMS` lines
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    pub items: Vec<CartLineItem>,
    pub discount_percentage: Percentage,
    pub discount_amount_cents: i64,
    /// When the cart was created or last cleared.
    pub created_at: DateTime<Utc>,
}

impl Default for Cart {
    fn default() -> Self {
        Cart::new()
    }
}

impl Cart {
    pub fn new() -> Self {
        Cart {
            items: Vec::new(),
            discount_percentage: Percentage::zero(),
            discount_amount_cents: 0,
            created_at: Utc::now(),
        }
    }

    /// Adds a product or increases the quantity of its existing line.
    pub fn add_item(&mut self, product: &Product, quantity: i64) -> CoreResult<()> {
        if quantity <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "quantity".to_string(),
            }
            .into());
        }
        validate_price_cents(product.price_cents)?;

        if let Some(item) = self.items.iter_mut().find(|i| i.product_id == product.id) {
            let new_qty = item.quantity + quantity;
            if new_qty > MAX_ITEM_QUANTITY {
                return Err(CoreError::QuantityTooLarge {
                    requested: new_qty,
                    max: MAX_ITEM_QUANTITY,
                });
            }
            item.quantity = new_qty;
            return Ok(());
        }

        if quantity > MAX_ITEM_QUANTITY {
            return Err(CoreError::QuantityTooLarge {
                requested: quantity,
                max: MAX_ITEM_QUANTITY,
            });
        }

        if self.items.len() >= MAX_CART_ITEMS {
            return Err(CoreError::CartTooLarge {
                max: MAX_CART_ITEMS,
            });
        }

        self.items.push(CartLineItem::from_product(product, quantity));
        Ok(())
    }

    /// Sets the quantity of a line; 0 removes it.
    pub fn update_quantity(&mut self, product_id: i64, quantity: i64) -> CoreResult<()> {
        if quantity == 0 {
            return self.remove_item(product_id);
        }
        if quantity < 0 {
            return Err(ValidationError::MustBePositive {
                field: "quantity".to_string(),
            }
            .into());
        }
        if quantity > MAX_ITEM_QUANTITY {
            return Err(CoreError::QuantityTooLarge {
                requested: quantity,
                max: MAX_ITEM_QUANTITY,
            });
        }

        let item = self.line_mut(product_id)?;
        item.quantity = quantity;
        Ok(())
    }

    /// Removes a line by product id.
    pub fn remove_item(&mut self, product_id: i64) -> CoreResult<()> {
        let initial_len = self.items.len();
        self.items.retain(|i| i.product_id != product_id);

        if self.items.len() == initial_len {
            Err(CoreError::ProductNotInCart(product_id))
        } else {
            Ok(())
        }
    }

    /// Sets a per-line discount. Negative amounts are stored as zero; the
    /// percentage is already clamped by `Percentage`.
    pub fn set_item_discount(
        &mut self,
        product_id: i64,
        percentage: Percentage,
        amount: Money,
    ) -> CoreResult<()> {
        let item = self.line_mut(product_id)?;
        item.discount_percentage = percentage;
        item.discount_amount_cents = amount.non_negative().cents();
        Ok(())
    }

    /// Sets the cart-wide discount applied after line discounts.
    pub fn set_cart_discount(&mut self, percentage: Percentage, amount: Money) {
        self.discount_percentage = percentage;
        self.discount_amount_cents = amount.non_negative().cents();
    }

    #[inline]
    pub fn discount_amount(&self) -> Money {
        Money::from_cents(self.discount_amount_cents)
    }

    /// Empties the cart and resets cart-level discounts.
    pub fn clear(&mut self) {
        self.items.clear();
        self.discount_percentage = Percentage::zero();
        self.discount_amount_cents = 0;
        self.created_at = Utc::now();
    }

    /// Number of distinct lines.
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Sum of quantities across all lines.
    pub fn total_quantity(&self) -> i64 {
        self.items.iter().map(|i| i.quantity).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn line(&self, product_id: i64) -> Option<&CartLineItem> {
        self.items.iter().find(|i| i.product_id == product_id)
    }

    fn line_mut(&mut self, product_id: i64) -> CoreResult<&mut CartLineItem> {
        self.items
            .iter_mut()
            .find(|i| i.product_id == product_id)
            .ok_or(CoreError::ProductNotInCart(product_id))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
