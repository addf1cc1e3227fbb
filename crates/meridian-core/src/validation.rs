//! # Validation Module
//!
//! Input validation for values that reach the engine from the till.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Presentation                                                 │
//! │  └── Basic format checks, immediate feedback                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  └── Business rules (quantities, amounts, text lengths)                │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: SQLite                                                       │
//! │  ├── NOT NULL / CHECK constraints                                      │
//! │  ├── UNIQUE order_number, one open shift                               │
//! │  └── Foreign keys                                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Validation errors are surfaced immediately and never retried.

use crate::error::ValidationError;
use crate::MAX_ITEM_QUANTITY;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest accepted customer name.
pub const MAX_CUSTOMER_NAME_LEN: usize = 120;

/// Longest accepted order/line note (the archive marker included).
pub const MAX_NOTES_LEN: usize = 1000;

/// Longest accepted cancellation reason.
pub const MAX_REASON_LEN: usize = 500;

/// Largest price or cash amount accepted, in cents (10 billion).
///
/// Keeps `price × MAX_ITEM_QUANTITY × MAX_CART_ITEMS` well inside i64.
pub const MAX_AMOUNT_CENTS: i64 = 1_000_000_000_000;

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a line quantity.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_ITEM_QUANTITY (999)
///
/// ```rust
/// use meridian_core::validation::validate_quantity;
///
/// assert!(validate_quantity(3).is_ok());
/// assert!(validate_quantity(0).is_err());
/// assert!(validate_quantity(1000).is_err());
/// ```
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_ITEM_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a unit price in cents. Zero is allowed (free items).
pub fn validate_price_cents(cents: i64) -> ValidationResult<()> {
    validate_amount_cents("price", cents)
}

/// Validates a cash amount (shift float, order discount).
///
/// ## Rules
/// - Must not be negative
/// - Must not exceed MAX_AMOUNT_CENTS
pub fn validate_amount_cents(field: &str, cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::Negative {
            field: field.to_string(),
        });
    }

    if cents > MAX_AMOUNT_CENTS {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: MAX_AMOUNT_CENTS,
        });
    }

    Ok(())
}

// =============================================================================
// String Validators
// =============================================================================

/// Trims an optional free-text field, maps blank to `None` and enforces
/// `max` characters.
fn optional_text(field: &str, value: Option<&str>, max: usize) -> ValidationResult<Option<String>> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };

    if value.chars().count() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }

    Ok(Some(value.to_string()))
}

/// Validates and normalizes an optional customer name.
///
/// ```rust
/// use meridian_core::validation::validate_customer_name;
///
/// assert_eq!(validate_customer_name(Some("  Ana ")).unwrap().as_deref(), Some("Ana"));
/// assert_eq!(validate_customer_name(Some("   ")).unwrap(), None);
/// ```
pub fn validate_customer_name(name: Option<&str>) -> ValidationResult<Option<String>> {
    optional_text("customer_name", name, MAX_CUSTOMER_NAME_LEN)
}

/// Validates and normalizes optional notes.
pub fn validate_notes(notes: Option<&str>) -> ValidationResult<Option<String>> {
    optional_text("notes", notes, MAX_NOTES_LEN)
}

/// Validates and normalizes an optional cancellation reason.
pub fn validate_reason(reason: Option<&str>) -> ValidationResult<Option<String>> {
    optional_text("reason", reason, MAX_REASON_LEN)
}

/// Validates a username for account creation.
pub fn validate_username(username: &str) -> ValidationResult<()> {
    let username = username.trim();

    if username.is_empty() {
        return Err(ValidationError::Required {
            field: "username".to_string(),
        });
    }

    if username.len() > 50 {
        return Err(ValidationError::TooLong {
            field: "username".to_string(),
            max: 50,
        });
    }

    if username.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidFormat {
            field: "username".to_string(),
            reason: "must not contain whitespace".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(999).is_ok());

        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-1).is_err());
        assert!(validate_quantity(1000).is_err());
    }

    #[test]
    fn test_validate_amounts() {
        assert!(validate_price_cents(0).is_ok());
        assert!(validate_price_cents(-1).is_err());
        assert!(validate_amount_cents("opening_amount", 10_000).is_ok());
        assert_eq!(
            validate_amount_cents("opening_amount", -5),
            Err(ValidationError::Negative {
                field: "opening_amount".to_string()
            })
        );

        assert!(validate_price_cents(MAX_AMOUNT_CENTS).is_ok());
        assert_eq!(
            validate_price_cents(MAX_AMOUNT_CENTS + 1),
            Err(ValidationError::OutOfRange {
                field: "price".to_string(),
                min: 0,
                max: MAX_AMOUNT_CENTS,
            })
        );
        assert!(validate_amount_cents("closing_amount", i64::MAX).is_err());
    }

    #[test]
    fn test_optional_text() {
        assert_eq!(validate_notes(None).unwrap(), None);
        assert_eq!(validate_notes(Some("  table 4 ")).unwrap().as_deref(), Some("table 4"));
        assert!(validate_reason(Some(&"x".repeat(MAX_REASON_LEN + 1))).is_err());
        assert!(validate_customer_name(Some(&"é".repeat(MAX_CUSTOMER_NAME_LEN))).is_ok());
    }

    #[test]
    fn test_validate_username() {
        assert!(validate_username("cashier1").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username("two words").is_err());
        assert!(validate_username(&"a".repeat(51)).is_err());
    }
}
