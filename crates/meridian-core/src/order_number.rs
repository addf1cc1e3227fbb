//! # Order Numbers
//!
//! Formatting and parsing rules for the human-facing order number. The
//! allocation itself (scan, probe, insert-retry) lives in `meridian-db`.
//!
//! ```text
//!   ORD-20250101-001      daily sequence, restarts every business day
//!   ORD-20250101-1000     sequence keeps counting past 999
//!   ORD-20250101093015-9f3a61c2   fallback when the scan fails
//!   SALE-000042           order mirrored from sale #42
//! ```

use chrono::{DateTime, NaiveDate, Utc};

/// Prefix shared by all till-created orders.
pub const ORDER_PREFIX: &str = "ORD-";

/// Prefix of orders synthesized from direct sales.
pub const SALE_PREFIX: &str = "SALE-";

/// `ORD-YYYYMMDD-` for the given business day.
pub fn daily_prefix(date: NaiveDate) -> String {
    format!("{}{}-", ORDER_PREFIX, date.format("%Y%m%d"))
}

/// `ORD-YYYYMMDD-NNN`.
///
/// ```rust
/// use chrono::NaiveDate;
/// use meridian_core::order_number::format_daily;
///
/// let day = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
/// assert_eq!(format_daily(day, 2), "ORD-20250101-002");
/// ```
pub fn format_daily(date: NaiveDate, sequence: u32) -> String {
    format!("{}{:03}", daily_prefix(date), sequence)
}

/// Extracts the numeric suffix of `number` if it carries `prefix`.
///
/// Returns `None` for numbers from another day and for malformed suffixes
/// (empty, non-digit, overflowing).
pub fn parse_daily_sequence(prefix: &str, number: &str) -> Option<u32> {
    let suffix = number.strip_prefix(prefix)?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

/// Highest parsed sequence among `numbers` plus one; 1 when none parse.
pub fn next_daily_sequence<'a, I>(prefix: &str, numbers: I) -> u32
where
    I: IntoIterator<Item = &'a str>,
{
    numbers
        .into_iter()
        .filter_map(|n| parse_daily_sequence(prefix, n))
        .max()
        .map_or(1, |max| max.saturating_add(1))
}

/// `ORD-{YYYYMMDDHHMMSS}-{8 hex}`, used when the daily scan fails.
pub fn fallback_number(now: DateTime<Utc>, token: u32) -> String {
    format!("{}{}-{:08x}", ORDER_PREFIX, now.format("%Y%m%d%H%M%S"), token)
}

/// `SALE-NNNNNN` for the order mirrored from a sale.
///
/// ```rust
/// use meridian_core::order_number::sale_order_number;
///
/// assert_eq!(sale_order_number(42), "SALE-000042");
/// ```
pub fn sale_order_number(sale_id: i64) -> String {
    format!("{}{:06}", SALE_PREFIX, sale_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn new_year() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
    }

    #[test]
    fn test_daily_format() {
        assert_eq!(daily_prefix(new_year()), "ORD-20250101-");
        assert_eq!(format_daily(new_year(), 1), "ORD-20250101-001");
        assert_eq!(format_daily(new_year(), 1234), "ORD-20250101-1234");
    }

    #[test]
    fn test_parse_skips_malformed() {
        let prefix = daily_prefix(new_year());
        assert_eq!(parse_daily_sequence(&prefix, "ORD-20250101-007"), Some(7));
        assert_eq!(parse_daily_sequence(&prefix, "ORD-20250101-"), None);
        assert_eq!(parse_daily_sequence(&prefix, "ORD-20250101-0x1"), None);
        assert_eq!(parse_daily_sequence(&prefix, "ORD-20241231-005"), None);
        assert_eq!(parse_daily_sequence(&prefix, "SALE-000001"), None);
    }

    #[test]
    fn test_next_sequence_uses_max() {
        let prefix = daily_prefix(new_year());
        assert_eq!(next_daily_sequence(&prefix, Vec::<&str>::new()), 1);

        let existing = ["ORD-20250101-001", "ORD-20250101-009", "ORD-20250101-bad", "ORD-20250101-003"];
        assert_eq!(next_daily_sequence(&prefix, existing), 10);
    }

    #[test]
    fn test_fallback_and_sale_numbers() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 9, 30, 15).unwrap();
        assert_eq!(fallback_number(now, 0x9f3a61c2), "ORD-20250101093015-9f3a61c2");
        assert_eq!(fallback_number(now, 1), "ORD-20250101093015-00000001");
        assert_eq!(sale_order_number(1), "SALE-000001");
        assert_eq!(sale_order_number(1_234_567), "SALE-1234567");
    }
}
