//! # Database Error Types
//!
//! Error types for database operations and the transactional components.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbError (this module) ← classified by SQLite result code              │
//! │       │                                                                 │
//! │       ├── Locked ──► Database::write retries, then RetriesExhausted    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbError::kind() ← presentation layer branches on ErrorKind            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use meridian_core::{OrderStatus, ValidationError};
use serde::Serialize;
use thiserror::Error;

/// SQLITE_BUSY
const SQLITE_BUSY: i32 = 5;
/// SQLITE_LOCKED
const SQLITE_LOCKED: i32 = 6;

/// Coarse classification callers branch on instead of matching messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input; never retried.
    Validation,
    /// Storage lock contention that outlived the retry budget.
    Concurrency,
    /// A uniqueness or state rule would be broken.
    Consistency,
    /// Missing order/sale/shift/product/user.
    NotFound,
    /// Re-authentication failed.
    Unauthorized,
    /// Anything else coming from the storage layer.
    Storage,
}

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - Two writers allocated the same order number
    /// - A second shift was opened while one is open
    /// - Duplicate username
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key constraint violation.
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// SQLITE_BUSY / SQLITE_LOCKED. Retried by `Database::write`.
    #[error("Database is locked: {0}")]
    Locked(String),

    /// Lock contention persisted through every attempt.
    #[error("{operation} failed after {attempts} attempts: database is locked")]
    RetriesExhausted { operation: String, attempts: u32 },

    /// The order is not in a state that allows the action.
    #[error("Cannot {action} order {order_id} in status {status}")]
    InvalidTransition {
        order_id: i64,
        status: OrderStatus,
        action: String,
    },

    /// A domain invariant would be violated.
    #[error("Consistency violation: {0}")]
    Consistency(String),

    /// Password re-verification failed.
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// Input rejected before touching storage.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Database connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Creates a UniqueViolation error.
    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn invalid_transition(order_id: i64, status: OrderStatus, action: &str) -> Self {
        DbError::InvalidTransition {
            order_id,
            status,
            action: action.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::Validation(_) => ErrorKind::Validation,
            DbError::Locked(_) | DbError::RetriesExhausted { .. } => ErrorKind::Concurrency,
            DbError::UniqueViolation { .. }
            | DbError::ForeignKeyViolation { .. }
            | DbError::InvalidTransition { .. }
            | DbError::Consistency(_) => ErrorKind::Consistency,
            DbError::NotFound { .. } => ErrorKind::NotFound,
            DbError::AuthenticationFailed => ErrorKind::Unauthorized,
            DbError::ConnectionFailed(_)
            | DbError::MigrationFailed(_)
            | DbError::QueryFailed(_)
            | DbError::Internal(_) => ErrorKind::Storage,
        }
    }

    /// True for transient lock contention.
    pub fn is_locked(&self) -> bool {
        matches!(self, DbError::Locked(_))
    }

    /// True when a UNIQUE constraint on a column named `column` fired.
    pub fn is_unique_violation_on(&self, column: &str) -> bool {
        matches!(self, DbError::UniqueViolation { field, .. } if field.ends_with(column))
    }
}

/// Primary result code of a SQLite error (extended codes carry it in the
/// low byte).
fn primary_code(db_err: &dyn sqlx::error::DatabaseError) -> Option<i32> {
    db_err
        .code()
        .and_then(|code| code.parse::<i32>().ok())
        .map(|code| code & 0xff)
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound           → DbError::NotFound
/// Database, code BUSY/LOCKED         → DbError::Locked
/// Database, unique violation         → DbError::UniqueViolation
/// Database, foreign key violation    → DbError::ForeignKeyViolation
/// Database, other                    → DbError::QueryFailed
/// PoolTimedOut / PoolClosed / Io     → DbError::ConnectionFailed
/// Other                              → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message().to_string();

                let locked = match primary_code(&*db_err) {
                    Some(code) => code == SQLITE_BUSY || code == SQLITE_LOCKED,
                    // Drivers that omit the code still say so in the message
                    None => msg.contains("database is locked"),
                };
                if locked {
                    return DbError::Locked(msg);
                }

                match db_err.kind() {
                    sqlx::error::ErrorKind::UniqueViolation => {
                        // "UNIQUE constraint failed: <table>.<column>"
                        let field = msg
                            .split("UNIQUE constraint failed: ")
                            .nth(1)
                            .unwrap_or("unknown")
                            .to_string();
                        DbError::UniqueViolation {
                            field,
                            value: "unknown".to_string(),
                        }
                    }
                    sqlx::error::ErrorKind::ForeignKeyViolation => {
                        DbError::ForeignKeyViolation { message: msg }
                    }
                    _ => DbError::QueryFailed(msg),
                }
            }

            sqlx::Error::PoolTimedOut => {
                DbError::ConnectionFailed("Timed out waiting for a connection".to_string())
            }

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            sqlx::Error::Io(e) => DbError::ConnectionFailed(e.to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(DbError::Locked("busy".into()).kind(), ErrorKind::Concurrency);
        assert_eq!(
            DbError::RetriesExhausted {
                operation: "create_order".into(),
                attempts: 3
            }
            .kind(),
            ErrorKind::Concurrency
        );
        assert_eq!(DbError::from(ValidationError::EmptyCart).kind(), ErrorKind::Validation);
        assert_eq!(DbError::not_found("Order", 9).kind(), ErrorKind::NotFound);
        assert_eq!(DbError::AuthenticationFailed.kind(), ErrorKind::Unauthorized);
        assert_eq!(
            DbError::invalid_transition(1, OrderStatus::Completed, "cancel").kind(),
            ErrorKind::Consistency
        );
    }

    #[test]
    fn test_messages() {
        let err = DbError::invalid_transition(7, OrderStatus::Cancelled, "complete");
        assert_eq!(err.to_string(), "Cannot complete order 7 in status cancelled");

        let err = DbError::RetriesExhausted {
            operation: "finalize_sale".into(),
            attempts: 3,
        };
        assert_eq!(err.to_string(), "finalize_sale failed after 3 attempts: database is locked");
    }

    #[test]
    fn test_unique_violation_column_match() {
        let err = DbError::duplicate("orders.order_number", "ORD-20250101-001");
        assert!(err.is_unique_violation_on("order_number"));
        assert!(!err.is_unique_violation_on("status"));
        assert!(!DbError::Locked("x".into()).is_unique_violation_on("order_number"));
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: DbError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err: DbError = sqlx::Error::PoolClosed.into();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }
}
