//! # meridian-db: Database Layer for Meridian POS
//!
//! Persistence and the transactional components of the order/transaction
//! engine. SQLite via sqlx, every write retried on lock contention.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Meridian POS Data Flow                           │
//! │                                                                         │
//! │  Till UI (checkout, order screen, shift dialog)                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    meridian-db (THIS CRATE)                     │   │
//! │  │                                                                 │   │
//! │  │  OrderLifecycleManager  SaleTransactionCoordinator              │   │
//! │  │  ShiftConcurrencyGuard  RetentionSweeper                        │   │
//! │  │            │                                                    │   │
//! │  │            ▼                                                    │   │
//! │  │  Database::write ── retry on BUSY/LOCKED ── repositories        │   │
//! │  │            │                                                    │   │
//! │  │   ┌───────────────┐   ┌──────────────┐   ┌──────────────┐      │   │
//! │  │   │   pool.rs     │   │ repository/  │   │  migrations  │      │   │
//! │  │   └───────────────┘   └──────────────┘   └──────────────┘      │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database (WAL)                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool, `Database` handle, the write entry point
//! - [`retry`] - Retry policy and savepoints
//! - [`orders`] - Order lifecycle, archival, retention cleanup
//! - [`sales`] - Cart finalization with double-submit protection
//! - [`shifts`] - Single open shift guard
//! - [`order_number`] - Daily order number allocation
//! - [`maintenance`] - Background retention sweep
//! - [`config`] - Engine configuration (TOML + environment)
//! - [`repository`] - SQL per table
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use meridian_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/meridian.db")).await?;
//!
//! let order = db.orders().create_order(&cashier, Some("Table 4"), None).await?;
//! let sale = db.sales().finalize(&mut cart, &cashier, Some(order.id), Some("cash")).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod maintenance;
pub mod migrations;
pub mod order_number;
pub mod orders;
pub mod pool;
pub mod repository;
pub mod retry;
pub mod sales;
pub mod shifts;

#[cfg(test)]
pub(crate) mod test_support;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{ConfigError, EngineConfig};
pub use error::{DbError, DbResult, ErrorKind};
pub use maintenance::RetentionSweeper;
pub use orders::{CleanupReport, ItemsOutcome, OrderLifecycleManager, ResetReport, ResetScope};
pub use pool::{Database, DbConfig};
pub use retry::RetryPolicy;
pub use sales::{FinalizedSale, SaleTransactionCoordinator};
pub use shifts::ShiftConcurrencyGuard;

// Repository re-exports for convenience
pub use repository::product::ProductRepository;
pub use repository::user::UserRepository;
