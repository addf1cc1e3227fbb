//! # Repository Module
//!
//! SQL lives here; rules live in the components (`orders`, `sales`,
//! `shifts`).
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Component (OrderLifecycleManager, ...)                                 │
//! │       │  db.write("cancel_order", |conn| ...)                           │
//! │       ▼                                                                 │
//! │  repository::order::mark_cancelled(&mut *conn, ...)                     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite                                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `order`, `sale` and `shift` are free functions over any sqlx executor so
//! they run equally on the pool (reads) or on the connection of an open
//! write transaction. `product` and `user` additionally expose repository
//! structs as the read API for collaborators.

pub mod order;
pub mod product;
pub mod sale;
pub mod shift;
pub mod user;
