//! # Product Repository
//!
//! Read API over products and categories. The engine needs two things
//! from the catalogue: a product's current price and its category's
//! *live* tax rate (read at pricing time, never cached on the order).
//!
//! ```text
//!   products.category_id ──► categories.tax_rate_bps
//!        │                          │
//!        └── LEFT JOIN ─────────────┘  uncategorised → 0 bps
//! ```

use sqlx::{Executor, Sqlite};
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::pool::Database;
use meridian_core::validation::validate_price_cents;
use meridian_core::{Category, Percentage, Product, TaxRate, ValidationError};

/// Repository for product and category operations.
///
/// ## Usage
/// ```rust,ignore
/// let products = db.products();
/// let espresso = products.get_by_id(1).await?;
/// let rate = products.tax_rate_for(1).await?;
/// ```
#[derive(Debug, Clone)]
pub struct ProductRepository {
    db: Database,
}

impl ProductRepository {
    pub fn new(db: Database) -> Self {
        ProductRepository { db }
    }

    /// Gets a product by ID, with its category's current tax rate.
    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<Product>> {
        find(self.db.pool(), id).await
    }

    /// Live tax rate of the product's category.
    pub async fn tax_rate_for(&self, product_id: i64) -> DbResult<TaxRate> {
        tax_rate(self.db.pool(), product_id).await
    }

    /// Active products, by name.
    pub async fn list_active(&self) -> DbResult<Vec<Product>> {
        let products = sqlx::query_as::<_, Product>(
            "SELECT p.id, p.name, p.price_cents, p.category_id, \
                    COALESCE(c.tax_rate_bps, 0) AS tax_rate_bps, p.is_active \
             FROM products p LEFT JOIN categories c ON c.id = p.category_id \
             WHERE p.is_active = 1 ORDER BY p.name",
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok(products)
    }

    /// Creates a category.
    pub async fn insert_category(&self, name: &str, tax_rate: TaxRate) -> DbResult<Category> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(ValidationError::Required {
                field: "category name".to_string(),
            }
            .into());
        }
        let bps = tax_rate.bps() as i64;

        debug!(name = %name, tax_rate_bps = bps, "Inserting category");

        let id = self
            .db
            .write("insert_category", move |conn| {
                let name = name.clone();
                Box::pin(async move {
                    let id: i64 = sqlx::query_scalar(
                        "INSERT INTO categories (name, tax_rate_bps) VALUES (?, ?) RETURNING id",
                    )
                    .bind(name)
                    .bind(bps)
                    .fetch_one(&mut *conn)
                    .await?;
                    Ok::<_, DbError>(id)
                })
            })
            .await?;

        sqlx::query_as::<_, Category>("SELECT id, name, tax_rate_bps FROM categories WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| DbError::not_found("Category", id))
    }

    /// Creates a product, optionally in a category.
    pub async fn insert_product(
        &self,
        name: &str,
        price_cents: i64,
        category_id: Option<i64>,
    ) -> DbResult<Product> {
        validate_price_cents(price_cents)?;
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(ValidationError::Required {
                field: "name".to_string(),
            }
            .into());
        }

        debug!(name = %name, price_cents, "Inserting product");

        let id = self
            .db
            .write("insert_product", move |conn| {
                let name = name.clone();
                Box::pin(async move {
                    let id: i64 = sqlx::query_scalar(
                        "INSERT INTO products (name, price_cents, category_id, is_active) \
                         VALUES (?, ?, ?, 1) RETURNING id",
                    )
                    .bind(name)
                    .bind(price_cents)
                    .bind(category_id)
                    .fetch_one(&mut *conn)
                    .await?;
                    Ok::<_, DbError>(id)
                })
            })
            .await?;

        self.get_by_id(id)
            .await?
            .ok_or_else(|| DbError::not_found("Product", id))
    }
}

// =============================================================================
// Executor-level queries (usable inside a write transaction)
// =============================================================================

pub(crate) async fn find<'e, E>(executor: E, id: i64) -> DbResult<Option<Product>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let product = sqlx::query_as::<_, Product>(
        "SELECT p.id, p.name, p.price_cents, p.category_id, \
                COALESCE(c.tax_rate_bps, 0) AS tax_rate_bps, p.is_active \
         FROM products p LEFT JOIN categories c ON c.id = p.category_id \
         WHERE p.id = ?",
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;

    Ok(product)
}

pub(crate) async fn tax_rate<'e, E>(executor: E, product_id: i64) -> DbResult<TaxRate>
where
    E: Executor<'e, Database = Sqlite>,
{
    let bps: Option<i64> = sqlx::query_scalar(
        "SELECT COALESCE(c.tax_rate_bps, 0) FROM products p \
         LEFT JOIN categories c ON c.id = p.category_id WHERE p.id = ?",
    )
    .bind(product_id)
    .fetch_optional(executor)
    .await?;

    bps.map(Percentage::from_stored_bps)
        .ok_or_else(|| DbError::not_found("Product", product_id))
}
