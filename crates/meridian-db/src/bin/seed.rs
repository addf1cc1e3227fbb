//! # Seed Data Generator
//!
//! Populates a database with a small catalogue and a demo user for
//! development.
//!
//! ## Usage
//! ```bash
//! # Seed the database named in engine.toml / MERIDIAN_DB_PATH
//! cargo run -p meridian-db --bin seed
//!
//! # Specify database path
//! cargo run -p meridian-db --bin seed -- --db ./data/meridian.db
//!
//! # Also ring up one sample sale
//! cargo run -p meridian-db --bin seed -- --db ./dev.db --sample-sale
//! ```
//!
//! ## Generated Data
//! - Categories with their tax rates (0%, 5%, 14%)
//! - A handful of products per category
//! - User `demo` / password `demo` (role `manager`)

use std::env;
use std::path::PathBuf;

use meridian_core::{Cart, Money, Percentage};
use meridian_db::{Database, EngineConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Categories: (name, tax rate in basis points, products as (name, cents))
const CATALOGUE: &[(&str, u32, &[(&str, i64)])] = &[
    (
        "Beverages",
        1400,
        &[
            ("Espresso", 250),
            ("Cappuccino", 380),
            ("Iced Tea", 300),
            ("Orange Juice", 420),
            ("Sparkling Water", 200),
        ],
    ),
    (
        "Bakery",
        500,
        &[
            ("Croissant", 275),
            ("Blueberry Muffin", 325),
            ("Sourdough Loaf", 650),
            ("Cinnamon Roll", 350),
        ],
    ),
    (
        "Groceries",
        0,
        &[
            ("Whole Milk 1L", 189),
            ("Free Range Eggs 12", 499),
            ("Rolled Oats 500g", 279),
        ],
    ),
];

const DEMO_USER: &str = "demo";
const DEMO_PASSWORD: &str = "demo";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();

    let mut db_path: Option<PathBuf> = None;
    let mut config_path: Option<PathBuf> = None;
    let mut sample_sale = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--sample-sale" => sample_sale = true,
            "--help" | "-h" => {
                println!("Meridian POS Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>       Database file path (default: from engine config)");
                println!("  -c, --config <PATH>   engine.toml to load");
                println!("      --sample-sale     Finalize one demo sale after seeding");
                println!("  -h, --help            Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    let mut config = EngineConfig::load(config_path)?;
    if let Some(path) = db_path {
        config.database.path = Some(path);
    }

    println!("Meridian POS Seed Data Generator");
    println!("================================");
    println!("Database: {}", config.database_path().display());
    println!();

    if let Some(parent) = config.database_path().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db = Database::new(config.db_config())
        .await?
        .with_retry(config.retry_policy());

    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let products = db.products();
    let existing = products.list_active().await?.len();
    if existing > 0 {
        println!("⚠ Database already has {} products", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    let mut created = 0;
    for (category_name, tax_bps, items) in CATALOGUE {
        let category = products
            .insert_category(category_name, Percentage::from_bps(*tax_bps))
            .await?;
        for (name, price_cents) in items.iter() {
            products
                .insert_product(name, *price_cents, Some(category.id))
                .await?;
            created += 1;
        }
        info!(category = %category.name, tax_bps, "Category seeded");
    }
    println!("✓ Created {} categories, {} products", CATALOGUE.len(), created);

    let demo = db.users().create(DEMO_USER, DEMO_PASSWORD, "manager").await?;
    println!("✓ Created user '{}' (password '{}')", demo.username, DEMO_PASSWORD);

    if sample_sale {
        let catalogue = products.list_active().await?;
        let mut cart = Cart::new();
        for product in catalogue.iter().take(3) {
            cart.add_item(product, 1)?;
        }

        let shifts = db.shifts();
        shifts.open_shift(&demo, Money::from_cents(10_000)).await?;
        let sale = config
            .sale_coordinator(&db)
            .finalize(&mut cart, &demo, None, Some("cash"))
            .await?;
        shifts.close_shift(&demo, Money::from_cents(10_000) + sale.sale.total()).await?;

        println!(
            "✓ Sample sale #{} for {} ({} lines)",
            sale.sale.id,
            sale.sale.total(),
            sale.items.len()
        );
    }

    println!();
    println!("✓ Seed complete!");

    db.close().await;
    Ok(())
}
