//! PostgreSQL persistence via Diesel.
//!
//! Row structs (`models.rs`) and table definitions (`schema.rs`) stay inside
//! this module; the rest of the crate sees only the [`DatabaseHandler`] port.
//!
//! ```ignore
//! use irrd_mirror::outbound::persistence::{DbPool, DieselDatabaseHandler, PoolConfig};
//!
//! run_migrations(&database_url)?;
//! let pool = DbPool::new(PoolConfig::new(database_url)).await?;
//! let handler = DieselDatabaseHandler::new(pool, clock);
//! ```
//!
//! [`DatabaseHandler`]: crate::domain::ports::DatabaseHandler

use diesel::{Connection, PgConnection};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};

mod diesel_database_handler;
mod error_mapping;
mod models;
mod pool;
mod schema;

pub use diesel_database_handler::{DieselDatabaseHandler, DieselTransaction};
pub use pool::{DbPool, PoolConfig, PoolError};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Apply pending schema migrations over a blocking connection.
///
/// # Errors
///
/// Returns [`PoolError::Build`] when connecting or migrating fails.
pub fn run_migrations(database_url: &str) -> Result<(), PoolError> {
    let mut conn = PgConnection::establish(database_url)
        .map_err(|err| PoolError::build(format!("connect for migrations: {err}")))?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|err| PoolError::build(format!("migration: {err}")))?;
    Ok(())
}
