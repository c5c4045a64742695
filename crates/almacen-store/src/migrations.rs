//! # Database Migrations
//!
//! Embedded SQL migrations for the durable backend.
//!
//! ## How This Works
//! The `sqlx::migrate!()` macro embeds all SQL files from the crate's
//! `migrations/` directory into the binary at compile time. No runtime file
//! access needed. Applied migrations are tracked in `_sqlx_migrations` and
//! the runner is idempotent.
//!
//! ## Adding New Migrations
//! 1. Create a new file `migrations/NNN_description.sql` with the next
//!    sequence number
//! 2. Write idempotent SQL (`IF NOT EXISTS` where possible)
//! 3. NEVER modify existing migrations - always add new ones

use sqlx::SqlitePool;
use tracing::info;

use crate::error::StoreResult;

/// Embedded migrations from the `migrations/` directory.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

/// Runs all pending migrations against the pool.
pub async fn run_migrations(pool: &SqlitePool) -> StoreResult<()> {
    info!("Running store migrations");
    MIGRATOR.run(pool).await?;
    info!("Store migrations complete");
    Ok(())
}
