//! C7 — the persister. A `sqlx::SqlitePool`-backed store for
//! configured nodes/groups/tags/subscriptions/users, opened with WAL
//! journaling and foreign keys on, and a hand-rolled migrator (the
//! dirty-flag-per-version bookkeeping doesn't fit `sqlx::migrate!`'s
//! model, so CRUD goes through bound-parameter `sqlx::query`/
//! `query_as` calls instead of the compile-time-checked macros).

pub mod migrator;
pub mod models;

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::info;

pub use migrator::{run_migrations, MigrationError};
pub use models::*;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
    #[error("migration head is dirty at version {0}, manual recovery required")]
    MigrationDirty(String),
    #[error("migration io error: {0}")]
    MigrationIo(String),
}

impl From<MigrationError> for PersistError {
    fn from(e: MigrationError) -> Self {
        match e {
            MigrationError::Sql(e) => PersistError::Sql(e),
            MigrationError::Dirty(v) => PersistError::MigrationDirty(v),
            MigrationError::Io(e) => PersistError::MigrationIo(e.to_string()),
            MigrationError::BadFilename(f) => PersistError::MigrationIo(f),
        }
    }
}

/// Opens (creating if absent) the SQLite store at `db_path`, enabling
/// WAL journaling and foreign-key enforcement, then runs any pending
/// migrations found under `schema_dir`.
pub async fn open(db_path: &Path, schema_dir: &Path) -> Result<SqlitePool, PersistError> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    info!(db = %db_path.display(), "persister pool opened");
    run_migrations(&pool, schema_dir).await?;
    Ok(pool)
}
