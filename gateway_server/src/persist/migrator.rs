//! Hand-rolled schema migrator. `sqlx::migrate!` assumes
//! its own bookkeeping table; this one tracks a per-version `dirty`
//! flag so a migration that dies mid-script leaves the head marked
//! dirty and refuses to start again until someone looks at it.

use std::path::Path;

use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("migration head {0} is dirty, refusing to start")]
    Dirty(String),
    #[error("migration filename {0} does not match NNNN_description.sql")]
    BadFilename(String),
}

struct MigrationFile {
    version: String,
    description: String,
    sql: String,
}

fn parse_filename(path: &Path) -> Result<(String, String), MigrationError> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| MigrationError::BadFilename(path.display().to_string()))?;
    let (version, description) = stem
        .split_once('_')
        .ok_or_else(|| MigrationError::BadFilename(stem.to_string()))?;
    if version.len() != 4 || !version.chars().all(|c| c.is_ascii_digit()) {
        return Err(MigrationError::BadFilename(stem.to_string()));
    }
    Ok((version.to_string(), description.to_string()))
}

fn discover(schema_dir: &Path) -> Result<Vec<MigrationFile>, MigrationError> {
    let mut files = Vec::new();
    if !schema_dir.exists() {
        return Ok(files);
    }
    for entry in std::fs::read_dir(schema_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("sql") {
            continue;
        }
        let (version, description) = parse_filename(&path)?;
        let sql = std::fs::read_to_string(&path)?;
        files.push(MigrationFile { version, description, sql });
    }
    files.sort_by(|a, b| a.version.cmp(&b.version));
    Ok(files)
}

/// Runs every migration under `schema_dir` not yet recorded in
/// `migrations`, in ascending version order. Refuses to start at all
/// if the current head is dirty.
pub async fn run_migrations(pool: &SqlitePool, schema_dir: &Path) -> Result<(), MigrationError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS migrations (
            migration_id INTEGER PRIMARY KEY AUTOINCREMENT,
            version TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL,
            dirty INTEGER NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .execute(pool)
    .await?;

    if let Some(row) = sqlx::query("SELECT version, dirty FROM migrations ORDER BY version DESC LIMIT 1")
        .fetch_optional(pool)
        .await?
    {
        let dirty: i64 = row.try_get("dirty")?;
        if dirty != 0 {
            let version: String = row.try_get("version")?;
            error!(version = %version, "migration head is dirty");
            return Err(MigrationError::Dirty(version));
        }
    }

    let applied: Vec<String> = sqlx::query("SELECT version FROM migrations")
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(|row| row.try_get::<String, _>("version"))
        .collect::<Result<_, _>>()?;

    for file in discover(schema_dir)? {
        if applied.contains(&file.version) {
            continue;
        }

        let mut tx = pool.begin().await?;
        sqlx::query("INSERT INTO migrations (version, description, dirty) VALUES (?, ?, 1)")
            .bind(&file.version)
            .bind(&file.description)
            .execute(&mut *tx)
            .await?;

        for statement in file.sql.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement).execute(&mut *tx).await?;
        }

        sqlx::query("UPDATE migrations SET dirty = 0 WHERE version = ?")
            .bind(&file.version)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(version = %file.version, description = %file.description, "migration applied");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn applies_migrations_in_order_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("0001_init.sql"),
            "CREATE TABLE nodes (name TEXT PRIMARY KEY);",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("0002_add_bias.sql"),
            "ALTER TABLE nodes ADD COLUMN bias_migrated INTEGER NOT NULL DEFAULT 0;",
        )
        .unwrap();

        let pool = memory_pool().await;
        run_migrations(&pool, dir.path()).await.unwrap();

        let count: i64 = sqlx::query("SELECT COUNT(*) AS c FROM migrations")
            .fetch_one(&pool)
            .await
            .unwrap()
            .try_get("c")
            .unwrap();
        assert_eq!(count, 2);

        // second run is a no-op
        run_migrations(&pool, dir.path()).await.unwrap();
        let count_again: i64 = sqlx::query("SELECT COUNT(*) AS c FROM migrations")
            .fetch_one(&pool)
            .await
            .unwrap()
            .try_get("c")
            .unwrap();
        assert_eq!(count_again, 2);
    }

    #[tokio::test]
    async fn dirty_head_refuses_to_start() {
        let pool = memory_pool().await;
        sqlx::query(
            "CREATE TABLE migrations (
                migration_id INTEGER PRIMARY KEY AUTOINCREMENT,
                version TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL,
                dirty INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO migrations (version, description, dirty) VALUES ('0002', 'add_bias', 1)")
            .execute(&pool)
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let result = run_migrations(&pool, dir.path()).await;
        assert!(matches!(result, Err(MigrationError::Dirty(_))));
    }
}
