use log::info;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Executor, Row};
use std::path::Path;
use std::time::Duration;

use crate::constants::SCHEMA_VERSION;
use crate::error::StoreError;
use crate::queries::{ddl, metadata};

pub const DATABASE_FILE_NAME: &str = "evidence.sqlite";

/// Open a file-based database pool for production use
/// Enables WAL mode and foreign keys (cascade deletes depend on them)
pub async fn open_database_connection(db_path: &Path) -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(10));

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;

    info!("SQLite database: {}", db_path.display());
    Ok(pool)
}

/// Create a database in a fresh temporary directory for testing
/// Keep the returned guard alive for as long as the pool is used
pub async fn create_test_connection_in_temporary_file(
) -> Result<(SqlitePool, tempfile::TempDir), StoreError> {
    let dir = tempfile::tempdir().map_err(sqlx::Error::Io)?;
    let pool = open_database_connection(&dir.path().join("test.sqlite")).await?;
    Ok((pool, dir))
}

/// Read the schema version stored in metadata (0 for a brand new database)
pub async fn schema_version<'e, E>(executor: E) -> Result<u32, StoreError>
where
    E: Executor<'e, Database = sqlx::Sqlite>,
{
    let sql = metadata::select_by_key("version");
    let row = sqlx::query(&sql).fetch_optional(executor).await?;
    match row {
        None => Ok(0),
        Some(row) => {
            let raw: String = row.try_get(0)?;
            raw.parse().map_err(|_| StoreError::Corrupt {
                table: "metadata",
                id: "version".to_string(),
                reason: format!("unparsable schema version '{}'", raw),
            })
        }
    }
}

/// Create or migrate the schema up to `SCHEMA_VERSION`.
///
/// Migrations run in one transaction, in order, from the stored version.
/// They only add structure, so rows written by older versions stay valid.
pub async fn init_database_schema(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(&ddl::create_metadata_table())
        .execute(pool)
        .await?;

    let current = schema_version(pool).await?;
    if current > SCHEMA_VERSION {
        return Err(StoreError::UnsupportedSchema {
            found: current,
            supported: SCHEMA_VERSION,
        });
    }
    if current == SCHEMA_VERSION {
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    for version in (current + 1)..=SCHEMA_VERSION {
        for sql in ddl::migration_steps(version) {
            sqlx::query(&sql).execute(&mut *tx).await?;
        }
        info!("Migrated database schema to version {}", version);
    }
    let sql = metadata::upsert("version", &SCHEMA_VERSION.to_string());
    sqlx::query(&sql).execute(&mut *tx).await?;
    tx.commit().await?;

    Ok(())
}
