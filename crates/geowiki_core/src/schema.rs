//! Versioned SQLite schema. Each migration runs in its own transaction and is recorded in
//! `schema_migrations`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{Connection, params};
use tracing::info;

use crate::runtime::ResolvedPaths;

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "baseline",
        sql: include_str!("migrations/v001_baseline.sql"),
    },
    Migration {
        version: 2,
        name: "indexes",
        sql: include_str!("migrations/v002_indexes.sql"),
    },
    Migration {
        version: 3,
        name: "front_pages_and_files",
        sql: include_str!("migrations/v003_front_pages_and_files.sql"),
    },
];

pub const LATEST_VERSION: u32 = 3;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct MigrateReport {
    pub applied: Vec<AppliedMigration>,
    pub current_version: u32,
}

#[derive(Debug, Clone)]
pub struct AppliedMigration {
    pub version: u32,
    pub name: String,
}

/// Bring the database at `paths.db_path` up to date, creating it when missing.
pub fn run_migrations(paths: &ResolvedPaths) -> Result<MigrateReport> {
    if let Some(parent) = paths.db_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create database directory {}", parent.display()))?;
    }
    let connection = open_connection(&paths.db_path)?;
    migrate_connection(&connection)
}

pub fn migrate_connection(connection: &Connection) -> Result<MigrateReport> {
    let start = current_version(connection)?;
    let mut applied = Vec::new();
    for migration in pending(start) {
        apply(connection, migration)
            .with_context(|| format!("migration v{:03}_{} failed", migration.version, migration.name))?;
        info!(version = migration.version, name = migration.name, "applied schema migration");
        applied.push(AppliedMigration {
            version: migration.version,
            name: migration.name.to_string(),
        });
    }
    Ok(MigrateReport {
        applied,
        current_version: current_version(connection)?,
    })
}

/// Migrations not yet applied; every migration when the database does not exist.
pub fn pending_migration_count(db_path: &Path) -> Result<usize> {
    if !db_path.is_file() {
        return Ok(MIGRATIONS.len());
    }
    pending_on_connection(&open_connection(db_path)?)
}

pub(crate) fn pending_on_connection(connection: &Connection) -> Result<usize> {
    Ok(pending(current_version(connection)?).count())
}

/// Highest applied version; 0 for an empty database.
pub fn current_version(connection: &Connection) -> Result<u32> {
    ensure_migrations_table(connection)?;
    let version: i64 = connection
        .query_row("SELECT IFNULL(MAX(version), 0) FROM schema_migrations", [], |row| row.get(0))
        .context("failed to read schema version")?;
    u32::try_from(version).context("schema version out of range")
}

fn ensure_migrations_table(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at_unix INTEGER NOT NULL
            );",
        )
        .context("failed to create schema_migrations table")
}

fn pending(current: u32) -> impl Iterator<Item = &'static Migration> {
    MIGRATIONS.iter().filter(move |migration| migration.version > current)
}

fn apply(connection: &Connection, migration: &Migration) -> Result<()> {
    ensure_migrations_table(connection)?;
    // Dropping the transaction on an early return rolls the migration back.
    let transaction = connection
        .unchecked_transaction()
        .context("failed to begin migration transaction")?;
    transaction
        .execute_batch(migration.sql)
        .context("migration SQL failed")?;
    transaction
        .execute(
            "INSERT INTO schema_migrations (version, name, applied_at_unix)
             VALUES (?1, ?2, CAST(strftime('%s', 'now') AS INTEGER))",
            params![i64::from(migration.version), migration.name],
        )
        .context("failed to record migration")?;
    transaction.commit().context("failed to commit migration")
}

pub(crate) fn open_connection(db_path: &Path) -> Result<Connection> {
    let connection =
        Connection::open(db_path).with_context(|| format!("failed to open {}", db_path.display()))?;
    configure_connection(&connection)?;
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to enable WAL journal mode")?;
    Ok(connection)
}

pub(crate) fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .busy_timeout(BUSY_TIMEOUT)
        .context("failed to set sqlite busy timeout")?;
    connection
        .pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign keys")
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::runtime::test_paths;

    #[test]
    fn fresh_database_reaches_latest_version() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(temp.path());
        assert_eq!(pending_migration_count(&paths.db_path).expect("pending"), MIGRATIONS.len());

        let report = run_migrations(&paths).expect("migrate");
        let versions: Vec<_> = report.applied.iter().map(|migration| migration.version).collect();
        assert_eq!(versions, vec![1, 2, 3]);
        assert_eq!(report.current_version, LATEST_VERSION);
        assert_eq!(pending_migration_count(&paths.db_path).expect("pending"), 0);
    }

    #[test]
    fn second_run_applies_nothing() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(temp.path());
        run_migrations(&paths).expect("first");
        let second = run_migrations(&paths).expect("second");
        assert!(second.applied.is_empty());
        assert_eq!(second.current_version, LATEST_VERSION);
    }

    #[test]
    fn partially_migrated_database_resumes() {
        let connection = Connection::open_in_memory().expect("memory");
        apply(&connection, &MIGRATIONS[0]).expect("baseline on a bare connection");
        assert_eq!(current_version(&connection).expect("version"), 1);
        assert_eq!(pending_on_connection(&connection).expect("pending"), 2);

        let report = migrate_connection(&connection).expect("resume");
        assert_eq!(report.applied.len(), 2);
        assert_eq!(report.applied[0].name, "indexes");
    }

    #[test]
    fn failed_migration_leaves_no_trace() {
        let connection = Connection::open_in_memory().expect("memory");
        let broken = Migration {
            version: 99,
            name: "broken",
            sql: "CREATE TABLE half_done (id INTEGER); THIS IS NOT SQL;",
        };
        assert!(apply(&connection, &broken).is_err());
        assert_eq!(current_version(&connection).expect("version"), 0);
        let tables: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'half_done'",
                [],
                |row| row.get(0),
            )
            .expect("count");
        assert_eq!(tables, 0);
    }

    #[test]
    fn latest_version_matches_last_migration() {
        assert_eq!(MIGRATIONS.last().map(|migration| migration.version), Some(LATEST_VERSION));
    }
}
