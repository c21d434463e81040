//! Manifest table creation and in-place upgrades.

use crate::error::Result;
use crate::types::{FileStatus, IngestionStatus, SCHEMA_VERSION};
use crate::ManifestDb;
use sqlx::Row;
use tracing::{info, warn};

/// Columns added after the first manifest layout shipped.
const INGESTION_COLUMNS: &[(&str, &str)] = &[
    ("ingestion_status", "TEXT NOT NULL DEFAULT 'pending'"),
    ("ingestion_attempts", "INTEGER NOT NULL DEFAULT 0"),
    ("ingestion_error", "TEXT"),
    ("ingested_at", "INTEGER"),
];

fn check_list<T>(values: &[T], as_str: impl Fn(&T) -> &'static str) -> String {
    values
        .iter()
        .map(|v| format!("'{}'", as_str(v)))
        .collect::<Vec<_>>()
        .join(", ")
}

impl ManifestDb {
    /// Ensure the manifest table and its indexes exist.
    pub(crate) async fn ensure_schema(&self) -> Result<()> {
        // WAL lets dashboard readers run alongside the crawl writer
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&self.pool)
            .await?;

        let statuses = check_list(FileStatus::ALL, FileStatus::as_str);
        let ingestion_statuses = check_list(IngestionStatus::ALL, IngestionStatus::as_str);

        let create = format!(
            r#"CREATE TABLE IF NOT EXISTS manifest (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_path TEXT NOT NULL UNIQUE,
                file_name TEXT NOT NULL,
                parent_dir TEXT NOT NULL,
                size INTEGER,
                mtime INTEGER,
                raw_acl TEXT,
                acl_captured INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ({statuses})),
                error TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                is_directory INTEGER NOT NULL DEFAULT 0,
                first_seen INTEGER NOT NULL,
                last_seen INTEGER NOT NULL,
                schema_version INTEGER NOT NULL DEFAULT {SCHEMA_VERSION},
                ingestion_status TEXT NOT NULL DEFAULT 'pending' CHECK (ingestion_status IN ({ingestion_statuses})),
                ingestion_attempts INTEGER NOT NULL DEFAULT 0,
                ingestion_error TEXT,
                ingested_at INTEGER,
                CHECK (acl_captured = 0 OR raw_acl IS NOT NULL)
            )"#
        );
        sqlx::query(&create).execute(&self.pool).await?;

        self.add_missing_ingestion_columns().await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_manifest_status ON manifest(status)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_manifest_ingestion_status ON manifest(ingestion_status)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_manifest_candidates ON manifest(status, ingestion_status, is_directory)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_manifest_parent ON manifest(parent_dir)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_manifest_last_seen ON manifest(last_seen)")
            .execute(&self.pool)
            .await?;

        info!("Manifest schema verified");
        Ok(())
    }

    /// Manifests written before ingestion tracking existed lack its columns.
    async fn add_missing_ingestion_columns(&self) -> Result<()> {
        let rows = sqlx::query("PRAGMA table_info(manifest)")
            .fetch_all(&self.pool)
            .await?;
        let existing: Vec<String> = rows.iter().map(|row| row.get::<String, _>("name")).collect();

        for (column, definition) in INGESTION_COLUMNS {
            if existing.iter().any(|name| name.as_str() == *column) {
                continue;
            }
            warn!(column, "Adding missing manifest column");
            let alter = format!("ALTER TABLE manifest ADD COLUMN {} {}", column, definition);
            sqlx::query(&alter).execute(&self.pool).await?;
        }

        Ok(())
    }
}
