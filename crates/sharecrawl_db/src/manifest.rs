//! Manifest operations: idempotent inserts, ingestion transitions, queries, stats.

use crate::error::{DbError, Result};
use crate::types::*;
use crate::ManifestDb;
use sqlx::sqlite::{Sqlite, SqliteRow};
use sqlx::{QueryBuilder, Row};
use tracing::debug;

impl ManifestDb {
    // ========================================================================
    // Crawl-side writes
    // ========================================================================

    /// Insert a batch of walker entries in one transaction.
    ///
    /// An entry whose `file_path` already exists is left untouched apart from
    /// `last_seen`, so re-crawling an unchanged tree adds no rows.
    pub async fn bulk_insert_ignoring_duplicates(
        &self,
        entries: &[DiscoveredEntry],
    ) -> Result<InsertSummary> {
        let mut summary = InsertSummary::default();
        if entries.is_empty() {
            return Ok(summary);
        }

        let now = Self::now_millis();
        let mut tx = self.pool.begin().await?;

        for entry in entries {
            // Only a uniqueness conflict is ignored; CHECK violations still fail the batch.
            let result = sqlx::query(
                r#"
                INSERT INTO manifest (
                    file_path, file_name, parent_dir, size, mtime, raw_acl, acl_captured,
                    status, error, retry_count, is_directory, first_seen, last_seen, schema_version
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(file_path) DO NOTHING
                "#,
            )
            .bind(&entry.file_path)
            .bind(&entry.file_name)
            .bind(&entry.parent_dir)
            .bind(entry.size)
            .bind(entry.mtime)
            .bind(&entry.raw_acl)
            .bind(entry.acl_captured && entry.raw_acl.is_some())
            .bind(entry.status.as_str())
            .bind(&entry.error)
            .bind(entry.retry_count as i64)
            .bind(entry.is_directory)
            .bind(now)
            .bind(now)
            .bind(SCHEMA_VERSION)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                summary.inserted += 1;
            } else {
                sqlx::query("UPDATE manifest SET last_seen = ? WHERE file_path = ?")
                    .bind(now)
                    .bind(&entry.file_path)
                    .execute(&mut *tx)
                    .await?;
                summary.skipped += 1;
            }
        }

        tx.commit().await?;

        debug!(
            inserted = summary.inserted,
            skipped = summary.skipped,
            "Manifest batch written"
        );
        Ok(summary)
    }

    // ========================================================================
    // Ingestion-side writes
    // ========================================================================

    /// Record one ingestion transition for a file.
    ///
    /// `attempts` is added to `ingestion_attempts`; `ingested_at` is stamped
    /// when the new status is completed. Directories are rejected.
    pub async fn update_ingestion_status(
        &self,
        file_path: &str,
        status: IngestionStatus,
        error: Option<&str>,
        attempts: u32,
    ) -> Result<()> {
        let update = IngestionUpdate {
            file_path: file_path.to_string(),
            status,
            error: error.map(str::to_string),
            attempts,
        };
        self.update_ingestion_statuses(std::slice::from_ref(&update))
            .await
    }

    /// Apply a batch of ingestion transitions in one transaction.
    ///
    /// Fails (and rolls back) if any path is unknown or is a directory.
    pub async fn update_ingestion_statuses(&self, updates: &[IngestionUpdate]) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let now = Self::now_millis();
        let mut tx = self.pool.begin().await?;

        for update in updates {
            let ingested_at = (update.status == IngestionStatus::Completed).then_some(now);
            let result = sqlx::query(
                r#"
                UPDATE manifest SET
                    ingestion_status = ?,
                    ingestion_error = ?,
                    ingestion_attempts = ingestion_attempts + ?,
                    ingested_at = COALESCE(?, ingested_at)
                WHERE file_path = ? AND is_directory = 0
                "#,
            )
            .bind(update.status.as_str())
            .bind(&update.error)
            .bind(update.attempts as i64)
            .bind(ingested_at)
            .bind(&update.file_path)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(DbError::not_found(format!(
                    "No ingestible manifest entry for {}",
                    update.file_path
                )));
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Move every file in `from` back to pending. Returns the number of rows reset.
    ///
    /// Used at ingestion start to recover rows a crashed run left `ingesting`.
    pub async fn reset_ingestion_status(&self, from: IngestionStatus) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE manifest SET ingestion_status = 'pending'
            WHERE ingestion_status = ? AND is_directory = 0
            "#,
        )
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Files eligible for ingestion: discovered, not a directory, ingestion pending.
    pub async fn query_candidates(&self, limit: u32, offset: u32) -> Result<Vec<ManifestRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM manifest
            WHERE status = 'discovered' AND ingestion_status = 'pending' AND is_directory = 0
            ORDER BY id
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    /// Get a single entry by path
    pub async fn get(&self, file_path: &str) -> Result<Option<ManifestRecord>> {
        let row = sqlx::query("SELECT * FROM manifest WHERE file_path = ?")
            .bind(file_path)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    /// Total number of rows.
    pub async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM manifest")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// Filtered, paginated file listing, newest `last_seen` first.
    pub async fn query(&self, filter: &FileQuery) -> Result<FilePage> {
        let mut count_query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM manifest WHERE 1=1");
        push_filters(&mut count_query, filter);
        let total: i64 = count_query
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;

        let mut select = QueryBuilder::<Sqlite>::new("SELECT * FROM manifest WHERE 1=1");
        push_filters(&mut select, filter);
        select.push(" ORDER BY last_seen DESC, id DESC");
        // SQLite needs a LIMIT before an OFFSET; -1 means unbounded.
        select
            .push(" LIMIT ")
            .push_bind(filter.limit.map(i64::from).unwrap_or(-1));
        select
            .push(" OFFSET ")
            .push_bind(filter.offset.map(i64::from).unwrap_or(0));

        let rows = select.build().fetch_all(&self.pool).await?;
        let records = rows.iter().map(row_to_record).collect::<Result<Vec<_>>>()?;

        Ok(FilePage {
            total: total as u64,
            records,
        })
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    /// Crawl aggregate over every row.
    pub async fn crawl_stats(&self) -> Result<CrawlStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) as total,
                COALESCE(SUM(CASE WHEN is_directory = 1 THEN 1 ELSE 0 END), 0) as directories,
                COALESCE(SUM(CASE WHEN is_directory = 0 THEN 1 ELSE 0 END), 0) as files,
                COALESCE(SUM(CASE WHEN status = 'discovered' THEN 1 ELSE 0 END), 0) as discovered,
                COALESCE(SUM(CASE WHEN status = 'permission_denied' THEN 1 ELSE 0 END), 0) as permission_denied,
                COALESCE(SUM(CASE WHEN status = 'acl_failed' THEN 1 ELSE 0 END), 0) as acl_failed,
                COALESCE(SUM(CASE WHEN status = 'error' THEN 1 ELSE 0 END), 0) as errors,
                COALESCE(SUM(CASE WHEN status = 'skipped' THEN 1 ELSE 0 END), 0) as skipped,
                COALESCE(SUM(CASE WHEN acl_captured = 1 THEN 1 ELSE 0 END), 0) as acl_captured
            FROM manifest
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(CrawlStats {
            total: row.get::<i64, _>("total") as u64,
            directories: row.get::<i64, _>("directories") as u64,
            files: row.get::<i64, _>("files") as u64,
            discovered: row.get::<i64, _>("discovered") as u64,
            permission_denied: row.get::<i64, _>("permission_denied") as u64,
            acl_failed: row.get::<i64, _>("acl_failed") as u64,
            errors: row.get::<i64, _>("errors") as u64,
            skipped: row.get::<i64, _>("skipped") as u64,
            acl_captured: row.get::<i64, _>("acl_captured") as u64,
        })
    }

    /// Ingestion aggregate over discovered files.
    pub async fn ingestion_stats(&self) -> Result<IngestionStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) as total,
                COALESCE(SUM(CASE WHEN ingestion_status = 'pending' THEN 1 ELSE 0 END), 0) as pending,
                COALESCE(SUM(CASE WHEN ingestion_status = 'completed' THEN 1 ELSE 0 END), 0) as completed,
                COALESCE(SUM(CASE WHEN ingestion_status = 'failed' THEN 1 ELSE 0 END), 0) as failed,
                COALESCE(SUM(CASE WHEN ingestion_status = 'ingesting' THEN 1 ELSE 0 END), 0) as ingesting
            FROM manifest
            WHERE is_directory = 0 AND status = 'discovered'
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(IngestionStats {
            total: row.get::<i64, _>("total") as u64,
            pending: row.get::<i64, _>("pending") as u64,
            completed: row.get::<i64, _>("completed") as u64,
            failed: row.get::<i64, _>("failed") as u64,
            ingesting: row.get::<i64, _>("ingesting") as u64,
        })
    }

    /// Row count per crawl status, largest first.
    pub async fn status_breakdown(&self) -> Result<Vec<StatusCount>> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) as count FROM manifest GROUP BY status ORDER BY count DESC, status",
        )
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = rows.iter().map(|row| row.get::<i64, _>("count")).sum();
        rows.iter()
            .map(|row| {
                let status_str: String = row.get("status");
                let status = FileStatus::parse(&status_str).ok_or_else(|| {
                    DbError::invalid_state(format!("Unknown status: {}", status_str))
                })?;
                let count: i64 = row.get("count");
                let percentage = if total > 0 {
                    (count as f64 * 10000.0 / total as f64).round() / 100.0
                } else {
                    0.0
                };
                Ok(StatusCount {
                    status,
                    count: count as u64,
                    percentage,
                })
            })
            .collect()
    }
}

fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, filter: &FileQuery) {
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(status) = filter.ingestion_status {
        builder.push(" AND ingestion_status = ").push_bind(status.as_str());
    }
    if let Some(search) = filter.search.as_deref().filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", escape_like(search));
        builder
            .push(" AND (file_name LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR file_path LIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\')");
    }
}

/// Search text matches literally; `%` and `_` are not wildcards.
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn row_to_record(row: &SqliteRow) -> Result<ManifestRecord> {
    let status_str: String = row.get("status");
    let status = FileStatus::parse(&status_str)
        .ok_or_else(|| DbError::invalid_state(format!("Unknown status: {}", status_str)))?;

    let ingestion_str: String = row.get("ingestion_status");
    let ingestion_status = IngestionStatus::parse(&ingestion_str).ok_or_else(|| {
        DbError::invalid_state(format!("Unknown ingestion status: {}", ingestion_str))
    })?;

    let first_seen: i64 = row.get("first_seen");
    let last_seen: i64 = row.get("last_seen");
    let ingested_at: Option<i64> = row.get("ingested_at");

    Ok(ManifestRecord {
        id: row.get("id"),
        file_path: row.get("file_path"),
        file_name: row.get("file_name"),
        parent_dir: row.get("parent_dir"),
        size: row.get("size"),
        mtime: row.get("mtime"),
        raw_acl: row.get("raw_acl"),
        acl_captured: row.get("acl_captured"),
        status,
        error: row.get("error"),
        retry_count: row.get::<i64, _>("retry_count") as u32,
        is_directory: row.get("is_directory"),
        first_seen: ManifestDb::millis_to_datetime(first_seen),
        last_seen: ManifestDb::millis_to_datetime(last_seen),
        schema_version: row.get("schema_version"),
        ingestion_status,
        ingestion_attempts: row.get::<i64, _>("ingestion_attempts") as u32,
        ingestion_error: row.get("ingestion_error"),
        ingested_at: ingested_at.map(ManifestDb::millis_to_datetime),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str) -> DiscoveredEntry {
        let name = path.rsplit('/').next().unwrap_or(path);
        let parent = path.rsplit_once('/').map(|(p, _)| p).unwrap_or("");
        let mut entry = DiscoveredEntry::new(path, name, parent, false, FileStatus::Discovered);
        entry.size = Some(10);
        entry
    }

    fn dir(path: &str) -> DiscoveredEntry {
        let name = path.rsplit('/').next().unwrap_or(path);
        let parent = path.rsplit_once('/').map(|(p, _)| p).unwrap_or("");
        DiscoveredEntry::new(path, name, parent, true, FileStatus::Discovered)
    }

    #[tokio::test]
    async fn test_bulk_insert_ignores_existing_paths() {
        let db = ManifestDb::open_in_memory().await.unwrap();

        let first = db
            .bulk_insert_ignoring_duplicates(&[file("/s/a.pdf"), file("/s/b.txt")])
            .await
            .unwrap();
        assert_eq!(first, InsertSummary { inserted: 2, skipped: 0 });

        let second = db
            .bulk_insert_ignoring_duplicates(&[file("/s/a.pdf"), file("/s/c.md")])
            .await
            .unwrap();
        assert_eq!(second, InsertSummary { inserted: 1, skipped: 1 });
        assert_eq!(db.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_within_one_batch() {
        let db = ManifestDb::open_in_memory().await.unwrap();
        let summary = db
            .bulk_insert_ignoring_duplicates(&[file("/s/a.pdf"), file("/s/a.pdf")])
            .await
            .unwrap();
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.skipped, 1);
    }

    #[tokio::test]
    async fn test_reinsert_keeps_original_status() {
        let db = ManifestDb::open_in_memory().await.unwrap();
        db.bulk_insert_ignoring_duplicates(&[file("/s/a.pdf")]).await.unwrap();

        let mut again = file("/s/a.pdf");
        again.status = FileStatus::Error;
        again.error = Some("boom".into());
        db.bulk_insert_ignoring_duplicates(&[again]).await.unwrap();

        let record = db.get("/s/a.pdf").await.unwrap().unwrap();
        assert_eq!(record.status, FileStatus::Discovered);
        assert!(record.error.is_none());
    }

    #[tokio::test]
    async fn test_acl_captured_requires_raw_acl() {
        let db = ManifestDb::open_in_memory().await.unwrap();
        let mut entry = file("/s/a.pdf");
        entry.acl_captured = true;
        entry.raw_acl = None;
        db.bulk_insert_ignoring_duplicates(&[entry]).await.unwrap();

        let record = db.get("/s/a.pdf").await.unwrap().unwrap();
        assert!(!record.acl_captured);
    }

    #[tokio::test]
    async fn test_candidates_exclude_directories_and_failures() {
        let db = ManifestDb::open_in_memory().await.unwrap();
        let mut denied = file("/s/secret.pdf");
        denied.status = FileStatus::PermissionDenied;
        db.bulk_insert_ignoring_duplicates(&[dir("/s/sub"), file("/s/a.pdf"), denied])
            .await
            .unwrap();

        let candidates = db.query_candidates(10, 0).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].file_path, "/s/a.pdf");
    }

    #[tokio::test]
    async fn test_update_ingestion_status() {
        let db = ManifestDb::open_in_memory().await.unwrap();
        db.bulk_insert_ignoring_duplicates(&[file("/s/a.pdf")]).await.unwrap();

        db.update_ingestion_status("/s/a.pdf", IngestionStatus::Failed, Some("timeout"), 2)
            .await
            .unwrap();
        let record = db.get("/s/a.pdf").await.unwrap().unwrap();
        assert_eq!(record.ingestion_status, IngestionStatus::Failed);
        assert_eq!(record.ingestion_error.as_deref(), Some("timeout"));
        assert_eq!(record.ingestion_attempts, 2);
        assert!(record.ingested_at.is_none());

        db.update_ingestion_status("/s/a.pdf", IngestionStatus::Completed, None, 1)
            .await
            .unwrap();
        let record = db.get("/s/a.pdf").await.unwrap().unwrap();
        assert_eq!(record.ingestion_status, IngestionStatus::Completed);
        assert_eq!(record.ingestion_attempts, 3);
        assert!(record.ingestion_error.is_none());
        assert!(record.ingested_at.is_some());
    }

    #[tokio::test]
    async fn test_directory_ingestion_status_is_immutable() {
        let db = ManifestDb::open_in_memory().await.unwrap();
        db.bulk_insert_ignoring_duplicates(&[dir("/s/sub")]).await.unwrap();

        let err = db
            .update_ingestion_status("/s/sub", IngestionStatus::Completed, None, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound(_)));

        let record = db.get("/s/sub").await.unwrap().unwrap();
        assert_eq!(record.ingestion_status, IngestionStatus::Pending);
    }

    #[tokio::test]
    async fn test_batch_update_rolls_back_on_unknown_path() {
        let db = ManifestDb::open_in_memory().await.unwrap();
        db.bulk_insert_ignoring_duplicates(&[file("/s/a.pdf")]).await.unwrap();

        let updates = vec![
            IngestionUpdate::new("/s/a.pdf", IngestionStatus::Completed),
            IngestionUpdate::new("/s/missing.pdf", IngestionStatus::Completed),
        ];
        assert!(db.update_ingestion_statuses(&updates).await.is_err());

        let record = db.get("/s/a.pdf").await.unwrap().unwrap();
        assert_eq!(record.ingestion_status, IngestionStatus::Pending);
    }

    #[tokio::test]
    async fn test_reset_ingesting_rows() {
        let db = ManifestDb::open_in_memory().await.unwrap();
        db.bulk_insert_ignoring_duplicates(&[file("/s/a.pdf"), file("/s/b.pdf")])
            .await
            .unwrap();
        db.update_ingestion_status("/s/a.pdf", IngestionStatus::Ingesting, None, 0)
            .await
            .unwrap();

        let reset = db.reset_ingestion_status(IngestionStatus::Ingesting).await.unwrap();
        assert_eq!(reset, 1);
        assert_eq!(db.query_candidates(10, 0).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_query_filters_and_total() {
        let db = ManifestDb::open_in_memory().await.unwrap();
        let mut denied = file("/s/locked/report.pdf");
        denied.status = FileStatus::PermissionDenied;
        db.bulk_insert_ignoring_duplicates(&[
            file("/s/report.pdf"),
            file("/s/notes.txt"),
            file("/s/reports/q1.md"),
            denied,
        ])
        .await
        .unwrap();

        let page = db
            .query(&FileQuery {
                search: Some("report".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 3);

        let page = db
            .query(&FileQuery {
                search: Some("report".into()),
                status: Some(FileStatus::Discovered),
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.records.len(), 1);

        let page = db
            .query(&FileQuery {
                ingestion_status: Some(IngestionStatus::Completed),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 0);
        assert!(page.records.is_empty());
    }

    #[tokio::test]
    async fn test_search_treats_wildcards_literally() {
        let db = ManifestDb::open_in_memory().await.unwrap();
        db.bulk_insert_ignoring_duplicates(&[
            file("/s/100%_done.pdf"),
            file("/s/100x_done.pdf"),
            file("/s/a_b.txt"),
            file("/s/axb.txt"),
        ])
        .await
        .unwrap();

        let search = |text: &str| FileQuery {
            search: Some(text.into()),
            ..Default::default()
        };

        let page = db.query(&search("100%")).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.records[0].file_name, "100%_done.pdf");

        let page = db.query(&search("a_b")).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.records[0].file_name, "a_b.txt");
    }

    #[tokio::test]
    async fn test_stats() {
        let db = ManifestDb::open_in_memory().await.unwrap();

        let empty = db.crawl_stats().await.unwrap();
        assert_eq!(empty, CrawlStats::default());

        let mut captured = file("/s/a.pdf");
        captured.raw_acl = Some("user::rw-".into());
        captured.acl_captured = true;
        let mut failed = file("/s/b.pdf");
        failed.status = FileStatus::AclFailed;
        db.bulk_insert_ignoring_duplicates(&[dir("/s/sub"), captured, failed, file("/s/c.txt")])
            .await
            .unwrap();
        db.update_ingestion_status("/s/c.txt", IngestionStatus::Completed, None, 1)
            .await
            .unwrap();

        let crawl = db.crawl_stats().await.unwrap();
        assert_eq!(crawl.total, 4);
        assert_eq!(crawl.directories, 1);
        assert_eq!(crawl.files, 3);
        assert_eq!(crawl.discovered, 3);
        assert_eq!(crawl.acl_failed, 1);
        assert_eq!(crawl.acl_captured, 1);

        let ingestion = db.ingestion_stats().await.unwrap();
        assert_eq!(
            ingestion,
            IngestionStats {
                total: 2,
                pending: 1,
                completed: 1,
                failed: 0,
                ingesting: 0,
            }
        );

        let breakdown = db.status_breakdown().await.unwrap();
        assert_eq!(breakdown[0].status, FileStatus::Discovered);
        assert_eq!(breakdown[0].count, 3);
        assert_eq!(breakdown[0].percentage, 75.0);
    }
}
