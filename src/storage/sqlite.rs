//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the PolicyStore trait.

use crate::record::PolicyRecord;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{PolicyStore, StorageError, StorageResult};
use crate::storage::{RunRecord, RunStatus, StoredPolicy};
use crate::validator::{DedupKey, ValidationReport};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

const RUN_COLUMNS: &str = "id, source, started_at, finished_at, config_hash, status, \
                           total, valid, invalid, duplicates";

/// SQLite storage backend
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens or creates the database at `path`
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        source: row.get(1)?,
        started_at: row.get(2)?,
        finished_at: row.get(3)?,
        config_hash: row.get(4)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(5)?)
            .unwrap_or(RunStatus::Running),
        total: row.get::<_, i64>(6)? as u64,
        valid: row.get::<_, i64>(7)? as u64,
        invalid: row.get::<_, i64>(8)? as u64,
        duplicates: row.get::<_, i64>(9)? as u64,
    })
}

impl PolicyStore for SqliteStore {
    // ===== Run Management =====

    fn create_run(&mut self, source: &str, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (source, started_at, config_hash, status) VALUES (?1, ?2, ?3, ?4)",
            params![source, now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS),
                params![run_id],
                run_from_row,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let run = self
            .conn
            .query_row(
                &format!("SELECT {} FROM runs ORDER BY id DESC LIMIT 1", RUN_COLUMNS),
                [],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    fn finish_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        report: &ValidationReport,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2, total = ?3, valid = ?4,
             invalid = ?5, duplicates = ?6 WHERE id = ?7",
            params![
                status.to_db_string(),
                now,
                report.total as i64,
                report.valid as i64,
                report.invalid as i64,
                report.duplicates as i64,
                run_id
            ],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    // ===== Policies =====

    fn upsert_policy(&mut self, run_id: i64, record: &PolicyRecord) -> StorageResult<i64> {
        let source = record.data_source.name.as_str();
        let key = DedupKey::for_record(record).to_string();

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO policies (source, dedup_key, title, url, pub_date, doc_number, category,
                level, validity, effective_date, publisher, content, crawled_at, first_run, last_run)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
             ON CONFLICT(source, dedup_key) DO UPDATE SET
                title = excluded.title,
                url = excluded.url,
                pub_date = excluded.pub_date,
                doc_number = excluded.doc_number,
                category = excluded.category,
                level = excluded.level,
                validity = excluded.validity,
                effective_date = excluded.effective_date,
                publisher = excluded.publisher,
                content = excluded.content,
                crawled_at = excluded.crawled_at,
                last_run = excluded.last_run",
            params![
                source,
                key,
                record.title,
                record.url,
                record.pub_date.to_string(),
                record.doc_number,
                record.category,
                record.level,
                record.validity,
                record.effective_date.to_string(),
                record.publisher,
                record.content,
                record.crawled_at.to_rfc3339(),
                run_id
            ],
        )?;

        let policy_id: i64 = tx.query_row(
            "SELECT id FROM policies WHERE source = ?1 AND dedup_key = ?2",
            params![source, key],
            |row| row.get(0),
        )?;

        for attachment in &record.attachments {
            tx.execute(
                "INSERT OR IGNORE INTO attachments (policy_id, name, url, extension)
                 VALUES (?1, ?2, ?3, ?4)",
                params![policy_id, attachment.name, attachment.url, attachment.extension],
            )?;
        }

        tx.commit()?;
        Ok(policy_id)
    }

    fn get_policy(&self, source: &str, dedup_key: &str) -> StorageResult<Option<StoredPolicy>> {
        let policy = self
            .conn
            .query_row(
                "SELECT p.id, p.source, p.dedup_key, p.title, p.url, p.pub_date, p.content,
                    p.first_run, p.last_run,
                    (SELECT COUNT(*) FROM attachments a WHERE a.policy_id = p.id)
                 FROM policies p WHERE p.source = ?1 AND p.dedup_key = ?2",
                params![source, dedup_key],
                |row| {
                    Ok(StoredPolicy {
                        id: row.get(0)?,
                        source: row.get(1)?,
                        dedup_key: row.get(2)?,
                        title: row.get(3)?,
                        url: row.get(4)?,
                        pub_date: row.get(5)?,
                        content: row.get(6)?,
                        first_run: row.get(7)?,
                        last_run: row.get(8)?,
                        attachment_count: row.get::<_, i64>(9)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(policy)
    }

    fn mark_attachment_downloaded(
        &mut self,
        policy_id: i64,
        url: &str,
        local_path: &str,
    ) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE attachments SET local_path = ?1 WHERE policy_id = ?2 AND url = ?3",
            params![local_path, policy_id, url],
        )?;
        Ok(())
    }

    // ===== Statistics =====

    fn count_policies_by_source(&self) -> StorageResult<Vec<(String, u64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT source, COUNT(*) FROM policies GROUP BY source ORDER BY source")?;

        let counts = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(counts)
    }

    fn count_attachments(&self) -> StorageResult<(u64, u64)> {
        let counts = self.conn.query_row(
            "SELECT COUNT(*), COUNT(local_path) FROM attachments",
            [],
            |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, i64>(1)? as u64)),
        )?;
        Ok(counts)
    }
}
