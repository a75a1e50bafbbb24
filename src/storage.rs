//! src/storage.rs
//!
//! Content store for generated/uploaded images: a two-table embedded
//! database (metadata + blob) with accessedAt-based LRU quota enforcement.
//! Metadata and data rows are always written and deleted together inside
//! one transaction, so neither can exist without the other.

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

use crate::errors::{ImageError, Result, StorageOp};

const SCHEMA_VERSION: i64 = 2;
/// Legacy rows are streamed in fixed-size batches to bound peak memory.
const MIGRATION_BATCH: usize = 25;

/// Process-wide quota policy. Mutable at runtime; changing it re-enforces
/// immediately.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageQuotaConfig {
    pub max_cache_bytes: u64,
    pub max_age_secs: i64,
    pub max_count: u64,
    pub auto_cleanup_threshold: f64,
}

impl Default for StorageQuotaConfig {
    fn default() -> Self {
        Self {
            max_cache_bytes: 100 * 1024 * 1024,
            max_age_secs: 30 * 24 * 60 * 60,
            max_count: 1000,
            auto_cleanup_threshold: 0.8,
        }
    }
}

/// Partial quota update; unset fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageQuotaUpdate {
    pub max_cache_bytes: Option<u64>,
    pub max_age_secs: Option<i64>,
    pub max_count: Option<u64>,
    pub auto_cleanup_threshold: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    pub id: String,
    pub metadata: Value,
    /// Millisecond timestamps.
    pub created_at: i64,
    pub accessed_at: i64,
    pub size_bytes: u64,
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct NewImage {
    /// Generated when absent.
    pub id: Option<String>,
    pub metadata: Value,
    pub data_b64: String,
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct StoredImage {
    pub metadata: ImageMetadata,
    pub data_b64: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub count: u64,
    pub total_bytes: u64,
}

pub struct ImageStorageService {
    conn: Mutex<Connection>,
    config: Mutex<StorageQuotaConfig>,
}

impl ImageStorageService {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ImageError::storage(StorageOp::Write, e))?;
        }
        let conn =
            Connection::open(path).map_err(|e| ImageError::storage(StorageOp::Read, e))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| ImageError::storage(StorageOp::Read, e))?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        migrate(&mut conn).map_err(|e| ImageError::storage(StorageOp::Write, e))?;
        Ok(Self {
            conn: Mutex::new(conn),
            config: Mutex::new(StorageQuotaConfig::default()),
        })
    }

    pub fn quota_config(&self) -> StorageQuotaConfig {
        self.config.lock().clone()
    }

    /// Merges the partial update and immediately re-enforces, so policy
    /// changes apply retroactively.
    pub fn update_quota_config(&self, update: StorageQuotaUpdate) -> Result<()> {
        {
            let mut config = self.config.lock();
            if let Some(v) = update.max_cache_bytes {
                config.max_cache_bytes = v;
            }
            if let Some(v) = update.max_age_secs {
                config.max_age_secs = v;
            }
            if let Some(v) = update.max_count {
                config.max_count = v;
            }
            if let Some(v) = update.auto_cleanup_threshold {
                if !(0.0..=1.0).contains(&v) {
                    return Err(ImageError::storage(
                        StorageOp::Config,
                        format!("autoCleanupThreshold must be within (0, 1], got {v}"),
                    ));
                }
                config.auto_cleanup_threshold = v;
            }
        }
        self.enforce_quota()
    }

    pub fn save_image(&self, image: NewImage) -> Result<ImageMetadata> {
        let id = image
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let now = Utc::now().timestamp_millis();
        let size_bytes = image.data_b64.len() as u64;
        let metadata_json = image.metadata.to_string();

        {
            let mut conn = self.conn.lock();
            let tx = conn
                .transaction()
                .map_err(|e| ImageError::storage(StorageOp::Write, e))?;
            tx.execute(
                "INSERT OR REPLACE INTO image_metadata \
                 (id, metadata, created_at, accessed_at, size_bytes, source) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, metadata_json, now, now, size_bytes, image.source],
            )
            .map_err(|e| ImageError::storage(StorageOp::Write, e))?;
            tx.execute(
                "INSERT OR REPLACE INTO image_data (id, data) VALUES (?1, ?2)",
                params![id, image.data_b64],
            )
            .map_err(|e| ImageError::storage(StorageOp::Write, e))?;
            tx.commit()
                .map_err(|e| ImageError::storage(StorageOp::Write, e))?;
        }

        // Housekeeping is best-effort; a cleanup failure must not fail the
        // save that triggered it.
        if let Err(e) = self.auto_cleanup_if_needed() {
            log::warn!("auto cleanup after save failed: {}", e);
        }

        Ok(ImageMetadata {
            id,
            metadata: image.metadata,
            created_at: now,
            accessed_at: now,
            size_bytes,
            source: image.source,
        })
    }

    /// Full record including the blob. Bumps `accessed_at`: reads count as
    /// fresh for LRU purposes.
    pub fn get_image(&self, id: &str) -> Result<Option<StoredImage>> {
        let conn = self.conn.lock();
        self.touch(&conn, id)?;
        conn.query_row(
            "SELECT m.id, m.metadata, m.created_at, m.accessed_at, m.size_bytes, m.source, d.data \
             FROM image_metadata m JOIN image_data d ON d.id = m.id WHERE m.id = ?1",
            params![id],
            |row| {
                Ok(StoredImage {
                    metadata: row_to_metadata(row)?,
                    data_b64: row.get(6)?,
                })
            },
        )
        .optional()
        .map_err(|e| ImageError::storage(StorageOp::Read, e))
    }

    /// Metadata only; still bumps `accessed_at`.
    pub fn get_metadata(&self, id: &str) -> Result<Option<ImageMetadata>> {
        let conn = self.conn.lock();
        self.touch(&conn, id)?;
        conn.query_row(
            "SELECT id, metadata, created_at, accessed_at, size_bytes, source \
             FROM image_metadata WHERE id = ?1",
            params![id],
            row_to_metadata,
        )
        .optional()
        .map_err(|e| ImageError::storage(StorageOp::Read, e))
    }

    fn touch(&self, conn: &Connection, id: &str) -> Result<()> {
        conn.execute(
            "UPDATE image_metadata SET accessed_at = ?1 WHERE id = ?2",
            params![Utc::now().timestamp_millis(), id],
        )
        .map(|_| ())
        .map_err(|e| ImageError::storage(StorageOp::Write, e))
    }

    /// Deletes both rows in one transaction. Missing ids are a no-op.
    pub fn delete_image(&self, id: &str) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| ImageError::storage(StorageOp::Delete, e))?;
        tx.execute("DELETE FROM image_data WHERE id = ?1", params![id])
            .map_err(|e| ImageError::storage(StorageOp::Delete, e))?;
        tx.execute("DELETE FROM image_metadata WHERE id = ?1", params![id])
            .map_err(|e| ImageError::storage(StorageOp::Delete, e))?;
        tx.commit()
            .map_err(|e| ImageError::storage(StorageOp::Delete, e))
    }

    pub fn clear(&self) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| ImageError::storage(StorageOp::Clear, e))?;
        tx.execute("DELETE FROM image_data", [])
            .map_err(|e| ImageError::storage(StorageOp::Clear, e))?;
        tx.execute("DELETE FROM image_metadata", [])
            .map_err(|e| ImageError::storage(StorageOp::Clear, e))?;
        tx.commit()
            .map_err(|e| ImageError::storage(StorageOp::Clear, e))
    }

    /// Stats come from the metadata table alone, so they stay cheap no
    /// matter how large the blobs are.
    pub fn get_storage_stats(&self) -> Result<StorageStats> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM image_metadata",
            [],
            |row| {
                Ok(StorageStats {
                    count: row.get::<_, i64>(0)? as u64,
                    total_bytes: row.get::<_, i64>(1)? as u64,
                })
            },
        )
        .map_err(|e| ImageError::storage(StorageOp::Read, e))
    }

    pub fn list_all_metadata(&self) -> Result<Vec<ImageMetadata>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, metadata, created_at, accessed_at, size_bytes, source \
                 FROM image_metadata ORDER BY created_at DESC, id ASC",
            )
            .map_err(|e| ImageError::storage(StorageOp::Read, e))?;
        let rows = stmt
            .query_map([], row_to_metadata)
            .map_err(|e| ImageError::storage(StorageOp::Read, e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| ImageError::storage(StorageOp::Read, e))
    }

    /// Three ordered phases, each re-derived from current stats:
    /// 1. drop everything not accessed within `max_age_secs`;
    /// 2. if count still exceeds `max_count`, drop the LRU tail;
    /// 3. if bytes still exceed `max_cache_bytes`, drop single oldest
    ///    records until usage is at or below 90% of the limit (headroom so
    ///    the very next save does not re-trigger cleanup).
    /// Ties on `accessed_at` break by ascending id.
    pub fn enforce_quota(&self) -> Result<()> {
        let config = self.config.lock().clone();
        let now = Utc::now().timestamp_millis();
        let mut conn = self.conn.lock();

        // Phase 1: age.
        let cutoff = now - config.max_age_secs * 1000;
        let expired = collect_ids(
            &conn,
            "SELECT id FROM image_metadata WHERE accessed_at < ?1 ORDER BY accessed_at ASC, id ASC",
            params![cutoff],
        )?;
        delete_pairs(&mut conn, &expired)?;

        // Phase 2: count.
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM image_metadata", [], |r| r.get(0))
            .map_err(|e| ImageError::storage(StorageOp::Read, e))?;
        if count as u64 > config.max_count {
            let excess = count as u64 - config.max_count;
            let victims = collect_ids(
                &conn,
                "SELECT id FROM image_metadata ORDER BY accessed_at ASC, id ASC LIMIT ?1",
                params![excess as i64],
            )?;
            delete_pairs(&mut conn, &victims)?;
        }

        // Phase 3: bytes, down to 90% of the limit.
        let total_bytes = |conn: &Connection| -> Result<u64> {
            conn.query_row(
                "SELECT COALESCE(SUM(size_bytes), 0) FROM image_metadata",
                [],
                |r| r.get::<_, i64>(0),
            )
            .map(|v| v as u64)
            .map_err(|e| ImageError::storage(StorageOp::Read, e))
        };
        if total_bytes(&conn)? > config.max_cache_bytes {
            let target = (config.max_cache_bytes as f64 * 0.9) as u64;
            while total_bytes(&conn)? > target {
                let oldest = collect_ids(
                    &conn,
                    "SELECT id FROM image_metadata ORDER BY accessed_at ASC, id ASC LIMIT 1",
                    [],
                )?;
                if oldest.is_empty() {
                    break;
                }
                delete_pairs(&mut conn, &oldest)?;
            }
        }

        Ok(())
    }

    /// Proactive variant, run after every save: kicks in once usage crosses
    /// the configured fraction of either limit.
    pub fn auto_cleanup_if_needed(&self) -> Result<()> {
        let config = self.config.lock().clone();
        let stats = self.get_storage_stats()?;
        let bytes_limit = (config.max_cache_bytes as f64 * config.auto_cleanup_threshold) as u64;
        let count_limit = (config.max_count as f64 * config.auto_cleanup_threshold) as u64;
        if stats.total_bytes > bytes_limit || stats.count > count_limit {
            self.enforce_quota()?;
        }
        Ok(())
    }

    #[cfg(test)]
    fn set_accessed_at(&self, id: &str, accessed_at: i64) {
        self.conn
            .lock()
            .execute(
                "UPDATE image_metadata SET accessed_at = ?1 WHERE id = ?2",
                params![accessed_at, id],
            )
            .unwrap();
    }
}

fn row_to_metadata(row: &rusqlite::Row<'_>) -> rusqlite::Result<ImageMetadata> {
    let metadata_raw: String = row.get(1)?;
    Ok(ImageMetadata {
        id: row.get(0)?,
        metadata: serde_json::from_str(&metadata_raw).unwrap_or(Value::Null),
        created_at: row.get(2)?,
        accessed_at: row.get(3)?,
        size_bytes: row.get::<_, i64>(4)? as u64,
        source: row.get(5)?,
    })
}

fn collect_ids(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| ImageError::storage(StorageOp::Read, e))?;
    let rows = stmt
        .query_map(params, |row| row.get::<_, String>(0))
        .map_err(|e| ImageError::storage(StorageOp::Read, e))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| ImageError::storage(StorageOp::Read, e))
}

fn delete_pairs(conn: &mut Connection, ids: &[String]) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let tx = conn
        .transaction()
        .map_err(|e| ImageError::storage(StorageOp::Delete, e))?;
    for id in ids {
        tx.execute("DELETE FROM image_data WHERE id = ?1", params![id])
            .map_err(|e| ImageError::storage(StorageOp::Delete, e))?;
        tx.execute("DELETE FROM image_metadata WHERE id = ?1", params![id])
            .map_err(|e| ImageError::storage(StorageOp::Delete, e))?;
    }
    tx.commit()
        .map_err(|e| ImageError::storage(StorageOp::Delete, e))
}

/// `user_version`-driven schema migration. v1 was a single `images` table;
/// v2 splits metadata from blobs. Legacy rows are copied in id-ordered
/// batches of [`MIGRATION_BATCH`] instead of loading the whole table.
fn migrate(conn: &mut Connection) -> rusqlite::Result<()> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if version >= SCHEMA_VERSION {
        return Ok(());
    }

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS image_metadata (
            id          TEXT PRIMARY KEY,
            metadata    TEXT NOT NULL,
            created_at  INTEGER NOT NULL,
            accessed_at INTEGER NOT NULL,
            size_bytes  INTEGER NOT NULL,
            source      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_image_metadata_accessed_at
            ON image_metadata (accessed_at, id);
        CREATE TABLE IF NOT EXISTS image_data (
            id   TEXT PRIMARY KEY,
            data TEXT NOT NULL
        );",
    )?;

    if version == 1 {
        migrate_legacy_images(conn)?;
    }

    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

fn migrate_legacy_images(conn: &mut Connection) -> rusqlite::Result<()> {
    let mut last_id = String::new();
    loop {
        let batch: Vec<(String, String, String, i64, i64, String)> = {
            let mut stmt = conn.prepare(
                "SELECT id, metadata, data, created_at, accessed_at, source \
                 FROM images WHERE id > ?1 ORDER BY id ASC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![last_id, MIGRATION_BATCH as i64], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        if batch.is_empty() {
            break;
        }

        let tx = conn.transaction()?;
        for (id, metadata, data, created_at, accessed_at, source) in &batch {
            tx.execute(
                "INSERT OR REPLACE INTO image_metadata \
                 (id, metadata, created_at, accessed_at, size_bytes, source) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, metadata, created_at, accessed_at, data.len() as i64, source],
            )?;
            tx.execute(
                "INSERT OR REPLACE INTO image_data (id, data) VALUES (?1, ?2)",
                params![id, data],
            )?;
        }
        tx.commit()?;
        last_id = batch.last().unwrap().0.clone();
    }

    conn.execute_batch("DROP TABLE images;")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn save(store: &ImageStorageService, id: &str, data: &str) -> ImageMetadata {
        store
            .save_image(NewImage {
                id: Some(id.to_string()),
                metadata: json!({ "prompt": id }),
                data_b64: data.to_string(),
                source: "generated".to_string(),
            })
            .unwrap()
    }

    #[test]
    fn metadata_and_data_live_and_die_together() {
        let store = ImageStorageService::open_in_memory().unwrap();
        save(&store, "img-1", "aGVsbG8=");

        let full = store.get_image("img-1").unwrap().unwrap();
        assert_eq!(full.data_b64, "aGVsbG8=");
        assert_eq!(full.metadata.metadata["prompt"], "img-1");

        store.delete_image("img-1").unwrap();
        assert!(store.get_image("img-1").unwrap().is_none());
        assert!(store.get_metadata("img-1").unwrap().is_none());

        // Idempotent: deleting again is fine.
        store.delete_image("img-1").unwrap();
    }

    #[test]
    fn count_quota_keeps_only_most_recently_accessed() {
        let store = ImageStorageService::open_in_memory().unwrap();
        save(&store, "a", "xx");
        save(&store, "b", "xx");
        save(&store, "c", "xx");
        // Distinct recent access times; creation order deliberately differs.
        let now = Utc::now().timestamp_millis();
        store.set_accessed_at("a", now - 1000);
        store.set_accessed_at("b", now - 3000);
        store.set_accessed_at("c", now - 2000);

        store
            .update_quota_config(StorageQuotaUpdate {
                max_count: Some(1),
                ..Default::default()
            })
            .unwrap();

        let remaining = store.list_all_metadata().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "a");
    }

    #[test]
    fn byte_quota_evicts_down_to_headroom() {
        let store = ImageStorageService::open_in_memory().unwrap();
        // 4 records x 100 bytes, distinct recent access times.
        let now = Utc::now().timestamp_millis();
        for (i, id) in ["a", "b", "c", "d"].iter().enumerate() {
            save(&store, id, &"x".repeat(100));
            store.set_accessed_at(id, now - 4000 + (i as i64 + 1) * 1000);
        }

        store
            .update_quota_config(StorageQuotaUpdate {
                max_cache_bytes: Some(250),
                ..Default::default()
            })
            .unwrap();

        // 90% of 250 = 225 → two oldest evicted, 200 bytes remain.
        let stats = store.get_storage_stats().unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.total_bytes, 200);
        assert!(store.get_metadata("c").unwrap().is_some());
        assert!(store.get_metadata("d").unwrap().is_some());
    }

    #[test]
    fn age_quota_drops_stale_records() {
        let store = ImageStorageService::open_in_memory().unwrap();
        save(&store, "old", "xx");
        save(&store, "new", "xx");
        store.set_accessed_at("old", 0); // unix epoch, definitely stale

        store.enforce_quota().unwrap();
        assert!(store.get_metadata("old").unwrap().is_none());
        assert!(store.get_metadata("new").unwrap().is_some());
    }

    #[test]
    fn reads_bump_accessed_at() {
        let store = ImageStorageService::open_in_memory().unwrap();
        save(&store, "a", "xx");
        store.set_accessed_at("a", 1000);

        store.get_image("a").unwrap();
        let meta = store.list_all_metadata().unwrap().remove(0);
        assert!(meta.accessed_at > 1000);
    }

    #[test]
    fn eviction_ties_break_by_id() {
        let store = ImageStorageService::open_in_memory().unwrap();
        save(&store, "b", "xx");
        save(&store, "a", "xx");
        let now = Utc::now().timestamp_millis();
        store.set_accessed_at("a", now - 1000);
        store.set_accessed_at("b", now - 1000);

        store
            .update_quota_config(StorageQuotaUpdate {
                max_count: Some(1),
                ..Default::default()
            })
            .unwrap();
        let remaining = store.list_all_metadata().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "b");
    }

    #[test]
    fn legacy_single_table_layout_is_split_in_batches() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE images (
                id TEXT PRIMARY KEY, metadata TEXT, data TEXT,
                created_at INTEGER, accessed_at INTEGER, source TEXT
            );",
        )
        .unwrap();
        // More rows than one migration batch.
        for i in 0..60 {
            conn.execute(
                "INSERT INTO images VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    format!("img-{:03}", i),
                    "{}",
                    "ZGF0YQ==",
                    1000 + i,
                    2000 + i,
                    "upload"
                ],
            )
            .unwrap();
        }
        conn.pragma_update(None, "user_version", 1).unwrap();

        let store = ImageStorageService::from_connection(conn).unwrap();
        let stats = store.get_storage_stats().unwrap();
        assert_eq!(stats.count, 60);
        let img = store.get_image("img-000").unwrap().unwrap();
        assert_eq!(img.data_b64, "ZGF0YQ==");
        assert_eq!(img.metadata.source, "upload");
    }

    #[test]
    fn clear_empties_both_tables() {
        let store = ImageStorageService::open_in_memory().unwrap();
        save(&store, "a", "xx");
        save(&store, "b", "xx");
        store.clear().unwrap();
        assert_eq!(store.get_storage_stats().unwrap().count, 0);
        assert!(store.get_image("a").unwrap().is_none());
    }
}
