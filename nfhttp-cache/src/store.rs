//! The on-disk cache store: a `.nfhttp` SQLite metadata file (the `http`
//! and `pinned_items` tables from the external interface) plus payload
//! blobs written alongside it, named by fingerprint.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use nfhttp_types::{NfError, Result};
use rusqlite::{params, Connection, OptionalExtension};

pub fn now_epoch() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

/// The metadata row for one cached response. `response_metadata` is the
/// serialized `{status, headers}` blob; the body lives in a separate file.
#[derive(Debug, Clone)]
pub struct StoredMeta {
    pub fingerprint: String,
    pub expiry: i64,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub response_metadata: String,
    pub last_accessed: i64,
    pub payload_size: i64,
}

pub struct CacheStore {
    conn: Mutex<Connection>,
    dir: PathBuf,
}

impl CacheStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(NfError::from)?;
        let conn = Connection::open(dir.join(".nfhttp"))
            .map_err(|e| NfError::Storage(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS http (
                fingerprint TEXT PRIMARY KEY,
                expiry INTEGER NOT NULL,
                etag TEXT,
                last_modified TEXT,
                response_metadata TEXT NOT NULL,
                last_accessed INTEGER NOT NULL,
                payload_size INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS pinned_items (
                fingerprint TEXT NOT NULL,
                label TEXT NOT NULL,
                UNIQUE(fingerprint, label)
            );",
        )
        .map_err(|e| NfError::Storage(e.to_string()))?;
        Ok(Self { conn: Mutex::new(conn), dir })
    }

    fn payload_path(&self, fingerprint: &str) -> PathBuf {
        self.dir.join(fingerprint)
    }

    pub fn get_meta(&self, fingerprint: &str) -> Result<Option<StoredMeta>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT fingerprint, expiry, etag, last_modified, response_metadata, last_accessed, payload_size
             FROM http WHERE fingerprint = ?1",
            params![fingerprint],
            |row| {
                Ok(StoredMeta {
                    fingerprint: row.get(0)?,
                    expiry: row.get(1)?,
                    etag: row.get(2)?,
                    last_modified: row.get(3)?,
                    response_metadata: row.get(4)?,
                    last_accessed: row.get(5)?,
                    payload_size: row.get(6)?,
                })
            },
        )
        .optional()
        .map_err(|e| NfError::Storage(e.to_string()))
    }

    /// Reads a cached payload blob. `Ok(None)` distinguishes "no such
    /// file" from an I/O error, since a missing blob after a crash between
    /// the metadata write and the blob write is an expected condition the
    /// cache lookup treats as a miss rather than an error.
    pub fn read_payload(&self, fingerprint: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.payload_path(fingerprint)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(NfError::from(e)),
        }
    }

    /// Writes the metadata row first, then the payload blob, matching the
    /// crash-consistency contract: a crash between the two leaves a row
    /// with no blob, which `get_meta` + `read_payload` together surface as
    /// a miss rather than corruption.
    pub fn upsert(&self, meta: &StoredMeta, payload: &[u8]) -> Result<()> {
        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO http (fingerprint, expiry, etag, last_modified, response_metadata, last_accessed, payload_size)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(fingerprint) DO UPDATE SET
                    expiry = excluded.expiry,
                    etag = excluded.etag,
                    last_modified = excluded.last_modified,
                    response_metadata = excluded.response_metadata,
                    last_accessed = excluded.last_accessed,
                    payload_size = excluded.payload_size",
                params![
                    meta.fingerprint,
                    meta.expiry,
                    meta.etag,
                    meta.last_modified,
                    meta.response_metadata,
                    meta.last_accessed,
                    meta.payload_size,
                ],
            )
            .map_err(|e| NfError::Storage(e.to_string()))?;
        }
        fs::write(self.payload_path(&meta.fingerprint), payload).map_err(NfError::from)?;
        Ok(())
    }

    pub fn touch(&self, fingerprint: &str, now: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE http SET last_accessed = ?1 WHERE fingerprint = ?2",
            params![now, fingerprint],
        )
        .map_err(|e| NfError::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn delete(&self, fingerprint: &str) -> Result<()> {
        {
            let conn = self.conn.lock().unwrap();
            conn.execute("DELETE FROM http WHERE fingerprint = ?1", params![fingerprint])
                .map_err(|e| NfError::Storage(e.to_string()))?;
        }
        match fs::remove_file(self.payload_path(fingerprint)) {
            Ok(()) | Err(_) => Ok(()),
        }
    }

    pub fn pin(&self, fingerprint: &str, label: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO pinned_items (fingerprint, label) VALUES (?1, ?2)",
            params![fingerprint, label],
        )
        .map_err(|e| NfError::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn unpin(&self, fingerprint: &str, label: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM pinned_items WHERE fingerprint = ?1 AND label = ?2",
            params![fingerprint, label],
        )
        .map_err(|e| NfError::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn remove_pinned(&self, label: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM pinned_items WHERE label = ?1", params![label])
            .map_err(|e| NfError::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn is_pinned(&self, fingerprint: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pinned_items WHERE fingerprint = ?1",
                params![fingerprint],
                |row| row.get(0),
            )
            .map_err(|e| NfError::Storage(e.to_string()))?;
        Ok(count > 0)
    }

    pub fn pinned_for(&self, label: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT fingerprint FROM pinned_items WHERE label = ?1")
            .map_err(|e| NfError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map(params![label], |row| row.get::<_, String>(0))
            .map_err(|e| NfError::Storage(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(|e| NfError::Storage(e.to_string()))
    }

    pub fn pin_labels(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT DISTINCT label FROM pinned_items ORDER BY label")
            .map_err(|e| NfError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| NfError::Storage(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(|e| NfError::Storage(e.to_string()))
    }

    pub fn total_payload_size(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COALESCE(SUM(payload_size), 0) FROM http", [], |row| row.get(0))
            .map_err(|e| NfError::Storage(e.to_string()))
    }

    /// Two-pass eviction per the external interface: entries ordered by
    /// `expiry` ascending are removed first, then (if still over
    /// threshold) entries ordered by `last_accessed` ascending. Pinned
    /// entries are excluded from both passes. Returns the fingerprints
    /// removed so the caller can log or otherwise react.
    pub fn prune(&self, max_bytes: i64) -> Result<Vec<String>> {
        let mut total = self.total_payload_size()?;
        if total <= max_bytes {
            return Ok(Vec::new());
        }
        let mut removed = Vec::new();
        for order_by in ["expiry", "last_accessed"] {
            if total <= max_bytes {
                break;
            }
            let candidates = self.unpinned_ordered(order_by)?;
            for (fingerprint, size) in candidates {
                if total <= max_bytes {
                    break;
                }
                self.delete(&fingerprint)?;
                total -= size;
                tracing::debug!(fingerprint = %fingerprint, order_by, "evicted cache entry");
                removed.push(fingerprint);
            }
        }
        Ok(removed)
    }

    fn unpinned_ordered(&self, order_by: &str) -> Result<Vec<(String, i64)>> {
        let column = match order_by {
            "expiry" => "expiry",
            _ => "last_accessed",
        };
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT fingerprint, payload_size FROM http
             WHERE fingerprint NOT IN (SELECT fingerprint FROM pinned_items)
             ORDER BY {column} ASC"
        );
        let mut stmt = conn.prepare(&sql).map_err(|e| NfError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(|e| NfError::Storage(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(|e| NfError::Storage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(fp: &str, expiry: i64, size: i64) -> StoredMeta {
        StoredMeta {
            fingerprint: fp.to_string(),
            expiry,
            etag: Some("\"v1\"".to_string()),
            last_modified: None,
            response_metadata: "{\"status\":200,\"headers\":{}}".to_string(),
            last_accessed: now_epoch(),
            payload_size: size,
        }
    }

    #[test]
    fn round_trips_metadata_and_payload() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        store.upsert(&meta("abc", 1000, 5), b"hello").unwrap();
        let loaded = store.get_meta("abc").unwrap().unwrap();
        assert_eq!(loaded.expiry, 1000);
        assert_eq!(store.read_payload("abc").unwrap(), Some(b"hello".to_vec()));
    }

    #[test]
    fn missing_blob_reads_as_none_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        assert_eq!(store.read_payload("missing").unwrap(), None);
    }

    #[test]
    fn pinned_entries_survive_prune() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        store.upsert(&meta("keep", 1, 10), b"0123456789").unwrap();
        store.upsert(&meta("evict", 2, 10), b"0123456789").unwrap();
        store.pin("keep", "important").unwrap();

        let removed = store.prune(5).unwrap();
        assert_eq!(removed, vec!["evict".to_string()]);
        assert!(store.get_meta("keep").unwrap().is_some());
        assert!(store.get_meta("evict").unwrap().is_none());
    }

    #[test]
    fn prune_removes_only_enough_entries_to_clear_the_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        store.upsert(&meta("expires-soonest", 100, 10), b"0123456789").unwrap();
        store.upsert(&meta("expires-latest", 200, 10), b"0123456789").unwrap();

        let removed = store.prune(15).unwrap();
        assert_eq!(removed, vec!["expires-soonest".to_string()]);
        assert!(store.get_meta("expires-latest").unwrap().is_some());
    }

    #[test]
    fn pin_labels_and_pinned_for_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        store.upsert(&meta("a", 1, 1), b"x").unwrap();
        store.pin("a", "favorites").unwrap();
        assert_eq!(store.pin_labels().unwrap(), vec!["favorites".to_string()]);
        assert_eq!(store.pinned_for("favorites").unwrap(), vec!["a".to_string()]);
        store.remove_pinned("favorites").unwrap();
        assert!(store.pinned_for("favorites").unwrap().is_empty());
    }
}
