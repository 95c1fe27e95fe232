//! Persistent chunk-hash cache, backed by a local SQLite database. A correctness
//! accelerator, not a source of truth: every answer it gives is reproducible by re-reading
//! the file from disk, and staleness is detected purely from `(size, mtime)`.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;

/// One row of the `chunk_hash` relation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkHashRow {
    pub serial: u32,
    pub block_size: u64,
    pub hash: String,
}

/// One row of the `file` relation.
#[derive(Debug, Clone)]
pub struct FileRow {
    pub id: i64,
    pub directory: String,
    pub basename: String,
    pub size: u64,
    pub mtime: f64,
}

pub struct HashCache {
    conn: Connection,
}

/// Filesystem mtime as a fractional-seconds timestamp, matching the precision the cache
/// schema stores. Falls back to `0.0` on platforms without a usable raw mtime.
#[cfg(unix)]
pub fn mtime_secs(meta: &std::fs::Metadata) -> f64 {
    use std::os::unix::fs::MetadataExt;
    meta.mtime() as f64 + meta.mtime_nsec() as f64 / 1e9
}

#[cfg(not(unix))]
pub fn mtime_secs(meta: &std::fs::Metadata) -> f64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn split_path(path: &Path) -> (String, String) {
    let directory = path
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    let basename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    (directory, basename)
}

/// `chunks` forms a dense `1..k` prefix with no gaps or duplicate serials.
fn is_dense_prefix(chunks: &[ChunkHashRow]) -> bool {
    chunks
        .iter()
        .enumerate()
        .all(|(idx, c)| c.serial as usize == idx + 1)
}

impl HashCache {
    /// Opens (creating if absent) the SQLite file at `path` and ensures the schema exists.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS file (
                id        INTEGER PRIMARY KEY AUTOINCREMENT,
                directory TEXT NOT NULL,
                basename  TEXT NOT NULL,
                size      INTEGER NOT NULL,
                mtime     REAL NOT NULL,
                UNIQUE(directory, basename)
            );
            CREATE TABLE IF NOT EXISTS chunk_hash (
                file_id    INTEGER NOT NULL,
                serial     INTEGER NOT NULL,
                block_size INTEGER NOT NULL,
                hash       TEXT NOT NULL,
                PRIMARY KEY (file_id, serial),
                FOREIGN KEY (file_id) REFERENCES file(id) ON DELETE CASCADE
            );",
        )?;
        Ok(Self { conn })
    }

    /// In-memory cache, useful for tests and for short-lived processes that never persist.
    pub fn open_in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    /// Inserts a new file record; returns its id, or `None` on a uniqueness conflict.
    pub fn add_file(&self, directory: &str, basename: &str, size: u64, mtime: f64) -> Result<Option<i64>> {
        let result = self.conn.execute(
            "INSERT INTO file (directory, basename, size, mtime) VALUES (?1, ?2, ?3, ?4)",
            params![directory, basename, size as i64, mtime],
        );
        match result {
            Ok(_) => Ok(Some(self.conn.last_insert_rowid())),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Batch-inserts chunk hash rows for `file_id` in one transaction. Any failure aborts
    /// and rolls back the whole batch.
    pub fn add_chunk_hashes(&mut self, file_id: i64, hashes: &[(u32, u64, String)]) -> Result<bool> {
        let tx = match self.conn.transaction() {
            Ok(tx) => tx,
            Err(_) => return Ok(false),
        };

        let failed = {
            let mut stmt = match tx.prepare(
                "INSERT INTO chunk_hash (file_id, serial, block_size, hash) VALUES (?1, ?2, ?3, ?4)",
            ) {
                Ok(s) => s,
                Err(_) => return Ok(false),
            };
            hashes
                .iter()
                .any(|(serial, len, hash)| {
                    stmt.execute(params![file_id, serial, *len as i64, hash]).is_err()
                })
        };

        if failed {
            tx.rollback().ok();
            Ok(false)
        } else {
            tx.commit()?;
            Ok(true)
        }
    }

    pub fn get_file(&self, path: &Path) -> Result<Option<FileRow>> {
        let (directory, basename) = split_path(path);
        self.conn
            .query_row(
                "SELECT id, directory, basename, size, mtime FROM file WHERE directory = ?1 AND basename = ?2",
                params![directory, basename],
                |row| {
                    Ok(FileRow {
                        id: row.get(0)?,
                        directory: row.get(1)?,
                        basename: row.get(2)?,
                        size: row.get::<_, i64>(3)? as u64,
                        mtime: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn get_chunk_hashes(&self, file_id: i64) -> Result<Vec<ChunkHashRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT serial, block_size, hash FROM chunk_hash WHERE file_id = ?1 ORDER BY serial",
        )?;
        let rows = stmt
            .query_map(params![file_id], |row| {
                Ok(ChunkHashRow {
                    serial: row.get::<_, i64>(0)? as u32,
                    block_size: row.get::<_, i64>(1)? as u64,
                    hash: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn update_file(&self, id: i64, size: u64, mtime: f64) -> Result<bool> {
        let n = self
            .conn
            .execute(
                "UPDATE file SET size = ?1, mtime = ?2 WHERE id = ?3",
                params![size as i64, mtime, id],
            )
            .unwrap_or(0);
        Ok(n > 0)
    }

    pub fn delete_chunk_hashes(&self, file_id: i64) -> Result<bool> {
        Ok(self
            .conn
            .execute("DELETE FROM chunk_hash WHERE file_id = ?1", params![file_id])
            .is_ok())
    }

    pub fn delete_file(&self, id: i64) -> Result<bool> {
        Ok(self
            .conn
            .execute("DELETE FROM file WHERE id = ?1", params![id])
            .is_ok())
    }

    /// The central lazy-cache routine. Returns `(-1, None)` when the caller
    /// must create a fresh record; `(id, None)` when the record exists but is stale and has
    /// just been reset in place; `(id, Some(chunks))` when the cached chunks are current.
    pub fn get_file_details(&self, path: &Path, size: u64, mtime: f64) -> Result<(i64, Option<Vec<ChunkHashRow>>)> {
        let row = match self.get_file(path)? {
            Some(row) => row,
            None => return Ok((-1, None)),
        };

        let stale = row.size != size || row.mtime != mtime;

        let chunks = if stale {
            None
        } else {
            let chunks = self.get_chunk_hashes(row.id)?;
            if is_dense_prefix(&chunks) {
                Some(chunks)
            } else {
                None
            }
        };

        if chunks.is_some() {
            return Ok((row.id, chunks));
        }

        // Stale or malformed: reset in place, or fail closed by deleting the record.
        if self.delete_chunk_hashes(row.id)? && self.update_file(row.id, size, mtime)? {
            Ok((row.id, None))
        } else {
            self.delete_file(row.id)?;
            Ok((-1, None))
        }
    }
}
