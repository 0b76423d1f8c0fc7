//! Persistent tile cache backed by SQLite.
//!
//! One logical table, `FileInfo`: key = absolute file path, value = the
//! msgpack-serialized averaged color. The cache is the single source of
//! truth across runs; the in-memory color index is rebuilt from it every
//! run. WAL mode gives the scanner's read transactions a stable snapshot
//! while the persistence writer commits on its own connection, and
//! `synchronous=FULL` makes every committed record durable before `put`
//! returns.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::color::Rgb;
use crate::error::{IndexError, Result};

/// On-disk value format. The path lives in the key, so only the channels
/// are serialized.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct StoredRecord {
    r: u8,
    g: u8,
    b: u8,
}

impl From<Rgb> for StoredRecord {
    fn from(c: Rgb) -> Self {
        Self { r: c.r, g: c.g, b: c.b }
    }
}

impl From<StoredRecord> for Rgb {
    fn from(s: StoredRecord) -> Self {
        Rgb::new(s.r, s.g, s.b)
    }
}

/// Counts from the startup reconciliation pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileStats {
    pub kept: usize,
    pub dropped_missing: usize,
    pub dropped_corrupt: usize,
}

pub struct TileCache {
    db_path: PathBuf,
    conn: Connection,
}

impl TileCache {
    /// Open (or create) the cache database. A store that cannot be opened
    /// is a hard startup failure; nothing downstream can run without it.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Self::connect(db_path).map_err(|source| IndexError::StoreOpen {
            path: db_path.to_path_buf(),
            source,
        })?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS FileInfo (
                path   TEXT NOT NULL PRIMARY KEY,
                record BLOB NOT NULL
            )",
            [],
        )?;

        Ok(Self {
            db_path: db_path.to_path_buf(),
            conn,
        })
    }

    fn connect(db_path: &Path) -> rusqlite::Result<Connection> {
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        // WAL so reader transactions snapshot independently of the writer
        // connection; FULL so a commit is durable when put() returns.
        // journal_mode reports the resulting mode as a row, so query it.
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        Ok(conn)
    }

    /// Second connection for the persistence-writer thread. Connections are
    /// not `Sync`, so each thread role holds its own.
    pub fn writer(&self) -> Result<CacheWriter> {
        let conn = Self::connect(&self.db_path).map_err(|source| IndexError::StoreOpen {
            path: self.db_path.clone(),
            source,
        })?;
        Ok(CacheWriter { conn })
    }

    pub fn get(&self, path: &Path) -> Result<Option<Rgb>> {
        let blob: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT record FROM FileInfo WHERE path = ?1",
                params![path.to_string_lossy()],
                |row| row.get(0),
            )
            .optional()?;

        match blob {
            None => Ok(None),
            Some(bytes) => {
                let stored: StoredRecord = rmp_serde::from_slice(&bytes)?;
                Ok(Some(stored.into()))
            }
        }
    }

    pub fn contains(&self, path: &Path) -> Result<bool> {
        let hit: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM FileInfo WHERE path = ?1",
                params![path.to_string_lossy()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hit.is_some())
    }

    pub fn put(&self, path: &Path, color: Rgb) -> Result<()> {
        put_record(&self.conn, path, color)
    }

    pub fn delete(&self, path: &Path) -> Result<()> {
        self.conn.execute(
            "DELETE FROM FileInfo WHERE path = ?1",
            params![path.to_string_lossy()],
        )?;
        Ok(())
    }

    pub fn len(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM FileInfo", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Stream every decodable entry to `visit`, inside one read transaction.
    /// Entries that fail to decode are skipped here; reconciliation is the
    /// pass responsible for removing them.
    pub fn scan<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(&Path, Rgb),
    {
        let mut stmt = self.conn.prepare("SELECT path, record FROM FileInfo")?;
        let rows = stmt.query_map([], |row| {
            let path: String = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            Ok((path, blob))
        })?;

        for row in rows {
            let (path, blob) = row?;
            match rmp_serde::from_slice::<StoredRecord>(&blob) {
                Ok(stored) => visit(Path::new(&path), stored.into()),
                Err(e) => warn!(path = %path, error = %e, "skipping undecodable cache entry"),
            }
        }
        Ok(())
    }

    /// Startup pass: drop every entry whose value no longer decodes or whose
    /// backing file has vanished from disk. Runs once, fully, before the
    /// library scan; the deletions happen in a single batch at the end.
    pub fn reconcile(&self) -> Result<ReconcileStats> {
        let mut stats = ReconcileStats::default();
        let mut need_del: Vec<String> = Vec::new();

        {
            let mut stmt = self.conn.prepare("SELECT path, record FROM FileInfo")?;
            let rows = stmt.query_map([], |row| {
                let path: String = row.get(0)?;
                let blob: Vec<u8> = row.get(1)?;
                Ok((path, blob))
            })?;

            for row in rows {
                let (path, blob) = row?;
                if let Err(e) = rmp_serde::from_slice::<StoredRecord>(&blob) {
                    warn!(path = %path, error = %e, "dropping undecodable cache entry");
                    stats.dropped_corrupt += 1;
                    need_del.push(path);
                    continue;
                }
                if !Path::new(&path).exists() {
                    warn!(path = %path, "dropping cache entry for missing file");
                    stats.dropped_missing += 1;
                    need_del.push(path);
                    continue;
                }
                stats.kept += 1;
            }
        }

        for path in &need_del {
            self.conn
                .execute("DELETE FROM FileInfo WHERE path = ?1", params![path])?;
        }

        info!(
            kept = stats.kept,
            dropped_missing = stats.dropped_missing,
            dropped_corrupt = stats.dropped_corrupt,
            "cache reconciliation complete"
        );
        Ok(stats)
    }

    #[cfg(test)]
    pub(crate) fn put_raw(&self, path: &Path, blob: &[u8]) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO FileInfo (path, record) VALUES (?1, ?2)",
            params![path.to_string_lossy(), blob],
        )?;
        Ok(())
    }
}

/// Write handle owned by the persistence-writer thread.
pub struct CacheWriter {
    conn: Connection,
}

impl CacheWriter {
    pub fn put(&self, path: &Path, color: Rgb) -> Result<()> {
        put_record(&self.conn, path, color)
    }
}

fn put_record(conn: &Connection, path: &Path, color: Rgb) -> Result<()> {
    let blob = rmp_serde::to_vec(&StoredRecord::from(color))?;
    conn.execute(
        "INSERT OR REPLACE INTO FileInfo (path, record) VALUES (?1, ?2)",
        params![path.to_string_lossy(), blob],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_cache(dir: &TempDir) -> TileCache {
        TileCache::open(&dir.path().join("cache.bin")).expect("open cache")
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir);

        let file = dir.path().join("tile.png");
        std::fs::write(&file, b"x").unwrap();

        cache.put(&file, Rgb::new(10, 20, 30)).unwrap();
        assert_eq!(cache.get(&file).unwrap(), Some(Rgb::new(10, 20, 30)));
        assert!(cache.contains(&file).unwrap());
        assert_eq!(cache.len().unwrap(), 1);
    }

    #[test]
    fn get_absent_returns_none() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir);
        assert_eq!(cache.get(Path::new("/no/such/file.png")).unwrap(), None);
    }

    #[test]
    fn delete_removes_entry() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir);

        let file = dir.path().join("tile.png");
        std::fs::write(&file, b"x").unwrap();
        cache.put(&file, Rgb::new(1, 2, 3)).unwrap();
        cache.delete(&file).unwrap();
        assert!(!cache.contains(&file).unwrap());
    }

    #[test]
    fn reconcile_drops_missing_and_corrupt_entries() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir);

        let kept = dir.path().join("kept.png");
        std::fs::write(&kept, b"x").unwrap();
        cache.put(&kept, Rgb::new(5, 5, 5)).unwrap();

        let gone = dir.path().join("gone.png");
        std::fs::write(&gone, b"x").unwrap();
        cache.put(&gone, Rgb::new(6, 6, 6)).unwrap();
        std::fs::remove_file(&gone).unwrap();

        let corrupt = dir.path().join("corrupt.png");
        std::fs::write(&corrupt, b"x").unwrap();
        cache.put_raw(&corrupt, b"\xc1not-msgpack").unwrap();

        let stats = cache.reconcile().unwrap();
        assert_eq!(stats.kept, 1);
        assert_eq!(stats.dropped_missing, 1);
        assert_eq!(stats.dropped_corrupt, 1);

        assert!(cache.contains(&kept).unwrap());
        assert!(!cache.contains(&gone).unwrap());
        assert!(!cache.contains(&corrupt).unwrap());
    }

    #[test]
    fn writer_commits_are_visible_to_reader_connection() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir);
        let writer = cache.writer().unwrap();

        let file = dir.path().join("tile.png");
        std::fs::write(&file, b"x").unwrap();

        writer.put(&file, Rgb::new(9, 8, 7)).unwrap();
        assert_eq!(cache.get(&file).unwrap(), Some(Rgb::new(9, 8, 7)));
    }

    #[test]
    fn scan_visits_all_entries() {
        let dir = TempDir::new().unwrap();
        let cache = open_cache(&dir);

        for name in ["a.png", "b.png", "c.png"] {
            let file = dir.path().join(name);
            std::fs::write(&file, b"x").unwrap();
            cache.put(&file, Rgb::new(1, 1, 1)).unwrap();
        }

        let mut seen = 0;
        cache.scan(|_, color| {
            assert_eq!(color, Rgb::new(1, 1, 1));
            seen += 1;
        }).unwrap();
        assert_eq!(seen, 3);
    }
}
