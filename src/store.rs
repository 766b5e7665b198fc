//! Transactional key-value storage over a single SQLite database file.
//!
//! All persistent state of the filesystem lives in one `kv` table keyed by
//! typed, prefixed strings (see [`keys`]). Higher layers never touch SQL;
//! they speak [`ReadTxn`]/[`WriteTxn`] handles obtained from [`Store`].
//!
//! Writers are serialized behind the connection mutex and run inside
//! `BEGIN IMMEDIATE` transactions; an uncommitted transaction rolls back on
//! drop, so a failed mutation never leaves partial state behind.

use std::ops::Deref;

use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::config::MEMORY_PATH;
use crate::error::{FsError, FsResult};

const SCHEMA_VERSION: u32 = 1;

pub struct Store {
    conn: Mutex<Connection>,
    persistent: bool,
}

impl Store {
    /// Open (creating if necessary) the database at `path`, or an in-memory
    /// database for [`MEMORY_PATH`].
    pub fn open(path: &str) -> FsResult<Self> {
        let persistent = path != MEMORY_PATH;
        let conn = if persistent {
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            )?;
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA busy_timeout = 5000;",
            )?;
            conn
        } else {
            Connection::open_in_memory()?
        };

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                k TEXT PRIMARY KEY,
                v BLOB NOT NULL
            ) WITHOUT ROWID;",
        )?;

        tracing::debug!(path, persistent, "opened storage backend");
        Ok(Store {
            conn: Mutex::new(conn),
            persistent,
        })
    }

    /// The schema version written to `META/version` on first open.
    pub(crate) fn schema_version() -> u32 {
        SCHEMA_VERSION
    }

    /// Begin a read-only snapshot transaction.
    pub(crate) fn begin_read(&self) -> FsResult<ReadTxn<'_>> {
        let conn = self.conn.lock();
        conn.execute_batch("BEGIN")?;
        Ok(ReadTxn { conn, open: true })
    }

    /// Begin a write transaction. Writers are serialized; the write lock is
    /// taken up front so the transaction cannot fail midway with a busy
    /// backend.
    pub(crate) fn begin_write(&self) -> FsResult<WriteTxn<'_>> {
        let conn = self.conn.lock();
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(WriteTxn {
            inner: ReadTxn { conn, open: true },
        })
    }

    /// Force journaled state down to the database file. Backs `fsync`.
    pub fn flush(&self) -> FsResult<()> {
        if self.persistent {
            let conn = self.conn.lock();
            conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        }
        Ok(())
    }
}

/// Read transaction handle. Dropping it releases the snapshot.
pub(crate) struct ReadTxn<'s> {
    conn: MutexGuard<'s, Connection>,
    open: bool,
}

impl ReadTxn<'_> {
    pub fn get(&self, key: &str) -> FsResult<Option<Vec<u8>>> {
        let value = self
            .conn
            .query_row("SELECT v FROM kv WHERE k = ?1", params![key], |row| {
                row.get::<_, Vec<u8>>(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn get_u64(&self, key: &str) -> FsResult<Option<u64>> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(decode_u64(key, &bytes)?)),
            None => Ok(None),
        }
    }

    pub fn exists(&self, key: &str) -> FsResult<bool> {
        let found = self
            .conn
            .query_row("SELECT 1 FROM kv WHERE k = ?1", params![key], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// All `(key, value)` pairs under `prefix`, in key order. Prefixes end
    /// with `/`, so lexicographic key order yields name order.
    pub fn scan_prefix(&self, prefix: &str) -> FsResult<Vec<(String, Vec<u8>)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT k, v FROM kv WHERE k >= ?1 AND k < ?2 ORDER BY k")?;
        let rows = stmt.query_map(params![prefix, scan_upper_bound(prefix)], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn scan_prefix_keys(&self, prefix: &str) -> FsResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT k FROM kv WHERE k >= ?1 AND k < ?2 ORDER BY k")?;
        let rows = stmt.query_map(params![prefix, scan_upper_bound(prefix)], |row| {
            row.get::<_, String>(0)
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Largest key under `prefix`, if any.
    pub fn last_key_with_prefix(&self, prefix: &str) -> FsResult<Option<String>> {
        let key = self
            .conn
            .query_row(
                "SELECT k FROM kv WHERE k >= ?1 AND k < ?2 ORDER BY k DESC LIMIT 1",
                params![prefix, scan_upper_bound(prefix)],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(key)
    }

    pub fn any_key_with_prefix(&self, prefix: &str) -> FsResult<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM kv WHERE k >= ?1 AND k < ?2 LIMIT 1",
                params![prefix, scan_upper_bound(prefix)],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn sum_value_len_prefix(&self, prefix: &str) -> FsResult<u64> {
        let total: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(v)), 0) FROM kv WHERE k >= ?1 AND k < ?2",
            params![prefix, scan_upper_bound(prefix)],
            |row| row.get(0),
        )?;
        Ok(total as u64)
    }

    fn end(&mut self, sql: &str) {
        if self.open {
            self.open = false;
            if let Err(e) = self.conn.execute_batch(sql) {
                tracing::warn!("failed to end transaction: {}", e);
            }
        }
    }
}

impl Drop for ReadTxn<'_> {
    fn drop(&mut self) {
        self.end("ROLLBACK");
    }
}

/// Write transaction handle. Derefs to [`ReadTxn`] for reads; rolls back on
/// drop unless [`WriteTxn::commit`] ran.
pub(crate) struct WriteTxn<'s> {
    inner: ReadTxn<'s>,
}

impl<'s> Deref for WriteTxn<'s> {
    type Target = ReadTxn<'s>;

    fn deref(&self) -> &ReadTxn<'s> {
        &self.inner
    }
}

impl WriteTxn<'_> {
    pub fn put(&self, key: &str, value: &[u8]) -> FsResult<()> {
        self.inner.conn.execute(
            "INSERT INTO kv (k, v) VALUES (?1, ?2)
             ON CONFLICT(k) DO UPDATE SET v = excluded.v",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn put_u64(&self, key: &str, value: u64) -> FsResult<()> {
        self.put(key, &value.to_le_bytes())
    }

    pub fn put_u32(&self, key: &str, value: u32) -> FsResult<()> {
        self.put(key, &value.to_le_bytes())
    }

    pub fn delete(&self, key: &str) -> FsResult<bool> {
        let n = self
            .inner
            .conn
            .execute("DELETE FROM kv WHERE k = ?1", params![key])?;
        Ok(n > 0)
    }

    pub fn delete_prefix(&self, prefix: &str) -> FsResult<usize> {
        let n = self.inner.conn.execute(
            "DELETE FROM kv WHERE k >= ?1 AND k < ?2",
            params![prefix, scan_upper_bound(prefix)],
        )?;
        Ok(n)
    }

    pub fn commit(mut self) -> FsResult<()> {
        // Mark closed only after COMMIT succeeds; a failed commit still
        // rolls back on drop.
        self.inner.conn.execute_batch("COMMIT")?;
        self.inner.open = false;
        Ok(())
    }
}

/// Exclusive upper bound for a prefix range scan. Scan prefixes always end
/// with `/` (0x2f), whose successor `0` keeps the bound valid UTF-8.
fn scan_upper_bound(prefix: &str) -> String {
    debug_assert!(prefix.ends_with('/'));
    let mut bytes = prefix.as_bytes().to_vec();
    if let Some(last) = bytes.last_mut() {
        *last += 1;
    }
    String::from_utf8(bytes).unwrap_or_else(|_| format!("{prefix}\u{10FFFF}"))
}

pub(crate) fn decode_u64(key: &str, bytes: &[u8]) -> FsResult<u64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| FsError::corruption(format!("bad u64 value at key {key}")))?;
    Ok(u64::from_le_bytes(arr))
}

pub(crate) fn decode_u32(key: &str, bytes: &[u8]) -> FsResult<u32> {
    let arr: [u8; 4] = bytes
        .try_into()
        .map_err(|_| FsError::corruption(format!("bad u32 value at key {key}")))?;
    Ok(u32::from_le_bytes(arr))
}

/// Typed key layout.
///
/// Numeric segments are zero-padded lowercase hex so that lexicographic key
/// order equals numeric order and directory scans come back name-sorted.
pub(crate) mod keys {
    use crate::overlay::types::Layer;

    pub const VERSION: &str = "META/version";
    pub const NEXT_INO: &str = "META/next_ino";
    pub const ROOT_INO: &str = "META/root_ino";

    fn tag(layer: Layer) -> &'static str {
        match layer {
            Layer::Base => "BASE",
            Layer::Delta => "DELTA",
        }
    }

    pub fn inode(layer: Layer, ino: u64) -> String {
        format!("INODE/{}/{:016x}", tag(layer), ino)
    }

    pub fn inode_prefix(layer: Layer) -> String {
        format!("INODE/{}/", tag(layer))
    }

    pub fn dir_entry(layer: Layer, parent: u64, name: &str) -> String {
        format!("DIR/{}/{:016x}/{}", tag(layer), parent, name)
    }

    pub fn dir_prefix(layer: Layer, parent: u64) -> String {
        format!("DIR/{}/{:016x}/", tag(layer), parent)
    }

    pub fn whiteout(parent: u64, name: &str) -> String {
        format!("WHITE/{parent:016x}/{name}")
    }

    pub fn whiteout_prefix(parent: u64) -> String {
        format!("WHITE/{parent:016x}/")
    }

    pub fn chunk(layer: Layer, ino: u64, index: u64) -> String {
        format!("CHUNK/{}/{:016x}/{:016x}", tag(layer), ino, index)
    }

    pub fn chunk_prefix(layer: Layer, ino: u64) -> String {
        format!("CHUNK/{}/{:016x}/", tag(layer), ino)
    }

    pub fn chunk_prefix_all() -> &'static str {
        "CHUNK/"
    }

    pub fn xattr(layer: Layer, ino: u64, name: &str) -> String {
        format!("XATTR/{}/{:016x}/{}", tag(layer), ino, name)
    }

    pub fn xattr_prefix(layer: Layer, ino: u64) -> String {
        format!("XATTR/{}/{:016x}/", tag(layer), ino)
    }

    pub fn symlink(layer: Layer, ino: u64) -> String {
        format!("SYM/{}/{:016x}", tag(layer), ino)
    }

    /// Final segment of a `DIR/` or `XATTR/` key: the entry name.
    pub fn name_segment(key: &str) -> &str {
        key.rsplit('/').next().unwrap_or(key)
    }

    /// Parse the final zero-padded hex segment of a key: the inode id of
    /// an `INODE/` key, or the chunk index of a `CHUNK/` key.
    pub fn hex_segment(key: &str) -> Option<u64> {
        u64::from_str_radix(key.rsplit('/').next()?, 16).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::types::Layer;

    fn memory_store() -> Store {
        Store::open(MEMORY_PATH).unwrap()
    }

    #[test]
    fn test_put_get_roundtrip() {
        let store = memory_store();
        let txn = store.begin_write().unwrap();
        txn.put("META/test", b"hello").unwrap();
        txn.commit().unwrap();

        let txn = store.begin_read().unwrap();
        assert_eq!(txn.get("META/test").unwrap().unwrap(), b"hello");
        assert!(txn.get("META/other").unwrap().is_none());
    }

    #[test]
    fn test_uncommitted_write_rolls_back() {
        let store = memory_store();
        {
            let txn = store.begin_write().unwrap();
            txn.put("META/test", b"doomed").unwrap();
            // dropped without commit
        }
        let txn = store.begin_read().unwrap();
        assert!(txn.get("META/test").unwrap().is_none());
    }

    #[test]
    fn test_scan_prefix_is_ordered_and_bounded() {
        let store = memory_store();
        let txn = store.begin_write().unwrap();
        txn.put(&keys::dir_entry(Layer::Delta, 1, "b"), &2u64.to_le_bytes())
            .unwrap();
        txn.put(&keys::dir_entry(Layer::Delta, 1, "a"), &3u64.to_le_bytes())
            .unwrap();
        // Sibling directory that must not leak into the scan.
        txn.put(&keys::dir_entry(Layer::Delta, 2, "z"), &4u64.to_le_bytes())
            .unwrap();
        txn.commit().unwrap();

        let txn = store.begin_read().unwrap();
        let rows = txn.scan_prefix(&keys::dir_prefix(Layer::Delta, 1)).unwrap();
        let names: Vec<&str> = rows.iter().map(|(k, _)| keys::name_segment(k)).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_delete_prefix() {
        let store = memory_store();
        let txn = store.begin_write().unwrap();
        txn.put(&keys::chunk(Layer::Delta, 7, 0), b"aaaa").unwrap();
        txn.put(&keys::chunk(Layer::Delta, 7, 1), b"bbbb").unwrap();
        txn.put(&keys::chunk(Layer::Delta, 8, 0), b"cccc").unwrap();
        txn.commit().unwrap();

        let txn = store.begin_write().unwrap();
        assert_eq!(
            txn.delete_prefix(&keys::chunk_prefix(Layer::Delta, 7)).unwrap(),
            2
        );
        txn.commit().unwrap();

        let txn = store.begin_read().unwrap();
        assert!(!txn.any_key_with_prefix(&keys::chunk_prefix(Layer::Delta, 7)).unwrap());
        assert!(txn.any_key_with_prefix(&keys::chunk_prefix(Layer::Delta, 8)).unwrap());
    }

    #[test]
    fn test_last_key_orders_numerically() {
        let store = memory_store();
        let txn = store.begin_write().unwrap();
        for ino in [2u64, 10, 255, 16] {
            txn.put(&keys::inode(Layer::Base, ino), b"x").unwrap();
        }
        txn.commit().unwrap();

        let txn = store.begin_read().unwrap();
        let last = txn
            .last_key_with_prefix(&keys::inode_prefix(Layer::Base))
            .unwrap()
            .unwrap();
        assert_eq!(keys::hex_segment(&last), Some(255));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.db");
        let path = path.to_str().unwrap();

        {
            let store = Store::open(path).unwrap();
            let txn = store.begin_write().unwrap();
            txn.put_u64(keys::NEXT_INO, 42).unwrap();
            txn.commit().unwrap();
            store.flush().unwrap();
        }

        let store = Store::open(path).unwrap();
        let txn = store.begin_read().unwrap();
        assert_eq!(txn.get_u64(keys::NEXT_INO).unwrap(), Some(42));
    }
}
