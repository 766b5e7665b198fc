//! Chunked file content I/O.
//!
//! File bytes live under `CHUNK/<layer>/<ino>/<index>` keys at a fixed
//! 64 KiB granularity. The inode record's `size` is authoritative for EOF;
//! missing or short chunks inside the size read back as zeros, so sparse
//! extends never materialize chunks.

use crate::error::FsResult;
use crate::store::{keys, ReadTxn, WriteTxn};

use super::types::{Layer, CHUNK_SIZE};

/// Read up to `len` bytes at `offset`, clamped to `size`.
pub(crate) fn read(
    txn: &ReadTxn<'_>,
    layer: Layer,
    ino: u64,
    size: u64,
    offset: u64,
    len: u64,
) -> FsResult<Vec<u8>> {
    if offset >= size {
        return Ok(Vec::new());
    }
    let end = size.min(offset.saturating_add(len));
    let mut out = vec![0u8; (end - offset) as usize];

    let mut pos = offset;
    while pos < end {
        let index = pos / CHUNK_SIZE;
        let in_off = (pos % CHUNK_SIZE) as usize;
        let take = ((CHUNK_SIZE - in_off as u64).min(end - pos)) as usize;

        if let Some(chunk) = txn.get(&keys::chunk(layer, ino, index))? {
            let avail = chunk.len().saturating_sub(in_off).min(take);
            if avail > 0 {
                let dst = (pos - offset) as usize;
                out[dst..dst + avail].copy_from_slice(&chunk[in_off..in_off + avail]);
            }
        }

        pos += take as u64;
    }

    Ok(out)
}

/// Write `data` at `offset` into the delta layer, read-modify-writing the
/// chunks the range straddles. The caller owns the size/mtime update on the
/// inode record.
pub(crate) fn write(txn: &WriteTxn<'_>, ino: u64, offset: u64, data: &[u8]) -> FsResult<()> {
    let end = offset + data.len() as u64;
    let mut pos = offset;
    let mut src = 0usize;

    while pos < end {
        let index = pos / CHUNK_SIZE;
        let in_off = (pos % CHUNK_SIZE) as usize;
        let take = ((CHUNK_SIZE - in_off as u64).min(end - pos)) as usize;

        let key = keys::chunk(Layer::Delta, ino, index);
        let mut chunk = txn.get(&key)?.unwrap_or_default();
        if chunk.len() < in_off + take {
            chunk.resize(in_off + take, 0);
        }
        chunk[in_off..in_off + take].copy_from_slice(&data[src..src + take]);
        txn.put(&key, &chunk)?;

        pos += take as u64;
        src += take;
    }

    Ok(())
}

/// Drop delta chunks beyond `new_size` and trim the final chunk. Growing a
/// file needs no chunk work; the hole reads as zeros.
pub(crate) fn truncate(txn: &WriteTxn<'_>, ino: u64, new_size: u64) -> FsResult<()> {
    if new_size == 0 {
        txn.delete_prefix(&keys::chunk_prefix(Layer::Delta, ino))?;
        return Ok(());
    }

    let last_index = (new_size - 1) / CHUNK_SIZE;
    for key in txn.scan_prefix_keys(&keys::chunk_prefix(Layer::Delta, ino))? {
        if keys::hex_segment(&key).is_some_and(|index| index > last_index) {
            txn.delete(&key)?;
        }
    }

    let keep = (new_size - last_index * CHUNK_SIZE) as usize;
    let last_key = keys::chunk(Layer::Delta, ino, last_index);
    if let Some(mut chunk) = txn.get(&last_key)? {
        if chunk.len() > keep {
            chunk.truncate(keep);
            txn.put(&last_key, &chunk)?;
        }
    }

    Ok(())
}

/// Remove all delta chunks for `ino`. Used by whole-file overwrites.
pub(crate) fn clear(txn: &WriteTxn<'_>, ino: u64) -> FsResult<()> {
    txn.delete_prefix(&keys::chunk_prefix(Layer::Delta, ino))?;
    Ok(())
}
