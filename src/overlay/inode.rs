//! Inode table access: layered record loads, id allocation, and object
//! deletion.

use crate::error::{FsError, FsResult};
use crate::store::{keys, ReadTxn, WriteTxn};

use super::types::{InodeRecord, Layer};

/// Load the record for `ino`, preferring the delta layer. This is the
/// overlay read rule: a delta record (native or copied-up) always wins.
pub(crate) fn load(txn: &ReadTxn<'_>, ino: u64) -> FsResult<Option<(InodeRecord, Layer)>> {
    if let Some(bytes) = txn.get(&keys::inode(Layer::Delta, ino))? {
        return Ok(Some((InodeRecord::decode(&bytes)?, Layer::Delta)));
    }
    if let Some(bytes) = txn.get(&keys::inode(Layer::Base, ino))? {
        return Ok(Some((InodeRecord::decode(&bytes)?, Layer::Base)));
    }
    Ok(None)
}

/// Load a record that a directory entry points at. A dangling entry is an
/// invariant violation, not a lookup miss.
pub(crate) fn load_required(txn: &ReadTxn<'_>, ino: u64) -> FsResult<(InodeRecord, Layer)> {
    load(txn, ino)?.ok_or_else(|| {
        FsError::corruption(format!("directory entry points at missing inode {ino}"))
    })
}

pub(crate) fn put(txn: &WriteTxn<'_>, layer: Layer, ino: u64, rec: &InodeRecord) -> FsResult<()> {
    txn.put(&keys::inode(layer, ino), &rec.encode())
}

/// Allocate the next inode id from the persisted monotonic counter.
/// Ids are never reused within a database's lifetime.
pub(crate) fn alloc_ino(txn: &WriteTxn<'_>) -> FsResult<u64> {
    let next = txn
        .get_u64(keys::NEXT_INO)?
        .ok_or_else(|| FsError::corruption("META/next_ino missing"))?;
    txn.put_u64(keys::NEXT_INO, next + 1)?;
    Ok(next)
}

/// Symlink target for `ino`, read from the layer its record lives in.
pub(crate) fn symlink_target(txn: &ReadTxn<'_>, ino: u64, layer: Layer) -> FsResult<String> {
    let bytes = txn
        .get(&keys::symlink(layer, ino))?
        .ok_or_else(|| FsError::corruption(format!("symlink inode {ino} has no target")))?;
    String::from_utf8(bytes)
        .map_err(|_| FsError::corruption(format!("symlink target of inode {ino} is not UTF-8")))
}

/// Delete a delta-layer object: record, content chunks, xattrs, and symlink
/// target. Base records are immutable and never deleted.
pub(crate) fn delete_delta_object(txn: &WriteTxn<'_>, ino: u64) -> FsResult<()> {
    txn.delete(&keys::inode(Layer::Delta, ino))?;
    txn.delete_prefix(&keys::chunk_prefix(Layer::Delta, ino))?;
    txn.delete_prefix(&keys::xattr_prefix(Layer::Delta, ino))?;
    txn.delete(&keys::symlink(Layer::Delta, ino))?;
    tracing::debug!(ino, "deleted delta object");
    Ok(())
}

/// Largest seeded base inode id, if any base objects exist.
pub(crate) fn max_base_ino(txn: &ReadTxn<'_>) -> FsResult<Option<u64>> {
    let last = txn.last_key_with_prefix(&keys::inode_prefix(Layer::Base))?;
    Ok(last.as_deref().and_then(keys::hex_segment))
}
