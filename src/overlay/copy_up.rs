//! Copy-up: materializing base objects into the delta on first mutation.
//!
//! The central contract is inode stability: the delta record is written at
//! the *same* id the base record had, with provenance `CopiedUp{origin}`,
//! so `stat` keeps returning the id external inode caches already hold.
//! Base ids are reserved at seed time and the allocator starts above them,
//! so a delta allocation can never collide with a copied-up id.
//!
//! Copy-up runs inside the caller's write transaction; if the enclosing
//! mutation fails, the transaction rolls back and the base view is
//! untouched.

use crate::error::{FsError, FsResult};
use crate::store::{keys, WriteTxn};

use super::inode;
use super::types::{FileKind, InodeRecord, Layer, Provenance};

/// Ensure `ino` has a delta-layer record, copying it up from the base if
/// needed. Returns the delta record. Idempotent: an inode already in the
/// delta is returned as-is.
pub(crate) fn ensure_in_delta(txn: &WriteTxn<'_>, ino: u64) -> FsResult<InodeRecord> {
    let (rec, layer) = inode::load_required(txn, ino)?;
    if layer == Layer::Delta {
        return Ok(rec);
    }

    let mut copied = rec;
    copied.provenance = Provenance::CopiedUp { origin: ino };

    match copied.kind() {
        FileKind::File => {
            // Whole-file copy: every content chunk moves to the delta so
            // reads stay single-layer per file.
            for (key, value) in txn.scan_prefix(&keys::chunk_prefix(Layer::Base, ino))? {
                let index = keys::hex_segment(&key)
                    .ok_or_else(|| FsError::corruption(format!("bad chunk key {key}")))?;
                txn.put(&keys::chunk(Layer::Delta, ino, index), &value)?;
            }
        }
        FileKind::Symlink => {
            if let Some(target) = txn.get(&keys::symlink(Layer::Base, ino))? {
                txn.put(&keys::symlink(Layer::Delta, ino), &target)?;
            }
        }
        FileKind::Dir => {
            // Record only. Base directory entries keep resolving through
            // the union view; children copy up individually when mutated.
        }
    }

    for (key, value) in txn.scan_prefix(&keys::xattr_prefix(Layer::Base, ino))? {
        txn.put(
            &keys::xattr(Layer::Delta, ino, keys::name_segment(&key)),
            &value,
        )?;
    }

    inode::put(txn, Layer::Delta, ino, &copied)?;
    tracing::debug!(ino, kind = ?copied.kind(), "copied up base object");
    Ok(copied)
}
