//! Whiteout handling for the overlay.
//!
//! A whiteout is a delta-side marker recording that a name visible through
//! the base layer has been logically removed. It is a presence-only key at
//! `WHITE/<parent>/<name>`; this module consolidates all whiteout logic so
//! the per-name exclusivity invariant (a delta directory entry and a
//! whiteout never coexist) is maintained in one place.

use crate::error::FsResult;
use crate::store::{keys, ReadTxn, WriteTxn};

/// Lay a whiteout over `(parent, name)`, hiding any base binding.
///
/// The caller must have removed any delta directory entry for the name
/// first; inserting a delta entry goes through
/// [`super::dir::insert_delta_entry`], which clears the whiteout again.
pub(crate) fn insert(txn: &WriteTxn<'_>, parent: u64, name: &str) -> FsResult<()> {
    txn.put(&keys::whiteout(parent, name), &[])
}

/// Remove the whiteout for `(parent, name)`, if present.
pub(crate) fn remove(txn: &WriteTxn<'_>, parent: u64, name: &str) -> FsResult<bool> {
    txn.delete(&keys::whiteout(parent, name))
}

/// Is `(parent, name)` covered by a whiteout?
pub(crate) fn covers(txn: &ReadTxn<'_>, parent: u64, name: &str) -> FsResult<bool> {
    txn.exists(&keys::whiteout(parent, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MEMORY_PATH;
    use crate::store::Store;

    #[test]
    fn test_insert_covers_remove() {
        let store = Store::open(MEMORY_PATH).unwrap();
        let txn = store.begin_write().unwrap();

        assert!(!covers(&txn, 1, "a.txt").unwrap());
        insert(&txn, 1, "a.txt").unwrap();
        assert!(covers(&txn, 1, "a.txt").unwrap());
        assert!(!covers(&txn, 1, "b.txt").unwrap());
        assert!(!covers(&txn, 2, "a.txt").unwrap());

        assert!(remove(&txn, 1, "a.txt").unwrap());
        assert!(!covers(&txn, 1, "a.txt").unwrap());
        assert!(!remove(&txn, 1, "a.txt").unwrap());
    }
}
