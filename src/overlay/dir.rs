//! Directory store: `(parent, name) -> child` bindings and layered
//! enumeration.
//!
//! Each layer keeps its own entries under `DIR/<layer>/<parent>/`. The
//! logical view composes them: a delta entry wins over a base entry of the
//! same name, and a whiteout hides the base entry entirely. `.` and `..`
//! are synthesized by callers, never stored.

use std::collections::BTreeMap;

use crate::error::{FsError, FsResult};
use crate::store::{self, keys, ReadTxn, WriteTxn};

use super::types::Layer;
use super::whiteout;

fn decode_child(key: &str, value: &[u8]) -> FsResult<u64> {
    store::decode_u64(key, value)
}

/// Resolve one name in one logical directory: exactly one key probe per
/// layer, delta entry first, whiteout check, then base.
pub(crate) fn lookup_child(txn: &ReadTxn<'_>, parent: u64, name: &str) -> FsResult<Option<u64>> {
    if let Some(child) = delta_entry(txn, parent, name)? {
        return Ok(Some(child));
    }
    if whiteout::covers(txn, parent, name)? {
        return Ok(None);
    }
    base_entry(txn, parent, name)
}

pub(crate) fn delta_entry(txn: &ReadTxn<'_>, parent: u64, name: &str) -> FsResult<Option<u64>> {
    let key = keys::dir_entry(Layer::Delta, parent, name);
    match txn.get(&key)? {
        Some(value) => Ok(Some(decode_child(&key, &value)?)),
        None => Ok(None),
    }
}

pub(crate) fn base_entry(txn: &ReadTxn<'_>, parent: u64, name: &str) -> FsResult<Option<u64>> {
    let key = keys::dir_entry(Layer::Base, parent, name);
    match txn.get(&key)? {
        Some(value) => Ok(Some(decode_child(&key, &value)?)),
        None => Ok(None),
    }
}

/// Bind `(parent, name) -> child` in the delta. Clears any whiteout for the
/// name, preserving the exclusivity invariant.
pub(crate) fn insert_delta_entry(
    txn: &WriteTxn<'_>,
    parent: u64,
    name: &str,
    child: u64,
) -> FsResult<()> {
    whiteout::remove(txn, parent, name)?;
    txn.put(&keys::dir_entry(Layer::Delta, parent, name), &child.to_le_bytes())
}

pub(crate) fn remove_delta_entry(txn: &WriteTxn<'_>, parent: u64, name: &str) -> FsResult<bool> {
    txn.delete(&keys::dir_entry(Layer::Delta, parent, name))
}

/// Write a base-layer binding. Only valid during seeding.
pub(crate) fn insert_base_entry(
    txn: &WriteTxn<'_>,
    parent: u64,
    name: &str,
    child: u64,
) -> FsResult<()> {
    txn.put(&keys::dir_entry(Layer::Base, parent, name), &child.to_le_bytes())
}

/// The logical listing of a directory: base entries not whited-out, unioned
/// with delta entries, delta winning on name collisions. `BTreeMap` keeps
/// the result in lexicographic order.
pub(crate) fn list(txn: &ReadTxn<'_>, parent: u64) -> FsResult<BTreeMap<String, u64>> {
    let mut merged = BTreeMap::new();

    for (key, value) in txn.scan_prefix(&keys::dir_prefix(Layer::Base, parent))? {
        let name = keys::name_segment(&key);
        if whiteout::covers(txn, parent, name)? {
            continue;
        }
        merged.insert(name.to_string(), decode_child(&key, &value)?);
    }

    for (key, value) in txn.scan_prefix(&keys::dir_prefix(Layer::Delta, parent))? {
        let name = keys::name_segment(&key);
        merged.insert(name.to_string(), decode_child(&key, &value)?);
    }

    Ok(merged)
}

/// Does the directory have any live logical child?
pub(crate) fn has_any_child(txn: &ReadTxn<'_>, parent: u64) -> FsResult<bool> {
    if txn.any_key_with_prefix(&keys::dir_prefix(Layer::Delta, parent))? {
        return Ok(true);
    }
    for key in txn.scan_prefix_keys(&keys::dir_prefix(Layer::Base, parent))? {
        if !whiteout::covers(txn, parent, keys::name_segment(&key))? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Remove every binding artifact a directory leaves behind once its inode
/// is gone: delta entries, whiteouts. Base entries are immutable but become
/// unreachable once the parent no longer resolves.
pub(crate) fn clear_delta_listing(txn: &WriteTxn<'_>, parent: u64) -> FsResult<()> {
    txn.delete_prefix(&keys::dir_prefix(Layer::Delta, parent))?;
    txn.delete_prefix(&keys::whiteout_prefix(parent))?;
    Ok(())
}

/// Validate a name for binding creation. Path separators cannot occur here
/// (the resolver splits on them); empty names and the dot names are the
/// remaining hazards.
pub(crate) fn check_name(name: &str) -> FsResult<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(FsError::invalid(format!("invalid entry name {name:?}")));
    }
    if name.len() > super::path_resolver::MAX_NAME_LEN {
        return Err(FsError::NameTooLong);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MEMORY_PATH;
    use crate::store::Store;

    fn store() -> Store {
        Store::open(MEMORY_PATH).unwrap()
    }

    #[test]
    fn test_delta_wins_over_base() {
        let s = store();
        let txn = s.begin_write().unwrap();
        insert_base_entry(&txn, 1, "f", 10).unwrap();
        insert_delta_entry(&txn, 1, "f", 20).unwrap();
        assert_eq!(lookup_child(&txn, 1, "f").unwrap(), Some(20));
    }

    #[test]
    fn test_whiteout_hides_base() {
        let s = store();
        let txn = s.begin_write().unwrap();
        insert_base_entry(&txn, 1, "f", 10).unwrap();
        assert_eq!(lookup_child(&txn, 1, "f").unwrap(), Some(10));

        whiteout::insert(&txn, 1, "f").unwrap();
        assert_eq!(lookup_child(&txn, 1, "f").unwrap(), None);

        // Re-binding in the delta clears the whiteout.
        insert_delta_entry(&txn, 1, "f", 30).unwrap();
        assert_eq!(lookup_child(&txn, 1, "f").unwrap(), Some(30));
        assert!(!whiteout::covers(&txn, 1, "f").unwrap());
    }

    #[test]
    fn test_list_union_is_lexicographic() {
        let s = store();
        let txn = s.begin_write().unwrap();
        insert_base_entry(&txn, 1, "a", 10).unwrap();
        insert_base_entry(&txn, 1, "b", 11).unwrap();
        insert_base_entry(&txn, 1, "c", 12).unwrap();
        whiteout::insert(&txn, 1, "b").unwrap();
        insert_delta_entry(&txn, 1, "d", 13).unwrap();

        let listing = list(&txn, 1).unwrap();
        let names: Vec<&str> = listing.keys().map(|s| s.as_str()).collect();
        assert_eq!(names, vec!["a", "c", "d"]);
    }

    #[test]
    fn test_has_any_child() {
        let s = store();
        let txn = s.begin_write().unwrap();
        assert!(!has_any_child(&txn, 1).unwrap());

        insert_base_entry(&txn, 1, "only", 10).unwrap();
        assert!(has_any_child(&txn, 1).unwrap());

        whiteout::insert(&txn, 1, "only").unwrap();
        assert!(!has_any_child(&txn, 1).unwrap());

        insert_delta_entry(&txn, 1, "fresh", 11).unwrap();
        assert!(has_any_child(&txn, 1).unwrap());
    }

    #[test]
    fn test_check_name() {
        assert!(check_name("ok.txt").is_ok());
        assert!(check_name("").is_err());
        assert!(check_name(".").is_err());
        assert!(check_name("..").is_err());
        assert!(matches!(
            check_name(&"x".repeat(256)),
            Err(FsError::NameTooLong)
        ));
    }
}
